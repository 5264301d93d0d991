//! One-shot capture of runtime profiling dumps.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;

use crate::cluster::WorkerRef;

/// Profiling endpoints captured once per run, per worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfileKind {
    /// Full dump of all goroutine stacks, including blocked ones.
    Goroutine,
    /// CPU profile sampled over the endpoint's default window.
    Cpu,
}

impl ProfileKind {
    pub const ALL: [ProfileKind; 2] = [ProfileKind::Goroutine, ProfileKind::Cpu];

    fn endpoint(self) -> &'static str {
        match self {
            ProfileKind::Goroutine => "/debug/pprof/goroutine?debug=2",
            ProfileKind::Cpu => "/debug/pprof/profile",
        }
    }

    fn file_prefix(self) -> &'static str {
        match self {
            ProfileKind::Goroutine => "goroutine",
            ProfileKind::Cpu => "profile",
        }
    }

    /// Output file name for one worker's capture.
    pub fn file_name(self, pod: &str) -> String {
        format!("{}-{}", self.file_prefix(), pod)
    }
}

/// Streams profiling dumps from workers to one file per (worker, kind).
/// Bytes pass through unmodified; nothing is parsed or retried.
pub struct ProfileFetcher {
    http: reqwest::Client,
    port: u16,
    data_dir: PathBuf,
}

impl ProfileFetcher {
    /// The timeout must cover the CPU endpoint's server-side sampling
    /// window on top of transfer time.
    pub fn new(port: u16, timeout: Duration, data_dir: &Path) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("building profile HTTP client")?;

        Ok(Self {
            http,
            port,
            data_dir: data_dir.to_path_buf(),
        })
    }

    /// Stream one endpoint's bytes to its file, returning the byte count.
    pub async fn capture(&self, worker: &WorkerRef, kind: ProfileKind) -> Result<u64> {
        let url = format!("http://{}:{}{}", worker.address, self.port, kind.endpoint());

        let mut response = self
            .http
            .get(&url)
            .send()
            .await
            .with_context(|| format!("requesting {url}"))?
            .error_for_status()
            .with_context(|| format!("fetching profile from {}", worker.name))?;

        let path = self.data_dir.join(kind.file_name(&worker.name));
        let mut file = File::create(&path)
            .await
            .with_context(|| format!("creating {}", path.display()))?;

        let mut written = 0u64;
        while let Some(chunk) = response
            .chunk()
            .await
            .with_context(|| format!("streaming profile from {}", worker.name))?
        {
            file.write_all(&chunk)
                .await
                .with_context(|| format!("writing {}", path.display()))?;
            written += chunk.len() as u64;
        }

        file.flush()
            .await
            .with_context(|| format!("flushing {}", path.display()))?;

        Ok(written)
    }
}
