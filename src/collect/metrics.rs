//! Per-worker fetch of self-reported metrics.

use std::time::Duration;

use anyhow::{bail, Context, Result};

use crate::cluster::WorkerRef;
use crate::expfmt::{self, MetricFamily};

use super::{epoch_millis, filter};

/// Fetches the `/metrics` endpoint of worker pods, stamps every sample with
/// the fetch-start instant, and applies the allow-list.
pub struct MetricsFetcher {
    http: reqwest::Client,
    port: u16,
}

impl MetricsFetcher {
    pub fn new(port: u16, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("building metrics HTTP client")?;

        Ok(Self { http, port })
    }

    /// Fetch one worker's families. A transport or parse failure is an
    /// error the caller handles by skipping the worker this tick.
    pub async fn fetch(&self, worker: &WorkerRef) -> Result<Vec<MetricFamily>> {
        let url = format!("http://{}:{}/metrics", worker.address, self.port);
        let started_ms = epoch_millis();

        let response = self
            .http
            .get(&url)
            .send()
            .await
            .with_context(|| format!("requesting {url}"))?;

        // Read the body to completion before acting on the status so the
        // connection is always drained.
        let status = response.status();
        let body = response
            .text()
            .await
            .with_context(|| format!("reading metrics body from {}", worker.name))?;

        if !status.is_success() {
            bail!("unexpected status {status} from {url}");
        }

        let families = expfmt::parse_text(&body)
            .with_context(|| format!("parsing metrics from {}", worker.name))?;

        Ok(process(families, started_ms))
    }
}

/// Reduce parsed families to the allow-list and overwrite every sample
/// timestamp with the fetch-start instant. Source timestamps never survive.
pub fn process(families: Vec<MetricFamily>, started_ms: i64) -> Vec<MetricFamily> {
    families
        .into_iter()
        .filter(|family| filter::keep(&family.name))
        .map(|mut family| {
            family.stamp(started_ms);
            family
        })
        .collect()
}
