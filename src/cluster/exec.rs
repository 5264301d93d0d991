//! Remote command execution inside worker pods.

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use tokio::process::Command;

use super::WorkerRef;

/// Captured output of a remote command.
#[derive(Debug, Default, Clone)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Best-effort remote exec: run a shell command inside a worker and capture
/// its output. A non-zero exit is not an error; whatever was captured is
/// returned and the caller decides what empty output means.
pub trait ExecChannel: Send + Sync {
    fn exec(
        &self,
        worker: &WorkerRef,
        command: &str,
    ) -> impl std::future::Future<Output = Result<ExecOutput>> + Send;
}

/// Exec channel backed by the `kubectl` CLI.
pub struct KubectlExec {
    timeout: Duration,
}

impl KubectlExec {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl ExecChannel for KubectlExec {
    async fn exec(&self, worker: &WorkerRef, command: &str) -> Result<ExecOutput> {
        let output = Command::new("kubectl")
            .args([
                "exec",
                "-n",
                &worker.namespace,
                &worker.name,
                "--",
                "/bin/sh",
                "-c",
                command,
            ])
            .kill_on_drop(true)
            .output();

        let output = tokio::time::timeout(self.timeout, output)
            .await
            .map_err(|_| anyhow!("exec in {} timed out after {:?}", worker.name, self.timeout))?
            .context("running kubectl exec")?;

        Ok(ExecOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}
