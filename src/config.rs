use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

/// Top-level run configuration. Immutable for the run's lifetime.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Kubernetes namespace the release runs in.
    pub namespace: String,

    /// Helm release name; workers and deployments are selected by the
    /// `<release>-milvus` name prefix.
    pub release: String,

    /// Total collection window.
    #[serde(with = "humantime_serde")]
    pub duration: Duration,

    /// Polling interval of the tick loop.
    #[serde(with = "humantime_serde")]
    pub interval: Duration,

    /// Directory receiving the metrics stream, profile dumps, and the
    /// inventory report. Default: "data".
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Fetch tuning knobs.
    #[serde(default)]
    pub fetch: FetchConfig,

    /// Kubernetes API endpoint override. When unset, the in-cluster
    /// environment (service env vars + mounted service account) is used.
    #[serde(default)]
    pub api_endpoint: Option<String>,
}

/// Per-call network tuning. All timeouts are deliberately configurable
/// rather than hard-coded.
#[derive(Debug, Clone, Deserialize)]
pub struct FetchConfig {
    /// Port serving /metrics and /debug/pprof on worker pods. Default: 9091.
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,

    /// Per-call timeout for worker /metrics fetches. Default: 10s.
    #[serde(default = "default_metrics_timeout", with = "humantime_serde")]
    pub metrics_timeout: Duration,

    /// Per-call timeout for Kubernetes API reads. Default: 10s.
    #[serde(default = "default_api_timeout", with = "humantime_serde")]
    pub api_timeout: Duration,

    /// Per-call timeout for remote exec round-trips. Default: 15s.
    #[serde(default = "default_exec_timeout", with = "humantime_serde")]
    pub exec_timeout: Duration,

    /// Per-call timeout for profile captures. Must cover the CPU endpoint's
    /// server-side sampling window (30s) on top of transfer time.
    /// Default: 90s.
    #[serde(default = "default_profile_timeout", with = "humantime_serde")]
    pub profile_timeout: Duration,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            metrics_port: default_metrics_port(),
            metrics_timeout: default_metrics_timeout(),
            api_timeout: default_api_timeout(),
            exec_timeout: default_exec_timeout(),
            profile_timeout: default_profile_timeout(),
        }
    }
}

impl Config {
    /// Load and validate a YAML configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;

        let cfg: Config = serde_yaml::from_str(&data)
            .with_context(|| format!("parsing {}", path.display()))?;

        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<()> {
        if self.namespace.is_empty() {
            bail!("namespace must not be empty");
        }

        if self.release.is_empty() {
            bail!("release must not be empty");
        }

        if self.interval.is_zero() {
            bail!("interval must be greater than zero");
        }

        if self.duration < self.interval {
            bail!(
                "duration ({:?}) must be at least one interval ({:?})",
                self.duration,
                self.interval,
            );
        }

        Ok(())
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_metrics_port() -> u16 {
    9091
}

fn default_metrics_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_api_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_exec_timeout() -> Duration {
    Duration::from_secs(15)
}

fn default_profile_timeout() -> Duration {
    Duration::from_secs(90)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(yaml: &str) -> Result<Config> {
        let cfg: Config = serde_yaml::from_str(yaml)?;
        cfg.validate()?;
        Ok(cfg)
    }

    #[test]
    fn test_minimal_config() {
        let cfg = parse(
            "namespace: milvus\nrelease: my-release\nduration: 10m\ninterval: 30s\n",
        )
        .expect("valid config");

        assert_eq!(cfg.namespace, "milvus");
        assert_eq!(cfg.release, "my-release");
        assert_eq!(cfg.duration, Duration::from_secs(600));
        assert_eq!(cfg.interval, Duration::from_secs(30));
        assert_eq!(cfg.data_dir, PathBuf::from("data"));
        assert_eq!(cfg.fetch.metrics_port, 9091);
        assert_eq!(cfg.fetch.profile_timeout, Duration::from_secs(90));
        assert!(cfg.api_endpoint.is_none());
    }

    #[test]
    fn test_overrides() {
        let cfg = parse(
            "\
namespace: milvus
release: rel
duration: 2m
interval: 10s
data_dir: /tmp/out
api_endpoint: http://127.0.0.1:8001
fetch:
  metrics_port: 9092
  metrics_timeout: 2s
  exec_timeout: 5s
",
        )
        .expect("valid config");

        assert_eq!(cfg.data_dir, PathBuf::from("/tmp/out"));
        assert_eq!(cfg.api_endpoint.as_deref(), Some("http://127.0.0.1:8001"));
        assert_eq!(cfg.fetch.metrics_port, 9092);
        assert_eq!(cfg.fetch.metrics_timeout, Duration::from_secs(2));
        assert_eq!(cfg.fetch.exec_timeout, Duration::from_secs(5));
        // Unset knobs keep their defaults.
        assert_eq!(cfg.fetch.api_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_rejects_empty_namespace() {
        let result = parse("namespace: \"\"\nrelease: rel\nduration: 1m\ninterval: 10s\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_rejects_zero_interval() {
        let result = parse("namespace: ns\nrelease: rel\nduration: 1m\ninterval: 0s\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_rejects_duration_shorter_than_interval() {
        let result = parse("namespace: ns\nrelease: rel\nduration: 5s\ninterval: 10s\n");
        assert!(result
            .expect_err("should fail")
            .to_string()
            .contains("at least one interval"));
    }
}
