//! Container-level resource counters, collected by running a diagnostic
//! command inside each worker and translated into two synthetic families.

use std::fmt::Write;
use std::sync::Arc;

use tracing::debug;

use crate::cluster::{ExecChannel, WorkerRef};
use crate::expfmt::{self, MetricFamily};

use super::epoch_millis;

/// Reads the cumulative CPU counter, current memory usage, and the memory
/// breakdown in one round-trip.
pub const STAT_COMMAND: &str = "cat /sys/fs/cgroup/cpu/cpuacct.usage \
     /sys/fs/cgroup/memory/memory.usage_in_bytes /sys/fs/cgroup/memory/memory.stat";

pub const CPU_FAMILY: &str = "container_cpu_usage_seconds_total";
pub const MEMORY_FAMILY: &str = "container_memory_working_set_bytes";

/// Translate raw cgroup counter text into exposition text for the two
/// synthetic families, labeled with the worker name and stamped with the
/// given instant.
///
/// Input layout: line 1 cumulative CPU nanoseconds, line 2 memory usage in
/// bytes, remaining lines `key value` memory-breakdown pairs (malformed
/// pairs are skipped). The working set is memory usage minus
/// `total_inactive_file`, floored at zero. CPU seconds truncate fractional
/// seconds, which the coarse polling interval makes irrelevant.
///
/// Returns `None` when the input is empty or either counter line is
/// missing or unparseable; partial input is skipped whole rather than
/// half-translated.
pub fn translate(raw: &str, pod: &str, timestamp_ms: i64) -> Option<String> {
    let mut lines = raw.lines();

    let cpu_ns: u64 = lines.next()?.trim().parse().ok()?;
    let mut memory: u64 = lines.next()?.trim().parse().ok()?;

    for line in lines {
        let Some((key, value)) = parse_key_value(line) else {
            continue;
        };
        if key == "total_inactive_file" {
            memory = memory.saturating_sub(value);
            break;
        }
    }

    let cpu_seconds = cpu_ns / 1_000_000_000;

    let mut out = String::with_capacity(512);
    out.push_str("# HELP container_cpu_usage_seconds_total Cumulative cpu time consumed in seconds.\n");
    out.push_str("# TYPE container_cpu_usage_seconds_total counter\n");
    let _ = writeln!(out, "container_cpu_usage_seconds_total{{pod=\"{pod}\"}} {cpu_seconds} {timestamp_ms}");
    out.push_str("# HELP container_memory_working_set_bytes Current working set in bytes.\n");
    out.push_str("# TYPE container_memory_working_set_bytes gauge\n");
    let _ = writeln!(out, "container_memory_working_set_bytes{{pod=\"{pod}\"}} {memory} {timestamp_ms}");

    Some(out)
}

/// Parse one `key value` breakdown line; anything else is `None`.
fn parse_key_value(line: &str) -> Option<(&str, u64)> {
    let mut parts = line.split_whitespace();
    let key = parts.next()?;
    let value: u64 = parts.next()?.parse().ok()?;
    if parts.next().is_some() {
        return None;
    }
    Some((key, value))
}

/// Fetches the synthetic container-stat families for one worker through
/// the exec channel.
pub struct ContainerStatFetcher<E> {
    exec: Arc<E>,
}

impl<E: ExecChannel> ContainerStatFetcher<E> {
    pub fn new(exec: Arc<E>) -> Self {
        Self { exec }
    }

    /// Collect the two synthetic families for one worker.
    ///
    /// Exec failures and empty or truncated output yield an empty result,
    /// not an error: workers are routinely unreachable mid-rollout. The
    /// translated text goes back through the canonical exposition parser so
    /// synthetic and real families take the same path into the pipeline.
    pub async fn fetch(&self, worker: &WorkerRef) -> Vec<MetricFamily> {
        let output = match self.exec.exec(worker, STAT_COMMAND).await {
            Ok(output) => output,
            Err(e) => {
                debug!(pod = %worker.name, error = %e, "container stat exec failed");
                return Vec::new();
            }
        };

        if !output.stderr.is_empty() {
            debug!(pod = %worker.name, stderr = %output.stderr.trim(), "container stat exec stderr");
        }

        let timestamp_ms = epoch_millis();
        let Some(text) = translate(&output.stdout, &worker.name, timestamp_ms) else {
            return Vec::new();
        };

        match expfmt::parse_text(&text) {
            Ok(families) => families,
            Err(e) => {
                debug!(pod = %worker.name, error = %e, "synthetic family parse failed");
                Vec::new()
            }
        }
    }
}
