//! Recurring collection: tick orchestration and per-worker fan-out.

pub mod cgroup;
pub mod filter;
pub mod metrics;
pub mod profile;
pub mod stats;

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::Result;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::cluster::{self, ExecChannel, MembershipSource, WorkerRef};
use crate::config::Config;
use crate::expfmt::MetricFamily;

use self::cgroup::ContainerStatFetcher;
use self::metrics::MetricsFetcher;
use self::stats::RunStats;

/// Milliseconds since the Unix epoch, the timestamp unit of every sample
/// this pipeline emits.
pub fn epoch_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_millis() as i64
}

/// Fans out per-worker fetch tasks on every tick and pushes every produced
/// family onto the shared channel feeding the single writer.
///
/// The worker set is resolved fresh each tick; a failed listing skips the
/// tick, and a failed fetch skips one worker for one tick. Neither aborts
/// the run or delays other workers.
pub struct Orchestrator<M, E> {
    membership: Arc<M>,
    metrics: Arc<MetricsFetcher>,
    container_stats: Arc<ContainerStatFetcher<E>>,
    stats: Arc<RunStats>,
    namespace: String,
    worker_prefix: String,
    interval: Duration,
    tx: mpsc::Sender<MetricFamily>,
    cancel: CancellationToken,
}

impl<M, E> Orchestrator<M, E>
where
    M: MembershipSource + 'static,
    E: ExecChannel + 'static,
{
    pub fn new(
        membership: Arc<M>,
        exec: Arc<E>,
        cfg: &Config,
        stats: Arc<RunStats>,
        tx: mpsc::Sender<MetricFamily>,
        cancel: CancellationToken,
    ) -> Result<Self> {
        Ok(Self {
            membership,
            metrics: Arc::new(MetricsFetcher::new(
                cfg.fetch.metrics_port,
                cfg.fetch.metrics_timeout,
            )?),
            container_stats: Arc::new(ContainerStatFetcher::new(exec)),
            stats,
            namespace: cfg.namespace.clone(),
            worker_prefix: cluster::release_prefix(&cfg.release),
            interval: cfg.interval,
            tx,
            cancel,
        })
    }

    /// Tick until cancelled, then wait for every in-flight fetch task.
    ///
    /// The first tick fires one interval after start. Returning drops the
    /// channel sender, so the writer only sees end-of-stream after every
    /// task that could still push a family has been joined.
    pub async fn run(self) {
        let mut ticker = tokio::time::interval_at(
            tokio::time::Instant::now() + self.interval,
            self.interval,
        );
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        let mut in_flight: JoinSet<()> = JoinSet::new();

        loop {
            tokio::select! {
                // Biased: a tick due exactly at the cancellation instant
                // still runs, so duration = N * interval yields N ticks.
                biased;
                _ = ticker.tick() => self.start_tick(&mut in_flight).await,
                Some(_) = in_flight.join_next(), if !in_flight.is_empty() => {}
                _ = self.cancel.cancelled() => break,
            }
        }

        while in_flight.join_next().await.is_some() {}
        debug!("collection loop drained");
    }

    async fn start_tick(&self, in_flight: &mut JoinSet<()>) {
        self.stats.ticks.inc();

        let workers = match self.membership.list_workers(&self.namespace).await {
            Ok(workers) => workers,
            Err(e) => {
                warn!(error = %e, "worker listing failed, skipping tick");
                return;
            }
        };

        let mut matched = 0usize;
        for worker in workers {
            if !worker.name.starts_with(&self.worker_prefix) {
                continue;
            }
            matched += 1;
            self.stats.workers_seen.inc();
            self.spawn_metrics_fetch(in_flight, worker.clone());
            self.spawn_container_stat_fetch(in_flight, worker);
        }

        debug!(tick = self.stats.ticks.get(), workers = matched, "tick fanned out");
    }

    fn spawn_metrics_fetch(&self, in_flight: &mut JoinSet<()>, worker: WorkerRef) {
        let fetcher = Arc::clone(&self.metrics);
        let tx = self.tx.clone();
        let stats = Arc::clone(&self.stats);

        in_flight.spawn(async move {
            match fetcher.fetch(&worker).await {
                Ok(families) => {
                    stats.metrics_fetches_ok.inc();
                    push_families(&tx, &stats, families).await;
                }
                Err(e) => {
                    stats.metrics_fetches_failed.inc();
                    debug!(pod = %worker.name, error = %e, "metrics fetch failed, skipping worker this tick");
                }
            }
        });
    }

    fn spawn_container_stat_fetch(&self, in_flight: &mut JoinSet<()>, worker: WorkerRef) {
        let fetcher = Arc::clone(&self.container_stats);
        let tx = self.tx.clone();
        let stats = Arc::clone(&self.stats);

        in_flight.spawn(async move {
            let families = fetcher.fetch(&worker).await;
            if families.is_empty() {
                stats.stat_fetches_empty.inc();
            } else {
                stats.stat_fetches_ok.inc();
            }
            push_families(&tx, &stats, families).await;
        });
    }
}

/// Blocking send: a full channel backpressures the fetch task rather than
/// dropping data. A closed channel means the writer is gone and the task's
/// remaining results are abandoned.
async fn push_families(
    tx: &mpsc::Sender<MetricFamily>,
    stats: &RunStats,
    families: Vec<MetricFamily>,
) {
    for family in families {
        if tx.send(family).await.is_err() {
            return;
        }
        stats.families_collected.inc();
    }
}
