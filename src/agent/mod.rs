//! Run lifecycle: startup, the bounded collection window, and ordered
//! shutdown.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cluster::{self, KubeClient, KubectlExec, MembershipSource};
use crate::collect::profile::{ProfileFetcher, ProfileKind};
use crate::collect::stats::RunStats;
use crate::collect::Orchestrator;
use crate::config::Config;
use crate::report;
use crate::sink::{self, MetricWriter};

/// File name of the metrics output stream inside the data directory.
pub const METRICS_FILE: &str = "metrics-info";

/// Execute one bounded collection run.
///
/// Shutdown ordering is the correctness-critical part: the duration timer
/// cancels the orchestrator, the orchestrator stops arming ticks and joins
/// every in-flight fetch task, and only then does the last channel sender
/// drop. The writer finalizes the stream on channel closure, so no write
/// can race the end-of-stream marker.
pub async fn run(cfg: Config) -> Result<()> {
    // Startup failures are fatal: nothing has been collected yet and no
    // recovery path is meaningful.
    tokio::fs::create_dir_all(&cfg.data_dir)
        .await
        .with_context(|| format!("creating data directory {}", cfg.data_dir.display()))?;

    let kube = Arc::new(build_kube_client(&cfg)?);
    let prefix = cluster::release_prefix(&cfg.release);

    let address = kube
        .service_address(&cfg.namespace, &prefix)
        .await
        .context("resolving milvus service address")?;
    info!(service = %prefix, %address, "resolved data-plane service");

    report::write_report(kube.as_ref(), &cfg.namespace, &prefix, &cfg.data_dir).await?;

    let out = tokio::fs::File::create(cfg.data_dir.join(METRICS_FILE))
        .await
        .context("creating metrics output stream")?;

    let (tx, rx) = sink::family_channel();
    let mut writer_task = tokio::spawn(async move {
        let mut writer = MetricWriter::new(out);
        writer.run(rx).await.map(|()| writer.families_written())
    });

    let stats = Arc::new(RunStats::new());

    // One-shot profile round, independent of the tick loop.
    let profiles = ProfileFetcher::new(
        cfg.fetch.metrics_port,
        cfg.fetch.profile_timeout,
        &cfg.data_dir,
    )?;
    let profile_task = tokio::spawn(capture_profiles(
        Arc::clone(&kube),
        profiles,
        cfg.namespace.clone(),
        prefix.clone(),
        Arc::clone(&stats),
    ));

    let cancel = CancellationToken::new();
    let orchestrator = Orchestrator::new(
        Arc::clone(&kube),
        Arc::new(KubectlExec::new(cfg.fetch.exec_timeout)),
        &cfg,
        Arc::clone(&stats),
        tx,
        cancel.child_token(),
    )?;
    let collect_task = tokio::spawn(orchestrator.run());

    info!(
        namespace = %cfg.namespace,
        release = %cfg.release,
        duration = ?cfg.duration,
        interval = ?cfg.interval,
        "collection started",
    );

    tokio::select! {
        _ = tokio::time::sleep(cfg.duration) => {}
        early = &mut writer_task => {
            // The writer never returns while producers hold the channel, so
            // finishing early means the output stream failed. Collection
            // cannot continue without a sink.
            cancel.cancel();
            collect_task.await.context("joining collection loop")?;
            profile_task.await.context("joining profile round")?;
            early.context("joining writer task")??;
            bail!("output stream closed before the collection window elapsed");
        }
    }
    cancel.cancel();

    collect_task.await.context("joining collection loop")?;
    let families = writer_task
        .await
        .context("joining writer task")?
        .context("serializing metrics")?;
    profile_task.await.context("joining profile round")?;

    info!(
        ticks = stats.ticks.get(),
        workers = stats.workers_seen.get(),
        metrics_ok = stats.metrics_fetches_ok.get(),
        metrics_failed = stats.metrics_fetches_failed.get(),
        stats_ok = stats.stat_fetches_ok.get(),
        stats_empty = stats.stat_fetches_empty.get(),
        families,
        profiles_ok = stats.profiles_captured.get(),
        profiles_failed = stats.profiles_failed.get(),
        "collection finished",
    );

    Ok(())
}

fn build_kube_client(cfg: &Config) -> Result<KubeClient> {
    match &cfg.api_endpoint {
        Some(endpoint) => KubeClient::with_endpoint(endpoint, cfg.fetch.api_timeout),
        None => KubeClient::from_cluster_env(cfg.fetch.api_timeout),
    }
}

/// Capture both profile kinds from every current worker, concurrently.
/// Failures are counted, never retried.
async fn capture_profiles<M: MembershipSource + 'static>(
    membership: Arc<M>,
    fetcher: ProfileFetcher,
    namespace: String,
    prefix: String,
    stats: Arc<RunStats>,
) {
    let workers = match membership.list_workers(&namespace).await {
        Ok(workers) => workers,
        Err(e) => {
            warn!(error = %e, "profile round skipped: worker listing failed");
            return;
        }
    };

    let fetcher = Arc::new(fetcher);
    let mut tasks = JoinSet::new();

    for worker in workers {
        if !worker.name.starts_with(&prefix) {
            continue;
        }

        for kind in ProfileKind::ALL {
            let fetcher = Arc::clone(&fetcher);
            let stats = Arc::clone(&stats);
            let worker = worker.clone();

            tasks.spawn(async move {
                match fetcher.capture(&worker, kind).await {
                    Ok(bytes) => {
                        stats.profiles_captured.inc();
                        debug!(pod = %worker.name, ?kind, bytes, "profile captured");
                    }
                    Err(e) => {
                        stats.profiles_failed.inc();
                        debug!(pod = %worker.name, ?kind, error = %e, "profile capture failed");
                    }
                }
            });
        }
    }

    while tasks.join_next().await.is_some() {}
}
