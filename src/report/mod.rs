//! One-shot inventory report written at startup.

use std::path::Path;

use anyhow::{Context, Result};
use tracing::info;

use crate::cluster::InventorySource;

/// File name of the report inside the data directory.
pub const BASE_INFO_FILE: &str = "base-info";

/// Render the report body: deployed version plus the release's deployments.
pub fn render(version: &str, deployments: &[String]) -> String {
    format!(
        "milvus version: {version}\ndeployments: {}\n",
        deployments.join(",")
    )
}

/// Gather inventory and write the report. Runs once, before any polling;
/// any failure here is startup-fatal.
pub async fn write_report<I: InventorySource>(
    inventory: &I,
    namespace: &str,
    prefix: &str,
    data_dir: &Path,
) -> Result<()> {
    let version = inventory
        .version(namespace, prefix)
        .await
        .context("getting deployed version")?;

    let mut deployments = inventory
        .list_deployments(namespace)
        .await
        .context("listing deployments")?;
    deployments.retain(|name| name.starts_with(prefix));

    let path = data_dir.join(BASE_INFO_FILE);
    tokio::fs::write(&path, render(&version, &deployments))
        .await
        .with_context(|| format!("writing {}", path.display()))?;

    info!(%version, deployments = deployments.len(), "inventory report written");
    Ok(())
}
