//! Cluster collaborators: worker membership, deployment inventory, and the
//! remote exec channel.
//!
//! The collection pipeline only depends on the traits defined here; the
//! Kubernetes-backed implementations live in the submodules.

pub mod exec;
pub mod kube;

pub use exec::{ExecChannel, ExecOutput, KubectlExec};
pub use kube::KubeClient;

use anyhow::Result;

/// A worker pod observed at one tick.
///
/// Rebuilt fresh from the membership source on every tick; never cached
/// across ticks, since the pod set can change mid-run.
#[derive(Debug, Clone)]
pub struct WorkerRef {
    pub name: String,
    /// Routable pod IP.
    pub address: String,
    pub namespace: String,
}

/// Name prefix identifying the release's Milvus pods and deployments.
pub fn release_prefix(release: &str) -> String {
    format!("{release}-milvus")
}

/// Source of the current worker set and service addresses.
pub trait MembershipSource: Send + Sync {
    /// List all candidate worker pods in the namespace.
    fn list_workers(
        &self,
        namespace: &str,
    ) -> impl std::future::Future<Output = Result<Vec<WorkerRef>>> + Send;

    /// Resolve the cluster-internal address of a named service.
    fn service_address(
        &self,
        namespace: &str,
        service: &str,
    ) -> impl std::future::Future<Output = Result<String>> + Send;
}

/// Deployment inventory, consumed once at startup for the base report.
pub trait InventorySource: Send + Sync {
    /// Version string of the deployed release, derived from the first
    /// deployment matching the release prefix.
    fn version(
        &self,
        namespace: &str,
        prefix: &str,
    ) -> impl std::future::Future<Output = Result<String>> + Send;

    /// Names of all deployments in the namespace.
    fn list_deployments(
        &self,
        namespace: &str,
    ) -> impl std::future::Future<Output = Result<Vec<String>>> + Send;
}
