//! Minimal Kubernetes REST client for pod, service, and deployment reads.
//!
//! Only the handful of list/get calls the collector needs are implemented,
//! against the in-cluster API endpoint with service-account credentials.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use tracing::debug;

use super::{InventorySource, MembershipSource, WorkerRef};

const TOKEN_PATH: &str = "/var/run/secrets/kubernetes.io/serviceaccount/token";
const CA_CERT_PATH: &str = "/var/run/secrets/kubernetes.io/serviceaccount/ca.crt";

/// Kubernetes API client backing [`MembershipSource`] and
/// [`InventorySource`].
pub struct KubeClient {
    http: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl KubeClient {
    /// Create a client from the in-cluster environment: API server address
    /// from the well-known env vars, bearer token and CA certificate from
    /// the mounted service account.
    pub fn from_cluster_env(timeout: Duration) -> Result<Self> {
        let host = std::env::var("KUBERNETES_SERVICE_HOST")
            .context("KUBERNETES_SERVICE_HOST not set (not running in a cluster?)")?;
        let port = std::env::var("KUBERNETES_SERVICE_PORT")
            .context("KUBERNETES_SERVICE_PORT not set (not running in a cluster?)")?;

        let token = std::fs::read_to_string(TOKEN_PATH)
            .context("reading service account token")?
            .trim()
            .to_string();

        let ca_pem = std::fs::read(CA_CERT_PATH).context("reading cluster CA certificate")?;
        let ca = reqwest::Certificate::from_pem(&ca_pem).context("parsing cluster CA certificate")?;

        let http = reqwest::Client::builder()
            .add_root_certificate(ca)
            .timeout(timeout)
            .build()
            .context("building Kubernetes HTTP client")?;

        Ok(Self {
            http,
            base_url: format!("https://{host}:{port}"),
            token: Some(token),
        })
    }

    /// Create a client against an explicit API endpoint, without cluster
    /// credentials. Used when the endpoint override is configured (local
    /// development against a proxied or test API server).
    pub fn with_endpoint(endpoint: &str, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("building Kubernetes HTTP client")?;

        Ok(Self {
            http,
            base_url: endpoint.trim_end_matches('/').to_string(),
            token: None,
        })
    }

    /// Perform a GET request and deserialize the JSON response.
    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        debug!(%url, "kubernetes api request");

        let mut request = self.http.get(&url).header("Accept", "application/json");
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("requesting {path}"))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("unexpected status {status} from {path}: {body}");
        }

        response
            .json()
            .await
            .with_context(|| format!("decoding response from {path}"))
    }
}

impl MembershipSource for KubeClient {
    async fn list_workers(&self, namespace: &str) -> Result<Vec<WorkerRef>> {
        let list: PodList = self
            .get_json(&format!("/api/v1/namespaces/{namespace}/pods"))
            .await
            .context("listing pods")?;

        // Pods without an assigned IP (pending, terminating) cannot be
        // fetched from and are not workers this tick.
        Ok(list
            .items
            .into_iter()
            .filter_map(|pod| {
                let address = pod.status.pod_ip?;
                Some(WorkerRef {
                    name: pod.metadata.name,
                    address,
                    namespace: namespace.to_string(),
                })
            })
            .collect())
    }

    async fn service_address(&self, namespace: &str, service: &str) -> Result<String> {
        let svc: Service = self
            .get_json(&format!("/api/v1/namespaces/{namespace}/services/{service}"))
            .await
            .with_context(|| format!("getting service {service}"))?;

        svc.spec
            .cluster_ip
            .filter(|ip| !ip.is_empty() && ip != "None")
            .with_context(|| format!("service {service} has no cluster IP"))
    }
}

impl InventorySource for KubeClient {
    async fn version(&self, namespace: &str, prefix: &str) -> Result<String> {
        let list: DeploymentList = self
            .get_json(&format!("/apis/apps/v1/namespaces/{namespace}/deployments"))
            .await
            .context("listing deployments")?;

        let image = list
            .items
            .iter()
            .filter(|d| d.metadata.name.starts_with(prefix))
            .flat_map(|d| &d.spec.template.spec.containers)
            .map(|c| c.image.as_str())
            .find(|image| !image.is_empty())
            .with_context(|| format!("no deployment matching prefix {prefix:?}"))?;

        Ok(image_tag(image).to_string())
    }

    async fn list_deployments(&self, namespace: &str) -> Result<Vec<String>> {
        let list: DeploymentList = self
            .get_json(&format!("/apis/apps/v1/namespaces/{namespace}/deployments"))
            .await
            .context("listing deployments")?;

        Ok(list.items.into_iter().map(|d| d.metadata.name).collect())
    }
}

/// Tag portion of a container image reference, or the whole reference when
/// untagged. A ':' inside the registry host (port) is not a tag separator.
fn image_tag(image: &str) -> &str {
    match image.rsplit_once(':') {
        Some((_, tag)) if !tag.contains('/') => tag,
        _ => image,
    }
}

// --- JSON response structures ---

#[derive(Deserialize)]
struct PodList {
    #[serde(default)]
    items: Vec<Pod>,
}

#[derive(Deserialize)]
struct Pod {
    metadata: ObjectMeta,
    #[serde(default)]
    status: PodStatus,
}

#[derive(Deserialize)]
struct ObjectMeta {
    name: String,
}

#[derive(Deserialize, Default)]
struct PodStatus {
    #[serde(rename = "podIP")]
    pod_ip: Option<String>,
}

#[derive(Deserialize)]
struct Service {
    spec: ServiceSpec,
}

#[derive(Deserialize)]
struct ServiceSpec {
    #[serde(rename = "clusterIP")]
    cluster_ip: Option<String>,
}

#[derive(Deserialize)]
struct DeploymentList {
    #[serde(default)]
    items: Vec<Deployment>,
}

#[derive(Deserialize)]
struct Deployment {
    metadata: ObjectMeta,
    #[serde(default)]
    spec: DeploymentSpec,
}

#[derive(Deserialize, Default)]
struct DeploymentSpec {
    #[serde(default)]
    template: PodTemplate,
}

#[derive(Deserialize, Default)]
struct PodTemplate {
    #[serde(default)]
    spec: PodTemplateSpec,
}

#[derive(Deserialize, Default)]
struct PodTemplateSpec {
    #[serde(default)]
    containers: Vec<Container>,
}

#[derive(Deserialize)]
struct Container {
    #[serde(default)]
    image: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_tag() {
        assert_eq!(image_tag("milvusdb/milvus:v2.2.0"), "v2.2.0");
        assert_eq!(image_tag("registry:5000/milvus"), "registry:5000/milvus");
        assert_eq!(image_tag("registry:5000/milvus:v2.2.0"), "v2.2.0");
        assert_eq!(image_tag("milvus"), "milvus");
    }

    #[test]
    fn test_pod_list_decoding() {
        let raw = r#"{
            "items": [
                {
                    "metadata": {"name": "rel-milvus-proxy-0"},
                    "status": {"podIP": "10.0.0.7"}
                },
                {
                    "metadata": {"name": "rel-milvus-datanode-0"},
                    "status": {}
                }
            ]
        }"#;

        let list: PodList = serde_json::from_str(raw).expect("decode");
        assert_eq!(list.items.len(), 2);
        assert_eq!(list.items[0].metadata.name, "rel-milvus-proxy-0");
        assert_eq!(list.items[0].status.pod_ip.as_deref(), Some("10.0.0.7"));
        assert!(list.items[1].status.pod_ip.is_none());
    }

    #[test]
    fn test_service_decoding() {
        let raw = r#"{"spec": {"clusterIP": "10.96.0.12"}}"#;
        let svc: Service = serde_json::from_str(raw).expect("decode");
        assert_eq!(svc.spec.cluster_ip.as_deref(), Some("10.96.0.12"));
    }

    #[test]
    fn test_deployment_image_decoding() {
        let raw = r#"{
            "items": [{
                "metadata": {"name": "rel-milvus-proxy"},
                "spec": {"template": {"spec": {"containers": [
                    {"image": "milvusdb/milvus:v2.2.8"}
                ]}}}
            }]
        }"#;

        let list: DeploymentList = serde_json::from_str(raw).expect("decode");
        assert_eq!(
            list.items[0].spec.template.spec.containers[0].image,
            "milvusdb/milvus:v2.2.8"
        );
    }
}
