use anyhow::{anyhow, Result};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Event, Node, Pod};
use kube::{api::ListParams, Api, Client};
use serde::Deserialize;
use std::collections::HashMap;

/// Cluster state queries, always across all namespaces.
#[async_trait]
pub trait ClusterSource: Send + Sync {
    async fn list_pods(&self) -> Result<Vec<Pod>>;
    async fn list_nodes(&self) -> Result<Vec<Node>>;
    async fn list_events(&self) -> Result<Vec<Event>>;
}

/// Per-pod resource usage from the metrics API. Failure is expected and
/// handled by callers.
#[async_trait]
pub trait MetricsSource: Send + Sync {
    async fn list_pod_usage(&self) -> Result<Vec<PodMetricsItem>>;
}

#[derive(Debug, Clone, Deserialize)]
pub struct ContainerMetrics {
    pub name: String,
    #[serde(default)]
    pub usage: HashMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PodMetricsItem {
    pub metadata: serde_json::Value,
    #[serde(default)]
    pub containers: Vec<ContainerMetrics>,
}

impl PodMetricsItem {
    pub fn name(&self) -> &str {
        self.metadata.get("name").and_then(|v| v.as_str()).unwrap_or("")
    }

    pub fn namespace(&self) -> &str {
        self.metadata.get("namespace").and_then(|v| v.as_str()).unwrap_or("")
    }
}

#[derive(Debug, Deserialize)]
pub struct PodMetricsList {
    pub items: Vec<PodMetricsItem>,
}

#[derive(Clone)]
pub struct KubeClusterSource {
    client: Client,
}

impl KubeClusterSource {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ClusterSource for KubeClusterSource {
    async fn list_pods(&self) -> Result<Vec<Pod>> {
        let api: Api<Pod> = Api::all(self.client.clone());
        Ok(api.list(&ListParams::default()).await?.items)
    }

    async fn list_nodes(&self) -> Result<Vec<Node>> {
        let api: Api<Node> = Api::all(self.client.clone());
        Ok(api.list(&ListParams::default()).await?.items)
    }

    async fn list_events(&self) -> Result<Vec<Event>> {
        let api: Api<Event> = Api::all(self.client.clone());
        Ok(api.list(&ListParams::default()).await?.items)
    }
}

#[derive(Clone)]
pub struct KubeMetricsSource {
    client: Client,
}

impl KubeMetricsSource {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl MetricsSource for KubeMetricsSource {
    async fn list_pod_usage(&self) -> Result<Vec<PodMetricsItem>> {
        use http::Request as HttpRequest;
        let req = HttpRequest::builder()
            .method("GET")
            .uri("/apis/metrics.k8s.io/v1beta1/pods")
            .body(Vec::new())
            .map_err(|e| anyhow!("build request: {}", e))?;
        let list: PodMetricsList = self.client.request(req).await?;
        Ok(list.items)
    }
}
