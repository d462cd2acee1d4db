pub mod events;
pub mod nodes;
pub mod pods;
pub mod usage;

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::kubernetes::{ClusterSource, MetricsSource};
use crate::shutdown::ShutdownSignal;
use crate::store::{SnapshotStore, StoreError};
use crate::types::SnapshotId;
use usage::UsageTable;

#[derive(Debug, Error)]
pub enum CollectError {
    /// A required cluster query failed; the cycle is abandoned.
    #[error("failed to list {resource}: {source}")]
    Cluster {
        resource: &'static str,
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// A write was rejected. Rows already written stay in place.
    #[error("failed to save {step}: {source}")]
    Store {
        step: &'static str,
        source: StoreError,
    },

    #[error("collection cancelled by shutdown")]
    Cancelled,
}

impl CollectError {
    fn store(step: &'static str) -> impl FnOnce(StoreError) -> Self {
        move |source| CollectError::Store { step, source }
    }
}

/// Namespaces whose pods and events are never persisted.
#[derive(Debug, Clone, Default)]
pub struct NamespaceExclusion {
    namespaces: HashSet<String>,
}

impl NamespaceExclusion {
    pub fn new<I, S>(namespaces: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            namespaces: namespaces.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_excluded(&self, namespace: &str) -> bool {
        self.namespaces.contains(namespace)
    }

    pub fn len(&self) -> usize {
        self.namespaces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.namespaces.is_empty()
    }
}

/// Collects one snapshot per call and writes it through the store.
pub struct Collector {
    cluster: Arc<dyn ClusterSource>,
    metrics: Option<Arc<dyn MetricsSource>>,
    store: SnapshotStore,
    cluster_name: String,
    exclusion: NamespaceExclusion,
}

impl Collector {
    pub fn new(
        cluster: Arc<dyn ClusterSource>,
        metrics: Option<Arc<dyn MetricsSource>>,
        store: SnapshotStore,
        cluster_name: impl Into<String>,
        exclusion: NamespaceExclusion,
    ) -> Self {
        Self {
            cluster,
            metrics,
            store,
            cluster_name: cluster_name.into(),
            exclusion,
        }
    }

    /// Run one collection cycle.
    ///
    /// `shutdown` is checked before every upstream call and every write, and
    /// upstream calls are abandoned as soon as it fires. A cancelled or failed
    /// cycle leaves a partial snapshot behind.
    pub async fn collect_snapshot(&self, shutdown: &ShutdownSignal) -> Result<SnapshotId, CollectError> {
        info!(cluster = %self.cluster_name, "Starting snapshot collection");
        let now = Utc::now();

        ensure_running(shutdown)?;
        let cluster_name = self.cluster_name.clone();
        let snapshot_id = self
            .store
            .with_blocking(move |store| store.create_snapshot(&cluster_name, now))
            .await
            .map_err(CollectError::store("snapshot"))?;

        self.collect_pods(snapshot_id, shutdown).await?;
        self.collect_nodes(snapshot_id, shutdown).await?;
        self.collect_events(snapshot_id, shutdown).await?;

        info!(snapshot_id, "Snapshot collection completed");
        Ok(snapshot_id)
    }

    async fn collect_pods(&self, snapshot_id: SnapshotId, shutdown: &ShutdownSignal) -> Result<(), CollectError> {
        let listed = upstream(shutdown, "pods", self.cluster.list_pods()).await?;
        let usage = self.load_usage(shutdown).await?;
        let now = Utc::now();

        let records: Vec<_> = listed
            .iter()
            .filter(|pod| {
                let namespace = pod.metadata.namespace.as_deref().unwrap_or_default();
                !self.exclusion.is_excluded(namespace)
            })
            .filter_map(|pod| pods::workload_record(snapshot_id, pod, &usage, now))
            .collect();
        let saved = self
            .persist("pod snapshot", records, shutdown, SnapshotStore::save_workload_record)
            .await?;

        info!(snapshot_id, pods = saved, listed = listed.len(), "Collected pods");
        Ok(())
    }

    /// Best-effort usage lookup. Any failure yields an empty table.
    async fn load_usage(&self, shutdown: &ShutdownSignal) -> Result<UsageTable, CollectError> {
        let Some(metrics) = self.metrics.as_ref() else {
            debug!("Metrics source disabled, skipping usage lookup");
            return Ok(UsageTable::default());
        };
        ensure_running(shutdown)?;
        tokio::select! {
            result = metrics.list_pod_usage() => match result {
                Ok(items) => Ok(UsageTable::from_items(items)),
                Err(e) => {
                    warn!(error = %e, "Failed to fetch pod metrics, continuing without usage data");
                    Ok(UsageTable::default())
                }
            },
            _ = shutdown.triggered() => Err(CollectError::Cancelled),
        }
    }

    async fn collect_nodes(&self, snapshot_id: SnapshotId, shutdown: &ShutdownSignal) -> Result<(), CollectError> {
        let listed = upstream(shutdown, "nodes", self.cluster.list_nodes()).await?;

        let records: Vec<_> = listed
            .iter()
            .filter_map(|node| nodes::node_record(snapshot_id, node))
            .collect();
        let saved = self
            .persist("node snapshot", records, shutdown, SnapshotStore::save_node_record)
            .await?;

        info!(snapshot_id, nodes = saved, "Collected nodes");
        Ok(())
    }

    async fn collect_events(&self, snapshot_id: SnapshotId, shutdown: &ShutdownSignal) -> Result<(), CollectError> {
        let listed = upstream(shutdown, "events", self.cluster.list_events()).await?;
        let cutoff = events::event_cutoff(Utc::now());

        let records: Vec<_> = listed
            .iter()
            .filter_map(|event| events::event_record(snapshot_id, event, &self.exclusion, cutoff))
            .collect();
        let saved = self
            .persist("event snapshot", records, shutdown, SnapshotStore::save_event_record)
            .await?;

        info!(snapshot_id, events = saved, listed = listed.len(), "Collected events");
        Ok(())
    }

    /// Write `records` one by one on the blocking pool, stopping at the first
    /// rejected row or as soon as shutdown fires.
    async fn persist<R, F>(
        &self,
        step: &'static str,
        records: Vec<R>,
        shutdown: &ShutdownSignal,
        save: F,
    ) -> Result<usize, CollectError>
    where
        R: Send + 'static,
        F: Fn(&SnapshotStore, &R) -> Result<(), StoreError> + Send + 'static,
    {
        let store = self.store.clone();
        let shutdown = shutdown.clone();
        tokio::task::spawn_blocking(move || {
            for record in &records {
                ensure_running(&shutdown)?;
                save(&store, record).map_err(CollectError::store(step))?;
            }
            Ok(records.len())
        })
        .await
        .map_err(|e| CollectError::Store { step, source: e.into() })?
    }
}

fn ensure_running(shutdown: &ShutdownSignal) -> Result<(), CollectError> {
    if shutdown.is_triggered() {
        return Err(CollectError::Cancelled);
    }
    Ok(())
}

/// Run a required cluster query, racing it against shutdown.
async fn upstream<T, F>(shutdown: &ShutdownSignal, resource: &'static str, query: F) -> Result<T, CollectError>
where
    F: Future<Output = anyhow::Result<T>>,
{
    ensure_running(shutdown)?;
    tokio::select! {
        result = query => result.map_err(|e| CollectError::Cluster { resource, source: e.into() }),
        _ = shutdown.triggered() => Err(CollectError::Cancelled),
    }
}
