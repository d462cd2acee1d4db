use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Duration;
use tracing::{info, warn};

use crate::collector::nodes::NODE_NOT_READY;
use crate::store::SnapshotStore;
use crate::types::{EventType, SnapshotBundle};

/// How far back the weekly report looks for its snapshot.
pub const REPORT_LOOKBACK_DAYS: i64 = 7;

/// Downstream consumer fired by the weekly trigger.
///
/// Analysis, rendering and delivery live behind this trait; the scheduler only
/// knows that a report is due.
#[async_trait]
pub trait ReportGenerator: Send + Sync {
    async fn generate_weekly_report(&self, cluster_name: &str) -> Result<()>;
}

/// Counts over one snapshot, without interpretation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReportSummary {
    pub workload_count: usize,
    pub total_restarts: i64,
    pub workloads_not_running: usize,
    pub workloads_without_usage: usize,
    pub node_count: usize,
    pub nodes_not_ready: usize,
    pub warning_events: usize,
    pub normal_events: usize,
}

impl ReportSummary {
    pub fn from_bundle(bundle: &SnapshotBundle) -> Self {
        Self {
            workload_count: bundle.workloads.len(),
            total_restarts: bundle.workloads.iter().map(|w| w.restart_count as i64).sum(),
            workloads_not_running: bundle
                .workloads
                .iter()
                .filter(|w| w.status != "Running" && w.status != "Succeeded")
                .count(),
            workloads_without_usage: bundle
                .workloads
                .iter()
                .filter(|w| w.cpu_actual.is_empty() && w.memory_actual.is_empty())
                .count(),
            node_count: bundle.nodes.len(),
            nodes_not_ready: bundle.nodes.iter().filter(|n| n.status == NODE_NOT_READY).count(),
            warning_events: bundle
                .events
                .iter()
                .filter(|e| e.event_type == EventType::Warning)
                .count(),
            normal_events: bundle
                .events
                .iter()
                .filter(|e| e.event_type == EventType::Normal)
                .count(),
        }
    }
}

/// Reads the latest snapshot of the past week and logs its summary.
///
/// Stands in for a full analysis/delivery pipeline.
pub struct SummaryReportGenerator {
    store: SnapshotStore,
}

impl SummaryReportGenerator {
    pub fn new(store: SnapshotStore) -> Self {
        Self { store }
    }

    pub async fn latest_summary(&self) -> Result<Option<(SnapshotBundle, ReportSummary)>> {
        let bundle = self
            .store
            .latest_snapshot_within_async(Duration::days(REPORT_LOOKBACK_DAYS))
            .await
            .context("failed to load latest snapshot")?;
        Ok(bundle.map(|b| {
            let summary = ReportSummary::from_bundle(&b);
            (b, summary)
        }))
    }
}

#[async_trait]
impl ReportGenerator for SummaryReportGenerator {
    async fn generate_weekly_report(&self, cluster_name: &str) -> Result<()> {
        let Some((bundle, summary)) = self.latest_summary().await? else {
            warn!(cluster = cluster_name, "No snapshot in the last {} days, skipping report", REPORT_LOOKBACK_DAYS);
            return Ok(());
        };

        info!(
            cluster = cluster_name,
            snapshot_id = bundle.snapshot.id,
            taken_at = %bundle.snapshot.timestamp,
            workloads = summary.workload_count,
            restarts = summary.total_restarts,
            not_running = summary.workloads_not_running,
            nodes = summary.node_count,
            nodes_not_ready = summary.nodes_not_ready,
            warnings = summary.warning_events,
            "Weekly report summary"
        );
        Ok(())
    }
}
