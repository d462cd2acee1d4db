use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

pub type SnapshotId = i64;

#[derive(Debug, Clone)]
pub struct Config {
    pub cluster_name: String,
    pub namespaces_exclude: Vec<String>,
    pub snapshot_interval: std::time::Duration,
    pub report_day: String,
    pub report_time: String,
    pub retention_weeks: u32,
    pub database_path: String,
    pub log_level: String,
    pub metrics_enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Snapshot {
    pub id: SnapshotId,
    pub cluster_name: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkloadRecord {
    pub snapshot_id: SnapshotId,
    pub name: String,
    pub namespace: String,
    pub status: String,
    pub restart_count: i32,
    pub restart_reasons: String,
    #[serde(serialize_with = "serialize_age")]
    pub age: Duration,
    pub cpu_request: String,
    pub cpu_limit: String,
    pub cpu_actual: String,
    pub memory_request: String,
    pub memory_limit: String,
    pub memory_actual: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeRecord {
    pub snapshot_id: SnapshotId,
    pub name: String,
    pub status: String,
    pub cpu_capacity: String,
    pub cpu_allocatable: String,
    pub memory_capacity: String,
    pub memory_allocatable: String,
    /// JSON array of the node's raw conditions.
    pub conditions: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EventRecord {
    pub snapshot_id: SnapshotId,
    pub name: String,
    pub namespace: String,
    pub event_type: EventType,
    pub reason: String,
    pub message: String,
    pub count: i32,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

/// The two event kinds that are persisted; anything else is dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum EventType {
    Warning,
    Normal,
}

impl EventType {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "Warning" => Some(EventType::Warning),
            "Normal" => Some(EventType::Normal),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Warning => "Warning",
            EventType::Normal => "Normal",
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ResourceUsage {
    pub cpu: String,
    pub memory: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SnapshotBundle {
    pub snapshot: Snapshot,
    pub workloads: Vec<WorkloadRecord>,
    pub nodes: Vec<NodeRecord>,
    pub events: Vec<EventRecord>,
}

fn serialize_age<S>(age: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_i64(age.num_seconds())
}
