mod error;
mod schema;

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, TimeZone, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, Row};
use tracing::{debug, info};

pub use error::StoreError;
pub use schema::SCHEMA_DDL;

use crate::types::{
    EventRecord, EventType, NodeRecord, Snapshot, SnapshotBundle, SnapshotId, WorkloadRecord,
};

const BUSY_TIMEOUT: StdDuration = StdDuration::from_secs(5);

/// Handle to the snapshot database. Cheap to clone; clones share one connection.
#[derive(Clone)]
pub struct SnapshotStore {
    conn: Arc<Mutex<Connection>>,
}

impl std::fmt::Debug for SnapshotStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotStore").finish_non_exhaustive()
    }
}

impl SnapshotStore {
    /// Open (creating if missing) a database file and apply the schema.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let conn = Connection::open(path.as_ref())?;
        // journal_mode answers with the resulting mode
        conn.query_row("PRAGMA journal_mode = WAL", [], |_| Ok(()))?;
        info!(path = %path.as_ref().display(), "Opened snapshot database");
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA_DDL)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Lock)
    }

    pub fn create_snapshot(
        &self,
        cluster_name: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<SnapshotId, StoreError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO snapshots (cluster_name, timestamp) VALUES (?1, ?2)",
            params![cluster_name, timestamp.timestamp_millis()],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn save_workload_record(&self, pod: &WorkloadRecord) -> Result<(), StoreError> {
        self.lock()?.execute(
            "INSERT INTO pod_snapshots (
                snapshot_id, name, namespace, status, restart_count, restart_reasons,
                age_seconds, cpu_request, cpu_limit, cpu_actual,
                memory_request, memory_limit, memory_actual
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                pod.snapshot_id,
                pod.name,
                pod.namespace,
                pod.status,
                pod.restart_count,
                pod.restart_reasons,
                pod.age.num_seconds(),
                pod.cpu_request,
                pod.cpu_limit,
                pod.cpu_actual,
                pod.memory_request,
                pod.memory_limit,
                pod.memory_actual,
            ],
        )?;
        Ok(())
    }

    pub fn save_node_record(&self, node: &NodeRecord) -> Result<(), StoreError> {
        self.lock()?.execute(
            "INSERT INTO node_snapshots (
                snapshot_id, name, status, cpu_capacity, cpu_allocatable,
                memory_capacity, memory_allocatable, conditions
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                node.snapshot_id,
                node.name,
                node.status,
                node.cpu_capacity,
                node.cpu_allocatable,
                node.memory_capacity,
                node.memory_allocatable,
                node.conditions,
            ],
        )?;
        Ok(())
    }

    pub fn save_event_record(&self, event: &EventRecord) -> Result<(), StoreError> {
        self.lock()?.execute(
            "INSERT INTO event_snapshots (
                snapshot_id, name, namespace, type, reason, message, count, first_seen, last_seen
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                event.snapshot_id,
                event.name,
                event.namespace,
                event.event_type.as_str(),
                event.reason,
                event.message,
                event.count,
                event.first_seen.timestamp_millis(),
                event.last_seen.timestamp_millis(),
            ],
        )?;
        Ok(())
    }

    /// Snapshots with `start <= timestamp <= end`, most recent first.
    pub fn get_snapshots_in_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Snapshot>, StoreError> {
        snapshots_in_range(&*self.lock()?, start, end)
    }

    pub fn get_workload_records(&self, snapshot_id: SnapshotId) -> Result<Vec<WorkloadRecord>, StoreError> {
        workload_records(&*self.lock()?, snapshot_id)
    }

    pub fn get_node_records(&self, snapshot_id: SnapshotId) -> Result<Vec<NodeRecord>, StoreError> {
        node_records(&*self.lock()?, snapshot_id)
    }

    pub fn get_event_records(&self, snapshot_id: SnapshotId) -> Result<Vec<EventRecord>, StoreError> {
        event_records(&*self.lock()?, snapshot_id)
    }

    /// The newest snapshot taken within `window` of now, with all its records.
    ///
    /// Reads happen under one lock so a concurrent sweep cannot remove the
    /// snapshot between the range query and the child lookups.
    pub fn latest_snapshot_within(&self, window: Duration) -> Result<Option<SnapshotBundle>, StoreError> {
        let end = Utc::now();
        let conn = self.lock()?;
        let Some(snapshot) = snapshots_in_range(&conn, end - window, end)?.into_iter().next() else {
            return Ok(None);
        };
        let workloads = workload_records(&conn, snapshot.id)?;
        let nodes = node_records(&conn, snapshot.id)?;
        let events = event_records(&conn, snapshot.id)?;
        Ok(Some(SnapshotBundle {
            snapshot,
            workloads,
            nodes,
            events,
        }))
    }

    pub fn snapshot_count(&self) -> Result<u64, StoreError> {
        let count: i64 = self
            .lock()?
            .query_row("SELECT COUNT(*) FROM snapshots", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    /// Delete every snapshot older than `retention_weeks` weeks, with its records.
    ///
    /// Returns the number of snapshots removed.
    pub fn cleanup_old_snapshots(&self, retention_weeks: u32) -> Result<usize, StoreError> {
        let cutoff = Utc::now() - Duration::weeks(retention_weeks as i64);
        self.cleanup_before(cutoff)
    }

    /// Run `op` against this store on the blocking thread pool, keeping
    /// SQLite calls and the connection lock off the async workers.
    pub async fn with_blocking<T, F>(&self, op: F) -> Result<T, StoreError>
    where
        F: FnOnce(&SnapshotStore) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let store = self.clone();
        tokio::task::spawn_blocking(move || op(&store)).await?
    }

    pub async fn cleanup_old_snapshots_async(&self, retention_weeks: u32) -> Result<usize, StoreError> {
        self.with_blocking(move |store| store.cleanup_old_snapshots(retention_weeks)).await
    }

    pub async fn latest_snapshot_within_async(
        &self,
        window: Duration,
    ) -> Result<Option<SnapshotBundle>, StoreError> {
        self.with_blocking(move |store| store.latest_snapshot_within(window)).await
    }

    /// Delete every snapshot with a timestamp strictly before `cutoff`.
    pub fn cleanup_before(&self, cutoff: DateTime<Utc>) -> Result<usize, StoreError> {
        let deleted = self.lock()?.execute(
            "DELETE FROM snapshots WHERE timestamp < ?1",
            params![cutoff.timestamp_millis()],
        )?;
        debug!(deleted, cutoff = %cutoff, "Retention sweep finished");
        Ok(deleted)
    }
}

fn snapshots_in_range(
    conn: &Connection,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Result<Vec<Snapshot>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT id, cluster_name, timestamp
         FROM snapshots
         WHERE timestamp BETWEEN ?1 AND ?2
         ORDER BY timestamp DESC, id DESC",
    )?;
    let rows = stmt.query_map(
        params![start.timestamp_millis(), end.timestamp_millis()],
        |row| {
            Ok(Snapshot {
                id: row.get(0)?,
                cluster_name: row.get(1)?,
                timestamp: millis_column(row, 2)?,
            })
        },
    )?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

fn workload_records(conn: &Connection, snapshot_id: SnapshotId) -> Result<Vec<WorkloadRecord>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT snapshot_id, name, namespace, status, restart_count, restart_reasons,
                age_seconds, cpu_request, cpu_limit, cpu_actual,
                memory_request, memory_limit, memory_actual
         FROM pod_snapshots
         WHERE snapshot_id = ?1",
    )?;
    let rows = stmt.query_map(params![snapshot_id], |row| {
        Ok(WorkloadRecord {
            snapshot_id: row.get(0)?,
            name: row.get(1)?,
            namespace: row.get(2)?,
            status: row.get(3)?,
            restart_count: row.get(4)?,
            restart_reasons: text_column(row, 5)?,
            age: Duration::seconds(row.get(6)?),
            cpu_request: text_column(row, 7)?,
            cpu_limit: text_column(row, 8)?,
            cpu_actual: text_column(row, 9)?,
            memory_request: text_column(row, 10)?,
            memory_limit: text_column(row, 11)?,
            memory_actual: text_column(row, 12)?,
        })
    })?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

fn node_records(conn: &Connection, snapshot_id: SnapshotId) -> Result<Vec<NodeRecord>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT snapshot_id, name, status, cpu_capacity, cpu_allocatable,
                memory_capacity, memory_allocatable, conditions
         FROM node_snapshots
         WHERE snapshot_id = ?1",
    )?;
    let rows = stmt.query_map(params![snapshot_id], |row| {
        Ok(NodeRecord {
            snapshot_id: row.get(0)?,
            name: row.get(1)?,
            status: row.get(2)?,
            cpu_capacity: text_column(row, 3)?,
            cpu_allocatable: text_column(row, 4)?,
            memory_capacity: text_column(row, 5)?,
            memory_allocatable: text_column(row, 6)?,
            conditions: text_column(row, 7)?,
        })
    })?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

fn event_records(conn: &Connection, snapshot_id: SnapshotId) -> Result<Vec<EventRecord>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT snapshot_id, name, namespace, type, reason, message, count, first_seen, last_seen
         FROM event_snapshots
         WHERE snapshot_id = ?1",
    )?;
    let rows = stmt.query_map(params![snapshot_id], |row| {
        let raw_type: String = row.get(3)?;
        let event_type = EventType::parse(&raw_type).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                3,
                Type::Text,
                Box::new(StoreError::InvalidData(format!("unknown event type {}", raw_type))),
            )
        })?;
        Ok(EventRecord {
            snapshot_id: row.get(0)?,
            name: row.get(1)?,
            namespace: row.get(2)?,
            event_type,
            reason: row.get(4)?,
            message: text_column(row, 5)?,
            count: row.get(6)?,
            first_seen: millis_column(row, 7)?,
            last_seen: millis_column(row, 8)?,
        })
    })?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

/// Nullable TEXT columns read back as empty strings.
fn text_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<String> {
    Ok(row.get::<_, Option<String>>(idx)?.unwrap_or_default())
}

fn millis_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let millis: i64 = row.get(idx)?;
    Utc.timestamp_millis_opt(millis)
        .single()
        .ok_or(rusqlite::Error::IntegralValueOutOfRange(idx, millis))
}
