use chrono::{DateTime, Duration, Utc};
use k8s_openapi::api::core::v1::Event;

use super::NamespaceExclusion;
use crate::types::{EventRecord, EventType, SnapshotId};

/// Events last seen longer ago than this are dropped at collection time.
pub const EVENT_RECENCY_HOURS: i64 = 3;

/// Oldest last-seen time kept for a collection running at `now`.
pub fn event_cutoff(now: DateTime<Utc>) -> DateTime<Utc> {
    now - Duration::hours(EVENT_RECENCY_HOURS)
}

/// Last-seen time, falling back to `eventTime` for events that only set that.
pub fn event_last_seen(event: &Event) -> Option<DateTime<Utc>> {
    event
        .last_timestamp
        .as_ref()
        .map(|t| t.0)
        .or_else(|| event.event_time.as_ref().map(|t| t.0))
}

/// Build the record for one event, or `None` when the event is filtered out:
/// excluded namespace, a type other than Warning/Normal, or last seen before
/// `cutoff`.
pub fn event_record(
    snapshot_id: SnapshotId,
    event: &Event,
    exclusion: &NamespaceExclusion,
    cutoff: DateTime<Utc>,
) -> Option<EventRecord> {
    let namespace = event.metadata.namespace.clone().unwrap_or_default();
    if exclusion.is_excluded(&namespace) {
        return None;
    }

    let event_type = event.type_.as_deref().and_then(EventType::parse)?;

    let last_seen = event_last_seen(event)?;
    if last_seen < cutoff {
        return None;
    }

    Some(EventRecord {
        snapshot_id,
        name: event.involved_object.name.clone().unwrap_or_default(),
        namespace,
        event_type,
        reason: event.reason.clone().unwrap_or_default(),
        message: event.message.clone().unwrap_or_default(),
        count: event.count.unwrap_or(1),
        first_seen: event.first_timestamp.as_ref().map(|t| t.0).unwrap_or(last_seen),
        last_seen,
    })
}
