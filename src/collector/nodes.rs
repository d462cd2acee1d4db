use k8s_openapi::api::core::v1::Node;
use tracing::warn;

use crate::types::{NodeRecord, SnapshotId};

pub const NODE_READY: &str = "Ready";
pub const NODE_NOT_READY: &str = "NotReady";

/// Build the record for one node. Nodes without a name are skipped.
pub fn node_record(snapshot_id: SnapshotId, node: &Node) -> Option<NodeRecord> {
    let name = node.metadata.name.clone()?;
    let status = node.status.as_ref();
    let quantity = |from_capacity: bool, resource: &str| -> String {
        status
            .and_then(|s| if from_capacity { s.capacity.as_ref() } else { s.allocatable.as_ref() })
            .and_then(|m| m.get(resource))
            .map(|q| q.0.clone())
            .unwrap_or_default()
    };

    Some(NodeRecord {
        snapshot_id,
        status: node_readiness(node).to_string(),
        cpu_capacity: quantity(true, "cpu"),
        cpu_allocatable: quantity(false, "cpu"),
        memory_capacity: quantity(true, "memory"),
        memory_allocatable: quantity(false, "memory"),
        conditions: serialized_conditions(node, &name),
        name,
    })
}

/// "NotReady" only when a Ready condition exists and is not "True".
pub fn node_readiness(node: &Node) -> &'static str {
    let ready = node
        .status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .and_then(|conditions| conditions.iter().find(|c| c.type_ == "Ready"));
    match ready {
        Some(c) if c.status != "True" => NODE_NOT_READY,
        _ => NODE_READY,
    }
}

fn serialized_conditions(node: &Node, name: &str) -> String {
    let conditions = node
        .status
        .as_ref()
        .and_then(|s| s.conditions.as_deref())
        .unwrap_or_default();
    serde_json::to_string(conditions).unwrap_or_else(|e| {
        warn!(node = name, error = %e, "Failed to serialize node conditions");
        "[]".to_string()
    })
}
