use chrono::{DateTime, Duration, Utc};
use k8s_openapi::api::core::v1::Pod;

use super::usage::UsageTable;
use crate::parsing::is_zero_quantity;
use crate::types::{SnapshotId, WorkloadRecord};

/// Requests and limits as declared in the pod spec, one string per slot.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DeclaredResources {
    pub cpu_request: String,
    pub cpu_limit: String,
    pub memory_request: String,
    pub memory_limit: String,
}

/// Build the record for one pod. Pods without a name are skipped.
pub fn workload_record(
    snapshot_id: SnapshotId,
    pod: &Pod,
    usage: &UsageTable,
    now: DateTime<Utc>,
) -> Option<WorkloadRecord> {
    let name = pod.metadata.name.clone()?;
    let namespace = pod.metadata.namespace.clone().unwrap_or_default();
    let declared = declared_resources(pod);
    let actual = usage.lookup(&namespace, &name).cloned().unwrap_or_default();

    Some(WorkloadRecord {
        snapshot_id,
        status: pod_status(pod),
        restart_count: total_restarts(pod),
        restart_reasons: restart_reasons(pod),
        age: pod_age(pod, now),
        cpu_request: declared.cpu_request,
        cpu_limit: declared.cpu_limit,
        cpu_actual: actual.cpu,
        memory_request: declared.memory_request,
        memory_limit: declared.memory_limit,
        memory_actual: actual.memory,
        name,
        namespace,
    })
}

/// Pod phase, refined for running pods by the first container that is
/// waiting or terminated.
pub fn pod_status(pod: &Pod) -> String {
    let status = pod.status.as_ref();
    let phase = status
        .and_then(|s| s.phase.as_deref())
        .filter(|p| !p.is_empty())
        .unwrap_or("Unknown");

    if phase == "Running" {
        let statuses = status.and_then(|s| s.container_statuses.as_ref());
        for cs in statuses.into_iter().flatten() {
            let Some(state) = cs.state.as_ref() else { continue };
            if let Some(waiting) = state.waiting.as_ref() {
                return format!("Waiting: {}", waiting.reason.as_deref().unwrap_or_default());
            }
            if let Some(terminated) = state.terminated.as_ref() {
                return format!("Terminated: {}", terminated.reason.as_deref().unwrap_or_default());
            }
        }
    }
    phase.to_string()
}

pub fn total_restarts(pod: &Pod) -> i32 {
    pod.status
        .as_ref()
        .and_then(|s| s.container_statuses.as_ref())
        .map(|statuses| statuses.iter().map(|cs| cs.restart_count).sum())
        .unwrap_or(0)
}

/// `reason(count)` per distinct last-termination reason, in first-seen order.
pub fn restart_reasons(pod: &Pod) -> String {
    let mut counts: Vec<(String, u32)> = Vec::new();

    let statuses = pod.status.as_ref().and_then(|s| s.container_statuses.as_ref());
    for cs in statuses.into_iter().flatten() {
        let Some(terminated) = cs.last_state.as_ref().and_then(|s| s.terminated.as_ref()) else {
            continue;
        };
        let reason = terminated
            .reason
            .as_deref()
            .filter(|r| !r.is_empty())
            .unwrap_or("Unknown");
        match counts.iter_mut().find(|(r, _)| r == reason) {
            Some((_, n)) => *n += 1,
            None => counts.push((reason.to_string(), 1)),
        }
    }

    counts
        .iter()
        .map(|(reason, n)| format!("{}({})", reason, n))
        .collect::<Vec<_>>()
        .join(", ")
}

/// The first non-zero value per resource and kind wins, in container order.
pub fn declared_resources(pod: &Pod) -> DeclaredResources {
    let mut declared = DeclaredResources::default();

    let containers = pod.spec.as_ref().map(|s| s.containers.as_slice()).unwrap_or_default();
    for c in containers {
        let Some(resources) = c.resources.as_ref() else { continue };
        if let Some(requests) = resources.requests.as_ref() {
            fill_first(&mut declared.cpu_request, requests.get("cpu").map(|q| q.0.as_str()));
            fill_first(&mut declared.memory_request, requests.get("memory").map(|q| q.0.as_str()));
        }
        if let Some(limits) = resources.limits.as_ref() {
            fill_first(&mut declared.cpu_limit, limits.get("cpu").map(|q| q.0.as_str()));
            fill_first(&mut declared.memory_limit, limits.get("memory").map(|q| q.0.as_str()));
        }
    }
    declared
}

fn fill_first(slot: &mut String, candidate: Option<&str>) {
    if !slot.is_empty() {
        return;
    }
    if let Some(q) = candidate.filter(|q| !is_zero_quantity(q)) {
        *slot = q.to_string();
    }
}

pub fn pod_age(pod: &Pod, now: DateTime<Utc>) -> Duration {
    pod.metadata
        .creation_timestamp
        .as_ref()
        .map(|t| now - t.0)
        .filter(|age| *age > Duration::zero())
        .unwrap_or_else(Duration::zero)
}
