use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use k8s_openapi::api::core::v1::{
    Container, ContainerState, ContainerStateTerminated, ContainerStatus, Event, Node, NodeCondition, NodeStatus,
    ObjectReference, Pod, PodSpec, PodStatus, ResourceRequirements,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};

use kube_observer::kubernetes::{ContainerMetrics, PodMetricsItem};
use kube_observer::{
    load_config_with_env, shutdown_channel, ClusterSource, CollectError, Collector, EventType, MetricsSource,
    MockEnvironment, NamespaceExclusion, ReportGenerator, Schedule, ShutdownSignal, SnapshotId, SnapshotStore,
    StoreError, SummaryReportGenerator,
};

#[derive(Default)]
struct FakeCluster {
    pods: Vec<Pod>,
    nodes: Vec<Node>,
    events: Vec<Event>,
    fail_on: Option<&'static str>,
    hang_on_pods: bool,
    /// Deletes every snapshot while pods are listed, recording the ids removed.
    sweep_on_pods: Option<(SnapshotStore, Arc<Mutex<Vec<SnapshotId>>>)>,
}

impl FakeCluster {
    fn check(&self, resource: &str) -> Result<()> {
        if self.fail_on == Some(resource) {
            return Err(anyhow!("{} endpoint returned 503", resource));
        }
        Ok(())
    }
}

#[async_trait]
impl ClusterSource for FakeCluster {
    async fn list_pods(&self) -> Result<Vec<Pod>> {
        if self.hang_on_pods {
            std::future::pending::<()>().await;
        }
        if let Some((store, swept)) = &self.sweep_on_pods {
            let now = Utc::now();
            let doomed = store.get_snapshots_in_range(now - Duration::hours(1), now + Duration::hours(1))?;
            swept.lock().unwrap().extend(doomed.iter().map(|s| s.id));
            store.cleanup_before(now + Duration::hours(1))?;
        }
        self.check("pods")?;
        Ok(self.pods.clone())
    }

    async fn list_nodes(&self) -> Result<Vec<Node>> {
        self.check("nodes")?;
        Ok(self.nodes.clone())
    }

    async fn list_events(&self) -> Result<Vec<Event>> {
        self.check("events")?;
        Ok(self.events.clone())
    }
}

struct FakeMetrics {
    items: Option<Vec<PodMetricsItem>>,
}

#[async_trait]
impl MetricsSource for FakeMetrics {
    async fn list_pod_usage(&self) -> Result<Vec<PodMetricsItem>> {
        self.items
            .clone()
            .ok_or_else(|| anyhow!("the server could not find the requested resource (metrics.k8s.io)"))
    }
}

fn create_test_pod(name: &str, namespace: &str) -> Pod {
    let mut requests = BTreeMap::new();
    requests.insert("cpu".to_string(), Quantity("100m".to_string()));
    requests.insert("memory".to_string(), Quantity("128Mi".to_string()));

    Pod {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            creation_timestamp: Some(Time(Utc::now() - Duration::hours(5))),
            ..Default::default()
        },
        spec: Some(PodSpec {
            containers: vec![Container {
                name: "app".to_string(),
                resources: Some(ResourceRequirements {
                    requests: Some(requests),
                    ..Default::default()
                }),
                ..Default::default()
            }],
            ..Default::default()
        }),
        status: Some(PodStatus {
            phase: Some("Running".to_string()),
            ..Default::default()
        }),
    }
}

fn terminated_container(name: &str, reason: &str, restarts: i32) -> ContainerStatus {
    ContainerStatus {
        name: name.to_string(),
        restart_count: restarts,
        last_state: Some(ContainerState {
            terminated: Some(ContainerStateTerminated {
                reason: Some(reason.to_string()),
                exit_code: 137,
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn create_test_node(name: &str, ready: &str) -> Node {
    let mut capacity = BTreeMap::new();
    capacity.insert("cpu".to_string(), Quantity("4".to_string()));
    capacity.insert("memory".to_string(), Quantity("16Gi".to_string()));

    Node {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            ..Default::default()
        },
        status: Some(NodeStatus {
            capacity: Some(capacity.clone()),
            allocatable: Some(capacity),
            conditions: Some(vec![NodeCondition {
                type_: "Ready".to_string(),
                status: ready.to_string(),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn create_test_event(namespace: &str, type_: &str, reason: &str, age: Duration) -> Event {
    Event {
        metadata: ObjectMeta {
            name: Some(format!("{}.{}", reason.to_lowercase(), namespace)),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        involved_object: ObjectReference {
            name: Some("api-0".to_string()),
            ..Default::default()
        },
        type_: Some(type_.to_string()),
        reason: Some(reason.to_string()),
        message: Some(format!("{} happened", reason)),
        count: Some(2),
        last_timestamp: Some(Time(Utc::now() - age)),
        ..Default::default()
    }
}

fn usage_item(name: &str, namespace: &str, cpu: &str, memory: &str) -> PodMetricsItem {
    let mut usage = HashMap::new();
    usage.insert("cpu".to_string(), cpu.to_string());
    usage.insert("memory".to_string(), memory.to_string());
    PodMetricsItem {
        metadata: serde_json::json!({ "name": name, "namespace": namespace }),
        containers: vec![ContainerMetrics {
            name: "app".to_string(),
            usage,
        }],
    }
}

fn standard_cluster() -> FakeCluster {
    FakeCluster {
        pods: vec![
            create_test_pod("api-0", "default"),
            create_test_pod("worker-0", "jobs"),
            create_test_pod("coredns-abc", "kube-system"),
        ],
        nodes: vec![create_test_node("node-a", "True"), create_test_node("node-b", "False")],
        events: vec![
            create_test_event("default", "Warning", "BackOff", Duration::minutes(5)),
            create_test_event("jobs", "Normal", "Pulled", Duration::minutes(30)),
            create_test_event("kube-system", "Warning", "Unhealthy", Duration::minutes(1)),
            create_test_event("default", "Warning", "FailedMount", Duration::hours(4)),
            create_test_event("default", "Error", "Weird", Duration::minutes(1)),
        ],
        ..Default::default()
    }
}

fn create_collector(cluster: FakeCluster, metrics: Option<FakeMetrics>) -> (Collector, SnapshotStore) {
    create_collector_with_store(cluster, metrics, SnapshotStore::open_in_memory().unwrap())
}

fn create_collector_with_store(
    cluster: FakeCluster,
    metrics: Option<FakeMetrics>,
    store: SnapshotStore,
) -> (Collector, SnapshotStore) {
    let collector = Collector::new(
        Arc::new(cluster),
        metrics.map(|m| Arc::new(m) as Arc<dyn MetricsSource>),
        store.clone(),
        "test-cluster",
        NamespaceExclusion::new(["kube-system"]),
    );
    (collector, store)
}

#[tokio::test]
async fn test_two_collections_end_to_end() {
    let metrics = FakeMetrics {
        items: Some(vec![usage_item("api-0", "default", "12m", "64Mi")]),
    };
    let (collector, store) = create_collector(standard_cluster(), Some(metrics));
    let never = ShutdownSignal::never();

    let first = collector.collect_snapshot(&never).await.unwrap();
    let second = collector.collect_snapshot(&never).await.unwrap();
    assert!(second > first);

    let now = Utc::now();
    let snapshots = store
        .get_snapshots_in_range(now - Duration::hours(1), now + Duration::hours(1))
        .unwrap();
    assert_eq!(snapshots.len(), 2);
    assert_eq!(snapshots[0].id, second);
    assert_eq!(snapshots[1].id, first);
    assert!(snapshots.iter().all(|s| s.cluster_name == "test-cluster"));

    for id in [first, second] {
        let workloads = store.get_workload_records(id).unwrap();
        assert_eq!(workloads.len(), 2);
        assert!(workloads.iter().all(|w| w.namespace != "kube-system"));
        assert!(workloads.iter().all(|w| w.snapshot_id == id));

        let api = workloads.iter().find(|w| w.name == "api-0").unwrap();
        assert_eq!(api.status, "Running");
        assert_eq!(api.cpu_request, "100m");
        assert_eq!(api.memory_request, "128Mi");
        assert_eq!(api.cpu_actual, "12m");
        assert_eq!(api.memory_actual, "64Mi");
        assert!(api.age >= Duration::hours(5));

        let worker = workloads.iter().find(|w| w.name == "worker-0").unwrap();
        assert_eq!(worker.cpu_actual, "");
        assert_eq!(worker.memory_actual, "");

        let nodes = store.get_node_records(id).unwrap();
        assert_eq!(nodes.len(), 2);
        let not_ready: Vec<_> = nodes.iter().filter(|n| n.status == "NotReady").collect();
        assert_eq!(not_ready.len(), 1);
        assert_eq!(not_ready[0].name, "node-b");

        let events = store.get_event_records(id).unwrap();
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|e| e.namespace != "kube-system"));
        assert!(events.iter().any(|e| e.event_type == EventType::Warning && e.reason == "BackOff"));
        assert!(events.iter().any(|e| e.event_type == EventType::Normal && e.reason == "Pulled"));
    }
}

#[tokio::test]
async fn test_metrics_failure_is_not_fatal() {
    let (collector, store) = create_collector(standard_cluster(), Some(FakeMetrics { items: None }));

    let id = collector.collect_snapshot(&ShutdownSignal::never()).await.unwrap();

    let workloads = store.get_workload_records(id).unwrap();
    assert_eq!(workloads.len(), 2);
    for w in &workloads {
        assert_eq!(w.cpu_actual, "");
        assert_eq!(w.memory_actual, "");
        assert_eq!(w.cpu_request, "100m");
    }
    assert_eq!(store.get_node_records(id).unwrap().len(), 2);
}

#[tokio::test]
async fn test_cluster_failure_leaves_partial_snapshot() {
    let cluster = FakeCluster {
        fail_on: Some("nodes"),
        ..standard_cluster()
    };
    let (collector, store) = create_collector(cluster, None);

    let err = collector.collect_snapshot(&ShutdownSignal::never()).await.unwrap_err();
    match err {
        CollectError::Cluster { resource, .. } => assert_eq!(resource, "nodes"),
        other => panic!("unexpected error: {other}"),
    }

    let now = Utc::now();
    let snapshots = store
        .get_snapshots_in_range(now - Duration::hours(1), now + Duration::hours(1))
        .unwrap();
    assert_eq!(snapshots.len(), 1);
    let id = snapshots[0].id;
    assert_eq!(store.get_workload_records(id).unwrap().len(), 2);
    assert!(store.get_node_records(id).unwrap().is_empty());
    assert!(store.get_event_records(id).unwrap().is_empty());
}

#[tokio::test]
async fn test_pod_failure_leaves_empty_snapshot() {
    let cluster = FakeCluster {
        fail_on: Some("pods"),
        ..standard_cluster()
    };
    let (collector, store) = create_collector(cluster, None);

    let err = collector.collect_snapshot(&ShutdownSignal::never()).await.unwrap_err();
    assert!(err.to_string().starts_with("failed to list pods"));
    assert_eq!(store.snapshot_count().unwrap(), 1);
}

#[tokio::test]
async fn test_rejected_write_aborts_cycle() {
    let store = SnapshotStore::open_in_memory().unwrap();
    let swept = Arc::new(Mutex::new(Vec::new()));
    let cluster = FakeCluster {
        sweep_on_pods: Some((store.clone(), Arc::clone(&swept))),
        ..standard_cluster()
    };
    let (collector, store) = create_collector_with_store(cluster, None, store);

    let err = collector.collect_snapshot(&ShutdownSignal::never()).await.unwrap_err();
    assert!(
        matches!(err, CollectError::Store { step: "pod snapshot", source: StoreError::Database(_) }),
        "unexpected error: {:?}",
        err
    );

    // The snapshot row vanished under the writer; nothing after the rejected
    // pod write was attempted.
    let swept = swept.lock().unwrap().clone();
    assert_eq!(swept.len(), 1);
    assert_eq!(store.snapshot_count().unwrap(), 0);
    assert!(store.get_workload_records(swept[0]).unwrap().is_empty());
    assert!(store.get_node_records(swept[0]).unwrap().is_empty());
    assert!(store.get_event_records(swept[0]).unwrap().is_empty());
}

#[tokio::test]
async fn test_restart_reasons_persisted() {
    let mut pod = create_test_pod("crashy", "default");
    pod.status = Some(PodStatus {
        phase: Some("Running".to_string()),
        container_statuses: Some(vec![
            terminated_container("a", "OOMKilled", 3),
            terminated_container("b", "OOMKilled", 1),
            terminated_container("c", "Error", 2),
            terminated_container("d", "", 1),
        ]),
        ..Default::default()
    });
    let cluster = FakeCluster {
        pods: vec![pod],
        ..Default::default()
    };
    let (collector, store) = create_collector(cluster, None);

    let id = collector.collect_snapshot(&ShutdownSignal::never()).await.unwrap();
    let workloads = store.get_workload_records(id).unwrap();
    assert_eq!(workloads.len(), 1);
    assert_eq!(workloads[0].restart_count, 7);
    assert_eq!(workloads[0].restart_reasons, "OOMKilled(2), Error(1), Unknown(1)");
}

#[tokio::test]
async fn test_shutdown_before_start_writes_nothing() {
    let (collector, store) = create_collector(standard_cluster(), None);
    let (handle, signal) = shutdown_channel();
    handle.trigger();

    let err = collector.collect_snapshot(&signal).await.unwrap_err();
    assert!(matches!(err, CollectError::Cancelled));
    assert_eq!(store.snapshot_count().unwrap(), 0);
}

#[tokio::test]
async fn test_shutdown_interrupts_hanging_query() {
    let cluster = FakeCluster {
        hang_on_pods: true,
        ..standard_cluster()
    };
    let (collector, store) = create_collector(cluster, None);
    let (handle, signal) = shutdown_channel();

    let trigger = tokio::spawn(async move {
        tokio::time::sleep(StdDuration::from_millis(20)).await;
        handle.trigger();
    });

    let err = collector.collect_snapshot(&signal).await.unwrap_err();
    assert!(matches!(err, CollectError::Cancelled));
    trigger.await.unwrap();

    // The snapshot row was created before the pod query hung
    assert_eq!(store.snapshot_count().unwrap(), 1);
}

#[tokio::test]
async fn test_retention_cleanup_after_collection() {
    let (collector, store) = create_collector(standard_cluster(), None);
    let old = store.create_snapshot("test-cluster", Utc::now() - Duration::weeks(3)).unwrap();
    let fresh = collector.collect_snapshot(&ShutdownSignal::never()).await.unwrap();

    assert_eq!(store.cleanup_old_snapshots(2).unwrap(), 1);
    assert_eq!(store.cleanup_old_snapshots(2).unwrap(), 0);
    assert_eq!(store.snapshot_count().unwrap(), 1);
    assert!(store.get_workload_records(old).unwrap().is_empty());
    assert_eq!(store.get_workload_records(fresh).unwrap().len(), 2);
}

#[tokio::test]
async fn test_summary_report_after_collection() {
    let (collector, store) = create_collector(standard_cluster(), None);
    collector.collect_snapshot(&ShutdownSignal::never()).await.unwrap();

    let reporter = SummaryReportGenerator::new(store);
    let (_, summary) = reporter.latest_summary().await.unwrap().unwrap();
    assert_eq!(summary.workload_count, 2);
    assert_eq!(summary.node_count, 2);
    assert_eq!(summary.nodes_not_ready, 1);
    assert_eq!(summary.warning_events, 1);
    assert_eq!(summary.normal_events, 1);
    reporter.generate_weekly_report("test-cluster").await.unwrap();
}

#[test]
fn test_config_drives_schedules() {
    let env = MockEnvironment::new()
        .with_var("REPORT_DAY", "Monday")
        .with_var("REPORT_TIME", "09:00")
        .with_var("SNAPSHOT_INTERVAL", "90m");
    let cfg = load_config_with_env(&env).unwrap();

    let weekly = Schedule::weekly(&cfg.report_day, &cfg.report_time).unwrap();
    assert_eq!(weekly.cron_expression(), "0 9 * * 1");
    let interval = Schedule::interval(cfg.snapshot_interval).unwrap();
    assert_eq!(interval.cron_expression(), "@every 1h30m");

    let bad_day = MockEnvironment::new().with_var("REPORT_DAY", "funday");
    assert!(load_config_with_env(&bad_day).is_err());
    let bad_time = MockEnvironment::new().with_var("REPORT_TIME", "9");
    assert!(load_config_with_env(&bad_time).is_err());
}
