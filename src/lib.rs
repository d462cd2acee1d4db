// Public modules
pub mod types;
pub mod config;
pub mod parsing;
pub mod schedule;
pub mod shutdown;
pub mod store;
pub mod kubernetes;
pub mod collector;
pub mod report;
pub mod scheduler;

// Re-export commonly used items
pub use types::*;
pub use config::{load_config, load_config_with_env, EnvironmentProvider, SystemEnvironment, MockEnvironment};
pub use parsing::{parse_cpu_to_nanocores, parse_memory_to_bytes, parse_interval};
pub use schedule::{Schedule, ScheduleError};
pub use shutdown::{shutdown_channel, ShutdownHandle, ShutdownSignal};
pub use store::{SnapshotStore, StoreError};
pub use kubernetes::{ClusterSource, KubeClusterSource, KubeMetricsSource, MetricsSource};
pub use collector::{CollectError, Collector, NamespaceExclusion};
pub use report::{ReportGenerator, ReportSummary, SummaryReportGenerator};
pub use scheduler::{Clock, Scheduler, SchedulerConfig, SchedulerError};
