use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use kube::Client;
use tracing::info;

use kube_observer::{
    load_config, Collector, KubeClusterSource, KubeMetricsSource, MetricsSource, NamespaceExclusion,
    ReportGenerator, Scheduler, SchedulerConfig, SchedulerError, ShutdownHandle, ShutdownSignal,
    SnapshotStore, SummaryReportGenerator,
};

/// Periodic Kubernetes snapshot observer.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Collect one snapshot, generate the report immediately and exit.
    #[arg(long)]
    test_report: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let cfg = load_config();
    init_tracing(cfg.as_ref().map(|c| c.log_level.as_str()).unwrap_or("info"));
    let cfg = cfg.context("Failed to load configuration")?;
    info!(
        cluster = %cfg.cluster_name,
        excluded = ?cfg.namespaces_exclude,
        interval_secs = cfg.snapshot_interval.as_secs(),
        "Starting kube-observer"
    );

    let store = SnapshotStore::open(&cfg.database_path)
        .with_context(|| format!("Failed to open database at {}", cfg.database_path))?;

    let client = Client::try_default()
        .await
        .context("Failed to create Kubernetes client")?;

    let metrics: Option<Arc<dyn MetricsSource>> = if cfg.metrics_enabled {
        Some(Arc::new(KubeMetricsSource::new(client.clone())))
    } else {
        info!("Metrics collection disabled");
        None
    };

    let collector = Arc::new(Collector::new(
        Arc::new(KubeClusterSource::new(client)),
        metrics,
        store.clone(),
        cfg.cluster_name.clone(),
        NamespaceExclusion::new(cfg.namespaces_exclude.iter().cloned()),
    ));
    let reporter = Arc::new(SummaryReportGenerator::new(store.clone()));

    if args.test_report {
        info!("Test report mode, collecting one snapshot");
        collector
            .collect_snapshot(&ShutdownSignal::never())
            .await
            .context("Failed to collect snapshot for test report")?;
        reporter
            .generate_weekly_report(&cfg.cluster_name)
            .await
            .context("Failed to generate test report")?;
        info!("Test report finished");
        return Ok(());
    }

    let mut scheduler = Scheduler::new(collector, reporter, store, SchedulerConfig::from_config(&cfg));
    listen_for_shutdown(scheduler.shutdown_handle())?;

    match scheduler.start().await {
        Ok(()) => info!("kube-observer is running"),
        Err(SchedulerError::Stopped) => info!("Shutdown requested before the scheduler started"),
        Err(e) => return Err(e).context("Failed to start scheduler"),
    }

    scheduler.shutdown_requested().await;
    scheduler.stop().await;
    info!("kube-observer stopped");

    Ok(())
}

fn init_tracing(default_level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

#[cfg(unix)]
fn listen_for_shutdown(shutdown: ShutdownHandle) -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut interrupt = signal(SignalKind::interrupt()).context("Failed to install SIGINT handler")?;
    let mut terminate = signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
    tokio::spawn(async move {
        tokio::select! {
            _ = interrupt.recv() => info!("Received SIGINT"),
            _ = terminate.recv() => info!("Received SIGTERM"),
        }
        shutdown.trigger();
    });
    Ok(())
}

#[cfg(not(unix))]
fn listen_for_shutdown(shutdown: ShutdownHandle) -> Result<()> {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received Ctrl-C");
                shutdown.trigger();
            }
            Err(e) => tracing::warn!(error = %e, "Failed to listen for Ctrl-C"),
        }
    });
    Ok(())
}
