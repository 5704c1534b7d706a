use anyhow::Result;
use netgrid::*;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::time::FormatTime;

struct LocalTimer;

impl FormatTime for LocalTimer {
    fn format_time(&self, w: &mut tracing_subscriber::fmt::format::Writer<'_>) -> std::fmt::Result {
        write!(
            w,
            "{}",
            chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%.3f%:z")
        )
    }
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        let mut sigterm =
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(s) => s,
                Err(_) => {
                    let _ = tokio::signal::ctrl_c().await;
                    return;
                }
            };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_timer(LocalTimer)
        .with_env_filter(filter)
        .init();

    let app_config = config::AppConfig::load()?;
    tracing::info!("{} starting", version::banner());

    let coordinator = coordinator::Coordinator::spawn()
        .map_err(|e| anyhow::anyhow!("coordinator thread: {}", e))?;
    let scheduler =
        scheduler::Scheduler::new(app_config.scheduler.worker_threads, coordinator.handle());

    let monitor = network_monitor::NetworkMonitor::new(
        stats_provider::platform_provider(),
        scheduler.clone(),
        app_config.monitoring.sample_interval_ms,
    );
    let grid = grid::GridStateManager::new(
        grid::GridDeps {
            scheduler: scheduler.clone(),
            discovery: Arc::new(discovery::SysinfoDiscovery::new()),
            confirm: Arc::new(grid::AutoConfirm(true)),
        },
        app_config.grid_settings(),
    );

    let mut grid_events = grid.subscribe();
    let event_log = tokio::spawn(async move {
        loop {
            match grid_events.recv().await {
                Ok(event) => match serde_json::to_string(&event) {
                    Ok(json) => tracing::debug!(event = %json, "grid event"),
                    Err(e) => tracing::warn!(error = %e, operation = "grid_event", "Failed to encode grid event"),
                },
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "grid event log fell behind");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    grid.attach_monitor(monitor.clone());
    grid.start()?;
    monitor.start();

    let mut stats_log_tick = tokio::time::interval(Duration::from_secs(
        app_config.monitoring.stats_log_interval_secs,
    ));
    stats_log_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                tracing::info!("Received shutdown signal");
                break;
            }
            _ = stats_log_tick.tick() => {
                let snapshot = grid.snapshot();
                tracing::info!(
                    tracked_interfaces = monitor.tracked_count(),
                    speed_events_total = monitor.events_emitted_total(),
                    occupied_cells = snapshot.occupied(),
                    grid = %format!("{}x{}", snapshot.rows, snapshot.cols),
                    discovery_calls = grid.discovery_calls(),
                    queued_tasks = scheduler.queued_len(),
                    "app stats"
                );
            }
        }
    }

    monitor.stop();
    grid.stop();
    scheduler.shutdown();
    event_log.abort();
    if let Err(e) = tokio::task::spawn_blocking(move || coordinator.shutdown()).await {
        tracing::warn!(error = %e, operation = "shutdown", "Coordinator shutdown failed");
    }
    tracing::info!("{} stopped", version::NAME);
    Ok(())
}
