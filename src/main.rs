use anyhow::Result;
use scrapwatch::*;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::time::FormatTime;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

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

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_timer(LocalTimer)
        .with_env_filter(filter)
        .init();

    let app_config = config::AppConfig::load()?;

    let repo = Arc::new(
        scrap_repo::ScrapRepo::connect(
            &app_config.database.path,
            app_config.database.retention_days,
            app_config.database.max_pool_size,
        )
        .await?,
    );
    repo.init().await?;

    let records_saved_total = Arc::new(AtomicU64::new(0));
    let (writer_shutdown_tx, writer_shutdown_rx) = tokio::sync::oneshot::channel();
    let (write_tx, write_rx) =
        mpsc::channel(worker::writer_channel_capacity(app_config.database.flush_rate));
    let writer_handle = worker::spawn_record_writer(
        write_rx,
        repo.clone(),
        worker::RecordWriterConfig {
            flush_rate: app_config.database.flush_rate,
            flush_interval_secs: app_config.database.flush_interval_secs,
        },
        records_saved_total.clone(),
        writer_shutdown_rx,
    );

    let clock: Arc<dyn clock::Clock> = Arc::new(clock::SystemClock);
    let aggregator = Arc::new(
        aggregator::Aggregator::new(Duration::from_secs(app_config.aggregation.window_secs))
            .with_sink(Arc::new(worker::ChannelRecordSink(write_tx)))
            .with_clock(clock.clone()),
    );
    let (tx, _) = broadcast::channel(app_config.publishing.broadcast_capacity);
    let pipeline = Arc::new(pipeline::Pipeline::new(aggregator.clone(), tx));

    let dashboard = Arc::new(dashboard::Dashboard::new(
        history_cache::RollingHistoryCache::new(
            app_config.history.tracked_indices.clone(),
            app_config.history.max_points,
        ),
        clock,
    ));
    let feed_handle = dashboard::spawn_feed(dashboard.clone(), pipeline.subscribe());
    let ticker_handle = dashboard::spawn_ticker(
        dashboard.clone(),
        dashboard::TickerConfig {
            tick_interval_ms: app_config.history.tick_interval_ms,
            idle_key_ttl_ms: app_config
                .aggregation
                .idle_key_ttl_secs
                .map(|s| (s * 1000) as i64),
        },
    );

    let simulator_handle = app_config
        .simulator
        .enabled
        .then(|| simulator::spawn(pipeline.clone(), app_config.simulator.clone()));

    let ws_clients = Arc::new(AtomicUsize::new(0));
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();

    let worker_handle = worker::spawn(
        worker::WorkerDeps {
            aggregator: aggregator.clone(),
            repo: repo.clone(),
            pipeline_stats: pipeline.stats().clone(),
            records_saved_total,
            ws_clients: ws_clients.clone(),
            shutdown_rx,
        },
        worker::WorkerConfig {
            stats_log_interval_secs: app_config.monitoring.stats_log_interval_secs,
            prune_interval_secs: app_config.database.prune_interval_secs,
            idle_key_ttl_secs: app_config.aggregation.idle_key_ttl_secs,
        },
    );

    let app = routes::app(routes::AppState {
        pipeline,
        dashboard,
        repo: Some(repo),
        ws_clients,
    });
    let addr = format!("{}:{}", app_config.server.host, app_config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Listening on http://{}", addr);

    tokio::select! {
        result = axum::serve(listener, app) => {
            result?;
        }
        _ = async {
            #[cfg(unix)]
            {
                let mut sigterm = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
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
        } => {
            tracing::info!("Received shutdown signal");
            if let Some(handle) = simulator_handle {
                handle.abort();
            }
            ticker_handle.abort();
            feed_handle.abort();
            let _ = shutdown_tx.send(());
            let _ = worker_handle.await;
            let _ = writer_shutdown_tx.send(());
            if tokio::time::timeout(Duration::from_secs(10), writer_handle).await.is_err() {
                tracing::warn!("record writer did not finish flushing in time");
            }
        }
    }

    Ok(())
}
