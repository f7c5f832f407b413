use anyhow::{Context, Result};
use capture_ingest::config::{Config, WatcherConfig};
use capture_ingest::{
    AxleProcessor, CameraCalibration, DimensionEnricher, FileHandler, FixedBoxDetector,
    FtpDirectory, Ledger, PgLedger, PlateProcessor, S3ObjectStore, Staging, Watcher,
};
use std::sync::Arc;
use tokio::signal;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::load().context("Failed to load configuration")?;

    // Initialize logging
    init_tracing(&config.service.log_level);

    info!(
        service = %config.service.name,
        site_id = %config.service.site_id,
        "Starting capture ingest service"
    );

    // Initialize metrics
    init_metrics(config.service.metrics_port)?;

    let pg = PgLedger::new(&config.database)
        .await
        .context("Failed to initialize ledger")?;
    pg.health_check().await?;

    // Run migrations if enabled
    if config.database.run_migrations {
        pg.run_migrations()
            .await
            .context("Failed to run database migrations")?;
    }
    let pg = Arc::new(pg);
    let ledger: Arc<dyn Ledger> = pg.clone();

    let s3 = S3ObjectStore::new(&config.s3, &config.plate.bucket)
        .await
        .context("Failed to initialize S3 object store")?;

    let enricher = if config.dimension.enabled {
        let calibration = CameraCalibration::new(&config.dimension.calibration)
            .context("Invalid camera calibration")?;
        info!(calibration = %calibration, "Vehicle dimension estimation enabled");
        Some(DimensionEnricher::new(
            Arc::new(FixedBoxDetector::new(config.dimension.detector_threshold)),
            Arc::new(calibration),
        ))
    } else {
        None
    };

    let shutdown = CancellationToken::new();
    let mut handles = Vec::new();

    if config.plate.enabled {
        let staging = Staging::new(
            &config.service.site_id,
            Arc::new(s3.with_bucket(&config.plate.bucket)),
            ledger.clone(),
        )
        .with_quarantine(config.plate.quarantine_dir.clone());

        let mut processor = PlateProcessor::new(staging);
        if let Some(enricher) = enricher {
            processor = processor.with_enricher(enricher);
        }
        handles.push(spawn_watcher("plate", &config.plate, processor, shutdown.clone()).await);
    }

    if config.axle.enabled {
        let staging = Staging::new(
            &config.service.site_id,
            Arc::new(s3.with_bucket(&config.axle.bucket)),
            ledger.clone(),
        )
        .with_quarantine(config.axle.quarantine_dir.clone());

        let processor = AxleProcessor::new(staging);
        handles.push(spawn_watcher("axle", &config.axle, processor, shutdown.clone()).await);
    }

    if handles.is_empty() {
        warn!("No watcher enabled, nothing to ingest");
    }

    info!(watchers = handles.len(), "Capture ingest service started successfully");

    // Wait for shutdown signal
    shutdown_signal().await;

    info!("Shutting down capture ingest service, finishing current poll cycles");
    shutdown.cancel();

    for result in futures::future::join_all(handles).await {
        if let Err(e) = result {
            error!(error = %e, "Watcher task failed");
        }
    }

    pg.close().await;
    info!("Capture ingest service stopped");

    Ok(())
}

/// Start a watcher over `config.ftp`. An unreachable server is not fatal:
/// the directory reconnects on the next poll.
async fn spawn_watcher<H>(
    domain: &'static str,
    config: &WatcherConfig,
    handler: H,
    shutdown: CancellationToken,
) -> JoinHandle<()>
where
    H: FileHandler + 'static,
{
    let mut dir = FtpDirectory::new(config.ftp.clone());
    if let Err(e) = dir.connect().await {
        warn!(domain = domain, error = %e, "Initial FTP connection failed, will retry on poll");
    }

    let watcher = Watcher::new(domain, dir, handler, config.poll_interval());
    tokio::spawn(async move {
        let mut dir = watcher.run(shutdown).await;
        dir.disconnect().await;
    })
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().json())
        .init();
}

/// Initialize Prometheus metrics exporter
fn init_metrics(port: u16) -> Result<()> {
    let builder = metrics_exporter_prometheus::PrometheusBuilder::new();

    builder
        .with_http_listener(([0, 0, 0, 0], port))
        .install()
        .context("Failed to install Prometheus metrics exporter")?;

    info!(port = port, "Prometheus metrics exporter started");

    Ok(())
}

/// Wait for shutdown signal (SIGINT or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}
