//! # Portal Server
//!
//! Main entry point: serves the HTTP actions and, on the instance that
//! holds the leader lease, runs the watchlist sync worker and scheduler.

use axum::routing::get;
use metrics_exporter_prometheus::PrometheusBuilder;
use portal_config::{AppConfig, ConfigLoader};
use portal_core::telemetry::{init_logging, LogFormat, LoggingConfig};
use portal_core::{PortalError, PortalResult};
use portal_rest::create_router;
use portal_server::di::build_app_module;
use portal_server::startup::{print_banner, print_startup_info};
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("Application error: {}", e);
        eprintln!("portal-server failed: {}", e);
        std::process::exit(1);
    }
}

async fn run() -> PortalResult<()> {
    let config_loader = ConfigLoader::from_default_location()?;
    let config = config_loader.get().await;

    init_logging(&logging_config(&config))?;
    print_banner();
    info!("Starting portal server, version {}", env!("CARGO_PKG_VERSION"));

    let metrics_handle = if config.observability.metrics_enabled {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .map_err(|e| PortalError::Configuration(format!("Failed to install metrics recorder: {}", e)))?;
        portal_jobs::register_metrics();
        portal_watchlist::register_metrics();
        Some(handle)
    } else {
        None
    };

    let module = build_app_module(&config).await?;
    let mut router = create_router(module.state, &config.server);

    if let Some(handle) = metrics_handle {
        router = router.route(
            &config.observability.metrics_path,
            get(move || {
                let handle = handle.clone();
                async move { handle.render() }
            }),
        );
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        shutdown_tx.send_replace(true);
    });

    print_startup_info(&config, module.background.is_some());

    let background = module
        .background
        .map(|supervisor| tokio::spawn(supervisor.run(shutdown_rx.clone())));

    let addr = config.server.addr();
    info!("Starting REST server on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| PortalError::Internal(format!("Failed to bind {}: {}", addr, e)))?;

    let mut server_shutdown = shutdown_rx;
    let served = axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            let _ = server_shutdown.wait_for(|stop| *stop).await;
        })
        .await;

    if let Some(handle) = background {
        if let Err(e) = handle.await {
            warn!(error = %e, "Background supervisor ended abnormally");
        }
    }
    module.db_pool.close().await;

    served.map_err(|e| PortalError::Internal(format!("REST server error: {}", e)))?;
    info!("Server shutdown complete");
    Ok(())
}

fn logging_config(config: &AppConfig) -> LoggingConfig {
    let format = if config.observability.log_format.eq_ignore_ascii_case("json") {
        LogFormat::Json
    } else {
        LogFormat::Pretty
    };
    LoggingConfig {
        level: config.observability.log_level.clone(),
        format,
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
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
            info!("Received Ctrl+C, initiating graceful shutdown...");
        }
        _ = terminate => {
            info!("Received terminate signal, initiating graceful shutdown...");
        }
    }
}
