//! Server startup utilities.

use portal_config::AppConfig;
use tracing::info;

/// Prints the startup banner.
pub fn print_banner() {
    info!(r#"
    ____             __        __
   / __ \____  _____/ /_____ _/ /
  / /_/ / __ \/ ___/ __/ __ `/ /
 / ____/ /_/ / /  / /_/ /_/ / /
/_/    \____/_/   \__/\__,_/_/
    "#);
}

/// Prints server startup information.
pub fn print_startup_info(config: &AppConfig, queue_enabled: bool) {
    let separator = "=".repeat(60);
    let base = format!("http://{}", config.server.addr());
    info!("{}", separator);
    info!("Environment: {}", config.app.environment);
    info!("REST API:    {}/api/v1", base);
    info!("Health:      {}/api/v1/health", base);
    if config.observability.metrics_enabled {
        info!("Metrics:     {}{}", base, config.observability.metrics_path);
    }
    info!("Job queue:   {}", if queue_enabled { "enabled" } else { "disabled" });
    info!("{}", separator);
}
