//! Configuration loader with layered sources.

use crate::AppConfig;
use config::{Config, ConfigError, Environment, File};
use portal_core::PortalError;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Configuration loader with runtime refresh support.
#[derive(Clone)]
pub struct ConfigLoader {
    config: Arc<RwLock<AppConfig>>,
    config_dir: String,
}

impl ConfigLoader {
    /// Creates a new configuration loader.
    ///
    /// Configuration is loaded from multiple sources in order:
    /// 1. `config/default.toml` - Default values
    /// 2. `config/{environment}.toml` - Environment-specific overrides
    /// 3. `config/local.toml` - Uncommitted local overrides
    /// 4. Environment variables with `PORTAL__` prefix
    pub fn new(config_dir: impl Into<String>) -> Result<Self, PortalError> {
        let config_dir = config_dir.into();
        let config = Self::load_config(&config_dir)?;

        Ok(Self {
            config: Arc::new(RwLock::new(config)),
            config_dir,
        })
    }

    /// Loads configuration from the default location (`./config`).
    pub fn from_default_location() -> Result<Self, PortalError> {
        Self::new("./config")
    }

    /// Returns the current configuration.
    pub async fn get(&self) -> AppConfig {
        self.config.read().await.clone()
    }

    /// Reloads the configuration from disk.
    pub async fn reload(&self) -> Result<(), PortalError> {
        let new_config = Self::load_config(&self.config_dir)?;
        let mut config = self.config.write().await;
        *config = new_config;
        info!("Configuration reloaded successfully");
        Ok(())
    }

    fn load_config(config_dir: &str) -> Result<AppConfig, PortalError> {
        if let Err(e) = dotenvy::dotenv() {
            debug!("No .env file found or error loading it: {}", e);
        }

        let environment =
            std::env::var("PORTAL_ENVIRONMENT").unwrap_or_else(|_| "development".to_string());

        info!("Loading configuration for environment: {}", environment);

        let mut builder = Config::builder();

        for name in ["default", environment.as_str(), "local"] {
            let path = format!("{}/{}.toml", config_dir, name);
            if Path::new(&path).exists() {
                debug!("Loading config from: {}", path);
                builder = builder.add_source(File::with_name(&path).required(false));
            }
        }

        builder = builder.add_source(
            Environment::with_prefix("PORTAL")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build().map_err(config_error_to_portal_error)?;

        let app_config: AppConfig = config
            .try_deserialize()
            .map_err(config_error_to_portal_error)?;

        Self::validate_config(&app_config)?;

        Ok(app_config)
    }

    /// Validates the configuration.
    pub fn validate_config(config: &AppConfig) -> Result<(), PortalError> {
        if config.database.url.is_empty() {
            return Err(PortalError::Configuration("Database URL is required".to_string()));
        }

        if config.lock.renew_interval_secs == 0 || config.lock.renew_interval_secs >= config.lock.ttl_secs {
            return Err(PortalError::Configuration(format!(
                "lock.renew_interval_secs ({}) must be between 1 and lock.ttl_secs ({})",
                config.lock.renew_interval_secs, config.lock.ttl_secs
            )));
        }

        if config.jobs.heartbeat_interval_secs >= config.jobs.heartbeat_ttl_secs {
            return Err(PortalError::Configuration(
                "jobs.heartbeat_interval_secs must be shorter than jobs.heartbeat_ttl_secs".to_string(),
            ));
        }

        if config.watchlist.user_lease_ttl_secs == 0 || config.watchlist.user_lease_ttl_secs > config.jobs.job_timeout_secs {
            return Err(PortalError::Configuration(format!(
                "watchlist.user_lease_ttl_secs ({}) must be between 1 and jobs.job_timeout_secs ({})",
                config.watchlist.user_lease_ttl_secs, config.jobs.job_timeout_secs
            )));
        }

        if config.watchlist.batch_size == 0 {
            return Err(PortalError::Configuration(
                "watchlist.batch_size must be at least 1".to_string(),
            ));
        }

        if config.redis.url.is_none() {
            warn!("No Redis URL configured; background job processing is disabled");
        }

        if config.app.environment == "production" && config.server.internal_api_token.is_none() {
            warn!("No internal API token configured; identity headers will be rejected");
        }

        Ok(())
    }
}

fn config_error_to_portal_error(err: ConfigError) -> PortalError {
    PortalError::Configuration(err.to_string())
}
