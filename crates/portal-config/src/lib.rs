//! # Portal Config
//!
//! Layered configuration for the media portal: TOML files under `config/`
//! overridden by `PORTAL__`-prefixed environment variables.

mod app_config;
mod loader;

pub use app_config::*;
pub use loader::*;
