//! HTTP action controllers.

pub mod health_controller;
pub mod jobs_controller;
pub mod watchlist_controller;

pub use health_controller::*;
