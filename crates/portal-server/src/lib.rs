//! # Portal Server Library
//!
//! Component wiring, leader-gated background processing and startup
//! utilities of the portal server binary.

pub mod di;
pub mod startup;
pub mod supervisor;
