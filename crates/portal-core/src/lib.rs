//! # Portal Core
//!
//! Core types, traits, and error definitions for the media portal.
//! Every other crate in the workspace builds on the error taxonomy,
//! identifiers and domain entities defined here.

pub mod domain;
pub mod error;
pub mod id;
pub mod lease;
pub mod pagination;
pub mod result;
#[cfg(feature = "telemetry")]
pub mod telemetry;
pub mod validation;

pub use domain::*;
pub use error::*;
pub use id::*;
pub use lease::*;
pub use pagination::*;
pub use result::*;
pub use validation::*;
