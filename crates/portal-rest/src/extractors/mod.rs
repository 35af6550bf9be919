//! Custom Axum extractors.

mod actor;
mod validated;

pub use actor::*;
pub use validated::*;
