//! # Portal REST
//!
//! HTTP action surface of the media portal. Every route answers with an
//! `ActionResult` envelope and acts for the identity forwarded by the web
//! front end.

pub mod controllers;
pub mod extractors;
pub mod middleware;
pub mod responses;
pub mod router;
pub mod state;

pub use router::*;
pub use state::*;
