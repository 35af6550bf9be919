//! Domain entities shared by the persistence, job and sync layers.

mod request_service;
mod user;
mod watchlist;

pub use request_service::*;
pub use user::*;
pub use watchlist::*;
