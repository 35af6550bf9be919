//! # Portal Repository
//!
//! MySQL persistence for the background job subsystem:
//!
//! ```text
//! WatchlistSyncService / LeaderElector
//!   ↓  Arc<dyn WatchlistSyncRepository>, Arc<dyn LeaseStore>, ...
//! MySql*Repository / MySqlLeaseStore   (SQLx)
//!   ↓  Arc<DatabasePool>
//! MySQL
//! ```

pub mod mysql;
pub mod pool;
pub mod traits;

pub use mysql::*;
pub use pool::*;
pub use traits::*;
