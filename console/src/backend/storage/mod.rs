//! # Storage Module
//!
//! The persistence boundary of the console. The remote data store is an
//! external collaborator; the domain layer only sees the [`AllotmentStore`]
//! trait, with two adapters shipped here:
//!
//! - **SqliteStore**: local SQLite database via SQLx, used by the binary and
//!   for store-level tests
//! - **MemoryStore**: in-process rows with call counting, failure injection
//!   and read gating, used to test the coordinator's fetch behavior
//!
//! Both adapters share one [`range_plan`] so a date-range override touches the
//! same rows whichever backend executes it.

pub mod memory;
pub mod range_plan;
pub mod sqlite;
pub mod traits;

pub use memory::{MemoryStore, StoreOperation};
pub use sqlite::SqliteStore;
pub use traits::{AllotmentStore, SessionProvider, StaticSession};
