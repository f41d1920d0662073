//! # Backend Module
//!
//! Contains all non-UI logic for the allotment console.
//!
//! - **Domain**: Scope coordination, caching and the audited write path
//! - **Storage**: The remote store boundary and its adapters
//! - **IO**: The [`AllotmentConsole`] facade the UI drives
//!
//! ## Architecture
//!
//! ```text
//! Admin UI
//!     ↓
//! IO Layer (AllotmentConsole)
//!     ↓
//! Domain Layer (resolver, allotment service, mutation coordinator)
//!     ↓
//! Storage Layer (AllotmentStore: SQLite, in-memory)
//! ```

pub mod domain;
pub mod io;
pub mod storage;

use anyhow::Result;
use log::info;
use std::sync::Arc;

use crate::config::ConsoleConfig;

pub use domain::*;
pub use io::*;
pub use storage::*;

/// Build a console backed by the SQLite store named in `config`
pub async fn initialize_console(config: &ConsoleConfig) -> Result<AllotmentConsole> {
    info!("Setting up database at {}", config.database_url);
    let store = SqliteStore::new(&config.database_url).await?;

    let session = match &config.operator_id {
        Some(user_id) => StaticSession::new(user_id.clone()),
        None => {
            info!("No operator configured, overrides will be rejected");
            StaticSession::anonymous()
        }
    };

    info!("Setting up allotment console");
    Ok(AllotmentConsole::new(
        Arc::new(store),
        Arc::new(session),
        config.reference_year,
    ))
}
