//! # Domain Module
//!
//! Scope coordination for the allotment console.
//!
//! The console shows one division and one calendar at a time. Settings and
//! allotments arrive asynchronously from the remote store, and the operator
//! may switch scope at any moment, so every piece of this module is built
//! around two rules: a remote read for a given key runs at most once at a
//! time, and a result only reaches the live display if its scope is still the
//! selected one when it lands.
//!
//! ## Module Organization
//!
//! - **fetch_registry**: In-flight deduplication keyed by [`InFlightKey`]
//! - **allotment_cache**: Per-calendar store of fetched rows and edit buffers
//! - **readiness**: Per-division "allotments fully loaded" flags
//! - **console_state**: The shared state snapshot and its accessor handle
//! - **allotment_service**: Read path for yearly and weekly allotments
//! - **scope_resolver**: Division switching and calendar selection
//! - **mutation_coordinator**: Audited writes and their post-write refetch
//! - **week_calendar**: Monday-based week arithmetic
//! - **commands**: Input types for the write path
//! - **errors**: [`ConsoleError`]
//!
//! ## Core Concepts
//!
//! - **Division**: Top-level grouping; switching it resets the live scope
//! - **Calendar**: Allotment scope inside a division
//! - **Readiness**: A division is ready once its selected calendar has both
//!   halves of the current and next year loaded
//! - **Scope token**: Snapshot of the selection taken before an await and
//!   compared after it

pub mod allotment_cache;
pub mod allotment_service;
pub mod commands;
pub mod console_state;
pub mod errors;
pub mod fetch_registry;
pub mod mutation_coordinator;
pub mod readiness;
pub mod scope_resolver;
pub mod week_calendar;

pub use allotment_cache::*;
pub use allotment_service::*;
pub use commands::*;
pub use console_state::*;
pub use errors::*;
pub use fetch_registry::*;
pub use mutation_coordinator::*;
pub use readiness::*;
pub use scope_resolver::*;
pub use week_calendar::*;
