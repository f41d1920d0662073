//! # IO Module
//!
//! The interface layer between the admin UI and the domain logic.
//!
//! The UI never touches the resolver, the allotment service or the mutation
//! coordinator directly. It holds one [`AllotmentConsole`], sends it
//! selection events and write commands, and reads the display snapshot,
//! readiness, loading flags and error back from it.
//!
//! ## Key Responsibilities
//!
//! - **Wiring**: building the domain services around one shared state
//! - **Event entry**: division and calendar selection, edit buffers, writes
//! - **Snapshots**: cloned read-only views for rendering

pub mod console;

pub use console::*;
