pub mod backend;
pub mod config;
pub mod logging;

pub use backend::{initialize_console, AllotmentConsole};
pub use config::ConsoleConfig;
