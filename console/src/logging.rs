//! Logger setup for the console binary.

use log::LevelFilter;

/// Install `env_logger` at `level`. `RUST_LOG`, when set, takes precedence.
pub fn init_logging(level: LevelFilter) {
    let mut builder = env_logger::Builder::new();
    builder.filter_level(level);
    if let Ok(filters) = std::env::var("RUST_LOG") {
        builder.parse_filters(&filters);
    }
    // Keep whichever logger was installed first
    let _ = builder.try_init();
}
