use allotment_console::logging::init_logging;
use allotment_console::{initialize_console, ConsoleConfig};
use anyhow::{bail, Result};
use log::{error, info};
use std::path::PathBuf;

const CONFIG_ENV: &str = "ALLOTMENT_CONSOLE_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "console.yaml";

/// Usage: `allotment-console <division> [calendar-id]`
///
/// Loads the division (and optionally a calendar) and prints what the console
/// would display as JSON.
#[tokio::main]
async fn main() -> Result<()> {
    let config_path = std::env::var(CONFIG_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));
    let config = ConsoleConfig::load_or_default(&config_path)?;
    init_logging(config.level_filter()?);
    info!("Starting allotment console with config {}", config_path.display());

    let mut args = std::env::args().skip(1);
    let Some(division) = args.next() else {
        bail!("usage: allotment-console <division> [calendar-id]");
    };
    let calendar = args.next();

    let console = initialize_console(&config).await?;
    console.select_division(&division).await;
    if let Some(calendar_id) = calendar.as_deref() {
        console.select_calendar(Some(calendar_id)).await;
    }

    if let Some(message) = console.error() {
        error!("{}", message);
        bail!(message);
    }

    info!(
        "Division {} ready: {}",
        division,
        console.is_ready(&division)
    );
    println!("{}", serde_json::to_string_pretty(&console.displayed_allotments())?);
    Ok(())
}
