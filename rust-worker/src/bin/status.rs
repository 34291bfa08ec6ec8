//! MailFill Status - prints the persisted campaign summary.
//!
//! Reads the campaign state document and emits the same summary JSON the
//! worker prints on completion, so the reporting collaborator can poll
//! progress without touching the running campaign.

use anyhow::{Context, Result};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use mailfill::campaign::Summary;
use mailfill::{Config, StateStore};

fn main() -> Result<()> {
    // Initialize structured JSON logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().json().flatten_event(true))
        .init();

    let config = Config::from_env();

    let state = StateStore::new(&config.state_file)
        .load()
        .context("Failed to load campaign state")?;

    let summary = Summary::from_state(&state, config.target_total_bytes);
    println!("{}", serde_json::to_string_pretty(&summary)?);

    Ok(())
}
