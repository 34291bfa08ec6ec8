//! MailFill Worker - drives the mailbox-population send campaign.
//!
//! Loads the identity and content pools, validates the submission
//! endpoint, then runs (or resumes) the campaign until the estimated
//! corpus size target is met. The final summary is written to stdout for
//! the reporting collaborator.

use anyhow::{Context, Result};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use mailfill::{Campaign, Config, HttpTransport};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize structured JSON logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().json().flatten_event(true))
        .init();

    tracing::info!("campaign_worker_starting");

    // Load configuration from environment
    let config = Config::from_env();
    tracing::info!(
        endpoint = %config.submit_endpoint,
        target_bytes = config.target_total_bytes,
        chunk_size = config.chunk_size,
        send_concurrency = config.send_concurrency,
        "config_loaded"
    );

    // Fatal configuration errors surface here, before any batch is sent
    let transport = HttpTransport::new(&config).context("Failed to build the submission client")?;
    transport
        .validate()
        .await
        .context("Send endpoint validation failed")?;

    let mut campaign = Campaign::load(config).context("Failed to load campaign inputs")?;
    let summary = campaign.run(&transport, &transport).await?;

    println!("{}", serde_json::to_string_pretty(&summary)?);

    Ok(())
}
