//! Configuration module for environment variable parsing.
//!
//! Reads all configuration from environment variables with tolerant
//! fallbacks; malformed values are logged and replaced with defaults.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use tracing::warn;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Submission endpoint URL (must be https; the server assigns message ids)
    pub submit_endpoint: String,

    /// Path to the identity feed (ordered JSON records with credentials)
    pub identity_file: PathBuf,

    /// Directory holding attachment items in small/medium/large tiers
    pub content_dir: PathBuf,

    /// Path of the persisted campaign state document
    pub state_file: PathBuf,

    /// Path of the append-only thread graph checkpoint (JSON Lines)
    pub thread_graph_file: PathBuf,

    /// Overall estimated-corpus-size target in bytes
    pub target_total_bytes: u64,

    /// Assumed average wire size per message, used to derive send targets
    pub avg_message_bytes: u64,

    /// Number of send requests generated and dispatched per batch
    pub chunk_size: usize,

    /// Maximum concurrent in-flight sends per batch
    pub send_concurrency: usize,

    /// Maximum concurrent provisioning calls (kept below send concurrency)
    pub provision_concurrency: usize,

    /// Fixed backoff between provisioning retry attempts, in milliseconds
    pub provision_backoff_ms: u64,

    /// Per-send timeout in milliseconds
    pub send_timeout_ms: u64,

    /// Probability that a new message carries an inline image (0.0 - 1.0)
    pub inline_image_probability: f64,

    /// Probability that a new message carries CC recipients (0.0 - 1.0)
    pub cc_probability: f64,

    /// MIME encoding inflation applied to attachment bytes in the estimator
    pub mime_overhead_factor: f64,

    /// Fixed per-message envelope overhead in bytes
    pub envelope_bytes: u64,

    /// Multiplier approximating mailbox-side duplication (Sent + Inbox copies)
    pub mailbox_copy_factor: f64,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        Config {
            submit_endpoint: env::var("SUBMIT_ENDPOINT")
                .unwrap_or_else(|_| "https://localhost:8443/".to_string()),

            identity_file: parse_path("IDENTITY_FILE", "identities.json"),

            content_dir: parse_path("CONTENT_DIR", "content"),

            state_file: parse_path("STATE_FILE", "state/campaign.json"),

            thread_graph_file: parse_path("THREAD_GRAPH_FILE", "state/thread_graph.jsonl"),

            target_total_bytes: parse_env("TARGET_TOTAL_BYTES", 1_073_741_824),

            avg_message_bytes: parse_env("AVG_MESSAGE_BYTES", 150_000),

            chunk_size: parse_env("CHUNK_SIZE", 25),

            send_concurrency: parse_env("SEND_CONCURRENCY", 16),

            provision_concurrency: parse_env("PROVISION_CONCURRENCY", 4),

            provision_backoff_ms: parse_env("PROVISION_BACKOFF_MS", 500),

            send_timeout_ms: parse_env("SEND_TIMEOUT_MS", 30_000),

            inline_image_probability: parse_env("INLINE_IMAGE_PROBABILITY", 0.3),

            cc_probability: parse_env("CC_PROBABILITY", 0.4),

            mime_overhead_factor: parse_env("MIME_OVERHEAD_FACTOR", 1.33),

            envelope_bytes: parse_env("ENVELOPE_BYTES", 1024),

            mailbox_copy_factor: parse_env("MAILBOX_COPY_FACTOR", 2.0),
        }
    }
}

/// Parse an environment variable into any `FromStr` type, warning and
/// falling back to the default when the value is malformed.
fn parse_env<T: FromStr>(name: &str, default: T) -> T {
    match env::var(name) {
        Ok(raw) => match raw.trim().parse::<T>() {
            Ok(value) => value,
            Err(_) => {
                warn!(env_var = name, value = %raw, "Invalid value, using default");
                default
            }
        },
        Err(_) => default,
    }
}

/// Read a path-valued environment variable with a default.
fn parse_path(name: &str, default: &str) -> PathBuf {
    env::var(name).map(PathBuf::from).unwrap_or_else(|_| PathBuf::from(default))
}
