//! Heuristic wire-size estimation for candidate messages.
//!
//! The estimate is body bytes plus attachment bytes inflated by a MIME
//! encoding factor plus a fixed envelope constant, doubled to approximate
//! the sender's Sent Items copy alongside the recipient's Inbox copy. All
//! three constants are configuration, not a calibrated model.

use crate::config::Config;
use crate::generate::SendRequest;

/// Converts a candidate message into its estimated size contribution.
#[derive(Debug, Clone)]
pub struct SizeEstimator {
    pub mime_factor: f64,
    pub envelope_bytes: u64,
    pub mailbox_copy_factor: f64,
}

impl SizeEstimator {
    pub fn from_config(config: &Config) -> Self {
        Self {
            mime_factor: config.mime_overhead_factor,
            envelope_bytes: config.envelope_bytes,
            mailbox_copy_factor: config.mailbox_copy_factor,
        }
    }

    /// Estimated bytes this request will add to the corpus once delivered.
    pub fn estimate(&self, request: &SendRequest) -> u64 {
        let attachment_bytes: u64 = request
            .attachments
            .iter()
            .map(|item| item.bytes)
            .chain(request.inline_image.iter().map(|item| item.bytes))
            .sum();

        let raw = request.body.len() as f64
            + attachment_bytes as f64 * self.mime_factor
            + self.envelope_bytes as f64;

        (raw * self.mailbox_copy_factor).round() as u64
    }
}
