//! Bounded batch dispatch.
//!
//! Executes a batch of send requests with a fixed cap on in-flight sends
//! and returns one outcome per request, in the batch's input order. A
//! failed unit reports its error and never disturbs its siblings; retry
//! policy, if any, belongs to the caller.

use futures::stream::{self, StreamExt};
use tracing::{info, warn};

use crate::generate::SendRequest;
use crate::transport::Transport;

/// The result of exactly one send request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendOutcome {
    pub success: bool,
    /// Assigned message id, present iff the send succeeded
    pub message_id: Option<String>,
    /// Error detail, present iff the send failed
    pub error: Option<String>,
}

impl SendOutcome {
    pub fn ok(message_id: String) -> Self {
        Self {
            success: true,
            message_id: Some(message_id),
            error: None,
        }
    }

    pub fn failed(error: String) -> Self {
        Self {
            success: false,
            message_id: None,
            error: Some(error),
        }
    }
}

/// Dispatch a batch with at most `limit` sends in flight.
///
/// The output vector preserves the input order of `requests`, not the
/// completion order of the workers.
pub async fn dispatch_batch<T: Transport + Sync>(
    transport: &T,
    requests: &[SendRequest],
    limit: usize,
) -> Vec<SendOutcome> {
    if requests.is_empty() {
        return Vec::new();
    }

    let outcomes: Vec<SendOutcome> = stream::iter(requests.iter().map(|request| async move {
        match transport.send(request).await {
            Ok(message_id) => SendOutcome::ok(message_id),
            Err(error) => SendOutcome::failed(error.to_string()),
        }
    }))
    .buffered(limit.max(1))
    .collect()
    .await;

    let ok = outcomes.iter().filter(|outcome| outcome.success).count();
    let failed = outcomes.len() - ok;
    info!(batch_size = outcomes.len(), ok = ok, failed = failed, "batch_dispatched");

    // One sampled error gives the operator something concrete to look at
    if let Some(detail) = outcomes.iter().find_map(|outcome| outcome.error.as_deref()) {
        warn!(failed = failed, error = %detail, "batch_errors_sampled");
    }

    outcomes
}
