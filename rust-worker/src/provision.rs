//! One-time mailbox seeding: folders, contacts, and a calendar entry per
//! identity.
//!
//! These side operations sit outside the send core but reuse the same
//! bounded-pool shape, with a smaller concurrency cap so the endpoint is
//! not hammered during setup, and a fixed-backoff retry of three attempts
//! per item. Failures are counted and logged, never fatal.

use std::time::Duration;

use futures::stream::{self, StreamExt};
use serde_json::json;
use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::identity::Identity;
use crate::transport::{HttpTransport, SendError};

const PROVISION_ATTEMPTS: usize = 3;

const DEFAULT_FOLDERS: &[&str] = &["Archive", "Projects", "Receipts", "Travel"];

/// The three one-time seeding steps, each gated by its own state flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisionStep {
    Folders,
    Contacts,
    Calendar,
}

impl ProvisionStep {
    pub fn endpoint_segment(self) -> &'static str {
        match self {
            ProvisionStep::Folders => "folders",
            ProvisionStep::Contacts => "contacts",
            ProvisionStep::Calendar => "events",
        }
    }
}

/// One seeding call against one identity's mailbox.
#[derive(Debug, Clone)]
pub struct ProvisionItem {
    pub step: ProvisionStep,
    pub name: String,
    pub payload: serde_json::Value,
}

/// Seam for the provisioning side calls, stubbed in tests.
pub trait Provisioner {
    fn provision(
        &self,
        identity: &Identity,
        item: &ProvisionItem,
    ) -> impl std::future::Future<Output = Result<(), SendError>> + Send;
}

impl Provisioner for HttpTransport {
    async fn provision(&self, identity: &Identity, item: &ProvisionItem) -> Result<(), SendError> {
        let url = self.endpoint(item.step.endpoint_segment())?;
        let response = self
            .client()
            .post(url)
            .basic_auth(&identity.address, Some(&identity.credential))
            .json(&item.payload)
            .timeout(self.timeout())
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        let status = response.status();
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(SendError::Auth {
                address: identity.address.clone(),
            });
        }
        if !status.is_success() {
            return Err(SendError::Endpoint {
                status: status.as_u16(),
            });
        }
        Ok(())
    }
}

fn items_for(step: ProvisionStep, identity: &Identity) -> Vec<ProvisionItem> {
    match step {
        ProvisionStep::Folders => DEFAULT_FOLDERS
            .iter()
            .map(|folder| ProvisionItem {
                step,
                name: (*folder).to_string(),
                payload: json!({ "name": folder }),
            })
            .collect(),
        ProvisionStep::Contacts => (1..=3)
            .map(|n| ProvisionItem {
                step,
                name: format!("Contact {n}"),
                payload: json!({
                    "name": format!("Contact {n}"),
                    "email": format!("contact{}.{}@contacts.local", n, identity.index),
                }),
            })
            .collect(),
        ProvisionStep::Calendar => vec![ProvisionItem {
            step,
            name: "Team sync".to_string(),
            payload: json!({ "subject": "Team sync", "duration_minutes": 30 }),
        }],
    }
}

async fn provision_with_retry<P: Provisioner>(
    provisioner: &P,
    identity: &Identity,
    item: &ProvisionItem,
    backoff: Duration,
) -> bool {
    for attempt in 1..=PROVISION_ATTEMPTS {
        match provisioner.provision(identity, item).await {
            Ok(()) => return true,
            Err(e) => {
                warn!(
                    address = %identity.address,
                    item = %item.name,
                    attempt = attempt,
                    error = %e,
                    "provision_attempt_failed"
                );
                if attempt < PROVISION_ATTEMPTS {
                    sleep(backoff).await;
                }
            }
        }
    }

    error!(
        address = %identity.address,
        item = %item.name,
        "provision_item_abandoned"
    );
    false
}

/// Run one seeding step for every identity through a bounded pool.
///
/// Returns `(ok, failed)` item counts.
pub async fn run_step<P: Provisioner + Sync>(
    provisioner: &P,
    identities: &[Identity],
    step: ProvisionStep,
    limit: usize,
    backoff: Duration,
) -> (usize, usize) {
    let work: Vec<(&Identity, ProvisionItem)> = identities
        .iter()
        .flat_map(|identity| {
            items_for(step, identity)
                .into_iter()
                .map(move |item| (identity, item))
        })
        .collect();

    let results: Vec<bool> = stream::iter(work.iter().map(|(identity, item)| {
        provision_with_retry(provisioner, identity, item, backoff)
    }))
    .buffered(limit.max(1))
    .collect()
    .await;

    let ok = results.iter().filter(|succeeded| **succeeded).count();
    let failed = results.len() - ok;
    info!(step = ?step, ok = ok, failed = failed, "provision_step_complete");
    (ok, failed)
}
