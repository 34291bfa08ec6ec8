//! Identity feed loading and sampling.
//!
//! The identity source is an ordered JSON file of sender records produced
//! by the account provisioning collaborator. Records whose credential is
//! missing or carries the exclusion sentinel are filtered out before any
//! work is generated.

use std::path::Path;

use anyhow::{Context, Result};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::Deserialize;
use tracing::info;

/// Sentinel credential marking an identity that must not send
/// (e.g. its provisioning failed upstream).
pub const EXCLUDED_CREDENTIAL: &str = "!excluded";

/// One record of the identity feed as it appears on disk.
#[derive(Debug, Clone, Deserialize)]
pub struct IdentityRecord {
    /// Position in the feed, used for round-robin sender selection
    pub index: usize,
    /// Primary address
    pub address: String,
    /// Human-readable display name
    pub display_name: String,
    /// Secret credential, or the exclusion sentinel / null
    #[serde(default)]
    pub credential: Option<String>,
}

/// A sendable identity with a known credential.
#[derive(Debug, Clone)]
pub struct Identity {
    pub index: usize,
    pub address: String,
    pub display_name: String,
    pub credential: String,
}

/// Read-only pool of sendable identities for the duration of a campaign.
#[derive(Debug)]
pub struct IdentityPool {
    identities: Vec<Identity>,
}

impl IdentityPool {
    /// Build a pool from feed records, dropping excluded identities.
    pub fn from_records(records: Vec<IdentityRecord>) -> Self {
        let total = records.len();
        let mut records = records;
        records.sort_by_key(|r| r.index);

        let identities: Vec<Identity> = records
            .into_iter()
            .filter_map(|record| {
                let credential = record.credential?;
                if credential.is_empty() || credential == EXCLUDED_CREDENTIAL {
                    return None;
                }
                Some(Identity {
                    index: record.index,
                    address: record.address,
                    display_name: record.display_name,
                    credential,
                })
            })
            .collect();

        info!(
            total_records = total,
            sendable = identities.len(),
            excluded = total - identities.len(),
            "identity_pool_loaded"
        );

        Self { identities }
    }

    /// Load the pool from a JSON feed file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read(path)
            .with_context(|| format!("Failed to read identity feed '{}'", path.display()))?;
        let records: Vec<IdentityRecord> = serde_json::from_slice(&raw)
            .with_context(|| format!("Failed to parse identity feed '{}'", path.display()))?;
        Ok(Self::from_records(records))
    }

    pub fn len(&self) -> usize {
        self.identities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }

    pub fn identities(&self) -> &[Identity] {
        &self.identities
    }

    /// Round-robin sender selection by cumulative send index.
    ///
    /// The pool is never empty when this is called; the controller
    /// validates the pool size at startup.
    pub fn by_round_robin(&self, send_index: u64) -> &Identity {
        let slot = (send_index % self.identities.len() as u64) as usize;
        &self.identities[slot]
    }

    /// Uniformly sample up to `count` distinct identities whose addresses
    /// are not in `excluded`. Returns fewer when the pool runs short.
    pub fn sample_excluding(
        &self,
        rng: &mut impl Rng,
        count: usize,
        excluded: &[&str],
    ) -> Vec<String> {
        let candidates: Vec<&Identity> = self
            .identities
            .iter()
            .filter(|identity| !excluded.contains(&identity.address.as_str()))
            .collect();

        candidates
            .choose_multiple(rng, count.min(candidates.len()))
            .map(|identity| identity.address.clone())
            .collect()
    }

    /// Resolve an address back to a sendable identity, if it still has one.
    pub fn identity_for(&self, address: &str) -> Option<&Identity> {
        self.identities.iter().find(|identity| identity.address == address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(index: usize, address: &str, credential: Option<&str>) -> IdentityRecord {
        IdentityRecord {
            index,
            address: address.to_string(),
            display_name: format!("User {index}"),
            credential: credential.map(|c| c.to_string()),
        }
    }

    #[test]
    fn test_excluded_identities_filtered() {
        let pool = IdentityPool::from_records(vec![
            record(0, "a@corp.local", Some("pw-a")),
            record(1, "b@corp.local", None),
            record(2, "c@corp.local", Some(EXCLUDED_CREDENTIAL)),
            record(3, "d@corp.local", Some("")),
            record(4, "e@corp.local", Some("pw-e")),
        ]);

        assert_eq!(pool.len(), 2);
        assert!(pool.identity_for("a@corp.local").is_some());
        assert!(pool.identity_for("b@corp.local").is_none());
        assert!(pool.identity_for("c@corp.local").is_none());
        assert!(pool.identity_for("d@corp.local").is_none());
    }

    #[test]
    fn test_round_robin_wraps_in_feed_order() {
        // Deliberately out of order in the feed
        let pool = IdentityPool::from_records(vec![
            record(2, "c@corp.local", Some("pw")),
            record(0, "a@corp.local", Some("pw")),
            record(1, "b@corp.local", Some("pw")),
        ]);

        assert_eq!(pool.by_round_robin(0).address, "a@corp.local");
        assert_eq!(pool.by_round_robin(1).address, "b@corp.local");
        assert_eq!(pool.by_round_robin(2).address, "c@corp.local");
        assert_eq!(pool.by_round_robin(3).address, "a@corp.local");
    }

    #[test]
    fn test_sample_excluding_never_returns_excluded_or_duplicates() {
        let pool = IdentityPool::from_records(
            (0..10).map(|i| record(i, &format!("u{i}@corp.local"), Some("pw"))).collect(),
        );

        let mut rng = rand::thread_rng();
        for _ in 0..50 {
            let sampled = pool.sample_excluding(&mut rng, 5, &["u0@corp.local"]);
            assert!(sampled.len() <= 5);
            assert!(!sampled.contains(&"u0@corp.local".to_string()));
            let mut deduped = sampled.clone();
            deduped.sort();
            deduped.dedup();
            assert_eq!(deduped.len(), sampled.len());
        }
    }

    #[test]
    fn test_sample_excluding_caps_at_pool_size() {
        let pool = IdentityPool::from_records(vec![
            record(0, "a@corp.local", Some("pw")),
            record(1, "b@corp.local", Some("pw")),
        ]);

        let mut rng = rand::thread_rng();
        let sampled = pool.sample_excluding(&mut rng, 5, &["a@corp.local"]);
        assert_eq!(sampled, vec!["b@corp.local".to_string()]);
    }
}
