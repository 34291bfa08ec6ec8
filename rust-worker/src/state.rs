//! Durable campaign state: versioned counters, phase, and setup flags.
//!
//! The state document is the resumption contract: it is overwritten
//! atomically after every batch, so a crash loses at most one batch of
//! bookkeeping. Folding a batch of outcomes is a pure transition on the
//! state value; persistence happens explicitly at the call site.

use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::dispatch::SendOutcome;

const STATE_VERSION: u32 = 1;

/// Campaign phase. Ordering follows declaration order; the phase only
/// ever advances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Idle,
    NewStage,
    ReplyStage,
    ForwardStage,
    OverflowStage,
    Done,
}

/// Which counter pair a dispatched batch belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchKind {
    New,
    Reply,
    Forward,
    Overflow,
}

/// Attempted/succeeded counters for one message kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KindCounters {
    pub attempted: u64,
    pub succeeded: u64,
}

/// The whole persisted campaign document.
///
/// Unknown fields are ignored on load so newer writers stay readable by
/// older binaries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CampaignState {
    pub version: u32,
    pub phase: Phase,
    #[serde(default)]
    pub new: KindCounters,
    #[serde(default)]
    pub reply: KindCounters,
    #[serde(default)]
    pub forward: KindCounters,
    #[serde(default)]
    pub overflow: KindCounters,
    #[serde(default)]
    pub estimated_bytes: u64,
    /// Wall-clock start of the campaign, unix seconds; 0 until first run
    #[serde(default)]
    pub started_at: u64,
    #[serde(default)]
    pub folders_done: bool,
    #[serde(default)]
    pub contacts_done: bool,
    #[serde(default)]
    pub calendar_done: bool,
}

impl Default for CampaignState {
    fn default() -> Self {
        Self {
            version: STATE_VERSION,
            phase: Phase::Idle,
            new: KindCounters::default(),
            reply: KindCounters::default(),
            forward: KindCounters::default(),
            overflow: KindCounters::default(),
            estimated_bytes: 0,
            started_at: 0,
            folders_done: false,
            contacts_done: false,
            calendar_done: false,
        }
    }
}

impl CampaignState {
    pub fn counters(&self, kind: BatchKind) -> &KindCounters {
        match kind {
            BatchKind::New => &self.new,
            BatchKind::Reply => &self.reply,
            BatchKind::Forward => &self.forward,
            BatchKind::Overflow => &self.overflow,
        }
    }

    fn counters_mut(&mut self, kind: BatchKind) -> &mut KindCounters {
        match kind {
            BatchKind::New => &mut self.new,
            BatchKind::Reply => &mut self.reply,
            BatchKind::Forward => &mut self.forward,
            BatchKind::Overflow => &mut self.overflow,
        }
    }

    /// Pure per-batch transition: counters and the cumulative estimate
    /// only ever grow.
    pub fn fold_batch(mut self, kind: BatchKind, outcomes: &[SendOutcome], batch_bytes: u64) -> Self {
        let succeeded = outcomes.iter().filter(|outcome| outcome.success).count() as u64;
        let counters = self.counters_mut(kind);
        counters.attempted += outcomes.len() as u64;
        counters.succeeded += succeeded;
        self.estimated_bytes += batch_bytes;
        self
    }

    /// Move to `phase` if that is a forward step; backward moves are
    /// ignored (resumption re-walks the stage list from the top).
    pub fn advance(&mut self, phase: Phase) {
        if phase > self.phase {
            self.phase = phase;
        }
    }
}

/// Current wall-clock time as unix seconds.
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or(0)
}

/// Loads and atomically overwrites the campaign state document.
#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Read the persisted state, or start empty when no file exists yet.
    pub fn load(&self) -> Result<CampaignState> {
        if !self.path.is_file() {
            return Ok(CampaignState::default());
        }
        let raw = fs::read(&self.path)
            .with_context(|| format!("Failed to read campaign state '{}'", self.path.display()))?;
        serde_json::from_slice(&raw)
            .with_context(|| format!("Failed to parse campaign state '{}'", self.path.display()))
    }

    /// Whole-document overwrite via write-to-temp-then-rename.
    ///
    /// The temp file lives in the target directory so the rename stays on
    /// one filesystem and is atomic on POSIX.
    pub fn save(&self, state: &CampaignState) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create '{}'", parent.display()))?;
        }

        let tmp_path = self.path.with_extension("json.tmp");
        let data = serde_json::to_vec_pretty(state)?;

        let mut file = fs::File::create(&tmp_path)
            .with_context(|| format!("Failed to create '{}'", tmp_path.display()))?;
        file.write_all(&data)?;
        file.sync_data()?;

        fs::rename(&tmp_path, &self.path).map_err(|e| {
            let _ = fs::remove_file(&tmp_path);
            anyhow::Error::from(e)
                .context(format!("Failed to replace campaign state '{}'", self.path.display()))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcomes(total: usize, failed: usize) -> Vec<SendOutcome> {
        (0..total)
            .map(|n| {
                if n < failed {
                    SendOutcome::failed("connection reset".to_string())
                } else {
                    SendOutcome::ok(format!("<msg-{n}@corp.local>"))
                }
            })
            .collect()
    }

    #[test]
    fn test_load_missing_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path().join("campaign.json"));
        let state = store.load().unwrap();
        assert_eq!(state.phase, Phase::Idle);
        assert_eq!(state.new.attempted, 0);
        assert_eq!(state.estimated_bytes, 0);
    }

    #[test]
    fn test_save_and_reload_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path().join("state/campaign.json"));

        let mut state = CampaignState::default();
        state.phase = Phase::ReplyStage;
        state.new = KindCounters { attempted: 12, succeeded: 11 };
        state.estimated_bytes = 44_000;
        state.started_at = 1_754_000_000;
        state.folders_done = true;

        store.save(&state).unwrap();
        let reloaded = store.load().unwrap();
        assert_eq!(reloaded, state);
    }

    #[test]
    fn test_unknown_fields_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("campaign.json");
        std::fs::write(
            &path,
            r#"{"version":1,"phase":"new_stage","estimated_bytes":10,"future_field":true}"#,
        )
        .unwrap();

        let state = StateStore::new(&path).load().unwrap();
        assert_eq!(state.phase, Phase::NewStage);
        assert_eq!(state.estimated_bytes, 10);
    }

    #[test]
    fn test_fold_batch_advances_attempted_and_succeeded() {
        let state = CampaignState::default();
        let folded = state.fold_batch(BatchKind::New, &outcomes(8, 3), 16_000);

        assert_eq!(folded.new.attempted, 8);
        assert_eq!(folded.new.succeeded, 5);
        assert_eq!(folded.estimated_bytes, 16_000);
        assert_eq!(folded.reply.attempted, 0);
    }

    #[test]
    fn test_fold_batch_is_monotonic_across_batches() {
        let mut state = CampaignState::default();
        let mut last_attempted = 0;
        let mut last_bytes = 0;

        for round in 0..5 {
            state = state.fold_batch(BatchKind::Reply, &outcomes(4, round % 3), 1_000);
            assert!(state.reply.attempted > last_attempted);
            assert!(state.estimated_bytes > last_bytes);
            assert!(state.reply.succeeded <= state.reply.attempted);
            last_attempted = state.reply.attempted;
            last_bytes = state.estimated_bytes;
        }
    }

    #[test]
    fn test_fold_of_empty_outcome_set_changes_nothing() {
        let state = CampaignState::default();
        let replayed = state.clone().fold_batch(BatchKind::Forward, &[], 0);
        assert_eq!(replayed, state);
    }

    #[test]
    fn test_phase_only_advances() {
        let mut state = CampaignState::default();
        state.advance(Phase::ForwardStage);
        assert_eq!(state.phase, Phase::ForwardStage);

        state.advance(Phase::NewStage);
        assert_eq!(state.phase, Phase::ForwardStage);

        state.advance(Phase::Done);
        assert_eq!(state.phase, Phase::Done);
    }
}
