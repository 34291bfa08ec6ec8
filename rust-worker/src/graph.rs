//! Append-only thread graph of previously sent messages.
//!
//! Replies and forwards originate from records in this store, so every
//! threading reference they carry points at a message that actually
//! landed. The in-memory vector is authoritative during the run; the
//! JSON Lines checkpoint file exists only so a restart can reload it.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// One successfully sent message, as remembered for threading.
///
/// Only addresses and display names are recorded here, never credentials.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreadRecord {
    pub message_id: String,
    pub subject: String,
    pub sender: String,
    pub sender_name: String,
    pub recipient: String,
    pub recipient_name: String,
}

/// Append-only store of thread records with a JSONL checkpoint.
#[derive(Debug)]
pub struct ThreadGraph {
    path: PathBuf,
    records: Vec<ThreadRecord>,
    flushed: usize,
}

impl ThreadGraph {
    /// Load the checkpoint file, skipping lines that fail to parse.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let mut records = Vec::new();

        if path.is_file() {
            let raw = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read thread graph '{}'", path.display()))?;
            for (number, line) in raw.lines().enumerate() {
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<ThreadRecord>(line) {
                    Ok(record) => records.push(record),
                    Err(e) => {
                        warn!(line = number + 1, error = %e, "thread_graph_line_skipped");
                    }
                }
            }
        }

        info!(records = records.len(), "thread_graph_loaded");

        let flushed = records.len();
        Ok(Self { path, records, flushed })
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Record a successful send. Records are never mutated afterwards.
    pub fn append(&mut self, record: ThreadRecord) {
        self.records.push(record);
    }

    /// Uniformly sample one record to originate a reply or forward.
    pub fn sample(&self, rng: &mut impl Rng) -> Option<&ThreadRecord> {
        self.records.choose(rng)
    }

    /// Append records added since the last checkpoint to the JSONL file.
    pub fn flush(&mut self) -> Result<()> {
        if self.flushed == self.records.len() {
            return Ok(());
        }

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create '{}'", parent.display()))?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("Failed to open thread graph '{}'", self.path.display()))?;

        for record in &self.records[self.flushed..] {
            let line = serde_json::to_string(record)?;
            writeln!(file, "{line}")?;
        }
        file.sync_data()?;

        self.flushed = self.records.len();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(n: usize) -> ThreadRecord {
        ThreadRecord {
            message_id: format!("<msg-{n}@corp.local>"),
            subject: format!("Subject {n}"),
            sender: format!("sender{n}@corp.local"),
            sender_name: format!("Sender {n}"),
            recipient: format!("recipient{n}@corp.local"),
            recipient_name: format!("Recipient {n}"),
        }
    }

    #[test]
    fn test_sample_from_empty_graph_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let graph = ThreadGraph::load(dir.path().join("graph.jsonl")).unwrap();
        let mut rng = rand::thread_rng();
        assert!(graph.is_empty());
        assert!(graph.sample(&mut rng).is_none());
    }

    #[test]
    fn test_flush_and_reload_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("graph.jsonl");

        let mut graph = ThreadGraph::load(&path).unwrap();
        for n in 0..5 {
            graph.append(record(n));
        }
        graph.flush().unwrap();

        // Second flush with nothing pending must not duplicate lines
        graph.flush().unwrap();

        let reloaded = ThreadGraph::load(&path).unwrap();
        assert_eq!(reloaded.len(), 5);
        let mut rng = rand::thread_rng();
        let sampled = reloaded.sample(&mut rng).unwrap();
        assert!(sampled.message_id.starts_with("<msg-"));
    }

    #[test]
    fn test_incremental_flush_appends_only_new_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("graph.jsonl");

        let mut graph = ThreadGraph::load(&path).unwrap();
        graph.append(record(0));
        graph.flush().unwrap();
        graph.append(record(1));
        graph.append(record(2));
        graph.flush().unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        assert_eq!(raw.lines().count(), 3);
    }

    #[test]
    fn test_corrupt_lines_are_skipped_on_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("graph.jsonl");

        let good = serde_json::to_string(&record(0)).unwrap();
        std::fs::write(&path, format!("{good}\nnot-json\n")).unwrap();

        let graph = ThreadGraph::load(&path).unwrap();
        assert_eq!(graph.len(), 1);
    }
}
