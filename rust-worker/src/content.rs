//! Content pool: attachment items tagged by size tier and body snippets.
//!
//! Attachments are discovered by scanning `<content_dir>/{small,medium,large}`
//! at startup; only paths and on-disk sizes are recorded here. Bytes are read
//! lazily at send time so a failed read costs one request, not a batch.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use rand::seq::SliceRandom;
use rand::Rng;
use tracing::{info, warn};

/// Built-in body snippets, used when composing message bodies.
const BODY_SNIPPETS: &[&str] = &[
    "Following up on our conversation from earlier this week. I put together \
     the numbers we discussed and they look broadly in line with the plan.",
    "Quick update before the end of the day: the vendor confirmed the revised \
     delivery window, so we should be able to close this out by Friday.",
    "I went through the draft and left a handful of comments. Most of it reads \
     well; the second section needs another pass before we circulate it.",
    "Thanks for the detailed writeup. I agree with the overall direction, \
     though I would sequence the rollout differently to reduce the blast radius.",
    "The review meeting moved to Thursday at 10. Same room as last time. Let me \
     know if that clashes with anything on your side.",
    "Attached is the latest version with the figures updated through the end of \
     the quarter. The variance on line 14 is explained in the notes tab.",
    "We still need sign-off from facilities before the contractor can start. \
     I'll chase them tomorrow morning unless you've already heard back.",
    "No action needed from you on this one, just keeping you in the loop so the \
     handover next month is smoother.",
];

/// Built-in subject stems for new messages.
const SUBJECT_POOL: &[&str] = &[
    "Quarterly planning notes",
    "Project kickoff",
    "Budget review",
    "Team offsite logistics",
    "Vendor contract update",
    "Weekly sync follow-up",
    "Customer escalation",
    "Release readiness",
    "Hiring pipeline",
    "Expense report question",
];

/// Attachment size tier, matching the content directory layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeTier {
    Small,
    Medium,
    Large,
}

impl SizeTier {
    fn dir_name(self) -> &'static str {
        match self {
            SizeTier::Small => "small",
            SizeTier::Medium => "medium",
            SizeTier::Large => "large",
        }
    }
}

/// Reference to one file-system-resident attachment item.
#[derive(Debug, Clone, PartialEq)]
pub struct AttachmentRef {
    pub path: PathBuf,
    pub bytes: u64,
    pub tier: SizeTier,
}

/// Attachment selection policy for one generation pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachmentPolicy {
    /// The fixed weighted mix: 40% none, 30% small, 20% medium, 10% burst.
    Standard,
    /// Overflow-stage bias toward the largest available items.
    TopUp,
}

/// Read-only random-access collection of attachments and body material.
#[derive(Debug)]
pub struct ContentPool {
    small: Vec<AttachmentRef>,
    medium: Vec<AttachmentRef>,
    large: Vec<AttachmentRef>,
}

impl ContentPool {
    /// Scan the content directory and record every attachment item.
    pub fn load(dir: &Path) -> Result<Self> {
        if !dir.is_dir() {
            bail!("content directory not found: {}", dir.display());
        }

        let pool = Self {
            small: scan_tier(dir, SizeTier::Small)?,
            medium: scan_tier(dir, SizeTier::Medium)?,
            large: scan_tier(dir, SizeTier::Large)?,
        };

        info!(
            small = pool.small.len(),
            medium = pool.medium.len(),
            large = pool.large.len(),
            "content_pool_loaded"
        );

        Ok(pool)
    }

    fn tier(&self, tier: SizeTier) -> &[AttachmentRef] {
        match tier {
            SizeTier::Small => &self.small,
            SizeTier::Medium => &self.medium,
            SizeTier::Large => &self.large,
        }
    }

    fn one_from(&self, tier: SizeTier, rng: &mut impl Rng) -> Option<AttachmentRef> {
        self.tier(tier).choose(rng).cloned()
    }

    /// Largest tier that actually has items, if any.
    fn largest_tier(&self) -> Option<SizeTier> {
        [SizeTier::Large, SizeTier::Medium, SizeTier::Small]
            .into_iter()
            .find(|tier| !self.tier(*tier).is_empty())
    }

    /// Select attachments for one request under the given policy.
    ///
    /// Each request rolls independently. Empty tiers degrade to fewer (or
    /// zero) attachments rather than failing generation.
    pub fn pick_attachments(&self, rng: &mut impl Rng, policy: AttachmentPolicy) -> Vec<AttachmentRef> {
        match policy {
            AttachmentPolicy::Standard => {
                let roll: f64 = rng.gen();
                if roll < 0.40 {
                    Vec::new()
                } else if roll < 0.70 {
                    self.one_from(SizeTier::Small, rng).into_iter().collect()
                } else if roll < 0.90 {
                    self.one_from(SizeTier::Medium, rng).into_iter().collect()
                } else {
                    let burst = rng.gen_range(1..=3);
                    (0..burst)
                        .filter_map(|_| {
                            let tier = *[SizeTier::Small, SizeTier::Medium, SizeTier::Large]
                                .choose(rng)
                                .expect("non-empty tier list");
                            self.one_from(tier, rng)
                        })
                        .collect()
                }
            }
            AttachmentPolicy::TopUp => {
                let Some(tier) = self.largest_tier() else {
                    return Vec::new();
                };
                let burst = rng.gen_range(1..=3);
                (0..burst).filter_map(|_| self.one_from(tier, rng)).collect()
            }
        }
    }

    /// Pick a small-tier item to reference as an inline image.
    pub fn pick_inline_image(&self, rng: &mut impl Rng) -> Option<AttachmentRef> {
        self.one_from(SizeTier::Small, rng)
    }

    /// Subject for a new message.
    pub fn subject_for_new(&self, rng: &mut impl Rng) -> String {
        let stem = SUBJECT_POOL.choose(rng).expect("non-empty subject pool");
        if rng.gen_bool(0.5) {
            format!("{} ({})", stem, rng.gen_range(100..1000))
        } else {
            (*stem).to_string()
        }
    }

    /// Body for a new message: a few snippets joined into paragraphs.
    pub fn body_for_new(&self, rng: &mut impl Rng) -> String {
        let paragraphs = rng.gen_range(1..=3);
        BODY_SNIPPETS
            .choose_multiple(rng, paragraphs)
            .copied()
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    /// Body for a reply: fresh text over a quoted synthetic excerpt of the
    /// original message.
    pub fn reply_body(&self, rng: &mut impl Rng, original_subject: &str, original_sender_name: &str) -> String {
        let text = BODY_SNIPPETS.choose(rng).expect("non-empty snippet pool");
        let excerpt = excerpt_for(rng);
        format!(
            "{text}\n\nOn the thread \"{original_subject}\", {original_sender_name} wrote:\n> {excerpt}"
        )
    }

    /// Body for a forward: a short note plus the original sender/subject as
    /// a quoted block.
    pub fn forward_body(
        &self,
        rng: &mut impl Rng,
        original_sender: &str,
        original_sender_name: &str,
        original_subject: &str,
    ) -> String {
        let excerpt = excerpt_for(rng);
        format!(
            "Passing this along, see below.\n\n\
             ---------- Forwarded message ----------\n\
             From: {original_sender_name} <{original_sender}>\n\
             Subject: {original_subject}\n\n\
             {excerpt}"
        )
    }
}

/// A truncated snippet standing in for the original body, which is not
/// retained in the thread graph.
fn excerpt_for(rng: &mut impl Rng) -> String {
    let snippet = BODY_SNIPPETS.choose(rng).expect("non-empty snippet pool");
    let cut = snippet.len().min(120);
    let mut excerpt = snippet[..cut].to_string();
    if cut < snippet.len() {
        excerpt.push_str("...");
    }
    excerpt
}

fn scan_tier(dir: &Path, tier: SizeTier) -> Result<Vec<AttachmentRef>> {
    let tier_dir = dir.join(tier.dir_name());
    if !tier_dir.is_dir() {
        warn!(dir = %tier_dir.display(), "content_tier_missing");
        return Ok(Vec::new());
    }

    let mut items = Vec::new();
    let entries = fs::read_dir(&tier_dir)
        .with_context(|| format!("Failed to scan content tier '{}'", tier_dir.display()))?;
    for entry in entries {
        let entry = entry?;
        let metadata = entry.metadata()?;
        if !metadata.is_file() {
            continue;
        }
        items.push(AttachmentRef {
            path: entry.path(),
            bytes: metadata.len(),
            tier,
        });
    }

    items.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(items)
}
