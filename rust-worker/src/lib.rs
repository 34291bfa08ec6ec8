//! MailFill - synthetic mailbox-population campaign engine.
//!
//! This library backs the two MailFill binaries:
//! - `mailfill-worker`: drives the send campaign to its size target
//! - `mailfill-status`: prints the persisted campaign summary
//!
//! ## Architecture
//!
//! ```text
//! identities + content → Generator → Dispatcher → outcomes
//!                            ↑            ↓
//!                      ThreadGraph ← Controller → CampaignState
//! ```
//!
//! A single control task generates batches, a bounded pool executes the
//! sends, and state is persisted after every batch so an interrupted
//! campaign resumes at batch granularity.

pub mod campaign;
pub mod config;
pub mod content;
pub mod dispatch;
pub mod estimate;
pub mod generate;
pub mod graph;
pub mod identity;
pub mod provision;
pub mod state;
pub mod transport;

// Re-export commonly used types
pub use campaign::{Campaign, Summary, Targets};
pub use config::Config;
pub use content::{AttachmentPolicy, AttachmentRef, ContentPool, SizeTier};
pub use dispatch::{dispatch_batch, SendOutcome};
pub use estimate::SizeEstimator;
pub use generate::{Generator, MessageKind, SendRequest};
pub use graph::{ThreadGraph, ThreadRecord};
pub use identity::{Identity, IdentityPool};
pub use state::{CampaignState, KindCounters, Phase, StateStore};
pub use transport::{HttpTransport, SendError, Transport};
