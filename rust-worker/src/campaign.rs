//! Campaign controller: the single-threaded control loop.
//!
//! One control task derives per-kind send targets, then walks the stage
//! machine (new, reply, forward, overflow). Each iteration generates a
//! batch, dispatches it through the bounded pool, folds the outcomes into
//! the thread graph and the size estimate, and persists state before the
//! next batch is generated. That persistence point is the resumption
//! granularity: a crash costs at most one batch.

use anyhow::{bail, Context, Result};
use serde::Serialize;
use tracing::{info, warn};

use crate::config::Config;
use crate::content::{AttachmentPolicy, ContentPool};
use crate::dispatch::{dispatch_batch, SendOutcome};
use crate::estimate::SizeEstimator;
use crate::generate::{Generator, MessageKind, SendRequest};
use crate::graph::{ThreadGraph, ThreadRecord};
use crate::identity::IdentityPool;
use crate::provision::{run_step, ProvisionStep, Provisioner};
use crate::state::{unix_now, BatchKind, CampaignState, KindCounters, Phase, StateStore};
use crate::transport::Transport;

/// Per-kind send-count targets derived from the size target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Targets {
    pub total: u64,
    pub new: u64,
    pub reply: u64,
    pub forward: u64,
}

impl Targets {
    /// Split the derived total 50/30/20 across new/reply/forward, each
    /// share ceiling-rounded independently (the sum may exceed `total`).
    pub fn derive(target_bytes: u64, avg_message_bytes: u64) -> Self {
        let total = target_bytes.div_ceil(avg_message_bytes.max(1));
        Self {
            total,
            new: total.div_ceil(2),
            reply: (total * 3).div_ceil(10),
            forward: total.div_ceil(5),
        }
    }
}

/// The summary document handed to the reporting collaborator.
#[derive(Debug, Clone, Serialize)]
pub struct Summary {
    pub phase: Phase,
    pub new: KindCounters,
    pub reply: KindCounters,
    pub forward: KindCounters,
    pub overflow: KindCounters,
    pub estimated_bytes: u64,
    pub target_bytes: u64,
    pub started_at: u64,
}

impl Summary {
    pub fn from_state(state: &CampaignState, target_bytes: u64) -> Self {
        Self {
            phase: state.phase,
            new: state.new,
            reply: state.reply,
            forward: state.forward,
            overflow: state.overflow,
            estimated_bytes: state.estimated_bytes,
            target_bytes,
            started_at: state.started_at,
        }
    }
}

struct StageSpec {
    phase: Phase,
    kind: MessageKind,
    batch: BatchKind,
    /// None for the open-ended overflow pass
    target: Option<u64>,
    policy: AttachmentPolicy,
}

/// The whole campaign: read-only pools, mutable stores, and state.
pub struct Campaign {
    config: Config,
    identities: IdentityPool,
    content: ContentPool,
    graph: ThreadGraph,
    store: StateStore,
    estimator: SizeEstimator,
    state: CampaignState,
}

impl Campaign {
    /// Load every input and the persisted state. Anything missing here is
    /// a fatal configuration error; nothing has been dispatched yet.
    pub fn load(config: Config) -> Result<Self> {
        let identities = IdentityPool::load(&config.identity_file)
            .context("Failed to load the credential store")?;
        if identities.len() < 2 {
            bail!(
                "identity pool needs at least two sendable identities, found {}",
                identities.len()
            );
        }

        let content =
            ContentPool::load(&config.content_dir).context("Failed to load the content pool")?;

        let store = StateStore::new(&config.state_file);
        let state = store.load().context("Failed to load campaign state")?;

        let graph = ThreadGraph::load(&config.thread_graph_file)
            .context("Failed to load the thread graph")?;

        let estimator = SizeEstimator::from_config(&config);

        Ok(Self {
            config,
            identities,
            content,
            graph,
            store,
            estimator,
            state,
        })
    }

    /// Drive the campaign to completion (or rejoin it where the persisted
    /// state left off). Re-entering a finished campaign is a no-op.
    pub async fn run<T, P>(&mut self, transport: &T, provisioner: &P) -> Result<Summary>
    where
        T: Transport + Sync,
        P: Provisioner + Sync,
    {
        if self.state.phase == Phase::Done {
            info!("campaign_already_complete");
            return Ok(self.summary());
        }

        if self.state.started_at == 0 {
            self.state.started_at = unix_now();
            self.store.save(&self.state)?;
        }

        self.run_provisioning(provisioner).await?;

        let targets = Targets::derive(self.config.target_total_bytes, self.config.avg_message_bytes);
        info!(
            total = targets.total,
            new = targets.new,
            reply = targets.reply,
            forward = targets.forward,
            target_bytes = self.config.target_total_bytes,
            "campaign_targets_derived"
        );

        let stages = [
            StageSpec {
                phase: Phase::NewStage,
                kind: MessageKind::New,
                batch: BatchKind::New,
                target: Some(targets.new),
                policy: AttachmentPolicy::Standard,
            },
            StageSpec {
                phase: Phase::ReplyStage,
                kind: MessageKind::Reply,
                batch: BatchKind::Reply,
                target: Some(targets.reply),
                policy: AttachmentPolicy::Standard,
            },
            StageSpec {
                phase: Phase::ForwardStage,
                kind: MessageKind::Forward,
                batch: BatchKind::Forward,
                target: Some(targets.forward),
                policy: AttachmentPolicy::Standard,
            },
        ];

        for stage in &stages {
            self.enter(stage.phase)?;
            self.run_stage(transport, stage).await?;
        }

        // Extra round: top up with attachment-heavy new messages until the
        // size target is met.
        if self.state.estimated_bytes < self.config.target_total_bytes {
            self.enter(Phase::OverflowStage)?;
            self.run_stage(
                transport,
                &StageSpec {
                    phase: Phase::OverflowStage,
                    kind: MessageKind::New,
                    batch: BatchKind::Overflow,
                    target: None,
                    policy: AttachmentPolicy::TopUp,
                },
            )
            .await?;
        }

        self.enter(Phase::Done)?;

        let summary = self.summary();
        info!(
            estimated_bytes = summary.estimated_bytes,
            new_succeeded = summary.new.succeeded,
            reply_succeeded = summary.reply.succeeded,
            forward_succeeded = summary.forward.succeeded,
            overflow_succeeded = summary.overflow.succeeded,
            "campaign_complete"
        );
        Ok(summary)
    }

    pub fn summary(&self) -> Summary {
        Summary::from_state(&self.state, self.config.target_total_bytes)
    }

    fn enter(&mut self, phase: Phase) -> Result<()> {
        self.state.advance(phase);
        self.store.save(&self.state)
    }

    async fn run_provisioning<P: Provisioner + Sync>(&mut self, provisioner: &P) -> Result<()> {
        let backoff = std::time::Duration::from_millis(self.config.provision_backoff_ms);
        let limit = self.config.provision_concurrency;

        if !self.state.folders_done {
            run_step(provisioner, self.identities.identities(), ProvisionStep::Folders, limit, backoff)
                .await;
            self.state.folders_done = true;
            self.store.save(&self.state)?;
        }
        if !self.state.contacts_done {
            run_step(provisioner, self.identities.identities(), ProvisionStep::Contacts, limit, backoff)
                .await;
            self.state.contacts_done = true;
            self.store.save(&self.state)?;
        }
        if !self.state.calendar_done {
            run_step(provisioner, self.identities.identities(), ProvisionStep::Calendar, limit, backoff)
                .await;
            self.state.calendar_done = true;
            self.store.save(&self.state)?;
        }
        Ok(())
    }

    async fn run_stage<T: Transport + Sync>(&mut self, transport: &T, stage: &StageSpec) -> Result<()> {
        loop {
            if self.state.estimated_bytes >= self.config.target_total_bytes {
                break;
            }

            let attempted = self.state.counters(stage.batch).attempted;
            let remaining = match stage.target {
                Some(target) => {
                    let remaining = target.saturating_sub(attempted);
                    if remaining == 0 {
                        break;
                    }
                    remaining
                }
                None => self.config.chunk_size as u64,
            };

            if stage.kind != MessageKind::New && self.graph.is_empty() {
                info!(stage = ?stage.batch, "stage_skipped_empty_thread_graph");
                break;
            }

            // Round-robin continuity: overflow sends continue the new-kind
            // sender rotation.
            let send_index = match stage.batch {
                BatchKind::Overflow => self.state.new.attempted + self.state.overflow.attempted,
                _ => attempted,
            };

            // All randomness stays inside this sync scope (ThreadRng is
            // not Send).
            let batch = {
                let generator = Generator::new(&self.identities, &self.content, &self.config);
                let mut rng = rand::thread_rng();
                generator.next_batch(stage.kind, remaining, send_index, &self.graph, stage.policy, &mut rng)
            };

            if batch.is_empty() {
                warn!(stage = ?stage.batch, "stage_exhausted_no_requests");
                break;
            }

            let outcomes =
                dispatch_batch(transport, &batch, self.config.send_concurrency).await;

            let batch_bytes = self.fold_into_graph(stage.kind, &batch, &outcomes);
            self.state = self.state.clone().fold_batch(stage.batch, &outcomes, batch_bytes);

            // Persist before the next batch is generated; this is the
            // crash-recovery boundary.
            self.store.save(&self.state).context("Failed to persist campaign state")?;
            self.graph.flush().context("Failed to checkpoint the thread graph")?;

            let counters = self.state.counters(stage.batch);
            info!(
                stage = ?stage.batch,
                attempted = counters.attempted,
                succeeded = counters.succeeded,
                estimated_bytes = self.state.estimated_bytes,
                thread_records = self.graph.len(),
                "stage_progress"
            );
        }
        Ok(())
    }

    /// Append thread records for successful sends and return the batch's
    /// estimated size contribution. Forwards never seed threads.
    fn fold_into_graph(
        &mut self,
        kind: MessageKind,
        batch: &[SendRequest],
        outcomes: &[SendOutcome],
    ) -> u64 {
        let mut batch_bytes = 0;
        for (request, outcome) in batch.iter().zip(outcomes) {
            if !outcome.success {
                continue;
            }
            batch_bytes += self.estimator.estimate(request);

            if matches!(kind, MessageKind::New | MessageKind::Reply) {
                if let (Some(message_id), Some(primary)) = (&outcome.message_id, request.to.first())
                {
                    let recipient_name = self
                        .identities
                        .identity_for(primary)
                        .map(|identity| identity.display_name.clone())
                        .unwrap_or_else(|| primary.clone());
                    self.graph.append(ThreadRecord {
                        message_id: message_id.clone(),
                        subject: request.subject.clone(),
                        sender: request.from.address.clone(),
                        sender_name: request.from.display_name.clone(),
                        recipient: primary.clone(),
                        recipient_name,
                    });
                }
            }
        }
        batch_bytes
    }
}
