//! Work generation: batches of send requests per message kind.
//!
//! One strategy per kind, selected once per stage. All randomness happens
//! here in sync scopes, before anything is awaited (ThreadRng is not Send).

use rand::Rng;

use crate::config::Config;
use crate::content::{AttachmentPolicy, AttachmentRef, ContentPool};
use crate::graph::ThreadGraph;
use crate::identity::{Identity, IdentityPool};

/// How many times a reply/forward origin draw is retried when the sampled
/// record's recipient no longer resolves to a sendable identity.
const ORIGIN_REDRAW_LIMIT: usize = 8;

/// The closed set of message kinds the campaign produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    New,
    Reply,
    Forward,
}

/// One unit of send work. Constructed fresh per message, consumed exactly
/// once by the dispatcher, immutable in transit.
#[derive(Debug, Clone)]
pub struct SendRequest {
    pub kind: MessageKind,
    pub from: Identity,
    pub to: Vec<String>,
    pub cc: Vec<String>,
    pub subject: String,
    pub body: String,
    pub attachments: Vec<AttachmentRef>,
    pub inline_image: Option<AttachmentRef>,
    pub in_reply_to: Option<String>,
    pub references: Option<String>,
}

/// Produces batches of send requests from the read-only pools.
pub struct Generator<'a> {
    identities: &'a IdentityPool,
    content: &'a ContentPool,
    chunk_size: usize,
    cc_probability: f64,
    inline_image_probability: f64,
}

impl<'a> Generator<'a> {
    pub fn new(identities: &'a IdentityPool, content: &'a ContentPool, config: &Config) -> Self {
        Self {
            identities,
            content,
            chunk_size: config.chunk_size,
            cc_probability: config.cc_probability,
            inline_image_probability: config.inline_image_probability,
        }
    }

    /// Produce a batch of up to `chunk_size` requests, capped by the
    /// remaining target. Reply/forward batches shrink (possibly to empty)
    /// when the thread graph cannot supply origins.
    pub fn next_batch(
        &self,
        kind: MessageKind,
        remaining: u64,
        send_index: u64,
        graph: &ThreadGraph,
        policy: AttachmentPolicy,
        rng: &mut impl Rng,
    ) -> Vec<SendRequest> {
        let count = remaining.min(self.chunk_size as u64) as usize;
        match kind {
            MessageKind::New => (0..count)
                .filter_map(|offset| self.new_request(send_index + offset as u64, policy, rng))
                .collect(),
            MessageKind::Reply => {
                (0..count).filter_map(|_| self.reply_request(graph, rng)).collect()
            }
            MessageKind::Forward => {
                (0..count).filter_map(|_| self.forward_request(graph, rng)).collect()
            }
        }
    }

    fn new_request(
        &self,
        send_index: u64,
        policy: AttachmentPolicy,
        rng: &mut impl Rng,
    ) -> Option<SendRequest> {
        let from = self.identities.by_round_robin(send_index);

        let to_count = rng.gen_range(1..=5);
        let to = self.identities.sample_excluding(rng, to_count, &[from.address.as_str()]);
        if to.is_empty() {
            return None;
        }

        let cc = if rng.gen::<f64>() < self.cc_probability {
            let mut excluded: Vec<&str> = vec![from.address.as_str()];
            excluded.extend(to.iter().map(String::as_str));
            let cc_count = rng.gen_range(1..=4);
            self.identities.sample_excluding(rng, cc_count, &excluded)
        } else {
            Vec::new()
        };

        let inline_image = if rng.gen::<f64>() < self.inline_image_probability {
            self.content.pick_inline_image(rng)
        } else {
            None
        };

        Some(SendRequest {
            kind: MessageKind::New,
            from: from.clone(),
            to,
            cc,
            subject: self.content.subject_for_new(rng),
            body: self.content.body_for_new(rng),
            attachments: self.content.pick_attachments(rng, policy),
            inline_image,
            in_reply_to: None,
            references: None,
        })
    }

    fn reply_request(&self, graph: &ThreadGraph, rng: &mut impl Rng) -> Option<SendRequest> {
        for _ in 0..ORIGIN_REDRAW_LIMIT {
            let record = graph.sample(rng)?;
            // The original recipient answers; they need a live credential
            let Some(from) = self.identities.identity_for(&record.recipient) else {
                continue;
            };

            return Some(SendRequest {
                kind: MessageKind::Reply,
                from: from.clone(),
                to: vec![record.sender.clone()],
                cc: Vec::new(),
                subject: format!("Re: {}", record.subject),
                body: self.content.reply_body(rng, &record.subject, &record.sender_name),
                attachments: Vec::new(),
                inline_image: None,
                in_reply_to: Some(record.message_id.clone()),
                references: Some(record.message_id.clone()),
            });
        }
        None
    }

    fn forward_request(&self, graph: &ThreadGraph, rng: &mut impl Rng) -> Option<SendRequest> {
        for _ in 0..ORIGIN_REDRAW_LIMIT {
            let record = graph.sample(rng)?;
            let Some(from) = self.identities.identity_for(&record.recipient) else {
                continue;
            };

            let to_count = rng.gen_range(1..=3);
            let to = self.identities.sample_excluding(rng, to_count, &[from.address.as_str()]);
            if to.is_empty() {
                continue;
            }

            // Forwards are not RFC-threaded to the original: no in_reply_to
            // or references, the provenance lives in the quoted body block.
            return Some(SendRequest {
                kind: MessageKind::Forward,
                from: from.clone(),
                to,
                cc: Vec::new(),
                subject: format!("FW: {}", record.subject),
                body: self.content.forward_body(
                    rng,
                    &record.sender,
                    &record.sender_name,
                    &record.subject,
                ),
                attachments: Vec::new(),
                inline_image: None,
                in_reply_to: None,
                references: None,
            });
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::ThreadRecord;
    use crate::identity::IdentityRecord;
    use std::path::PathBuf;

    fn test_config(dir: &std::path::Path) -> Config {
        Config {
            submit_endpoint: "https://mail.test.local:8443/".to_string(),
            identity_file: PathBuf::from("unused"),
            content_dir: dir.to_path_buf(),
            state_file: PathBuf::from("unused"),
            thread_graph_file: PathBuf::from("unused"),
            target_total_bytes: 1_000_000,
            avg_message_bytes: 100_000,
            chunk_size: 10,
            send_concurrency: 4,
            provision_concurrency: 2,
            provision_backoff_ms: 1,
            send_timeout_ms: 1_000,
            inline_image_probability: 0.3,
            cc_probability: 0.4,
            mime_overhead_factor: 1.33,
            envelope_bytes: 1024,
            mailbox_copy_factor: 2.0,
        }
    }

    fn pool_of(n: usize) -> IdentityPool {
        IdentityPool::from_records(
            (0..n)
                .map(|i| IdentityRecord {
                    index: i,
                    address: format!("u{i}@corp.local"),
                    display_name: format!("User {i}"),
                    credential: Some("pw".to_string()),
                })
                .collect(),
        )
    }

    fn content_fixture(dir: &std::path::Path) -> ContentPool {
        for tier in ["small", "medium", "large"] {
            let tier_dir = dir.join(tier);
            std::fs::create_dir_all(&tier_dir).unwrap();
            std::fs::write(tier_dir.join("item.bin"), vec![0u8; 1024]).unwrap();
        }
        ContentPool::load(dir).unwrap()
    }

    fn seeded_graph(dir: &std::path::Path, senders: &[(usize, usize)]) -> ThreadGraph {
        let mut graph = ThreadGraph::load(dir.join("graph.jsonl")).unwrap();
        for (n, (sender, recipient)) in senders.iter().enumerate() {
            graph.append(ThreadRecord {
                message_id: format!("<seed-{n}@corp.local>"),
                subject: format!("Seed {n}"),
                sender: format!("u{sender}@corp.local"),
                sender_name: format!("User {sender}"),
                recipient: format!("u{recipient}@corp.local"),
                recipient_name: format!("User {recipient}"),
            });
        }
        graph
    }

    #[test]
    fn test_new_batch_respects_remaining_and_chunk() {
        let dir = tempfile::tempdir().unwrap();
        let identities = pool_of(8);
        let content = content_fixture(dir.path());
        let config = test_config(dir.path());
        let generator = Generator::new(&identities, &content, &config);
        let graph = ThreadGraph::load(dir.path().join("graph.jsonl")).unwrap();
        let mut rng = rand::thread_rng();

        let capped = generator.next_batch(
            MessageKind::New, 3, 0, &graph, AttachmentPolicy::Standard, &mut rng,
        );
        assert_eq!(capped.len(), 3);

        let chunked = generator.next_batch(
            MessageKind::New, 500, 0, &graph, AttachmentPolicy::Standard, &mut rng,
        );
        assert_eq!(chunked.len(), config.chunk_size);
    }

    #[test]
    fn test_new_request_recipient_contracts() {
        let dir = tempfile::tempdir().unwrap();
        let identities = pool_of(12);
        let content = content_fixture(dir.path());
        let config = test_config(dir.path());
        let generator = Generator::new(&identities, &content, &config);
        let graph = ThreadGraph::load(dir.path().join("graph.jsonl")).unwrap();
        let mut rng = rand::thread_rng();

        let mut requests = Vec::new();
        for _ in 0..30 {
            requests.extend(generator.next_batch(
                MessageKind::New, 10, 0, &graph, AttachmentPolicy::Standard, &mut rng,
            ));
        }

        for request in &requests {
            assert!(!request.to.is_empty() && request.to.len() <= 5);
            assert!(!request.to.contains(&request.from.address));

            let mut all = request.to.clone();
            all.extend(request.cc.clone());
            let before = all.len();
            all.sort();
            all.dedup();
            assert_eq!(all.len(), before, "To/CC overlap in {request:?}");

            assert!(request.cc.len() <= 4);
            assert!(!request.cc.contains(&request.from.address));
            assert!(request.in_reply_to.is_none());
        }
    }

    #[test]
    fn test_new_sender_round_robin_follows_send_index() {
        let dir = tempfile::tempdir().unwrap();
        let identities = pool_of(4);
        let content = content_fixture(dir.path());
        let config = test_config(dir.path());
        let generator = Generator::new(&identities, &content, &config);
        let graph = ThreadGraph::load(dir.path().join("graph.jsonl")).unwrap();
        let mut rng = rand::thread_rng();

        let batch = generator.next_batch(
            MessageKind::New, 6, 2, &graph, AttachmentPolicy::Standard, &mut rng,
        );
        let senders: Vec<&str> = batch.iter().map(|r| r.from.address.as_str()).collect();
        assert_eq!(
            senders,
            vec![
                "u2@corp.local", "u3@corp.local", "u0@corp.local",
                "u1@corp.local", "u2@corp.local", "u3@corp.local",
            ]
        );
    }

    #[test]
    fn test_inline_image_probability_is_roughly_honored() {
        let dir = tempfile::tempdir().unwrap();
        let identities = pool_of(8);
        let content = content_fixture(dir.path());
        let config = test_config(dir.path());
        let generator = Generator::new(&identities, &content, &config);
        let graph = ThreadGraph::load(dir.path().join("graph.jsonl")).unwrap();
        let mut rng = rand::thread_rng();

        let mut with_inline = 0;
        let rounds = 60;
        for _ in 0..rounds {
            let batch = generator.next_batch(
                MessageKind::New, 10, 0, &graph, AttachmentPolicy::Standard, &mut rng,
            );
            with_inline += batch.iter().filter(|r| r.inline_image.is_some()).count();
        }

        // 30% nominal over 600 requests; loose statistical bounds
        let fraction = with_inline as f64 / (rounds * 10) as f64;
        assert!(
            (0.20..=0.40).contains(&fraction),
            "expected roughly 30% inline images, got {fraction}"
        );
    }

    #[test]
    fn test_reply_and_forward_need_a_nonempty_graph() {
        let dir = tempfile::tempdir().unwrap();
        let identities = pool_of(8);
        let content = content_fixture(dir.path());
        let config = test_config(dir.path());
        let generator = Generator::new(&identities, &content, &config);
        let empty = ThreadGraph::load(dir.path().join("graph.jsonl")).unwrap();
        let mut rng = rand::thread_rng();

        assert!(generator
            .next_batch(MessageKind::Reply, 5, 0, &empty, AttachmentPolicy::Standard, &mut rng)
            .is_empty());
        assert!(generator
            .next_batch(MessageKind::Forward, 5, 0, &empty, AttachmentPolicy::Standard, &mut rng)
            .is_empty());
    }

    #[test]
    fn test_reply_fields_thread_back_to_the_origin() {
        let dir = tempfile::tempdir().unwrap();
        let identities = pool_of(6);
        let content = content_fixture(dir.path());
        let config = test_config(dir.path());
        let generator = Generator::new(&identities, &content, &config);
        let graph = seeded_graph(dir.path(), &[(0, 1), (2, 3)]);
        let mut rng = rand::thread_rng();

        let batch = generator.next_batch(
            MessageKind::Reply, 20, 0, &graph, AttachmentPolicy::Standard, &mut rng,
        );
        assert!(!batch.is_empty());

        for request in &batch {
            assert!(request.subject.starts_with("Re: Seed "));
            let origin_id = request.in_reply_to.as_deref().unwrap();
            assert!(origin_id.starts_with("<seed-"));
            assert_eq!(request.references.as_deref(), Some(origin_id));
            // Sender is the origin's recipient, target is the origin's sender
            assert_eq!(request.to.len(), 1);
            assert!(matches!(
                (request.from.address.as_str(), request.to[0].as_str()),
                ("u1@corp.local", "u0@corp.local") | ("u3@corp.local", "u2@corp.local")
            ));
        }
    }

    #[test]
    fn test_forward_fields_quote_without_threading() {
        let dir = tempfile::tempdir().unwrap();
        let identities = pool_of(6);
        let content = content_fixture(dir.path());
        let config = test_config(dir.path());
        let generator = Generator::new(&identities, &content, &config);
        let graph = seeded_graph(dir.path(), &[(0, 1)]);
        let mut rng = rand::thread_rng();

        let batch = generator.next_batch(
            MessageKind::Forward, 20, 0, &graph, AttachmentPolicy::Standard, &mut rng,
        );
        assert!(!batch.is_empty());

        for request in &batch {
            assert_eq!(request.subject, "FW: Seed 0");
            assert_eq!(request.from.address, "u1@corp.local");
            assert!(!request.to.is_empty() && request.to.len() <= 3);
            assert!(!request.to.contains(&request.from.address));
            assert!(request.in_reply_to.is_none());
            assert!(request.references.is_none());
            assert!(request.body.contains("From: User 0 <u0@corp.local>"));
        }
    }

    #[test]
    fn test_unknown_recipient_draws_are_discarded() {
        let dir = tempfile::tempdir().unwrap();
        let identities = pool_of(4);
        let content = content_fixture(dir.path());
        let config = test_config(dir.path());
        let generator = Generator::new(&identities, &content, &config);
        // Every record's recipient is outside the sendable pool
        let graph = seeded_graph(dir.path(), &[(0, 99), (1, 98)]);
        let mut rng = rand::thread_rng();

        let batch = generator.next_batch(
            MessageKind::Reply, 5, 0, &graph, AttachmentPolicy::Standard, &mut rng,
        );
        assert!(batch.is_empty());
    }
}
