//! Headless, typed, string-topic publish/subscribe feed bus.
//!
//! Uses [`tokio::sync::broadcast`] channels under the hood so that every
//! subscriber receives every sample without any single subscriber blocking
//! the others.
//!
//! # Topics
//!
//! Feeds are addressed by slash-prefixed names (`/camera`, `/camera_info`,
//! `/world/ground_texture/dynamic_pose/info`).  The first `advertise`,
//! `subscribe` or `publish` on a name binds it to one [`SampleKind`]; later
//! use with a different kind is rejected.
//!
//! # Sequencing
//!
//! The bus stamps every published sample with a per-topic sequence number,
//! starting at 1.  [`FeedBus::latest_sequence`] lets a consumer remember "what
//! has already been published" and later reject anything at or below that
//! mark.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use groundtex_types::{GroundTexError, SampleKind, SamplePayload, TopicSample};
use tokio::sync::broadcast;
use tracing::{debug, trace};

/// Default channel capacity (number of buffered samples before old ones are
/// dropped for slow subscribers).
const DEFAULT_CAPACITY: usize = 64;

struct TopicChannel {
    kind: SampleKind,
    sender: broadcast::Sender<TopicSample>,
    /// Sequence of the most recently published sample; 0 before the first.
    sequence: u64,
}

/// Shared feed bus. Clone it cheaply – all clones share the same underlying
/// broadcast channels.
#[derive(Clone)]
pub struct FeedBus {
    capacity: usize,
    channels: Arc<Mutex<HashMap<String, TopicChannel>>>,
}

impl std::fmt::Debug for FeedBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeedBus")
            .field("capacity", &self.capacity)
            .field("topics", &self.topics())
            .finish()
    }
}

/// Check that `topic` is usable as a feed name.
///
/// Names must be non-empty, start with `/` and contain no whitespace.
pub fn validate_topic_name(topic: &str) -> Result<(), GroundTexError> {
    let reason = if topic.is_empty() {
        "topic name is empty"
    } else if !topic.starts_with('/') {
        "topic name must start with '/'"
    } else if topic.chars().any(char::is_whitespace) {
        "topic name must not contain whitespace"
    } else {
        return Ok(());
    };
    Err(GroundTexError::TopicRegistration {
        topic: topic.to_string(),
        reason: reason.to_string(),
    })
}

impl FeedBus {
    /// Create a new bus with the given per-topic channel capacity.
    ///
    /// A capacity of zero is raised to one.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            channels: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Declare `topic` as carrying samples of `kind`.
    ///
    /// Idempotent for the same kind; fails if the topic is already bound to a
    /// different kind.
    pub fn advertise(&self, topic: &str, kind: SampleKind) -> Result<(), GroundTexError> {
        let mut channels = self.lock();
        self.channel_for(&mut channels, topic, kind)?;
        Ok(())
    }

    /// Subscribe to `topic`, which must carry (or become bound to) `kind`.
    pub fn subscribe(&self, topic: &str, kind: SampleKind) -> Result<TopicReceiver, GroundTexError> {
        let mut channels = self.lock();
        let channel = self.channel_for(&mut channels, topic, kind)?;
        debug!(topic, %kind, "subscribed to feed");
        Ok(TopicReceiver {
            topic: topic.to_string(),
            kind,
            receiver: channel.sender.subscribe(),
        })
    }

    /// Publish `payload` on `topic`.
    ///
    /// Returns the number of active receivers that were handed the sample.
    /// Returns `Ok(0)` when nobody is listening (this is a normal condition,
    /// not an error; the sample is dropped).
    pub fn publish(&self, topic: &str, payload: SamplePayload) -> Result<usize, GroundTexError> {
        let mut channels = self.lock();
        let channel = self.channel_for(&mut channels, topic, payload.kind())?;

        // Stamped under the lock so sequence order equals send order.
        channel.sequence += 1;
        let mut sample = TopicSample::new(topic, payload);
        sample.sequence = channel.sequence;

        match channel.sender.send(sample) {
            Ok(n) => {
                trace!(topic, sequence = channel.sequence, receivers = n, "published");
                Ok(n)
            }
            Err(broadcast::error::SendError(_)) => Ok(0),
        }
    }

    /// Sequence number of the last sample published on `topic` (0 if none, or
    /// if the topic is unknown).
    pub fn latest_sequence(&self, topic: &str) -> u64 {
        self.lock().get(topic).map_or(0, |c| c.sequence)
    }

    /// Kind bound to `topic`, if the topic is known.
    pub fn topic_kind(&self, topic: &str) -> Option<SampleKind> {
        self.lock().get(topic).map(|c| c.kind)
    }

    /// All known topic names, sorted.
    pub fn topics(&self) -> Vec<String> {
        let mut names: Vec<String> = self.lock().keys().cloned().collect();
        names.sort();
        names
    }

    // -----------------------------------------------------------------------
    // Internal helpers
    // -----------------------------------------------------------------------

    fn lock(&self) -> MutexGuard<'_, HashMap<String, TopicChannel>> {
        // The map holds no invariants a panicking holder could break.
        self.channels.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn channel_for<'a>(
        &self,
        channels: &'a mut HashMap<String, TopicChannel>,
        topic: &str,
        kind: SampleKind,
    ) -> Result<&'a mut TopicChannel, GroundTexError> {
        validate_topic_name(topic)?;
        let channel = channels.entry(topic.to_string()).or_insert_with(|| {
            debug!(topic, %kind, "topic created");
            let (sender, _) = broadcast::channel(self.capacity);
            TopicChannel {
                kind,
                sender,
                sequence: 0,
            }
        });
        if channel.kind != kind {
            return Err(GroundTexError::SampleKind {
                topic: topic.to_string(),
                expected: channel.kind,
                actual: kind,
            });
        }
        Ok(channel)
    }
}

impl Default for FeedBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

// ---------------------------------------------------------------------------
// Topic receiver
// ---------------------------------------------------------------------------

/// An async receiver bound to a single topic.
///
/// Obtained via [`FeedBus::subscribe`].
pub struct TopicReceiver {
    topic: String,
    kind: SampleKind,
    receiver: broadcast::Receiver<TopicSample>,
}

impl TopicReceiver {
    /// Wait for the next sample on this topic.
    ///
    /// Returns:
    /// * `Ok(sample)` – a successfully received sample.
    /// * `Err(broadcast::error::RecvError::Lagged(n))` – the subscriber fell
    ///   behind and `n` samples were dropped.  The caller decides whether to
    ///   continue or abort.
    /// * `Err(broadcast::error::RecvError::Closed)` – the bus has shut down.
    pub async fn recv(&mut self) -> Result<TopicSample, broadcast::error::RecvError> {
        self.receiver.recv().await
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn kind(&self) -> SampleKind {
        self.kind
    }
}
