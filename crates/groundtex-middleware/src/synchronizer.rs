//! "One fresh sample from every feed" over push-based, independently timed
//! feeds.
//!
//! Each registered topic owns a small piece of state:
//!
//! ```text
//!   CaptureState { pending, armed_after, sample }
//! ```
//!
//! held in a single [`tokio::sync::watch`] cell, so the feed-delivery task
//! and the waiting caller always observe the flag and the sample together.
//!
//! A round ([`DataSynchronizer::get_messages`]) arms every topic, then waits
//! until each delivery task has stored a sample published *after* the arm
//! point and cleared `pending`.  Samples that arrive while a topic is not
//! armed are dropped; there is no history or buffering beyond "the next
//! sample after arming".
//!
//! Rounds are bounded by a timeout and a [`CancellationToken`], so a stalled
//! feed surfaces as [`GroundTexError::Timeout`] instead of a hang.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::future::try_join_all;
use groundtex_types::{
    CameraInfo, GroundTexError, Image, NamedPose, SampleKind, SamplePayload, TopicSample,
};
use tokio::runtime::Handle;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, trace, warn};

use crate::bus::{FeedBus, TopicReceiver, validate_topic_name};

/// Default bound on a single synchronisation round.
pub const DEFAULT_SYNC_TIMEOUT: Duration = Duration::from_secs(5);

/// Sequence of a sample built outside the bus; the bus stamps from 1.
const UNSTAMPED: u64 = 0;

// ────────────────────────────────────────────────────────────────────────────
// Per-topic state
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
struct CaptureState {
    /// `true` from arming until a fresh sample has been stored.
    pending: bool,
    /// Bus sequence at arm time; only samples with a larger sequence count.
    armed_after: u64,
    sample: Option<TopicSample>,
}

struct TopicSlot {
    kind: SampleKind,
    state: Arc<watch::Sender<CaptureState>>,
    delivery: JoinHandle<()>,
}

/// Feed handler: store `sample` if the topic is armed and the sample is newer
/// than the arm point, otherwise discard it.  Returns whether it was stored.
///
/// Sequence 0 marks a sample that never went through the bus; it has no
/// position relative to the arm point and counts as fresh.
fn offer(state: &watch::Sender<CaptureState>, kind: SampleKind, sample: TopicSample) -> bool {
    if sample.kind() != kind {
        warn!(
            topic = %sample.topic,
            expected = %kind,
            actual = %sample.kind(),
            "discarding sample of unexpected kind"
        );
        return false;
    }
    let sequence = sample.sequence;
    let stored = state.send_if_modified(move |s| {
        let fresh = sample.sequence == UNSTAMPED || sample.sequence > s.armed_after;
        if s.pending && fresh {
            s.sample = Some(sample);
            s.pending = false;
            true
        } else {
            false
        }
    });
    trace!(sequence, stored, "sample offered");
    stored
}

async fn deliver(mut receiver: TopicReceiver, state: Arc<watch::Sender<CaptureState>>) {
    let kind = receiver.kind();
    loop {
        match receiver.recv().await {
            Ok(sample) => {
                offer(&state, kind, sample);
            }
            Err(broadcast::error::RecvError::Lagged(n)) => {
                debug!(topic = receiver.topic(), skipped = n, "feed delivery lagged");
            }
            Err(broadcast::error::RecvError::Closed) => {
                debug!(topic = receiver.topic(), "feed closed");
                break;
            }
        }
    }
}

async fn wait_fresh(
    topic: String,
    mut state: watch::Receiver<CaptureState>,
) -> Result<(String, TopicSample), GroundTexError> {
    let sample = {
        let current = state
            .wait_for(|s| !s.pending)
            .await
            .map_err(|_| GroundTexError::Channel(format!("capture state for {topic} closed")))?;
        current.sample.clone()
    };
    match sample {
        Some(sample) => Ok((topic, sample)),
        None => Err(GroundTexError::MissingSample(topic)),
    }
}

// ────────────────────────────────────────────────────────────────────────────
// DataSynchronizer
// ────────────────────────────────────────────────────────────────────────────

/// Collects one fresh sample per registered topic on demand.
pub struct DataSynchronizer {
    bus: FeedBus,
    timeout: Duration,
    cancel: CancellationToken,
    topics: BTreeMap<String, TopicSlot>,
}

impl DataSynchronizer {
    pub fn new(bus: FeedBus) -> Self {
        Self {
            bus,
            timeout: DEFAULT_SYNC_TIMEOUT,
            cancel: CancellationToken::new(),
            topics: BTreeMap::new(),
        }
    }

    /// Bound each round by `timeout` instead of the default five seconds.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Abort waiting rounds when `cancel` fires.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Registered topic names, sorted.
    pub fn topics(&self) -> Vec<String> {
        self.topics.keys().cloned().collect()
    }

    pub fn is_registered(&self, topic: &str) -> bool {
        self.topics.contains_key(topic)
    }

    /// Subscribe to `topic` and start delivering its samples to the handler.
    ///
    /// Fails, leaving nothing registered, when the name is invalid or already
    /// registered, the topic is bound to another kind, or there is no Tokio
    /// runtime to run the delivery task on.
    #[instrument(skip(self))]
    pub fn register_topic(&mut self, topic: &str, kind: SampleKind) -> Result<(), GroundTexError> {
        validate_topic_name(topic)?;
        if self.topics.contains_key(topic) {
            return Err(GroundTexError::TopicRegistration {
                topic: topic.to_string(),
                reason: "already registered".to_string(),
            });
        }
        let handle = Handle::try_current().map_err(|e| GroundTexError::TopicRegistration {
            topic: topic.to_string(),
            reason: format!("no Tokio runtime for feed delivery: {e}"),
        })?;

        let receiver = self.bus.subscribe(topic, kind)?;
        let (state, _) = watch::channel(CaptureState::default());
        let state = Arc::new(state);
        let delivery = handle.spawn(deliver(receiver, Arc::clone(&state)));

        self.topics.insert(
            topic.to_string(),
            TopicSlot {
                kind,
                state,
                delivery,
            },
        );
        info!(topic, "topic registered");
        Ok(())
    }

    /// Hand `sample` to its topic's handler directly, bypassing the bus.
    ///
    /// Returns `true` if the sample was stored for the current round.
    pub fn offer(&self, sample: TopicSample) -> bool {
        match self.topics.get(&sample.topic) {
            Some(slot) => offer(&slot.state, slot.kind, sample),
            None => {
                trace!(topic = %sample.topic, "sample for unregistered topic dropped");
                false
            }
        }
    }

    /// Arm every topic and wait for one fresh sample from each.
    ///
    /// With no registered topics the bundle is empty and returned at once.
    #[instrument(skip(self), fields(topics = self.topics.len()))]
    pub async fn get_messages(&self) -> Result<SampleBundle, GroundTexError> {
        if self.topics.is_empty() {
            return Ok(SampleBundle::default());
        }
        let started = Instant::now();
        for (topic, slot) in &self.topics {
            self.arm(topic, slot);
        }

        let waits = self
            .topics
            .iter()
            .map(|(topic, slot)| wait_fresh(topic.clone(), slot.state.subscribe()));
        let samples = self.bounded("synchronizing feeds", try_join_all(waits)).await?;

        debug!(elapsed = ?started.elapsed(), "all feeds advanced");
        Ok(SampleBundle {
            samples: samples.into_iter().collect(),
        })
    }

    /// Arm a single registered topic and wait for its next fresh sample.
    pub async fn get_message(&self, topic: &str) -> Result<TopicSample, GroundTexError> {
        let slot = self
            .topics
            .get(topic)
            .ok_or_else(|| GroundTexError::MissingSample(format!("{topic} is not registered")))?;
        self.arm(topic, slot);

        let stage = format!("waiting for {topic}");
        let (_, sample) = self
            .bounded(&stage, wait_fresh(topic.to_string(), slot.state.subscribe()))
            .await?;
        Ok(sample)
    }

    // -----------------------------------------------------------------------
    // Internal helpers
    // -----------------------------------------------------------------------

    fn arm(&self, topic: &str, slot: &TopicSlot) {
        let armed_after = self.bus.latest_sequence(topic);
        slot.state.send_modify(|s| {
            s.pending = true;
            s.armed_after = armed_after;
            s.sample = None;
        });
        trace!(topic, armed_after, "armed");
    }

    async fn bounded<T>(
        &self,
        stage: &str,
        wait: impl Future<Output = Result<T, GroundTexError>>,
    ) -> Result<T, GroundTexError> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(GroundTexError::Cancelled(stage.to_string())),
            outcome = tokio::time::timeout(self.timeout, wait) => match outcome {
                Ok(result) => result,
                Err(_) => {
                    warn!(stage, waited = ?self.timeout, "feed wait timed out");
                    Err(GroundTexError::Timeout {
                        stage: stage.to_string(),
                        waited: self.timeout,
                    })
                }
            },
        }
    }
}

impl Drop for DataSynchronizer {
    fn drop(&mut self) {
        for slot in self.topics.values() {
            slot.delivery.abort();
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// SampleBundle
// ────────────────────────────────────────────────────────────────────────────

/// Result of one synchronisation round: exactly one sample per topic.
#[derive(Debug, Clone, Default)]
pub struct SampleBundle {
    samples: BTreeMap<String, TopicSample>,
}

impl SampleBundle {
    pub fn get(&self, topic: &str) -> Option<&TopicSample> {
        self.samples.get(topic)
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn topics(&self) -> impl Iterator<Item = &str> {
        self.samples.keys().map(String::as_str)
    }

    pub fn image(&self, topic: &str) -> Result<&Image, GroundTexError> {
        match self.payload(topic)? {
            SamplePayload::Image(image) => Ok(image),
            other => Err(Self::kind_mismatch(topic, SampleKind::Image, other)),
        }
    }

    pub fn camera_info(&self, topic: &str) -> Result<&CameraInfo, GroundTexError> {
        match self.payload(topic)? {
            SamplePayload::CameraInfo(info) => Ok(info),
            other => Err(Self::kind_mismatch(topic, SampleKind::CameraInfo, other)),
        }
    }

    pub fn pose_list(&self, topic: &str) -> Result<&[NamedPose], GroundTexError> {
        match self.payload(topic)? {
            SamplePayload::PoseList(poses) => Ok(poses),
            other => Err(Self::kind_mismatch(topic, SampleKind::PoseList, other)),
        }
    }

    pub fn into_samples(self) -> BTreeMap<String, TopicSample> {
        self.samples
    }

    fn payload(&self, topic: &str) -> Result<&SamplePayload, GroundTexError> {
        self.samples
            .get(topic)
            .map(|s| &s.payload)
            .ok_or_else(|| GroundTexError::MissingSample(topic.to_string()))
    }

    fn kind_mismatch(topic: &str, expected: SampleKind, actual: &SamplePayload) -> GroundTexError {
        GroundTexError::SampleKind {
            topic: topic.to_string(),
            expected,
            actual: actual.kind(),
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────
