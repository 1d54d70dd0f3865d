//! Ref-counted topic subscriptions with RAII handles.
//!
//! A subscription lives exactly as long as UI interest: the first handle
//! for a topic emits a subscribe frame, dropping the last handle emits an
//! unsubscribe frame. Per-topic last-seen event versions are retained past
//! unsubscribe so a replayed burst after resubscribe is deduplicated.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use tracing::{debug, warn};
use vitrine_channel::{ControlFrame, PushChannel};
use vitrine_core::{Topic, Version};

struct SubscriptionInner {
    channel: Arc<dyn PushChannel>,
    ref_counts: Mutex<HashMap<Topic, usize>>,
    /// Highest event version seen per topic. Outlives the subscription so
    /// stale replays after a resubscribe are dropped.
    seen_versions: Mutex<HashMap<Topic, Version>>,
}

impl SubscriptionInner {
    fn release(&self, topic: Topic) {
        let mut counts = self.ref_counts.lock().unwrap();
        let Some(count) = counts.get_mut(&topic) else {
            return;
        };
        *count -= 1;
        if *count == 0 {
            counts.remove(&topic);
            debug!(topic = %topic, "unsubscribing");
            if let Err(err) = self.channel.send(ControlFrame::Unsubscribe { topic }) {
                warn!(topic = %topic, error = %err, "failed to send unsubscribe frame");
            }
        }
    }
}

/// Tracks which push-channel topics are currently of interest.
#[derive(Clone)]
pub struct SubscriptionManager {
    inner: Arc<SubscriptionInner>,
}

impl SubscriptionManager {
    pub fn new(channel: Arc<dyn PushChannel>) -> Self {
        Self {
            inner: Arc::new(SubscriptionInner {
                channel,
                ref_counts: Mutex::new(HashMap::new()),
                seen_versions: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Express interest in a topic. The returned handle keeps the
    /// subscription alive; dropping it releases the interest.
    pub fn subscribe(&self, topic: Topic) -> SubscriptionHandle {
        let mut counts = self.inner.ref_counts.lock().unwrap();
        let count = counts.entry(topic).or_insert(0);
        *count += 1;
        if *count == 1 {
            debug!(topic = %topic, "subscribing");
            if let Err(err) = self.inner.channel.send(ControlFrame::Subscribe { topic }) {
                warn!(topic = %topic, error = %err, "failed to send subscribe frame");
            }
        }
        SubscriptionHandle {
            topic,
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Whether any handle currently holds interest in the topic.
    pub fn is_active(&self, topic: &Topic) -> bool {
        self.inner.ref_counts.lock().unwrap().contains_key(topic)
    }

    /// Topics with at least one active handle.
    pub fn active_topics(&self) -> Vec<Topic> {
        self.inner
            .ref_counts
            .lock()
            .unwrap()
            .keys()
            .copied()
            .collect()
    }

    /// Record an inbound event's version for its topic. Returns false if
    /// the event is a stale or duplicate replay and must be dropped.
    pub fn record_event(&self, topic: Topic, version: Version) -> bool {
        let mut seen = self.inner.seen_versions.lock().unwrap();
        let last = seen.entry(topic).or_insert(0);
        if version <= *last {
            return false;
        }
        *last = version;
        true
    }

    /// The highest event version seen for a topic.
    pub fn last_seen(&self, topic: &Topic) -> Version {
        self.inner
            .seen_versions
            .lock()
            .unwrap()
            .get(topic)
            .copied()
            .unwrap_or(0)
    }

    /// Re-issue subscribe frames for every active topic. Called on each
    /// `Connected` message after a transport reconnect. Last-seen versions
    /// are untouched, so the replayed burst is deduplicated.
    pub fn resubscribe_all(&self) {
        let topics = self.active_topics();
        debug!(count = topics.len(), "resubscribing after reconnect");
        for topic in topics {
            if let Err(err) = self.inner.channel.send(ControlFrame::Subscribe { topic }) {
                warn!(topic = %topic, error = %err, "failed to resubscribe");
            }
        }
    }
}

/// RAII handle for one consumer's interest in a topic. Release happens on
/// drop, so interest is released on every UI exit path.
pub struct SubscriptionHandle {
    topic: Topic,
    inner: Weak<SubscriptionInner>,
}

impl SubscriptionHandle {
    pub fn topic(&self) -> Topic {
        self.topic
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.upgrade() {
            inner.release(self.topic);
        }
    }
}
