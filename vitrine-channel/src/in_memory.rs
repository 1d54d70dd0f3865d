//! In-memory push channel for tests.

use crate::{ChannelMessage, ControlFrame, PushChannel};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::mpsc;
use vitrine_core::{EventKind, InboundEvent, SyncResult, Topic, Version};

/// Test double for the push transport.
///
/// Records every control frame the sync layer sends and lets tests inject
/// inbound messages, with per-topic version counters so injected events
/// carry realistic monotonic versions.
pub struct InMemoryPushChannel {
    frames: Mutex<Vec<ControlFrame>>,
    versions: Mutex<HashMap<Topic, Version>>,
    tx: mpsc::UnboundedSender<ChannelMessage>,
}

impl InMemoryPushChannel {
    /// Create a channel and the message receiver the sync engine consumes.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ChannelMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                frames: Mutex::new(Vec::new()),
                versions: Mutex::new(HashMap::new()),
                tx,
            },
            rx,
        )
    }

    /// All frames sent so far, in order.
    pub fn sent_frames(&self) -> Vec<ControlFrame> {
        self.frames.lock().unwrap().clone()
    }

    /// Topics currently subscribed, derived from the frame history.
    pub fn subscribed_topics(&self) -> Vec<Topic> {
        let mut active: Vec<Topic> = Vec::new();
        for frame in self.frames.lock().unwrap().iter() {
            match frame {
                ControlFrame::Subscribe { topic } => {
                    if !active.contains(topic) {
                        active.push(*topic);
                    }
                }
                ControlFrame::Unsubscribe { topic } => {
                    active.retain(|t| t != topic);
                }
            }
        }
        active
    }

    /// Deliver a `Connected` message, as the transport does after every
    /// (re)connect.
    pub fn connect(&self) {
        let _ = self.tx.send(ChannelMessage::Connected);
    }

    /// Deliver a `Disconnected` message.
    pub fn disconnect(&self, reason: impl Into<String>) {
        let _ = self.tx.send(ChannelMessage::Disconnected {
            reason: reason.into(),
        });
    }

    /// Deliver an event with the next version for its topic.
    pub fn publish(&self, topic: Topic, kind: EventKind) -> InboundEvent {
        let version = {
            let mut versions = self.versions.lock().unwrap();
            let counter = versions.entry(topic).or_insert(0);
            *counter += 1;
            *counter
        };
        let event = InboundEvent {
            topic,
            version,
            server_timestamp: Utc::now(),
            kind,
        };
        let _ = self.tx.send(ChannelMessage::Event(event.clone()));
        event
    }

    /// Deliver a fully specified event, for replay and out-of-order tests.
    pub fn publish_raw(&self, event: InboundEvent) {
        let _ = self.tx.send(ChannelMessage::Event(event));
    }
}

impl PushChannel for InMemoryPushChannel {
    fn send(&self, frame: ControlFrame) -> SyncResult<()> {
        self.frames.lock().unwrap().push(frame);
        Ok(())
    }
}
