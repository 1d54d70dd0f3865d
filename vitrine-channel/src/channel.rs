//! Push-channel contract types.

use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use vitrine_core::{InboundEvent, SyncResult, Topic};

/// Outbound control frame, sent when topic interest changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "frame")]
pub enum ControlFrame {
    Subscribe { topic: Topic },
    Unsubscribe { topic: Topic },
}

impl ControlFrame {
    pub fn topic(&self) -> &Topic {
        match self {
            ControlFrame::Subscribe { topic } | ControlFrame::Unsubscribe { topic } => topic,
        }
    }
}

/// Inbound message from the transport.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelMessage {
    /// The transport established (or re-established) its connection.
    /// Subscriptions must be re-issued by the consumer.
    Connected,
    /// The transport lost its connection; it will reconnect on its own.
    Disconnected { reason: String },
    /// An authoritative event for a subscribed topic.
    Event(InboundEvent),
}

/// Contract for the outbound half of the push transport.
///
/// `send` enqueues a frame without blocking; transports buffer frames
/// internally and flush them on their own schedule. Frame delivery is
/// best-effort while disconnected - the subscription layer re-issues
/// subscribe frames on every `Connected` message, so lost frames heal at
/// the next reconnect.
pub trait PushChannel: Send + Sync {
    /// Enqueue a control frame for delivery to the transport.
    fn send(&self, frame: ControlFrame) -> SyncResult<()>;
}

/// Backoff policy for transport reconnect loops.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    pub initial_ms: u64,
    pub max_ms: u64,
    pub multiplier: f64,
    pub jitter_ms: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_ms: 250,
            max_ms: 30_000,
            multiplier: 2.0,
            jitter_ms: 100,
        }
    }
}

impl ReconnectConfig {
    /// The delay to sleep for a given attempt's base backoff, with jitter.
    pub fn delay(&self, base_ms: u64) -> Duration {
        Duration::from_millis(jittered_backoff(base_ms, self.jitter_ms))
    }

    /// The next base backoff after `base_ms`, capped at `max_ms`.
    pub fn next_backoff(&self, base_ms: u64) -> u64 {
        let next = (base_ms as f64 * self.multiplier) as u64;
        next.min(self.max_ms)
    }
}

fn jittered_backoff(base_ms: u64, jitter_ms: u64) -> u64 {
    if jitter_ms == 0 {
        return base_ms;
    }
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_else(|_| Duration::from_nanos(0))
        .subsec_nanos() as u64;
    let jitter = nanos % jitter_ms;
    base_ms.saturating_add(jitter)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_grows_and_caps() {
        let config = ReconnectConfig {
            initial_ms: 100,
            max_ms: 1000,
            multiplier: 3.0,
            jitter_ms: 0,
        };
        let mut base = config.initial_ms;
        base = config.next_backoff(base);
        assert_eq!(base, 300);
        base = config.next_backoff(base);
        assert_eq!(base, 900);
        base = config.next_backoff(base);
        assert_eq!(base, 1000);
    }

    #[test]
    fn test_jitter_bounded() {
        let config = ReconnectConfig {
            initial_ms: 100,
            max_ms: 1000,
            multiplier: 2.0,
            jitter_ms: 50,
        };
        let delay = config.delay(100);
        assert!(delay >= Duration::from_millis(100));
        assert!(delay < Duration::from_millis(150));
    }

    #[test]
    fn test_control_frame_serialization() {
        let topic = Topic::Product(vitrine_core::ProductId::generate());
        let frame = ControlFrame::Subscribe { topic };
        let json = serde_json::to_string(&frame).expect("serialize");
        let back: ControlFrame = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(frame, back);
    }
}
