//! Vitrine Channel - Push Transport Contract
//!
//! This crate defines the contract between the sync engine and the realtime
//! push transport without providing the production transport itself.
//!
//! # Architecture
//!
//! Control frames flow outward (subscribe/unsubscribe per topic), events
//! flow inward on a single multiplexed stream:
//!
//! ```text
//! Frames:   Subscribe(product:42) →  ────────────→  transport
//! Events:   ← PriceChanged ← StockChanged ← Connected
//! ```
//!
//! The transport guarantees at-least-once, per-topic-ordered delivery.
//! Replays after a resubscribe are possible and are deduplicated by the
//! consumer using per-topic event versions. Reconnects surface as a
//! `Connected` message so the subscription layer can re-issue its frames.
//!
//! # Key Types
//!
//! - `PushChannel`: outbound control-frame contract
//! - `ControlFrame`: subscribe/unsubscribe frames
//! - `ChannelMessage`: inbound message stream items
//! - `ReconnectConfig`: backoff policy for transport implementations
//! - `InMemoryPushChannel`: test implementation with event injection

mod channel;
mod in_memory;

pub use channel::{ChannelMessage, ControlFrame, PushChannel, ReconnectConfig};
pub use in_memory::InMemoryPushChannel;

// Re-export core types for convenience
pub use vitrine_core::{EventKind, InboundEvent, SyncError, SyncResult, Topic};
