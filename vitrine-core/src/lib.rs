//! Vitrine Core - Entity and Event Types
//!
//! Pure data structures shared by the sync engine and the push-channel
//! contract. This crate contains entity types, cache keys and topics, the
//! inbound event vocabulary, mutation intents, and the status state
//! machines - no async behavior.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

mod entities;
mod error;
mod event;
mod intent;
mod key;
mod status;
mod value;

pub use entities::*;
pub use error::*;
pub use event::*;
pub use intent::*;
pub use key::*;
pub use status::*;
pub use value::*;

// ============================================================================
// IDENTITY TYPES
// ============================================================================

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

/// Per-key monotonic version counter used to detect superseded writes.
pub type Version = u64;

macro_rules! entity_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Wrap an existing UUID.
            pub fn new(id: Uuid) -> Self {
                Self(id)
            }

            /// Generate a fresh UUIDv7 id (timestamp-sortable).
            pub fn generate() -> Self {
                Self(Uuid::now_v7())
            }

            /// The underlying UUID.
            pub fn as_uuid(&self) -> Uuid {
                self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                std::fmt::Display::fmt(&self.0, f)
            }
        }
    };
}

entity_id!(
    /// Identifier for a product.
    ProductId
);
entity_id!(
    /// Identifier for an order.
    OrderId
);
entity_id!(
    /// Identifier for a cart line. Client-generated at optimistic insert;
    /// the authoritative server row supersedes it on confirm.
    CartLineId
);
entity_id!(
    /// Identifier for a product review.
    ReviewId
);
entity_id!(
    /// Identifier for a chat room (buyer/seller conversation).
    RoomId
);
entity_id!(
    /// Identifier for a chat message.
    ChatMessageId
);
entity_id!(
    /// Identifier for a flash sale.
    SaleId
);
entity_id!(
    /// Identifier for a seller (dashboard scope).
    SellerId
);
entity_id!(
    /// Identifier for an activity feed item.
    ActivityId
);
entity_id!(
    /// Client-generated identifier for one mutation saga. Echoed by the
    /// server so optimistic writes can be correlated with authoritative
    /// responses without inspecting placeholder entity ids.
    MutationId
);
