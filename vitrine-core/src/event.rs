//! Inbound push-channel events.
//!
//! Every authoritative state change delivered out-of-band arrives as an
//! `InboundEvent`. The `kind` is a closed tagged enum with one merge rule
//! per variant, so adding a kind is a compile-time-checked change rather
//! than a new entry in a dynamically-keyed table.

use crate::{
    ActivityItem, ChatDeliveryStatus, ChatMessage, ChatMessageId, OrderId, OrderStatus,
    PresenceEntry, ProductId, QueryKey, Review, ReviewId, RoomId, SaleId, SellerId, Timestamp,
    Topic, Version,
};
use serde::{Deserialize, Serialize};

/// An event delivered on the push channel.
///
/// `version` is monotonic per topic; the transport guarantees per-topic
/// ordering but events may still be replayed after a resubscribe, so the
/// consumer dedups by version. Cross-topic ordering is not guaranteed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundEvent {
    pub topic: Topic,
    pub version: Version,
    pub server_timestamp: Timestamp,
    pub kind: EventKind,
}

/// Event payloads, one merge rule per variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum EventKind {
    /// A product's price changed. Merge: replace the price field.
    PriceChanged {
        product_id: ProductId,
        price_cents: i64,
    },

    /// A product's stock changed. Merge: replace the stock field.
    StockChanged { product_id: ProductId, stock: u32 },

    /// Live viewer-count sample. Merge: last-writer-wins by server
    /// timestamp.
    ViewerCountChanged { product_id: ProductId, count: u32 },

    /// An order moved through its lifecycle. Merge: forward-only status
    /// transition.
    OrderStatusChanged {
        order_id: OrderId,
        status: OrderStatus,
    },

    /// A new review was posted. Merge: idempotent append by review id.
    ReviewPosted { review: Review },

    /// A review's helpful count changed. Merge: last-writer-wins by server
    /// timestamp.
    ReviewHelpfulChanged {
        product_id: ProductId,
        review_id: ReviewId,
        helpful_count: u32,
    },

    /// A new chat message was posted. Merge: idempotent append by message
    /// id.
    ChatMessagePosted { message: ChatMessage },

    /// A chat message's delivery status advanced. Merge: forward-only
    /// status transition.
    ChatDeliveryChanged {
        room_id: RoomId,
        message_id: ChatMessageId,
        delivery: ChatDeliveryStatus,
    },

    /// The presence roster for a room changed (joins, leaves, typing
    /// indicators). Merge: replace the roster.
    PresenceChanged {
        room_id: RoomId,
        entries: Vec<PresenceEntry>,
    },

    /// Flash-sale counters ticked. Merge: last-writer-wins by server
    /// timestamp.
    FlashSaleTicked {
        sale_id: SaleId,
        remaining: u32,
        claimed: u32,
    },

    /// A new seller-dashboard activity item. Merge: idempotent append by
    /// item id.
    ActivityPosted {
        seller_id: SellerId,
        item: ActivityItem,
    },
}

impl EventKind {
    /// Get the event kind as a string for logging.
    pub fn kind_name(&self) -> &'static str {
        match self {
            EventKind::PriceChanged { .. } => "PriceChanged",
            EventKind::StockChanged { .. } => "StockChanged",
            EventKind::ViewerCountChanged { .. } => "ViewerCountChanged",
            EventKind::OrderStatusChanged { .. } => "OrderStatusChanged",
            EventKind::ReviewPosted { .. } => "ReviewPosted",
            EventKind::ReviewHelpfulChanged { .. } => "ReviewHelpfulChanged",
            EventKind::ChatMessagePosted { .. } => "ChatMessagePosted",
            EventKind::ChatDeliveryChanged { .. } => "ChatDeliveryChanged",
            EventKind::PresenceChanged { .. } => "PresenceChanged",
            EventKind::FlashSaleTicked { .. } => "FlashSaleTicked",
            EventKind::ActivityPosted { .. } => "ActivityPosted",
        }
    }

    /// The cache key this event primarily merges into.
    pub fn primary_key(&self) -> QueryKey {
        match self {
            EventKind::PriceChanged { product_id, .. }
            | EventKind::StockChanged { product_id, .. } => QueryKey::ProductDetail {
                product_id: *product_id,
            },
            EventKind::ViewerCountChanged { product_id, .. } => QueryKey::ViewerCount {
                product_id: *product_id,
            },
            EventKind::OrderStatusChanged { order_id, .. } => QueryKey::OrderDetail {
                order_id: *order_id,
            },
            EventKind::ReviewPosted { review } => QueryKey::ProductReviews {
                product_id: review.product_id,
            },
            EventKind::ReviewHelpfulChanged { product_id, .. } => QueryKey::ProductReviews {
                product_id: *product_id,
            },
            EventKind::ChatMessagePosted { message } => QueryKey::ChatHistory {
                room_id: message.room_id,
            },
            EventKind::ChatDeliveryChanged { room_id, .. } => {
                QueryKey::ChatHistory { room_id: *room_id }
            }
            EventKind::PresenceChanged { room_id, .. } => {
                QueryKey::Presence { room_id: *room_id }
            }
            EventKind::FlashSaleTicked { sale_id, .. } => {
                QueryKey::FlashSale { sale_id: *sale_id }
            }
            EventKind::ActivityPosted { seller_id, .. } => QueryKey::ActivityFeed {
                seller_id: *seller_id,
            },
        }
    }
}
