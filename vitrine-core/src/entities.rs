//! Core entity structures for storefront state.

use crate::{
    ActivityId, CartLineId, ChatDeliveryStatus, ChatMessageId, OrderId, OrderStatus, ProductId,
    ReviewId, RoomId, SaleId, Timestamp,
};
use serde::{Deserialize, Serialize};

/// One line in the shopping cart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CartLine {
    pub line_id: CartLineId,
    pub product_id: ProductId,
    pub name: String,
    /// Unit price in minor currency units.
    pub unit_price_cents: i64,
    pub quantity: u32,
    /// Stock known to the client at write time; the optimistic quantity
    /// clamp uses this as its upper bound.
    pub available_stock: u32,
    pub added_at: Timestamp,
}

/// Product detail as shown on a product page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductDetail {
    pub product_id: ProductId,
    pub name: String,
    pub description: Option<String>,
    pub price_cents: i64,
    pub stock: u32,
    pub updated_at: Timestamp,
}

/// A product review.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Review {
    pub review_id: ReviewId,
    pub product_id: ProductId,
    pub author: String,
    pub body: String,
    /// Star rating, 1-5.
    pub rating: u8,
    pub helpful_count: u32,
    /// Server timestamp of the last helpful-count change; counter merges
    /// are last-writer-wins by this timestamp, not by arrival order.
    pub helpful_updated_at: Timestamp,
    pub created_at: Timestamp,
}

/// An order as shown in order history and order detail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub order_id: OrderId,
    pub status: OrderStatus,
    pub total_cents: i64,
    pub placed_at: Timestamp,
    pub updated_at: Timestamp,
}

/// A chat message in a buyer/seller conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub message_id: ChatMessageId,
    pub room_id: RoomId,
    pub sender: String,
    pub body: String,
    pub delivery: ChatDeliveryStatus,
    pub sent_at: Timestamp,
}

/// One participant in a presence roster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresenceEntry {
    pub session_id: uuid::Uuid,
    pub display_name: String,
    pub is_typing: bool,
    pub joined_at: Timestamp,
}

/// The full presence roster for a room. Pushed as a whole; merged by
/// replacement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresenceRoster {
    pub room_id: RoomId,
    pub entries: Vec<PresenceEntry>,
}

/// Live flash-sale counters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlashSaleState {
    pub sale_id: SaleId,
    pub product_id: ProductId,
    pub remaining: u32,
    pub claimed: u32,
    pub ends_at: Timestamp,
    /// Server timestamp of the sample; merges are last-writer-wins by this.
    pub updated_at: Timestamp,
}

/// One item in the seller-dashboard activity feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityItem {
    pub item_id: ActivityId,
    pub message: String,
    pub occurred_at: Timestamp,
}

/// A live viewer-count sample for a product page.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ViewerSample {
    pub count: u32,
    /// Server timestamp of the sample; merges are last-writer-wins by this.
    pub observed_at: Timestamp,
}
