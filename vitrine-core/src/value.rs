//! Cached query results.
//!
//! `CacheValue` is a closed enum with one variant per entity family so the
//! reconciler's merge rules are compile-time checked against the value
//! shapes they operate on.

use crate::{
    ActivityItem, CartLine, ChatMessage, FlashSaleState, Order, PresenceRoster, ProductDetail,
    Review, ViewerSample,
};
use serde::{Deserialize, Serialize};

/// The value stored under a cache key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CacheValue {
    CartLines(Vec<CartLine>),
    Product(ProductDetail),
    Reviews(Vec<Review>),
    Orders(Vec<Order>),
    Order(Order),
    ChatMessages(Vec<ChatMessage>),
    Presence(PresenceRoster),
    FlashSale(FlashSaleState),
    ViewerCount(ViewerSample),
    Activity(Vec<ActivityItem>),
}

impl CacheValue {
    /// Short variant name for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            CacheValue::CartLines(_) => "cart_lines",
            CacheValue::Product(_) => "product",
            CacheValue::Reviews(_) => "reviews",
            CacheValue::Orders(_) => "orders",
            CacheValue::Order(_) => "order",
            CacheValue::ChatMessages(_) => "chat_messages",
            CacheValue::Presence(_) => "presence",
            CacheValue::FlashSale(_) => "flash_sale",
            CacheValue::ViewerCount(_) => "viewer_count",
            CacheValue::Activity(_) => "activity",
        }
    }

    pub fn as_cart_lines(&self) -> Option<&[CartLine]> {
        match self {
            CacheValue::CartLines(lines) => Some(lines),
            _ => None,
        }
    }

    pub fn as_product(&self) -> Option<&ProductDetail> {
        match self {
            CacheValue::Product(product) => Some(product),
            _ => None,
        }
    }

    pub fn as_reviews(&self) -> Option<&[Review]> {
        match self {
            CacheValue::Reviews(reviews) => Some(reviews),
            _ => None,
        }
    }

    pub fn as_order(&self) -> Option<&Order> {
        match self {
            CacheValue::Order(order) => Some(order),
            _ => None,
        }
    }

    pub fn as_chat_messages(&self) -> Option<&[ChatMessage]> {
        match self {
            CacheValue::ChatMessages(messages) => Some(messages),
            _ => None,
        }
    }
}
