//! Cache keys and push-channel topics.
//!
//! A `QueryKey` is a structural tuple of entity family plus normalized
//! parameters; it is the sole addressing scheme for the entity cache.
//! A `Topic` names one subscription channel on the push transport.

use crate::{OrderId, OrderStatus, ProductId, RoomId, SaleId, SellerId};
use serde::{Deserialize, Serialize};

/// Which cart bucket a query addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CartStatus {
    InCart,
    SavedForLater,
}

/// Structural cache key: entity family plus normalized parameters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QueryKey {
    Cart { status: CartStatus },
    ProductDetail { product_id: ProductId },
    ProductReviews { product_id: ProductId },
    ViewerCount { product_id: ProductId },
    Orders { status: Option<OrderStatus> },
    OrderDetail { order_id: OrderId },
    ChatHistory { room_id: RoomId },
    Presence { room_id: RoomId },
    FlashSale { sale_id: SaleId },
    ActivityFeed { seller_id: SellerId },
}

impl QueryKey {
    /// The push-channel topic carrying live updates for this key, if any.
    /// Cart and order-list keys have no topic; they are refreshed through
    /// the demand-fetch path only.
    pub fn topic(&self) -> Option<Topic> {
        match self {
            QueryKey::Cart { .. } | QueryKey::Orders { .. } => None,
            QueryKey::ProductDetail { product_id }
            | QueryKey::ProductReviews { product_id }
            | QueryKey::ViewerCount { product_id } => Some(Topic::Product(*product_id)),
            QueryKey::OrderDetail { order_id } => Some(Topic::Order(*order_id)),
            QueryKey::ChatHistory { room_id } => Some(Topic::Chat(*room_id)),
            QueryKey::Presence { room_id } => Some(Topic::Presence(*room_id)),
            QueryKey::FlashSale { sale_id } => Some(Topic::FlashSale(*sale_id)),
            QueryKey::ActivityFeed { seller_id } => Some(Topic::SellerDashboard(*seller_id)),
        }
    }

    /// Short family name for logging.
    pub fn family(&self) -> &'static str {
        match self {
            QueryKey::Cart { .. } => "cart",
            QueryKey::ProductDetail { .. } => "product_detail",
            QueryKey::ProductReviews { .. } => "product_reviews",
            QueryKey::ViewerCount { .. } => "viewer_count",
            QueryKey::Orders { .. } => "orders",
            QueryKey::OrderDetail { .. } => "order_detail",
            QueryKey::ChatHistory { .. } => "chat_history",
            QueryKey::Presence { .. } => "presence",
            QueryKey::FlashSale { .. } => "flash_sale",
            QueryKey::ActivityFeed { .. } => "activity_feed",
        }
    }
}

/// A named subscription channel on the push transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "scope", content = "id")]
pub enum Topic {
    Product(ProductId),
    Order(OrderId),
    Chat(RoomId),
    FlashSale(SaleId),
    SellerDashboard(SellerId),
    Presence(RoomId),
}

impl std::fmt::Display for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Topic::Product(id) => write!(f, "product:{id}"),
            Topic::Order(id) => write!(f, "order:{id}"),
            Topic::Chat(id) => write!(f, "chat:{id}"),
            Topic::FlashSale(id) => write!(f, "flash_sale:{id}"),
            Topic::SellerDashboard(id) => write!(f, "seller_dashboard:{id}"),
            Topic::Presence(id) => write!(f, "presence:{id}"),
        }
    }
}
