//! Status state machines for orders and chat delivery.
//!
//! Transitions are monotonic by rank: an incoming event naming a state with
//! a lower rank than the cached state is rejected. Terminal states are
//! absorbing - once set, no further transitions are accepted.

use serde::{Deserialize, Serialize};

/// Status of an order.
///
/// Forward order: `Pending -> Confirmed -> Processing -> Shipping ->
/// Delivered`. `Cancelled` and `Returned` are terminal and reachable from
/// any non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderStatus {
    Pending,
    Confirmed,
    Processing,
    Shipping,
    Delivered,
    Cancelled,
    Returned,
}

impl OrderStatus {
    /// Rank within the forward progression. Terminal states have no rank.
    pub fn rank(&self) -> Option<u8> {
        match self {
            OrderStatus::Pending => Some(0),
            OrderStatus::Confirmed => Some(1),
            OrderStatus::Processing => Some(2),
            OrderStatus::Shipping => Some(3),
            OrderStatus::Delivered => Some(4),
            OrderStatus::Cancelled | OrderStatus::Returned => None,
        }
    }

    /// Whether this status is absorbing.
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Cancelled | OrderStatus::Returned)
    }

    /// Whether a transition from `self` to `next` is accepted.
    ///
    /// Accepted transitions are strictly forward in rank, or into a
    /// terminal state from any non-terminal state. Duplicates and backward
    /// transitions are rejected.
    pub fn accepts(&self, next: OrderStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        if next.is_terminal() {
            return true;
        }
        match (self.rank(), next.rank()) {
            (Some(current), Some(incoming)) => incoming > current,
            _ => false,
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Confirmed => "confirmed",
            OrderStatus::Processing => "processing",
            OrderStatus::Shipping => "shipping",
            OrderStatus::Delivered => "delivered",
            OrderStatus::Cancelled => "cancelled",
            OrderStatus::Returned => "returned",
        };
        f.write_str(name)
    }
}

/// Delivery status of a chat message, same monotonic-rank scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChatDeliveryStatus {
    Sent,
    Delivered,
    Read,
}

impl ChatDeliveryStatus {
    pub fn rank(&self) -> u8 {
        match self {
            ChatDeliveryStatus::Sent => 0,
            ChatDeliveryStatus::Delivered => 1,
            ChatDeliveryStatus::Read => 2,
        }
    }

    /// Whether a transition from `self` to `next` is accepted.
    pub fn accepts(&self, next: ChatDeliveryStatus) -> bool {
        next.rank() > self.rank()
    }
}
