//! Mutation intents and their optimistic apply rules.
//!
//! An intent is the user-side description of a mutation. Its `apply`
//! function computes the optimistic cache value synchronously; the same
//! intent is then sent to the mutation backend, which returns the
//! authoritative value. The client-generated `MutationId` travels with the
//! request and is echoed back, which is how optimistic placeholder rows
//! are correlated with server rows.

use crate::{
    CacheValue, CartLine, CartLineId, CartStatus, ChatMessage, OrderId, OrderStatus, ProductId,
    QueryKey, ReviewId,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Clamp a requested quantity to the valid range: never below 1, never
/// above available stock. This is the same clamp the server applies, so
/// optimistic and authoritative outcomes converge whenever inputs are in
/// range.
pub fn clamp_quantity(requested: i64, available_stock: u32) -> u32 {
    let upper = i64::from(available_stock.max(1));
    requested.clamp(1, upper) as u32
}

/// A user-initiated mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum MutationIntent {
    /// Add a line to the cart. `line.line_id` is a client-generated
    /// placeholder until the server confirms.
    CartAdd { status: CartStatus, line: CartLine },

    /// Change the quantity of an existing cart line.
    CartSetQuantity {
        status: CartStatus,
        line_id: CartLineId,
        quantity: u32,
    },

    /// Remove a line from the cart.
    CartRemove {
        status: CartStatus,
        line_id: CartLineId,
    },

    /// Cancel an order.
    CancelOrder { order_id: OrderId },

    /// Vote a review as helpful.
    MarkReviewHelpful {
        product_id: ProductId,
        review_id: ReviewId,
    },

    /// Post a chat message. `message.message_id` is a client-generated
    /// placeholder until the server confirms.
    PostChatMessage { message: ChatMessage },
}

impl MutationIntent {
    /// The cache key this mutation targets.
    pub fn key(&self) -> QueryKey {
        match self {
            MutationIntent::CartAdd { status, .. }
            | MutationIntent::CartSetQuantity { status, .. }
            | MutationIntent::CartRemove { status, .. } => QueryKey::Cart { status: *status },
            MutationIntent::CancelOrder { order_id } => QueryKey::OrderDetail {
                order_id: *order_id,
            },
            MutationIntent::MarkReviewHelpful { product_id, .. } => QueryKey::ProductReviews {
                product_id: *product_id,
            },
            MutationIntent::PostChatMessage { message } => QueryKey::ChatHistory {
                room_id: message.room_id,
            },
        }
    }

    /// The logical entity this mutation touches, used to serialize
    /// concurrent mutations on the same entity.
    pub fn entity_id(&self) -> Uuid {
        match self {
            MutationIntent::CartAdd { line, .. } => line.line_id.as_uuid(),
            MutationIntent::CartSetQuantity { line_id, .. }
            | MutationIntent::CartRemove { line_id, .. } => line_id.as_uuid(),
            MutationIntent::CancelOrder { order_id } => order_id.as_uuid(),
            MutationIntent::MarkReviewHelpful { review_id, .. } => review_id.as_uuid(),
            MutationIntent::PostChatMessage { message } => message.message_id.as_uuid(),
        }
    }

    /// Compute the optimistic value from the current cached value.
    ///
    /// This is a pure transformation; out-of-range inputs are clamped
    /// rather than rejected. Returns `None` when there is nothing cached
    /// to apply the intent to (the server call still settles the real
    /// outcome; there is just no optimistic preview).
    pub fn apply(&self, current: Option<&CacheValue>) -> Option<CacheValue> {
        match self {
            MutationIntent::CartAdd { line, .. } => {
                let mut lines = match current {
                    Some(CacheValue::CartLines(lines)) => lines.clone(),
                    _ => Vec::new(),
                };
                match lines.iter_mut().find(|l| l.product_id == line.product_id) {
                    Some(existing) => {
                        let merged = i64::from(existing.quantity) + i64::from(line.quantity);
                        existing.quantity = clamp_quantity(merged, existing.available_stock);
                    }
                    None => lines.push(line.clone()),
                }
                Some(CacheValue::CartLines(lines))
            }
            MutationIntent::CartSetQuantity {
                line_id, quantity, ..
            } => {
                let lines = current.and_then(CacheValue::as_cart_lines)?;
                let mut lines = lines.to_vec();
                let line = lines.iter_mut().find(|l| l.line_id == *line_id)?;
                line.quantity = clamp_quantity(i64::from(*quantity), line.available_stock);
                Some(CacheValue::CartLines(lines))
            }
            MutationIntent::CartRemove { line_id, .. } => {
                let lines = current.and_then(CacheValue::as_cart_lines)?;
                let mut lines = lines.to_vec();
                lines.retain(|l| l.line_id != *line_id);
                Some(CacheValue::CartLines(lines))
            }
            MutationIntent::CancelOrder { .. } => {
                let order = current.and_then(CacheValue::as_order)?;
                let mut order = order.clone();
                if order.status.accepts(OrderStatus::Cancelled) {
                    order.status = OrderStatus::Cancelled;
                    order.updated_at = Utc::now();
                }
                Some(CacheValue::Order(order))
            }
            MutationIntent::MarkReviewHelpful { review_id, .. } => {
                let reviews = current.and_then(CacheValue::as_reviews)?;
                let mut reviews = reviews.to_vec();
                let review = reviews.iter_mut().find(|r| r.review_id == *review_id)?;
                review.helpful_count = review.helpful_count.saturating_add(1);
                review.helpful_updated_at = Utc::now();
                Some(CacheValue::Reviews(reviews))
            }
            MutationIntent::PostChatMessage { message } => {
                // The user's own message must appear even if the history
                // has not been demand-fetched yet.
                let mut messages = match current {
                    Some(CacheValue::ChatMessages(messages)) => messages.clone(),
                    _ => Vec::new(),
                };
                if !messages.iter().any(|m| m.message_id == message.message_id) {
                    messages.push(message.clone());
                }
                Some(CacheValue::ChatMessages(messages))
            }
        }
    }

    /// The reverse intent relative to the pre-mutation snapshot, for
    /// mutations that can be undone as a real server mutation. Returns
    /// `None` for intents with no meaningful reverse.
    pub fn compensating(&self, snapshot: Option<&CacheValue>) -> Option<MutationIntent> {
        match self {
            MutationIntent::CartAdd { status, line } => Some(MutationIntent::CartRemove {
                status: *status,
                line_id: line.line_id,
            }),
            MutationIntent::CartSetQuantity {
                status, line_id, ..
            } => {
                let lines = snapshot.and_then(CacheValue::as_cart_lines)?;
                let previous = lines.iter().find(|l| l.line_id == *line_id)?;
                Some(MutationIntent::CartSetQuantity {
                    status: *status,
                    line_id: *line_id,
                    quantity: previous.quantity,
                })
            }
            MutationIntent::CartRemove { status, line_id } => {
                let lines = snapshot.and_then(CacheValue::as_cart_lines)?;
                let removed = lines.iter().find(|l| l.line_id == *line_id)?;
                Some(MutationIntent::CartAdd {
                    status: *status,
                    line: removed.clone(),
                })
            }
            MutationIntent::CancelOrder { .. }
            | MutationIntent::MarkReviewHelpful { .. }
            | MutationIntent::PostChatMessage { .. } => None,
        }
    }

    /// Human-readable description for user feedback.
    pub fn describe(&self) -> String {
        match self {
            MutationIntent::CartAdd { line, .. } => format!("Added {} to cart", line.name),
            MutationIntent::CartSetQuantity { quantity, .. } => {
                format!("Updated quantity to {quantity}")
            }
            MutationIntent::CartRemove { .. } => "Removed from cart".to_string(),
            MutationIntent::CancelOrder { .. } => "Order cancelled".to_string(),
            MutationIntent::MarkReviewHelpful { .. } => "Marked review as helpful".to_string(),
            MutationIntent::PostChatMessage { .. } => "Message sent".to_string(),
        }
    }
}
