//! Merges inbound push events into the entity cache.
//!
//! One merge rule per event kind: replace-field merges gate on the event
//! version, counters are last-writer-wins by server timestamp, status
//! changes go through the forward-only state machines, and collection
//! events are idempotent appends keyed by item id. The reconciler never
//! raises errors; everything it rejects is dropped with a diagnostic log.

use std::sync::Arc;

use tracing::{debug, warn};
use vitrine_core::{
    ActivityItem, CacheValue, CartStatus, ChatDeliveryStatus, ChatMessage, ChatMessageId,
    EventKind, InboundEvent, OrderId, OrderStatus, PresenceEntry, PresenceRoster, ProductId,
    QueryKey, Review, ReviewId, RoomId, SaleId, SellerId, ViewerSample,
};

use crate::cache::EntityCache;
use crate::mutation::PendingRegistry;
use crate::subscription::SubscriptionManager;

/// Applies push events to the cache.
pub struct EventReconciler {
    cache: Arc<EntityCache>,
    subscriptions: SubscriptionManager,
    pending: Arc<PendingRegistry>,
}

impl EventReconciler {
    pub fn new(
        cache: Arc<EntityCache>,
        subscriptions: SubscriptionManager,
        pending: Arc<PendingRegistry>,
    ) -> Self {
        Self {
            cache,
            subscriptions,
            pending,
        }
    }

    /// Merge one inbound event. Infallible: stale, duplicate, and
    /// unmergeable events are dropped.
    pub fn apply(&self, event: &InboundEvent) {
        if !self.subscriptions.record_event(event.topic, event.version) {
            debug!(
                event_type = event.kind.kind_name(),
                topic = %event.topic,
                version = event.version,
                "dropped replayed event"
            );
            return;
        }

        match &event.kind {
            EventKind::PriceChanged {
                product_id,
                price_cents,
            } => self.merge_price(event, *product_id, *price_cents),
            EventKind::StockChanged { product_id, stock } => {
                self.merge_stock(event, *product_id, *stock)
            }
            EventKind::ViewerCountChanged { product_id, count } => {
                self.merge_viewer_count(event, *product_id, *count)
            }
            EventKind::OrderStatusChanged { order_id, status } => {
                self.merge_order_status(event, *order_id, *status)
            }
            EventKind::ReviewPosted { review } => self.append_review(review),
            EventKind::ReviewHelpfulChanged {
                product_id,
                review_id,
                helpful_count,
            } => self.merge_helpful_count(event, *product_id, *review_id, *helpful_count),
            EventKind::ChatMessagePosted { message } => self.append_chat_message(message),
            EventKind::ChatDeliveryChanged {
                room_id,
                message_id,
                delivery,
            } => self.merge_chat_delivery(*room_id, *message_id, *delivery),
            EventKind::PresenceChanged { room_id, entries } => {
                self.replace_presence(event, *room_id, entries)
            }
            EventKind::FlashSaleTicked {
                sale_id,
                remaining,
                claimed,
            } => self.merge_flash_sale(event, *sale_id, *remaining, *claimed),
            EventKind::ActivityPosted { seller_id, item } => {
                self.append_activity(*seller_id, item)
            }
        }
    }

    /// Replace-field merge on the product, plus a touch-up of any cart
    /// lines showing the old price. The price push always wins price
    /// fields, even while a quantity mutation on the same product is
    /// pending; the two touch disjoint fields.
    fn merge_price(&self, event: &InboundEvent, product_id: ProductId, price_cents: i64) {
        let key = QueryKey::ProductDetail { product_id };
        if let Some(entry) = self.cache.peek(&key) {
            if event.version <= entry.version {
                debug!(family = key.family(), version = event.version, "superseded price event");
            } else if let CacheValue::Product(mut product) = entry.value {
                product.price_cents = price_cents;
                product.updated_at = event.server_timestamp;
                self.cache.write(key.clone(), CacheValue::Product(product), event.version);
                self.supersede_pending(&key);
            }
        }
        self.touch_cart_lines(product_id, |line| line.unit_price_cents = price_cents);
    }

    fn merge_stock(&self, event: &InboundEvent, product_id: ProductId, stock: u32) {
        let key = QueryKey::ProductDetail { product_id };
        if let Some(entry) = self.cache.peek(&key) {
            if event.version <= entry.version {
                debug!(family = key.family(), version = event.version, "superseded stock event");
            } else if let CacheValue::Product(mut product) = entry.value {
                product.stock = stock;
                product.updated_at = event.server_timestamp;
                self.cache.write(key.clone(), CacheValue::Product(product), event.version);
                self.supersede_pending(&key);
            }
        }
        self.touch_cart_lines(product_id, |line| line.available_stock = stock);
    }

    /// Last-writer-wins by server timestamp, not arrival order.
    fn merge_viewer_count(&self, event: &InboundEvent, product_id: ProductId, count: u32) {
        let key = QueryKey::ViewerCount { product_id };
        let sample = ViewerSample {
            count,
            observed_at: event.server_timestamp,
        };
        match self.cache.peek(&key) {
            None => {
                self.cache
                    .write(key, CacheValue::ViewerCount(sample), event.version);
            }
            Some(entry) => {
                if let CacheValue::ViewerCount(current) = entry.value {
                    if event.server_timestamp >= current.observed_at {
                        let version = entry.version.max(event.version) + 1;
                        self.cache.write(key, CacheValue::ViewerCount(sample), version);
                    } else {
                        debug!(family = "viewer_count", "older sample arrived late, dropped");
                    }
                }
            }
        }
    }

    /// Forward-only status transition on the order detail and any cached
    /// order lists containing the order.
    fn merge_order_status(&self, event: &InboundEvent, order_id: OrderId, status: OrderStatus) {
        let key = QueryKey::OrderDetail { order_id };
        match self.cache.peek(&key) {
            None => {
                // The push channel never originates an entity's first
                // state; wait for the authoritative fetch.
                debug!(order = %order_id, "status event for uncached order, dropped");
            }
            Some(entry) => {
                if let CacheValue::Order(mut order) = entry.value {
                    if order.status.accepts(status) {
                        order.status = status;
                        order.updated_at = event.server_timestamp;
                        let version = entry.version.max(event.version) + 1;
                        self.cache.write(key.clone(), CacheValue::Order(order), version);
                        self.supersede_pending(&key);
                    } else {
                        warn!(
                            order = %order_id,
                            from = %order.status,
                            to = %status,
                            "rejected non-forward status transition"
                        );
                        return;
                    }
                }
            }
        }

        for list_key in self.cache.keys() {
            if !matches!(list_key, QueryKey::Orders { .. }) {
                continue;
            }
            let Some(entry) = self.cache.peek(&list_key) else {
                continue;
            };
            if let CacheValue::Orders(mut orders) = entry.value {
                let Some(order) = orders.iter_mut().find(|o| o.order_id == order_id) else {
                    continue;
                };
                if order.status.accepts(status) {
                    order.status = status;
                    order.updated_at = event.server_timestamp;
                    self.cache
                        .write(list_key, CacheValue::Orders(orders), entry.version + 1);
                }
            }
        }
    }

    /// Idempotent append by review id, preserving arrival order.
    fn append_review(&self, review: &Review) {
        let key = QueryKey::ProductReviews {
            product_id: review.product_id,
        };
        let Some(entry) = self.cache.peek(&key) else {
            debug!(family = key.family(), "append for uncached collection, dropped");
            return;
        };
        if let CacheValue::Reviews(mut reviews) = entry.value {
            if reviews.iter().any(|r| r.review_id == review.review_id) {
                debug!(review = %review.review_id, "duplicate review append, dropped");
                return;
            }
            reviews.push(review.clone());
            self.cache
                .write(key, CacheValue::Reviews(reviews), entry.version + 1);
        }
    }

    fn merge_helpful_count(
        &self,
        event: &InboundEvent,
        product_id: ProductId,
        review_id: ReviewId,
        helpful_count: u32,
    ) {
        let key = QueryKey::ProductReviews { product_id };
        let Some(entry) = self.cache.peek(&key) else {
            return;
        };
        if let CacheValue::Reviews(mut reviews) = entry.value {
            let Some(review) = reviews.iter_mut().find(|r| r.review_id == review_id) else {
                debug!(review = %review_id, "helpful count for unknown review, dropped");
                return;
            };
            if event.server_timestamp < review.helpful_updated_at {
                debug!(review = %review_id, "older helpful count arrived late, dropped");
                return;
            }
            review.helpful_count = helpful_count;
            review.helpful_updated_at = event.server_timestamp;
            self.cache
                .write(key, CacheValue::Reviews(reviews), entry.version + 1);
        }
    }

    fn append_chat_message(&self, message: &ChatMessage) {
        let key = QueryKey::ChatHistory {
            room_id: message.room_id,
        };
        let Some(entry) = self.cache.peek(&key) else {
            debug!(family = key.family(), "append for uncached collection, dropped");
            return;
        };
        if let CacheValue::ChatMessages(mut messages) = entry.value {
            if messages.iter().any(|m| m.message_id == message.message_id) {
                debug!(message = %message.message_id, "duplicate message append, dropped");
                return;
            }
            messages.push(message.clone());
            self.cache
                .write(key, CacheValue::ChatMessages(messages), entry.version + 1);
        }
    }

    fn merge_chat_delivery(
        &self,
        room_id: RoomId,
        message_id: ChatMessageId,
        delivery: ChatDeliveryStatus,
    ) {
        let key = QueryKey::ChatHistory { room_id };
        let Some(entry) = self.cache.peek(&key) else {
            return;
        };
        if let CacheValue::ChatMessages(mut messages) = entry.value {
            let Some(message) = messages.iter_mut().find(|m| m.message_id == message_id) else {
                return;
            };
            if !message.delivery.accepts(delivery) {
                debug!(message = %message_id, "rejected non-forward delivery transition");
                return;
            }
            message.delivery = delivery;
            self.cache
                .write(key, CacheValue::ChatMessages(messages), entry.version + 1);
        }
    }

    /// The roster is pushed whole; merge by replacement under the version
    /// gate.
    fn replace_presence(&self, event: &InboundEvent, room_id: RoomId, entries: &[PresenceEntry]) {
        let key = QueryKey::Presence { room_id };
        if let Some(entry) = self.cache.peek(&key) {
            if event.version <= entry.version {
                debug!(family = key.family(), "superseded presence event");
                return;
            }
        }
        let roster = PresenceRoster {
            room_id,
            entries: entries.to_vec(),
        };
        self.cache
            .write(key, CacheValue::Presence(roster), event.version);
    }

    fn merge_flash_sale(&self, event: &InboundEvent, sale_id: SaleId, remaining: u32, claimed: u32) {
        let key = QueryKey::FlashSale { sale_id };
        let Some(entry) = self.cache.peek(&key) else {
            debug!(sale = %sale_id, "tick for uncached flash sale, dropped");
            return;
        };
        if let CacheValue::FlashSale(mut state) = entry.value {
            if event.server_timestamp < state.updated_at {
                debug!(sale = %sale_id, "older flash-sale tick arrived late, dropped");
                return;
            }
            state.remaining = remaining;
            state.claimed = claimed;
            state.updated_at = event.server_timestamp;
            let version = entry.version.max(event.version) + 1;
            self.cache.write(key, CacheValue::FlashSale(state), version);
        }
    }

    fn append_activity(&self, seller_id: SellerId, item: &ActivityItem) {
        let key = QueryKey::ActivityFeed { seller_id };
        let Some(entry) = self.cache.peek(&key) else {
            debug!(family = key.family(), "append for uncached collection, dropped");
            return;
        };
        if let CacheValue::Activity(mut items) = entry.value {
            if items.iter().any(|i| i.item_id == item.item_id) {
                return;
            }
            items.push(item.clone());
            self.cache
                .write(key, CacheValue::Activity(items), entry.version + 1);
        }
    }

    /// Apply a field update to any cached cart lines for the product.
    /// Cart keys have their own version counters; these writes bump them
    /// locally.
    fn touch_cart_lines(
        &self,
        product_id: ProductId,
        update: impl Fn(&mut vitrine_core::CartLine),
    ) {
        for status in [CartStatus::InCart, CartStatus::SavedForLater] {
            let key = QueryKey::Cart { status };
            let Some(entry) = self.cache.peek(&key) else {
                continue;
            };
            if let CacheValue::CartLines(mut lines) = entry.value {
                let mut touched = false;
                for line in lines.iter_mut().filter(|l| l.product_id == product_id) {
                    update(line);
                    touched = true;
                }
                if touched {
                    self.cache
                        .write(key, CacheValue::CartLines(lines), entry.version + 1);
                }
            }
        }
    }

    fn supersede_pending(&self, key: &QueryKey) {
        let count = self.pending.supersede_key(key);
        if count > 0 {
            debug!(
                family = key.family(),
                count, "authoritative event superseded pending optimistic records"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheConfig;
    use chrono::{Duration as ChronoDuration, Utc};
    use vitrine_core::{CartLine, CartLineId, Order, ProductDetail, Timestamp, Topic};

    struct Fixture {
        cache: Arc<EntityCache>,
        subscriptions: SubscriptionManager,
        reconciler: EventReconciler,
    }

    fn fixture() -> Fixture {
        let (cache, _refetch_rx) = EntityCache::new(CacheConfig::default());
        let cache = Arc::new(cache);
        let (channel, _messages) = vitrine_channel::InMemoryPushChannel::new();
        let subscriptions = SubscriptionManager::new(Arc::new(channel));
        let reconciler = EventReconciler::new(
            cache.clone(),
            subscriptions.clone(),
            Arc::new(PendingRegistry::new()),
        );
        Fixture {
            cache,
            subscriptions,
            reconciler,
        }
    }

    fn product(product_id: ProductId) -> ProductDetail {
        ProductDetail {
            product_id,
            name: "Enamel Kettle".to_string(),
            description: None,
            price_cents: 5400,
            stock: 8,
            updated_at: Utc::now(),
        }
    }

    fn order(order_id: OrderId, status: OrderStatus) -> Order {
        Order {
            order_id,
            status,
            total_cents: 12800,
            placed_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn event(topic: Topic, version: u64, at: Timestamp, kind: EventKind) -> InboundEvent {
        InboundEvent {
            topic,
            version,
            server_timestamp: at,
            kind,
        }
    }

    #[test]
    fn test_price_replace_gated_by_version() {
        let fx = fixture();
        let product_id = ProductId::generate();
        let key = QueryKey::ProductDetail { product_id };
        fx.cache
            .write(key.clone(), CacheValue::Product(product(product_id)), 5);

        // Older than the cached version: dropped.
        fx.reconciler.apply(&event(
            Topic::Product(product_id),
            4,
            Utc::now(),
            EventKind::PriceChanged {
                product_id,
                price_cents: 100,
            },
        ));
        assert_eq!(
            fx.cache.peek(&key).unwrap().value.as_product().unwrap().price_cents,
            5400
        );

        // Newer: applied, and the entry takes the event version.
        fx.reconciler.apply(&event(
            Topic::Product(product_id),
            9,
            Utc::now(),
            EventKind::PriceChanged {
                product_id,
                price_cents: 4900,
            },
        ));
        let entry = fx.cache.peek(&key).unwrap();
        assert_eq!(entry.value.as_product().unwrap().price_cents, 4900);
        assert_eq!(entry.version, 9);
    }

    #[test]
    fn test_duplicate_event_is_idempotent() {
        let fx = fixture();
        let product_id = ProductId::generate();
        let key = QueryKey::ProductDetail { product_id };
        fx.cache
            .write(key.clone(), CacheValue::Product(product(product_id)), 1);

        let push = event(
            Topic::Product(product_id),
            7,
            Utc::now(),
            EventKind::StockChanged {
                product_id,
                stock: 3,
            },
        );
        fx.reconciler.apply(&push);
        let after_first = fx.cache.peek(&key).unwrap();
        fx.reconciler.apply(&push);
        let after_second = fx.cache.peek(&key).unwrap();

        assert_eq!(after_first.value, after_second.value);
        assert_eq!(after_first.version, after_second.version);
    }

    #[test]
    fn test_price_push_touches_cart_lines() {
        let fx = fixture();
        let product_id = ProductId::generate();
        let cart_key = QueryKey::Cart {
            status: CartStatus::InCart,
        };
        let line = CartLine {
            line_id: CartLineId::generate(),
            product_id,
            name: "Enamel Kettle".to_string(),
            unit_price_cents: 5400,
            quantity: 2,
            available_stock: 8,
            added_at: Utc::now(),
        };
        fx.cache
            .write(cart_key.clone(), CacheValue::CartLines(vec![line]), 1);

        fx.reconciler.apply(&event(
            Topic::Product(product_id),
            1,
            Utc::now(),
            EventKind::PriceChanged {
                product_id,
                price_cents: 4900,
            },
        ));

        let lines = fx.cache.peek(&cart_key).unwrap().value;
        assert_eq!(lines.as_cart_lines().unwrap()[0].unit_price_cents, 4900);
        // The quantity the user set is untouched; only price fields moved.
        assert_eq!(lines.as_cart_lines().unwrap()[0].quantity, 2);
    }

    #[test]
    fn test_order_status_forward_only() {
        let fx = fixture();
        let order_id = OrderId::generate();
        let key = QueryKey::OrderDetail { order_id };
        let topic = Topic::Order(order_id);
        fx.cache.write(
            key.clone(),
            CacheValue::Order(order(order_id, OrderStatus::Shipping)),
            1,
        );

        // Backward: rejected.
        fx.reconciler.apply(&event(
            topic,
            1,
            Utc::now(),
            EventKind::OrderStatusChanged {
                order_id,
                status: OrderStatus::Confirmed,
            },
        ));
        assert_eq!(
            fx.cache.peek(&key).unwrap().value.as_order().unwrap().status,
            OrderStatus::Shipping
        );

        // Forward: accepted.
        fx.reconciler.apply(&event(
            topic,
            2,
            Utc::now(),
            EventKind::OrderStatusChanged {
                order_id,
                status: OrderStatus::Delivered,
            },
        ));
        assert_eq!(
            fx.cache.peek(&key).unwrap().value.as_order().unwrap().status,
            OrderStatus::Delivered
        );
    }

    #[test]
    fn test_cancelled_order_absorbs_all_later_events() {
        let fx = fixture();
        let order_id = OrderId::generate();
        let key = QueryKey::OrderDetail { order_id };
        let topic = Topic::Order(order_id);
        fx.cache.write(
            key.clone(),
            CacheValue::Order(order(order_id, OrderStatus::Cancelled)),
            1,
        );

        for (version, status) in [(1, OrderStatus::Confirmed), (2, OrderStatus::Delivered)] {
            fx.reconciler.apply(&event(
                topic,
                version,
                Utc::now(),
                EventKind::OrderStatusChanged { order_id, status },
            ));
        }
        assert_eq!(
            fx.cache.peek(&key).unwrap().value.as_order().unwrap().status,
            OrderStatus::Cancelled
        );
    }

    #[test]
    fn test_status_event_updates_cached_order_lists() {
        let fx = fixture();
        let order_id = OrderId::generate();
        let list_key = QueryKey::Orders { status: None };
        fx.cache.write(
            list_key.clone(),
            CacheValue::Orders(vec![order(order_id, OrderStatus::Confirmed)]),
            1,
        );

        fx.reconciler.apply(&event(
            Topic::Order(order_id),
            1,
            Utc::now(),
            EventKind::OrderStatusChanged {
                order_id,
                status: OrderStatus::Shipping,
            },
        ));

        let entry = fx.cache.peek(&list_key).unwrap();
        match &entry.value {
            CacheValue::Orders(orders) => assert_eq!(orders[0].status, OrderStatus::Shipping),
            other => panic!("expected orders, got {other:?}"),
        }
    }

    #[test]
    fn test_review_append_is_idempotent() {
        let fx = fixture();
        let product_id = ProductId::generate();
        let key = QueryKey::ProductReviews { product_id };
        fx.cache.write(key.clone(), CacheValue::Reviews(vec![]), 1);

        let review = Review {
            review_id: ReviewId::generate(),
            product_id,
            author: "mara".to_string(),
            body: "Pours beautifully.".to_string(),
            rating: 5,
            helpful_count: 0,
            helpful_updated_at: Utc::now(),
            created_at: Utc::now(),
        };
        let topic = Topic::Product(product_id);
        fx.reconciler.apply(&event(
            topic,
            1,
            Utc::now(),
            EventKind::ReviewPosted {
                review: review.clone(),
            },
        ));
        // Same review replayed under a new version (at-least-once
        // delivery after resubscribe).
        fx.reconciler.apply(&event(
            topic,
            2,
            Utc::now(),
            EventKind::ReviewPosted { review },
        ));

        let reviews = fx.cache.peek(&key).unwrap().value;
        assert_eq!(reviews.as_reviews().unwrap().len(), 1);
    }

    #[test]
    fn test_helpful_count_lww_by_server_timestamp() {
        let fx = fixture();
        let product_id = ProductId::generate();
        let key = QueryKey::ProductReviews { product_id };
        let earlier = Utc::now();
        let later = earlier + ChronoDuration::seconds(5);

        let review = Review {
            review_id: ReviewId::generate(),
            product_id,
            author: "theo".to_string(),
            body: "Chipped on arrival.".to_string(),
            rating: 2,
            helpful_count: 1,
            helpful_updated_at: earlier,
            created_at: earlier,
        };
        let review_id = review.review_id;
        fx.cache
            .write(key.clone(), CacheValue::Reviews(vec![review]), 1);

        let topic = Topic::Product(product_id);
        // The newer count arrives first...
        fx.reconciler.apply(&event(
            topic,
            1,
            later,
            EventKind::ReviewHelpfulChanged {
                product_id,
                review_id,
                helpful_count: 8,
            },
        ));
        // ...then the older one straggles in with a higher topic version.
        fx.reconciler.apply(&event(
            topic,
            2,
            earlier,
            EventKind::ReviewHelpfulChanged {
                product_id,
                review_id,
                helpful_count: 4,
            },
        ));

        let reviews = fx.cache.peek(&key).unwrap().value;
        assert_eq!(reviews.as_reviews().unwrap()[0].helpful_count, 8);
    }

    #[test]
    fn test_viewer_count_created_on_first_event() {
        let fx = fixture();
        let product_id = ProductId::generate();
        let key = QueryKey::ViewerCount { product_id };

        fx.reconciler.apply(&event(
            Topic::Product(product_id),
            3,
            Utc::now(),
            EventKind::ViewerCountChanged {
                product_id,
                count: 17,
            },
        ));

        match fx.cache.peek(&key).unwrap().value {
            CacheValue::ViewerCount(sample) => assert_eq!(sample.count, 17),
            other => panic!("expected viewer count, got {other:?}"),
        }
    }

    #[test]
    fn test_status_event_for_uncached_order_is_dropped() {
        let fx = fixture();
        let order_id = OrderId::generate();
        fx.reconciler.apply(&event(
            Topic::Order(order_id),
            1,
            Utc::now(),
            EventKind::OrderStatusChanged {
                order_id,
                status: OrderStatus::Confirmed,
            },
        ));
        assert!(fx
            .cache
            .peek(&QueryKey::OrderDetail { order_id })
            .is_none());
        // The version was still recorded, so a replay stays dropped.
        assert_eq!(fx.subscriptions.last_seen(&Topic::Order(order_id)), 1);
    }
}
