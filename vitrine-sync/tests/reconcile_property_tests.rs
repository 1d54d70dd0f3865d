//! Property-Based Tests for Event Reconciliation
//!
//! **Idempotent application**: applying the same inbound event twice
//! produces the same cache state as applying it once.
//!
//! **Version monotonicity**: a write at version `v0` after a write at
//! `v1 > v0` leaves the cache at `v1`.
//!
//! **Forward-only transitions**: a cached order's status only ever moves
//! forward through the state machine, regardless of the event order the
//! transport delivers.

use chrono::Utc;
use proptest::prelude::*;
use std::sync::Arc;
use vitrine_core::{
    CacheValue, EventKind, InboundEvent, Order, OrderId, OrderStatus, ProductDetail, ProductId,
    QueryKey, Topic,
};
use vitrine_sync::{
    CacheConfig, EntityCache, EventReconciler, PendingRegistry, SubscriptionManager,
};

struct Fixture {
    cache: Arc<EntityCache>,
    reconciler: EventReconciler,
}

fn fixture() -> Fixture {
    let (cache, _refetch_rx) = EntityCache::new(CacheConfig::default());
    let cache = Arc::new(cache);
    let (channel, _messages) = vitrine_channel::InMemoryPushChannel::new();
    let subscriptions = SubscriptionManager::new(Arc::new(channel));
    let reconciler = EventReconciler::new(
        cache.clone(),
        subscriptions,
        Arc::new(PendingRegistry::new()),
    );
    Fixture { cache, reconciler }
}

fn seed_product(fixture: &Fixture, product_id: ProductId) -> QueryKey {
    let key = QueryKey::ProductDetail { product_id };
    fixture.cache.write(
        key.clone(),
        CacheValue::Product(ProductDetail {
            product_id,
            name: "Field Notebook".to_string(),
            description: None,
            price_cents: 900,
            stock: 40,
            updated_at: Utc::now(),
        }),
        1,
    );
    key
}

fn seed_order(fixture: &Fixture, order_id: OrderId, status: OrderStatus) -> QueryKey {
    let key = QueryKey::OrderDetail { order_id };
    fixture.cache.write(
        key.clone(),
        CacheValue::Order(Order {
            order_id,
            status,
            total_cents: 4300,
            placed_at: Utc::now(),
            updated_at: Utc::now(),
        }),
        1,
    );
    key
}

fn order_status_strategy() -> impl Strategy<Value = OrderStatus> {
    prop_oneof![
        Just(OrderStatus::Pending),
        Just(OrderStatus::Confirmed),
        Just(OrderStatus::Processing),
        Just(OrderStatus::Shipping),
        Just(OrderStatus::Delivered),
        Just(OrderStatus::Cancelled),
        Just(OrderStatus::Returned),
    ]
}

proptest! {
    #[test]
    fn prop_duplicate_event_application_is_idempotent(
        version in 2u64..=50,
        price_cents in 1i64..=100_000,
        stock in 0u32..=100,
        use_price in any::<bool>(),
    ) {
        let product_id = ProductId::generate();
        let kind = if use_price {
            EventKind::PriceChanged { product_id, price_cents }
        } else {
            EventKind::StockChanged { product_id, stock }
        };
        let event = InboundEvent {
            topic: Topic::Product(product_id),
            version,
            server_timestamp: Utc::now(),
            kind,
        };

        let once = fixture();
        let key = seed_product(&once, product_id);
        once.reconciler.apply(&event);

        let twice = fixture();
        seed_product(&twice, product_id);
        twice.reconciler.apply(&event);
        twice.reconciler.apply(&event);

        let single = once.cache.peek(&key).unwrap();
        let double = twice.cache.peek(&key).unwrap();
        prop_assert_eq!(single.value, double.value);
        prop_assert_eq!(single.version, double.version);
    }

    #[test]
    fn prop_writes_are_version_monotonic(versions in proptest::collection::vec(1u64..=100, 1..20)) {
        let (cache, _refetch_rx) = EntityCache::new(CacheConfig::default());
        let product_id = ProductId::generate();
        let key = QueryKey::ProductDetail { product_id };
        let value = CacheValue::Product(ProductDetail {
            product_id,
            name: "Field Notebook".to_string(),
            description: None,
            price_cents: 900,
            stock: 40,
            updated_at: Utc::now(),
        });

        let mut high_water = 0u64;
        for version in versions {
            let accepted = cache.write(key.clone(), value.clone(), version);
            prop_assert_eq!(accepted, version > high_water);
            high_water = high_water.max(version);
            prop_assert_eq!(cache.version_of(&key), high_water);
        }
    }

    #[test]
    fn prop_order_status_only_moves_forward(
        initial in order_status_strategy(),
        incoming in proptest::collection::vec(order_status_strategy(), 0..12),
    ) {
        let fx = fixture();
        let order_id = OrderId::generate();
        let key = seed_order(&fx, order_id, initial);

        let mut expected = initial;
        for (index, status) in incoming.iter().enumerate() {
            fx.reconciler.apply(&InboundEvent {
                topic: Topic::Order(order_id),
                version: (index + 1) as u64,
                server_timestamp: Utc::now(),
                kind: EventKind::OrderStatusChanged { order_id, status: *status },
            });
            if expected.accepts(*status) {
                expected = *status;
            }
        }

        let entry = fx.cache.peek(&key).unwrap();
        prop_assert_eq!(entry.value.as_order().unwrap().status, expected);
    }
}
