//! Vitrine Sync - Client-Resident State Synchronization
//!
//! A cache of storefront entities kept consistent across three concurrent
//! sources of truth: optimistic local mutations, authoritative server
//! responses, and the realtime push channel.
//!
//! # Components
//!
//! - [`EntityCache`]: keyed store of query results with versioned writes
//!   and staleness metadata. The single mutation point for UI-visible
//!   state.
//! - [`MutationCoordinator`]: runs each mutation as a four-phase saga
//!   (snapshot, apply, resolve, settle) with per-entity serialization.
//! - [`SubscriptionManager`]: ref-counted topic interest with RAII
//!   handles; emits subscribe/unsubscribe frames on 0-to-1 and 1-to-0
//!   transitions.
//! - [`EventReconciler`]: merges inbound push events into the cache with
//!   one rule per event kind.
//! - [`PrefetchScheduler`]: speculative cache warming with debounce,
//!   intent detection, and bounded concurrency.
//! - [`SyncEngine`]: wires the components together and owns the
//!   background loops (channel messages, refetches, eviction).

mod backend;
mod cache;
mod engine;
mod mutation;
mod notify;
mod prefetch;
mod reconcile;
mod subscription;

pub use backend::{FetchBackend, MutationAck, MutationBackend};
pub use cache::{
    CacheConfig, CacheEntry, CacheStatsSnapshot, CacheUpdate, EntityCache, EntryOrigin, EntryState,
};
pub use engine::{SyncEngine, SyncEngineConfig};
pub use mutation::{
    MutationConfig, MutationCoordinator, MutationOutcome, MutationStatus, OptimisticRecord,
    PendingRegistry, RetryConfig, UndoHandle,
};
pub use notify::{Notification, NotificationAction, NotificationLevel};
pub use prefetch::{PrefetchConfig, PrefetchScheduler, PrefetchStrategy};
pub use reconcile::EventReconciler;
pub use subscription::{SubscriptionHandle, SubscriptionManager};

// Re-export core types for convenience
pub use vitrine_core::{
    CacheValue, InboundEvent, MutationId, MutationIntent, QueryKey, SyncError, SyncResult, Topic,
    Version,
};
