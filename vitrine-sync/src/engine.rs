//! Wiring and background loops.
//!
//! The engine owns the three long-lived tasks: the channel message loop
//! (events in, resubscribe on reconnect), the refetch loop (stale keys
//! with live interest get refreshed), and the eviction sweep. Components
//! stay individually constructible for tests; the engine is the
//! production wiring.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use vitrine_channel::{ChannelMessage, PushChannel};
use vitrine_core::QueryKey;

use crate::backend::{FetchBackend, MutationBackend};
use crate::cache::{CacheConfig, EntityCache};
use crate::mutation::{MutationConfig, MutationCoordinator, PendingRegistry};
use crate::notify::Notification;
use crate::prefetch::{PrefetchConfig, PrefetchScheduler};
use crate::reconcile::EventReconciler;
use crate::subscription::SubscriptionManager;

/// Top-level configuration for the sync engine.
#[derive(Debug, Clone, Default)]
pub struct SyncEngineConfig {
    pub cache: CacheConfig,
    pub mutation: MutationConfig,
    pub prefetch: PrefetchConfig,
    pub eviction_interval: Duration,
}

impl SyncEngineConfig {
    pub fn new() -> Self {
        Self {
            eviction_interval: Duration::from_secs(30),
            ..Default::default()
        }
    }
}

/// The assembled synchronization layer.
pub struct SyncEngine {
    cache: Arc<EntityCache>,
    subscriptions: SubscriptionManager,
    mutations: Arc<MutationCoordinator>,
    reconciler: Arc<EventReconciler>,
    prefetch: PrefetchScheduler,
    fetch: Arc<dyn FetchBackend>,
    refetch_rx: Mutex<Option<mpsc::UnboundedReceiver<QueryKey>>>,
    eviction_interval: Duration,
    shutdown: CancellationToken,
}

impl SyncEngine {
    /// Assemble the components. Returns the engine and the notification
    /// receiver the UI collaborator drains.
    pub fn new(
        fetch: Arc<dyn FetchBackend>,
        backend: Arc<dyn MutationBackend>,
        channel: Arc<dyn PushChannel>,
        config: SyncEngineConfig,
    ) -> (Self, mpsc::UnboundedReceiver<Notification>) {
        let eviction_interval = if config.eviction_interval.is_zero() {
            Duration::from_secs(30)
        } else {
            config.eviction_interval
        };
        let (cache, refetch_rx) = EntityCache::new(config.cache);
        let cache = Arc::new(cache);
        let subscriptions = SubscriptionManager::new(channel);
        let pending = Arc::new(PendingRegistry::new());
        let (mutations, notifications) = MutationCoordinator::new(
            cache.clone(),
            backend,
            fetch.clone(),
            pending.clone(),
            config.mutation,
        );
        let reconciler = Arc::new(EventReconciler::new(
            cache.clone(),
            subscriptions.clone(),
            pending,
        ));
        let prefetch = PrefetchScheduler::new(cache.clone(), fetch.clone(), config.prefetch);
        (
            Self {
                cache,
                subscriptions,
                mutations: Arc::new(mutations),
                reconciler,
                prefetch,
                fetch,
                refetch_rx: Mutex::new(Some(refetch_rx)),
                eviction_interval,
                shutdown: CancellationToken::new(),
            },
            notifications,
        )
    }

    /// Start the background loops over the transport's message stream.
    pub fn spawn(&self, mut messages: mpsc::UnboundedReceiver<ChannelMessage>) {
        let reconciler = self.reconciler.clone();
        let subscriptions = self.subscriptions.clone();
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    message = messages.recv() => match message {
                        Some(ChannelMessage::Connected) => {
                            info!("push channel connected");
                            subscriptions.resubscribe_all();
                        }
                        Some(ChannelMessage::Disconnected { reason }) => {
                            warn!(reason = %reason, "push channel disconnected");
                        }
                        Some(ChannelMessage::Event(event)) => reconciler.apply(&event),
                        None => break,
                    },
                }
            }
        });

        let mut refetch_rx = self
            .refetch_rx
            .lock()
            .unwrap()
            .take()
            .expect("engine spawned twice");
        let cache = self.cache.clone();
        let subscriptions = self.subscriptions.clone();
        let fetch = self.fetch.clone();
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            loop {
                let key = tokio::select! {
                    _ = shutdown.cancelled() => break,
                    key = refetch_rx.recv() => match key {
                        Some(key) => key,
                        None => break,
                    },
                };
                // Refetch only while someone still observes this key; a
                // topicless key (cart, order lists) is always of local
                // interest.
                let interested = key
                    .topic()
                    .map(|topic| subscriptions.is_active(&topic))
                    .unwrap_or(true);
                if !interested {
                    debug!(family = key.family(), "skipping refetch, no subscribers");
                    continue;
                }
                if !cache.mark_invalidating(&key) {
                    continue;
                }
                let cache = cache.clone();
                let fetch = fetch.clone();
                let cancel = shutdown.child_token();
                tokio::spawn(async move {
                    match fetch.fetch(&key, cancel).await {
                        Ok(value) => {
                            let version = cache.version_of(&key) + 1;
                            cache.write(key, value, version);
                        }
                        Err(error) => {
                            debug!(family = key.family(), error = %error, "refetch failed");
                            cache.refetch_failed(&key);
                        }
                    }
                });
            }
        });

        let cache = self.cache.clone();
        let subscriptions = self.subscriptions.clone();
        let shutdown = self.shutdown.clone();
        let sweep = self.eviction_interval;
        tokio::spawn(async move {
            let mut ticker = interval(sweep);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        cache.evict_idle(Utc::now(), |key| {
                            key.topic()
                                .map(|topic| subscriptions.is_active(&topic))
                                .unwrap_or(false)
                        });
                    }
                }
            }
        });
    }

    /// Stop the background loops and cancel outstanding speculative work.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
        self.prefetch.shutdown();
    }

    pub fn cache(&self) -> &Arc<EntityCache> {
        &self.cache
    }

    pub fn subscriptions(&self) -> &SubscriptionManager {
        &self.subscriptions
    }

    pub fn mutations(&self) -> &Arc<MutationCoordinator> {
        &self.mutations
    }

    pub fn prefetch(&self) -> &PrefetchScheduler {
        &self.prefetch
    }
}
