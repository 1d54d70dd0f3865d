//! Speculative cache warming.
//!
//! Consumers signal interest in a key (hover, pagination lookahead,
//! viewport visibility) with a strategy; the scheduler owns the debounce
//! timers and cancellation explicitly, so losing interest deterministically
//! cancels the timer and any in-flight speculative fetch instead of leaking
//! them across component remounts. Prefetch failures never surface.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use vitrine_core::QueryKey;

use crate::backend::FetchBackend;
use crate::cache::EntityCache;

/// When a prefetch fires relative to the interest signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrefetchStrategy {
    /// Fire on the first signal.
    Immediate,
    /// Wait out the debounce; cancelled if interest is lost first.
    Delayed { debounce: Duration },
    /// Fire after repeated or rapid re-signals, or at once when the key is
    /// already cached (a cheap refresh).
    IntentDetection { threshold: u32, window: Duration },
}

/// Configuration for the prefetch scheduler.
#[derive(Debug, Clone)]
pub struct PrefetchConfig {
    /// Concurrent speculative fetches; excess requests wait for the next
    /// batch window.
    pub max_in_flight: usize,
}

impl Default for PrefetchConfig {
    fn default() -> Self {
        Self { max_in_flight: 3 }
    }
}

impl PrefetchConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_in_flight(mut self, max: usize) -> Self {
        self.max_in_flight = max;
        self
    }
}

struct PendingPrefetch {
    cancel: CancellationToken,
    generation: u64,
    signals: u32,
    last_signal: Instant,
}

struct Inner {
    cache: Arc<EntityCache>,
    fetch: Arc<dyn FetchBackend>,
    limiter: Arc<Semaphore>,
    pending: Mutex<HashMap<QueryKey, PendingPrefetch>>,
    generation: AtomicU64,
}

impl Inner {
    /// Remove the pending entry if it still belongs to this generation.
    /// A newer signal may have replaced it; that one owns the slot.
    fn clear(&self, key: &QueryKey, generation: u64) {
        let mut pending = self.pending.lock().unwrap();
        if pending
            .get(key)
            .map(|p| p.generation == generation)
            .unwrap_or(false)
        {
            pending.remove(key);
        }
    }
}

/// Opportunistically warms the cache ahead of anticipated navigation.
#[derive(Clone)]
pub struct PrefetchScheduler {
    inner: Arc<Inner>,
}

impl PrefetchScheduler {
    pub fn new(
        cache: Arc<EntityCache>,
        fetch: Arc<dyn FetchBackend>,
        config: PrefetchConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                cache,
                fetch,
                limiter: Arc::new(Semaphore::new(config.max_in_flight)),
                pending: Mutex::new(HashMap::new()),
                generation: AtomicU64::new(0),
            }),
        }
    }

    /// Signal interest in a key. Idempotent while a prefetch for the key
    /// is already scheduled or in flight.
    pub fn signal(&self, key: QueryKey, strategy: PrefetchStrategy) {
        let inner = &self.inner;
        if inner
            .cache
            .peek(&key)
            .map(|entry| entry.is_fresh(Utc::now()))
            .unwrap_or(false)
        {
            return;
        }

        let now = Instant::now();
        // Decide under the lock, spawn after releasing it.
        let task = {
            let mut pending = inner.pending.lock().unwrap();
            match strategy {
                PrefetchStrategy::Immediate => {
                    if pending.contains_key(&key) {
                        None
                    } else {
                        let (generation, cancel) = self.schedule(&mut pending, key.clone(), now);
                        Some((generation, cancel, None))
                    }
                }
                PrefetchStrategy::Delayed { debounce } => {
                    if pending.contains_key(&key) {
                        None
                    } else {
                        let (generation, cancel) = self.schedule(&mut pending, key.clone(), now);
                        Some((generation, cancel, Some(debounce)))
                    }
                }
                PrefetchStrategy::IntentDetection { threshold, window } => {
                    if inner.cache.peek(&key).is_some() {
                        // Already cached (stale): intent is confirmed
                        // enough for a cheap refresh.
                        if pending.contains_key(&key) {
                            None
                        } else {
                            let (generation, cancel) =
                                self.schedule(&mut pending, key.clone(), now);
                            Some((generation, cancel, None))
                        }
                    } else {
                        match pending.get_mut(&key) {
                            Some(existing) => {
                                if now.duration_since(existing.last_signal) > window {
                                    existing.signals = 0;
                                }
                                existing.signals += 1;
                                existing.last_signal = now;
                                if existing.signals >= threshold {
                                    Some((existing.generation, existing.cancel.clone(), None))
                                } else {
                                    None
                                }
                            }
                            None => {
                                // First signal only counts; no task yet.
                                self.schedule(&mut pending, key.clone(), now);
                                None
                            }
                        }
                    }
                }
            }
        };

        if let Some((generation, cancel, debounce)) = task {
            let inner = self.inner.clone();
            tokio::spawn(async move {
                run_prefetch(inner, key, cancel, generation, debounce).await;
            });
        }
    }

    /// Interest lost (mouse left, component unmounted). Cancels the
    /// debounce timer and any in-flight speculative fetch for the key.
    pub fn interest_lost(&self, key: &QueryKey) {
        if let Some(pending) = self.inner.pending.lock().unwrap().remove(key) {
            pending.cancel.cancel();
            debug!(family = key.family(), "prefetch cancelled on interest loss");
        }
    }

    /// Cancel every scheduled and in-flight prefetch.
    pub fn shutdown(&self) {
        let mut pending = self.inner.pending.lock().unwrap();
        for (_, entry) in pending.drain() {
            entry.cancel.cancel();
        }
    }

    fn schedule(
        &self,
        pending: &mut HashMap<QueryKey, PendingPrefetch>,
        key: QueryKey,
        now: Instant,
    ) -> (u64, CancellationToken) {
        let generation = self.inner.generation.fetch_add(1, Ordering::Relaxed) + 1;
        let cancel = CancellationToken::new();
        pending.insert(
            key,
            PendingPrefetch {
                cancel: cancel.clone(),
                generation,
                signals: 1,
                last_signal: now,
            },
        );
        (generation, cancel)
    }
}

async fn run_prefetch(
    inner: Arc<Inner>,
    key: QueryKey,
    cancel: CancellationToken,
    generation: u64,
    debounce: Option<Duration>,
) {
    if let Some(delay) = debounce {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(delay) => {}
        }
    }

    let permit = tokio::select! {
        _ = cancel.cancelled() => {
            inner.clear(&key, generation);
            return;
        }
        permit = inner.limiter.clone().acquire_owned() => permit,
    };
    let Ok(_permit) = permit else {
        return;
    };

    // A demand fetch may have landed while this request sat in the queue.
    if inner
        .cache
        .peek(&key)
        .map(|entry| entry.is_fresh(Utc::now()))
        .unwrap_or(false)
    {
        inner.clear(&key, generation);
        return;
    }

    match inner.fetch.fetch(&key, cancel.clone()).await {
        Ok(value) => {
            if !cancel.is_cancelled() {
                let version = inner.cache.version_of(&key) + 1;
                inner.cache.write_prefetched(key.clone(), value, version);
            }
        }
        Err(error) => {
            // Speculative work: suppressed entirely.
            debug!(family = key.family(), error = %error, "prefetch failed");
        }
    }
    inner.clear(&key, generation);
}
