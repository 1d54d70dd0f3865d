//! Optimistic mutation sagas.
//!
//! Every mutation runs the four-phase protocol: snapshot the cached value,
//! apply the optimistic result synchronously, resolve against the server
//! (with retries for transient failures), and settle by marking the key
//! stale so a background refetch reconciles any drift the mutation
//! response did not carry.
//!
//! Mutations on the same logical entity are serialized FIFO: a second
//! mutation queues behind the pending one rather than racing it. Mutations
//! on different entities interleave freely.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;
use vitrine_core::{MutationId, MutationIntent, QueryKey, SyncError, SyncResult};

use crate::backend::{FetchBackend, MutationAck, MutationBackend};
use crate::cache::{CacheEntry, EntityCache};
use crate::notify::{Notification, NotificationAction, NotificationLevel};

/// Retry policy for transient mutation failures.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub multiplier: f64,
    /// Upper bound on the random delay added to each backoff so
    /// simultaneous failures do not retry in lockstep.
    pub jitter_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(200),
            multiplier: 2.0,
            jitter_ms: 50,
        }
    }
}

fn jittered(base: Duration, jitter_ms: u64) -> Duration {
    if jitter_ms == 0 {
        return base;
    }
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_else(|_| Duration::from_nanos(0))
        .subsec_nanos() as u64;
    base + Duration::from_millis(nanos % jitter_ms)
}

/// Configuration for the mutation coordinator.
#[derive(Debug, Clone)]
pub struct MutationConfig {
    pub retry: RetryConfig,
    /// How long an undo handle stays valid after its saga settles.
    pub undo_window: Duration,
}

impl Default for MutationConfig {
    fn default() -> Self {
        Self {
            retry: RetryConfig::default(),
            undo_window: Duration::from_secs(10),
        }
    }
}

/// Lifecycle of one optimistic record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationStatus {
    Pending,
    Confirmed,
    RolledBack,
}

/// Final result of one mutation saga.
#[derive(Debug)]
pub enum MutationOutcome {
    /// The server confirmed; the cache holds the authoritative value.
    /// `undo`, when present, issues the reverse mutation inside its
    /// window.
    Confirmed {
        version: u64,
        undo: Option<UndoHandle>,
    },
    /// The mutation failed; the cache was restored (or refetched, for
    /// conflicts). `undo`, when present, re-issues the original intent
    /// inside its window.
    RolledBack {
        error: SyncError,
        undo: Option<UndoHandle>,
    },
    /// The saga was superseded; the snapshot was restored silently.
    Cancelled,
}

/// A bounded-time offer to compensate a settled mutation with a real
/// server mutation rather than a local-only revert.
#[derive(Debug)]
pub struct UndoHandle {
    pub intent: MutationIntent,
    pub deadline: Instant,
}

impl UndoHandle {
    /// Time left in the undo window.
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }
}

/// One in-flight optimistic record. At most one exists per
/// (key, logical entity) pair; it is destroyed when its saga settles.
#[derive(Debug, Clone)]
pub struct OptimisticRecord {
    pub mutation_id: MutationId,
    pub status: MutationStatus,
    superseded: bool,
}

/// Registry of in-flight optimistic records, shared with the event
/// reconciler so an authoritative push can supersede a pending saga on the
/// same key.
#[derive(Default)]
pub struct PendingRegistry {
    inner: Mutex<HashMap<(QueryKey, Uuid), OptimisticRecord>>,
}

impl PendingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn register(&self, key: &QueryKey, entity_id: Uuid, mutation_id: MutationId) {
        self.inner.lock().unwrap().insert(
            (key.clone(), entity_id),
            OptimisticRecord {
                mutation_id,
                status: MutationStatus::Pending,
                superseded: false,
            },
        );
    }

    fn settle(
        &self,
        key: &QueryKey,
        entity_id: Uuid,
        mutation_id: MutationId,
        status: MutationStatus,
    ) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(record) = inner.get(&(key.clone(), entity_id)) {
            if record.mutation_id == mutation_id {
                inner.remove(&(key.clone(), entity_id));
                debug!(family = key.family(), status = ?status, "optimistic record settled");
            }
        }
    }

    /// The in-flight record for a (key, entity) pair, if any.
    pub fn record(&self, key: &QueryKey, entity_id: Uuid) -> Option<OptimisticRecord> {
        self.inner
            .lock()
            .unwrap()
            .get(&(key.clone(), entity_id))
            .cloned()
    }

    /// Whether any mutation is pending on the key.
    pub fn is_pending(&self, key: &QueryKey) -> bool {
        self.inner.lock().unwrap().keys().any(|(k, _)| k == key)
    }

    /// Mark every pending record on the key as superseded by an
    /// authoritative event. The owning sagas skip their confirm write and
    /// let the settle-phase refetch reconcile. Returns the count marked.
    pub fn supersede_key(&self, key: &QueryKey) -> usize {
        let mut count = 0;
        for ((k, _), record) in self.inner.lock().unwrap().iter_mut() {
            if k == key && !record.superseded {
                record.superseded = true;
                count += 1;
            }
        }
        count
    }

    fn is_superseded(&self, key: &QueryKey, entity_id: Uuid, mutation_id: MutationId) -> bool {
        self.inner
            .lock()
            .unwrap()
            .get(&(key.clone(), entity_id))
            .map(|record| record.mutation_id == mutation_id && record.superseded)
            .unwrap_or(false)
    }
}

/// Executes optimistic mutations as four-phase sagas.
pub struct MutationCoordinator {
    cache: Arc<EntityCache>,
    backend: Arc<dyn MutationBackend>,
    fetch: Arc<dyn FetchBackend>,
    pending: Arc<PendingRegistry>,
    notifications: mpsc::UnboundedSender<Notification>,
    entity_locks: Mutex<HashMap<(QueryKey, Uuid), Arc<tokio::sync::Mutex<()>>>>,
    config: MutationConfig,
}

impl MutationCoordinator {
    /// Create a coordinator and the notification receiver the UI drains.
    pub fn new(
        cache: Arc<EntityCache>,
        backend: Arc<dyn MutationBackend>,
        fetch: Arc<dyn FetchBackend>,
        pending: Arc<PendingRegistry>,
        config: MutationConfig,
    ) -> (Self, mpsc::UnboundedReceiver<Notification>) {
        let (notifications, rx) = mpsc::unbounded_channel();
        (
            Self {
                cache,
                backend,
                fetch,
                pending,
                notifications,
                entity_locks: Mutex::new(HashMap::new()),
                config,
            },
            rx,
        )
    }

    /// Run a mutation saga to completion.
    pub async fn mutate(&self, intent: MutationIntent) -> MutationOutcome {
        self.mutate_with_cancel(intent, CancellationToken::new())
            .await
    }

    /// Run a mutation saga with a supersede signal. A cancelled saga
    /// restores its snapshot silently and reports `Cancelled`; nothing is
    /// surfaced to the user.
    pub async fn mutate_with_cancel(
        &self,
        intent: MutationIntent,
        cancel: CancellationToken,
    ) -> MutationOutcome {
        let key = intent.key();
        let entity_id = intent.entity_id();
        let mutation_id = MutationId::generate();

        // Phase 1: snapshot. The per-entity lock is FIFO, so a mutation
        // issued while another is pending on the same entity queues here
        // rather than racing it.
        let lock = self.entity_lock(&key, entity_id);
        let guard = lock.lock_owned().await;
        if cancel.is_cancelled() {
            return MutationOutcome::Cancelled;
        }
        let snapshot = self.cache.peek(&key);

        // Phase 2: apply. Synchronous; nothing can interleave between the
        // snapshot read and this write. An intent whose target is not
        // cached has no optimistic preview; the server call still runs.
        let applied = match intent.apply(snapshot.as_ref().map(|entry| &entry.value)) {
            Some(optimistic) => {
                let version = self.cache.version_of(&key) + 1;
                self.cache.write(key.clone(), optimistic, version);
                true
            }
            None => false,
        };
        self.pending.register(&key, entity_id, mutation_id);
        self.notify(Notification::new(NotificationLevel::Info, intent.describe()));

        // Phase 3: resolve.
        let resolved = self.resolve(&intent, mutation_id, &cancel).await;
        let outcome = match resolved {
            Ok(ack) => self.confirm(&intent, &key, entity_id, mutation_id, snapshot.as_ref(), ack),
            Err(SyncError::Cancelled) => {
                debug!(family = key.family(), "mutation superseded, restoring snapshot");
                if applied {
                    self.restore(&key, snapshot.as_ref());
                }
                MutationOutcome::Cancelled
            }
            Err(error @ SyncError::Conflict { .. }) => {
                self.refetch_on_conflict(&key, snapshot.as_ref(), &cancel)
                    .await;
                self.notify(Notification::new(
                    NotificationLevel::Warning,
                    "Your view was out of date and has been refreshed",
                ));
                MutationOutcome::RolledBack { error, undo: None }
            }
            Err(error) => {
                warn!(family = key.family(), error = %error, "mutation failed, rolling back");
                if applied {
                    self.restore(&key, snapshot.as_ref());
                }
                self.notify(
                    Notification::new(
                        NotificationLevel::Error,
                        format!("{} failed: {}", intent.describe(), error),
                    )
                    .with_action(NotificationAction::Retry),
                );
                MutationOutcome::RolledBack {
                    error,
                    undo: Some(self.undo_handle(intent.clone())),
                }
            }
        };

        // Phase 4: settle. Unconditional: even a confirmed mutation may
        // have server-side effects (recomputed totals, promotions) that
        // its own response does not carry.
        let status = match &outcome {
            MutationOutcome::Confirmed { .. } => MutationStatus::Confirmed,
            _ => MutationStatus::RolledBack,
        };
        self.pending.settle(&key, entity_id, mutation_id, status);
        self.cache.invalidate(&key);
        drop(guard);
        self.release_entity_lock(&key, entity_id);
        outcome
    }

    /// Issue the compensating mutation held by an undo handle, if its
    /// window has not expired.
    pub async fn undo(&self, handle: UndoHandle) -> SyncResult<MutationOutcome> {
        if Instant::now() > handle.deadline {
            return Err(SyncError::validation("undo window expired"));
        }
        Ok(self.mutate(handle.intent).await)
    }

    fn confirm(
        &self,
        intent: &MutationIntent,
        key: &QueryKey,
        entity_id: Uuid,
        mutation_id: MutationId,
        snapshot: Option<&CacheEntry>,
        ack: MutationAck,
    ) -> MutationOutcome {
        if ack.mutation_id != mutation_id {
            // An ack for a different saga on this entity; treat as noise.
            debug!(
                family = key.family(),
                "discarding ack for mismatched mutation id"
            );
            self.restore(key, snapshot);
            return MutationOutcome::Cancelled;
        }

        let version = if self.pending.is_superseded(key, entity_id, mutation_id) {
            // An authoritative push already overwrote this key; the
            // settle-phase refetch reconciles the rest.
            debug!(
                family = key.family(),
                "skipping confirm write, key superseded by push event"
            );
            self.cache.version_of(key)
        } else {
            let version = self.cache.version_of(key) + 1;
            self.cache.write(key.clone(), ack.value, version);
            version
        };

        let undo = intent
            .compensating(snapshot.map(|entry| &entry.value))
            .map(|reverse| self.undo_handle(reverse));
        if undo.is_some() {
            self.notify(
                Notification::new(NotificationLevel::Success, intent.describe())
                    .with_action(NotificationAction::Undo),
            );
        }
        MutationOutcome::Confirmed { version, undo }
    }

    async fn resolve(
        &self,
        intent: &MutationIntent,
        mutation_id: MutationId,
        cancel: &CancellationToken,
    ) -> SyncResult<MutationAck> {
        let retry = &self.config.retry;
        let mut backoff = retry.initial_backoff;
        let mut attempt = 1u32;
        loop {
            if cancel.is_cancelled() {
                return Err(SyncError::Cancelled);
            }
            let result = tokio::select! {
                _ = cancel.cancelled() => Err(SyncError::Cancelled),
                result = self.backend.execute(intent, mutation_id, cancel.clone()) => result,
            };
            match result {
                Err(error) if error.is_transient() && attempt < retry.max_attempts => {
                    debug!(
                        attempt,
                        max_attempts = retry.max_attempts,
                        error = %error,
                        "transient mutation failure, retrying"
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(SyncError::Cancelled),
                        _ = tokio::time::sleep(jittered(backoff, retry.jitter_ms)) => {}
                    }
                    backoff = backoff.mul_f64(retry.multiplier);
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    /// Restore the pre-mutation snapshot verbatim. A missing snapshot
    /// means the key did not exist before the mutation created it.
    fn restore(&self, key: &QueryKey, snapshot: Option<&CacheEntry>) {
        match snapshot {
            Some(entry) => {
                let version = self.cache.version_of(key) + 1;
                self.cache.write(key.clone(), entry.value.clone(), version);
            }
            None => self.cache.remove(key),
        }
    }

    async fn refetch_on_conflict(
        &self,
        key: &QueryKey,
        snapshot: Option<&CacheEntry>,
        cancel: &CancellationToken,
    ) {
        // The cached snapshot itself may be stale, so prefer server truth
        // over a blind rollback; fall back to the snapshot if the refetch
        // also fails.
        match self.fetch.fetch(key, cancel.clone()).await {
            Ok(value) => {
                let version = self.cache.version_of(key) + 1;
                self.cache.write(key.clone(), value, version);
            }
            Err(error) => {
                debug!(family = key.family(), error = %error, "conflict refetch failed");
                self.restore(key, snapshot);
            }
        }
    }

    fn undo_handle(&self, intent: MutationIntent) -> UndoHandle {
        UndoHandle {
            intent,
            deadline: Instant::now() + self.config.undo_window,
        }
    }

    fn entity_lock(&self, key: &QueryKey, entity_id: Uuid) -> Arc<tokio::sync::Mutex<()>> {
        self.entity_locks
            .lock()
            .unwrap()
            .entry((key.clone(), entity_id))
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    fn release_entity_lock(&self, key: &QueryKey, entity_id: Uuid) {
        let mut locks = self.entity_locks.lock().unwrap();
        if let Some(lock) = locks.get(&(key.clone(), entity_id)) {
            // Drop the map entry once no saga holds or waits on it.
            if Arc::strong_count(lock) == 1 {
                locks.remove(&(key.clone(), entity_id));
            }
        }
    }

    fn notify(&self, notification: Notification) {
        let _ = self.notifications.send(notification);
    }
}
