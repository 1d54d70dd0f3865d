//! Collaborator contracts for fetches and mutations.
//!
//! Both contracts take a cancellation token and must honor it: a
//! superseded request's result is discarded by the caller, so finishing
//! the work after cancellation only wastes effort. Timeouts are a property
//! of the implementations, not of the sync layer.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use vitrine_core::{CacheValue, MutationId, MutationIntent, QueryKey, SyncResult};

/// Fetches the authoritative value for a cache key.
#[async_trait]
pub trait FetchBackend: Send + Sync {
    async fn fetch(&self, key: &QueryKey, cancel: CancellationToken) -> SyncResult<CacheValue>;
}

/// Authoritative response to a mutation.
///
/// The server echoes the client-generated `mutation_id`; the coordinator
/// discards acks whose id does not match the saga that is waiting, which
/// is what keeps a superseded request from clobbering fresher state.
#[derive(Debug, Clone, PartialEq)]
pub struct MutationAck {
    pub mutation_id: MutationId,
    pub value: CacheValue,
}

/// Executes a mutation against the server.
#[async_trait]
pub trait MutationBackend: Send + Sync {
    async fn execute(
        &self,
        intent: &MutationIntent,
        mutation_id: MutationId,
        cancel: CancellationToken,
    ) -> SyncResult<MutationAck>;
}
