//! Shared test doubles for the sync test suites.
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use vitrine_core::{
    CacheValue, CartLine, CartLineId, CartStatus, MutationId, MutationIntent, ProductId, QueryKey,
    SyncError, SyncResult,
};
use vitrine_sync::{FetchBackend, MutationAck, MutationBackend};

pub fn cart_key() -> QueryKey {
    QueryKey::Cart {
        status: CartStatus::InCart,
    }
}

pub fn cart_line(quantity: u32, available_stock: u32) -> CartLine {
    CartLine {
        line_id: CartLineId::generate(),
        product_id: ProductId::generate(),
        name: "Stoneware Bowl".to_string(),
        unit_price_cents: 2400,
        quantity,
        available_stock,
        added_at: Utc::now(),
    }
}

/// Mutation backend driven by a script of responses. When the script runs
/// dry it echoes the intent's optimistic application, which is what a
/// well-behaved server does for in-range inputs. An optional gate holds
/// every call until notified, for interleaving tests.
pub struct TestMutationBackend {
    script: Mutex<VecDeque<SyncResult<CacheValue>>>,
    gate: Option<Arc<Notify>>,
    calls: AtomicU32,
}

impl TestMutationBackend {
    pub fn scripted(script: Vec<SyncResult<CacheValue>>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            gate: None,
            calls: AtomicU32::new(0),
        })
    }

    pub fn echoing() -> Arc<Self> {
        Self::scripted(Vec::new())
    }

    pub fn gated(gate: Arc<Notify>) -> Arc<Self> {
        Self::gated_scripted(gate, Vec::new())
    }

    pub fn gated_scripted(gate: Arc<Notify>, script: Vec<SyncResult<CacheValue>>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            gate: Some(gate),
            calls: AtomicU32::new(0),
        })
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MutationBackend for TestMutationBackend {
    async fn execute(
        &self,
        intent: &MutationIntent,
        mutation_id: MutationId,
        _cancel: CancellationToken,
    ) -> SyncResult<MutationAck> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(Ok(value)) => Ok(MutationAck { mutation_id, value }),
            Some(Err(error)) => Err(error),
            None => Ok(MutationAck {
                mutation_id,
                value: intent
                    .apply(None)
                    .unwrap_or(CacheValue::CartLines(Vec::new())),
            }),
        }
    }
}

/// Fetch backend serving a fixed table of responses.
pub struct TestFetchBackend {
    responses: Mutex<HashMap<QueryKey, CacheValue>>,
}

impl TestFetchBackend {
    pub fn empty() -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(HashMap::new()),
        })
    }

    pub fn with(responses: Vec<(QueryKey, CacheValue)>) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses.into_iter().collect()),
        })
    }

    pub fn set(&self, key: QueryKey, value: CacheValue) {
        self.responses.lock().unwrap().insert(key, value);
    }
}

#[async_trait]
impl FetchBackend for TestFetchBackend {
    async fn fetch(&self, key: &QueryKey, _cancel: CancellationToken) -> SyncResult<CacheValue> {
        self.responses
            .lock()
            .unwrap()
            .get(key)
            .cloned()
            .ok_or_else(|| SyncError::transient("no fixture response"))
    }
}
