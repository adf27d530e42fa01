//! Shared helpers for unit tests

use crate::address::Address;
use crate::chain::{BlockTag, ChainClient, ChainError, ChainResult};
use crate::error::{FaucetError, FaucetResult};
use crate::store::{CooldownKey, CooldownStore, SledCooldownStore};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

pub const TEST_PRIVATE_KEY: &str =
    "0x4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318";

/// In-process chain node that accepts every transaction unless told otherwise
pub struct MockChainClient {
    pub chain_id: u64,
    pub balance: Mutex<u128>,
    /// what the node reports as the pending tx count
    pub pending_nonce: Mutex<u64>,
    /// nonces of accepted transactions, in arrival order
    pub accepted: Mutex<Vec<u64>>,
    /// errors returned by the next sends, front first
    pub send_failures: Mutex<VecDeque<ChainError>>,
    pub send_delay: Duration,
    pub nonce_queries: Mutex<usize>,
}

impl MockChainClient {
    pub fn new() -> Self {
        Self {
            chain_id: 31337,
            balance: Mutex::new(1_000_000_000_000_000_000_000),
            pending_nonce: Mutex::new(0),
            accepted: Mutex::new(Vec::new()),
            send_failures: Mutex::new(VecDeque::new()),
            send_delay: Duration::ZERO,
            nonce_queries: Mutex::new(0),
        }
    }

    pub fn with_send_delay(mut self, delay: Duration) -> Self {
        self.send_delay = delay;
        self
    }

    pub fn fail_next_send(&self, error: ChainError) {
        self.send_failures.lock().unwrap().push_back(error);
    }

    pub fn accepted_nonces(&self) -> Vec<u64> {
        self.accepted.lock().unwrap().clone()
    }
}

fn decode_nonce(raw: &[u8]) -> u64 {
    rlp::Rlp::new(raw).val_at(0).unwrap()
}

#[async_trait]
impl ChainClient for MockChainClient {
    async fn chain_id(&self) -> ChainResult<u64> {
        Ok(self.chain_id)
    }

    async fn balance(&self, _address: &Address) -> ChainResult<u128> {
        Ok(*self.balance.lock().unwrap())
    }

    async fn transaction_count(&self, _address: &Address, _tag: BlockTag) -> ChainResult<u64> {
        *self.nonce_queries.lock().unwrap() += 1;
        Ok(*self.pending_nonce.lock().unwrap())
    }

    async fn send_raw_transaction(&self, raw: &[u8]) -> ChainResult<String> {
        if !self.send_delay.is_zero() {
            tokio::time::sleep(self.send_delay).await;
        }

        if let Some(error) = self.send_failures.lock().unwrap().pop_front() {
            return Err(error);
        }

        let nonce = decode_nonce(raw);
        let mut pending = self.pending_nonce.lock().unwrap();
        if nonce != *pending {
            return Err(ChainError::Rejected(format!(
                "nonce mismatch: expected {}, got {}",
                *pending, nonce
            )));
        }
        *pending += 1;
        self.accepted.lock().unwrap().push(nonce);

        Ok(format!("0x{}", hex::encode(keccak_hash::keccak(raw).0)))
    }
}

/// Cooldown store whose origin writes always fail
pub struct FailingOriginStore {
    inner: SledCooldownStore,
}

impl FailingOriginStore {
    pub fn new() -> Self {
        Self {
            inner: SledCooldownStore::temporary().unwrap(),
        }
    }
}

#[async_trait]
impl CooldownStore for FailingOriginStore {
    async fn set_if_absent(&self, key: &CooldownKey, ttl: Duration) -> FaucetResult<bool> {
        match key {
            CooldownKey::Origin(_) => Err(FaucetError::InternalError("store down".into())),
            CooldownKey::Address(_) => self.inner.set_if_absent(key, ttl).await,
        }
    }

    async fn remove(&self, key: &CooldownKey) -> FaucetResult<()> {
        self.inner.remove(key).await
    }

    async fn time_remaining(&self, key: &CooldownKey) -> FaucetResult<Option<Duration>> {
        self.inner.time_remaining(key).await
    }

    async fn purge_expired(&self) -> FaucetResult<usize> {
        self.inner.purge_expired().await
    }
}
