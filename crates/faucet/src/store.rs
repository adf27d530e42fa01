//! Cooldown store: keys with a time-to-live
//!
//! A record's presence means "this key received funds recently". Records are
//! written only through [`CooldownStore::set_if_absent`], which is atomic at
//! the store level so concurrent request paths (or several processes sharing
//! the store) cannot both claim the same key.

use crate::address::Address;
use crate::error::{FaucetError, FaucetResult};
use async_trait::async_trait;
use chrono::Utc;
use sled::Tree;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Identity that a cooldown applies to
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CooldownKey {
    Address(String),
    Origin(String),
}

impl CooldownKey {
    pub fn address(address: &Address) -> Self {
        CooldownKey::Address(address.to_hex())
    }

    pub fn origin(origin: impl Into<String>) -> Self {
        CooldownKey::Origin(origin.into())
    }

    /// Persisted key: `address:<addr>` or `ip:<origin>`
    pub fn storage_key(&self) -> String {
        match self {
            CooldownKey::Address(addr) => format!("address:{}", addr),
            CooldownKey::Origin(origin) => format!("ip:{}", origin),
        }
    }
}

impl fmt::Display for CooldownKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.storage_key())
    }
}

#[async_trait]
pub trait CooldownStore: Send + Sync {
    /// Create a record for `key` expiring after `ttl`, unless a live one
    /// exists. Returns whether the record was created.
    async fn set_if_absent(&self, key: &CooldownKey, ttl: Duration) -> FaucetResult<bool>;

    /// Delete the record for `key`. Missing keys are not an error.
    async fn remove(&self, key: &CooldownKey) -> FaucetResult<()>;

    /// Remaining lifetime of a live record, `None` if there is none.
    async fn time_remaining(&self, key: &CooldownKey) -> FaucetResult<Option<Duration>>;

    /// Drop expired records. Returns how many were removed.
    async fn purge_expired(&self) -> FaucetResult<usize>;
}

/// Sled-backed cooldown store.
///
/// Values are the record's expiry as big-endian unix milliseconds. Expired
/// values read as absent, so expiry does not depend on the sweeper running.
pub struct SledCooldownStore {
    tree: Arc<Tree>,
}

impl SledCooldownStore {
    pub fn open<P: AsRef<Path>>(path: P) -> FaucetResult<Self> {
        info!("Opening cooldown store at: {}", path.as_ref().display());
        let db = sled::open(path)?;
        Self::from_db(db)
    }

    /// In-memory store that is discarded on drop
    pub fn temporary() -> FaucetResult<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(db)
    }

    pub fn from_db(db: sled::Db) -> FaucetResult<Self> {
        let tree = db.open_tree("cooldowns")?;
        Ok(Self {
            tree: Arc::new(tree),
        })
    }

    async fn blocking<F, T>(&self, f: F) -> FaucetResult<T>
    where
        F: FnOnce(&Tree) -> FaucetResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let tree = self.tree.clone();
        tokio::task::spawn_blocking(move || f(&tree))
            .await
            .map_err(|e| FaucetError::InternalError(format!("store task failed: {}", e)))?
    }
}

fn now_millis() -> u64 {
    Utc::now().timestamp_millis().max(0) as u64
}

fn decode_expiry(value: &[u8]) -> FaucetResult<u64> {
    let bytes: [u8; 8] = value
        .try_into()
        .map_err(|_| FaucetError::InternalError("Invalid cooldown record".to_string()))?;
    Ok(u64::from_be_bytes(bytes))
}

#[async_trait]
impl CooldownStore for SledCooldownStore {
    async fn set_if_absent(&self, key: &CooldownKey, ttl: Duration) -> FaucetResult<bool> {
        let storage_key = key.storage_key();
        let ttl_ms = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX);

        self.blocking(move |tree| loop {
            let current = tree.get(storage_key.as_bytes())?;
            let now = now_millis();

            if let Some(value) = &current {
                if decode_expiry(value)? > now {
                    return Ok(false);
                }
            }

            let expires_at = now.saturating_add(ttl_ms).to_be_bytes();
            match tree.compare_and_swap(
                storage_key.as_bytes(),
                current,
                Some(expires_at.as_slice()),
            )? {
                Ok(()) => {
                    debug!("Reserved {} for {}ms", storage_key, ttl_ms);
                    return Ok(true);
                }
                // another writer got there first; re-read and decide again
                Err(_) => continue,
            }
        })
        .await
    }

    async fn remove(&self, key: &CooldownKey) -> FaucetResult<()> {
        let storage_key = key.storage_key();
        self.blocking(move |tree| {
            tree.remove(storage_key.as_bytes())?;
            debug!("Removed {}", storage_key);
            Ok(())
        })
        .await
    }

    async fn time_remaining(&self, key: &CooldownKey) -> FaucetResult<Option<Duration>> {
        let storage_key = key.storage_key();
        self.blocking(move |tree| {
            let Some(value) = tree.get(storage_key.as_bytes())? else {
                return Ok(None);
            };
            let expires_at = decode_expiry(&value)?;
            let now = now_millis();
            if expires_at > now {
                Ok(Some(Duration::from_millis(expires_at - now)))
            } else {
                Ok(None)
            }
        })
        .await
    }

    async fn purge_expired(&self) -> FaucetResult<usize> {
        self.blocking(|tree| {
            let now = now_millis();
            let mut removed = 0;

            for item in tree.iter() {
                let (key, value) = item?;
                if decode_expiry(&value).map(|exp| exp <= now).unwrap_or(true) {
                    // only delete if nobody re-reserved the key meanwhile
                    if tree
                        .compare_and_swap(&key, Some(value), None as Option<&[u8]>)?
                        .is_ok()
                    {
                        removed += 1;
                    }
                }
            }

            Ok(removed)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr_key(s: &str) -> CooldownKey {
        CooldownKey::Address(s.to_string())
    }

    #[test]
    fn test_storage_key_format() {
        let address = Address::parse("0xABCDEF0123456789ABCDEF0123456789ABCD1234").unwrap();
        assert_eq!(
            CooldownKey::address(&address).storage_key(),
            "address:0xabcdef0123456789abcdef0123456789abcd1234"
        );
        assert_eq!(CooldownKey::origin("203.0.113.5").storage_key(), "ip:203.0.113.5");
    }

    #[tokio::test]
    async fn test_set_if_absent_is_exclusive() {
        let store = SledCooldownStore::temporary().unwrap();
        let key = addr_key("0x01");
        let ttl = Duration::from_secs(60);

        assert!(store.set_if_absent(&key, ttl).await.unwrap());
        assert!(!store.set_if_absent(&key, ttl).await.unwrap());

        store.remove(&key).await.unwrap();
        assert!(store.set_if_absent(&key, ttl).await.unwrap());
    }

    #[tokio::test]
    async fn test_remove_missing_key_is_noop() {
        let store = SledCooldownStore::temporary().unwrap();
        store.remove(&addr_key("0xmissing")).await.unwrap();
    }

    #[tokio::test]
    async fn test_ttl_expiry() {
        let store = SledCooldownStore::temporary().unwrap();
        let key = CooldownKey::origin("198.51.100.7");
        let ttl = Duration::from_millis(400);

        assert!(store.set_if_absent(&key, ttl).await.unwrap());

        tokio::time::sleep(Duration::from_millis(150)).await;
        let remaining = store.time_remaining(&key).await.unwrap();
        assert!(remaining.is_some());
        assert!(remaining.unwrap() <= ttl);
        assert!(!store.set_if_absent(&key, ttl).await.unwrap());

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(store.time_remaining(&key).await.unwrap(), None);
        assert!(store.set_if_absent(&key, ttl).await.unwrap());
    }

    #[tokio::test]
    async fn test_concurrent_set_if_absent_single_winner() {
        let store = Arc::new(SledCooldownStore::temporary().unwrap());
        let key = addr_key("0xcontended");

        let mut handles = Vec::new();
        for _ in 0..32 {
            let store = store.clone();
            let key = key.clone();
            handles.push(tokio::spawn(async move {
                store.set_if_absent(&key, Duration::from_secs(60)).await.unwrap()
            }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn test_purge_expired() {
        let store = SledCooldownStore::temporary().unwrap();
        store
            .set_if_absent(&addr_key("0xshort"), Duration::from_millis(50))
            .await
            .unwrap();
        store
            .set_if_absent(&addr_key("0xlong"), Duration::from_secs(60))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(store.purge_expired().await.unwrap(), 1);
        assert!(store.time_remaining(&addr_key("0xlong")).await.unwrap().is_some());
    }
}
