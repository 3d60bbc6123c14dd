//! Durable session and redemption bookkeeping.
//!
//! Both stores run over the same two backends: an in-memory map for
//! tests and a sled tree for deployments. Records are serde-serialized;
//! both stores are caches of chain truth and always defer to it on
//! conflict, with one exception called out on
//! [`RedemptionStore::mark_consumed`].

use std::{
    collections::HashMap,
    fs,
    path::Path,
    sync::{Arc, RwLock},
};

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ProtocolError, Result};
use crate::session::SessionRecord;

#[derive(Clone)]
struct KvStore {
    backend: Arc<KvBackend>,
}

enum KvBackend {
    InMemory(RwLock<HashMap<Vec<u8>, Vec<u8>>>),
    Persistent(sled::Db),
}

impl KvStore {
    fn in_memory() -> Self {
        Self {
            backend: Arc::new(KvBackend::InMemory(RwLock::new(HashMap::new()))),
        }
    }

    fn persistent(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|err| {
                    ProtocolError::Store(format!(
                        "failed to create directory for store at {}: {err}",
                        path.display()
                    ))
                })?;
            }
        }
        let db = sled::open(path).map_err(|err| {
            ProtocolError::Store(format!("failed to open store at {}: {err}", path.display()))
        })?;
        Ok(Self {
            backend: Arc::new(KvBackend::Persistent(db)),
        })
    }

    fn get<T: DeserializeOwned>(&self, key: &[u8]) -> Result<Option<T>> {
        let bytes = match &*self.backend {
            KvBackend::InMemory(map) => map
                .read()
                .expect("store poisoned")
                .get(key)
                .cloned(),
            KvBackend::Persistent(db) => db
                .get(key)
                .map_err(|err| ProtocolError::Store(err.to_string()))?
                .map(|ivec| ivec.to_vec()),
        };
        match bytes {
            Some(raw) => serde_json::from_slice(&raw)
                .map(Some)
                .map_err(|err| ProtocolError::Store(format!("corrupt record: {err}"))),
            None => Ok(None),
        }
    }

    fn put<T: Serialize>(&self, key: &[u8], value: &T) -> Result<()> {
        let raw = serde_json::to_vec(value).map_err(|err| ProtocolError::Store(err.to_string()))?;
        match &*self.backend {
            KvBackend::InMemory(map) => {
                map.write().expect("store poisoned").insert(key.to_vec(), raw);
                Ok(())
            }
            KvBackend::Persistent(db) => {
                db.insert(key, raw)
                    .map_err(|err| ProtocolError::Store(err.to_string()))?;
                Ok(())
            }
        }
    }

    /// First writer wins: store `value` only if `key` is absent; returns
    /// whether this call inserted it.
    fn put_if_absent<T: Serialize>(&self, key: &[u8], value: &T) -> Result<bool> {
        let raw = serde_json::to_vec(value).map_err(|err| ProtocolError::Store(err.to_string()))?;
        match &*self.backend {
            KvBackend::InMemory(map) => {
                let mut guard = map.write().expect("store poisoned");
                if guard.contains_key(key) {
                    return Ok(false);
                }
                guard.insert(key.to_vec(), raw);
                Ok(true)
            }
            KvBackend::Persistent(db) => {
                let swap = db
                    .compare_and_swap(key, None as Option<&[u8]>, Some(raw))
                    .map_err(|err| ProtocolError::Store(err.to_string()))?;
                Ok(swap.is_ok())
            }
        }
    }

    fn scan<T: DeserializeOwned>(&self) -> Result<Vec<T>> {
        match &*self.backend {
            KvBackend::InMemory(map) => map
                .read()
                .expect("store poisoned")
                .values()
                .map(|raw| {
                    serde_json::from_slice(raw)
                        .map_err(|err| ProtocolError::Store(format!("corrupt record: {err}")))
                })
                .collect(),
            KvBackend::Persistent(db) => {
                let mut records = Vec::new();
                for entry in db.iter() {
                    let (_, raw) = entry.map_err(|err| ProtocolError::Store(err.to_string()))?;
                    records.push(
                        serde_json::from_slice(&raw)
                            .map_err(|err| ProtocolError::Store(format!("corrupt record: {err}")))?,
                    );
                }
                Ok(records)
            }
        }
    }
}

/// Keyed session persistence with a full-scan duplicate-tx check.
#[derive(Clone)]
pub struct SessionStore {
    kv: KvStore,
}

impl SessionStore {
    pub fn in_memory() -> Self {
        Self {
            kv: KvStore::in_memory(),
        }
    }

    pub fn persistent(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self {
            kv: KvStore::persistent(path.as_ref())?,
        })
    }

    pub fn get(&self, id: &Uuid) -> Result<Option<SessionRecord>> {
        self.kv.get(id.as_bytes())
    }

    pub fn put(&self, record: &SessionRecord) -> Result<()> {
        self.kv.put(record.id.as_bytes(), record)
    }

    /// Whether any session has already bound this transaction hash.
    pub fn tx_hash_in_use(&self, tx_hash: &str) -> Result<bool> {
        let records: Vec<SessionRecord> = self.kv.scan()?;
        Ok(records.iter().any(|record| record.tx_hash == tx_hash))
    }
}

/// Destination-chain redemption bookkeeping, keyed by nullifier hash.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedemptionRecord {
    pub nullifier_hash: [u8; 32],
    pub commitment: [u8; 32],
    pub payout_tx: String,
    pub redeemed_at: u64,
}

#[derive(Clone)]
pub struct RedemptionStore {
    kv: KvStore,
}

impl RedemptionStore {
    pub fn in_memory() -> Self {
        Self {
            kv: KvStore::in_memory(),
        }
    }

    pub fn persistent(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self {
            kv: KvStore::persistent(path.as_ref())?,
        })
    }

    pub fn is_consumed(&self, nullifier_hash: [u8; 32]) -> Result<bool> {
        Ok(self
            .kv
            .get::<RedemptionRecord>(&nullifier_hash)?
            .is_some())
    }

    pub fn get(&self, nullifier_hash: [u8; 32]) -> Result<Option<RedemptionRecord>> {
        self.kv.get(&nullifier_hash)
    }

    /// Record a consumed nullifier, first writer wins. This record is the
    /// one place that may be *ahead* of chain state: when a payout lands
    /// but the on-chain marking call fails, the local record still guards
    /// against a second payout while the operator reconciles.
    pub fn mark_consumed(&self, record: &RedemptionRecord) -> Result<bool> {
        self.kv.put_if_absent(&record.nullifier_hash, record)
    }
}
