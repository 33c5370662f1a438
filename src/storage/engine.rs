//! In-Memory Counter Engine
//!
//! A thread-safe map from composite store keys to integer counters. It backs
//! dry runs of the importer and plays the server side in the RESP backend's
//! integration tests.
//!
//! ## Design Decisions
//!
//! 1. **Sharded Locks**: keys are spread over 64 shards, each behind its own
//!    `RwLock`, so concurrent increments of different keys rarely contend.
//! 2. **Atomic Add**: `incr_by` holds the shard's write lock for the whole
//!    read-add-store, which is the only way a counter changes.
//! 3. **Prefix Scans**: listing walks every shard for keys under one
//!    `<namespace>:<set>::` prefix. A poisoned shard fails the scan, so a
//!    listing is never partial.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     CounterEngine                           │
//! │  ┌─────────┐ ┌─────────┐ ┌─────────┐ ┌─────────┐           │
//! │  │ Shard 0 │ │ Shard 1 │ │ Shard 2 │ │ Shard N │           │
//! │  │ RwLock  │ │ RwLock  │ │ RwLock  │ │ RwLock  │           │
//! │  │ HashMap │ │ HashMap │ │ HashMap │ │ HashMap │           │
//! │  └─────────┘ └─────────┘ └─────────┘ └─────────┘           │
//! └─────────────────────────────────────────────────────────────┘
//! ```

use crate::codec;
use crate::error::{Error, ErrorKind, Result};
use crate::storage::{Record, Storage};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::{PoisonError, RwLock};
use tracing::trace;

/// Number of shards for the engine.
const NUM_SHARDS: usize = 64;

/// Error message for a poisoned shard lock.
const POISONED: &str = "shard lock poisoned";

/// A single shard containing a portion of the counters.
#[derive(Debug, Default)]
struct Shard {
    data: RwLock<HashMap<Bytes, i64>>,
}

/// Sharded in-memory counter store.
///
/// Wrap it in an `Arc` to share it across tasks; every operation is
/// thread-safe.
///
/// # Example
///
/// ```
/// use ipcounter::storage::CounterEngine;
/// use bytes::Bytes;
///
/// let engine = CounterEngine::new();
/// let key = Bytes::from("hits");
///
/// assert_eq!(engine.incr_by(&key, 2), Ok(2));
/// assert_eq!(engine.incr_by(&key, 3), Ok(5));
/// assert_eq!(engine.get(&key), Some(5));
/// ```
pub struct CounterEngine {
    shards: Vec<Shard>,
}

impl std::fmt::Debug for CounterEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CounterEngine")
            .field("shards", &self.shards.len())
            .finish()
    }
}

impl Default for CounterEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl CounterEngine {
    /// Creates an empty engine.
    pub fn new() -> Self {
        Self {
            shards: (0..NUM_SHARDS).map(|_| Shard::default()).collect(),
        }
    }

    #[inline]
    fn shard(&self, key: &[u8]) -> &Shard {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        &self.shards[(hasher.finish() as usize) % NUM_SHARDS]
    }

    /// Adds `delta` to the counter at `key`, starting from 0 if absent.
    ///
    /// Returns the new value.
    pub fn incr_by(&self, key: &Bytes, delta: i64) -> std::result::Result<i64, &'static str> {
        let mut data = self
            .shard(key)
            .data
            .write()
            .map_err(|_: PoisonError<_>| POISONED)?;

        let current = data.get(key).copied().unwrap_or(0);
        let new_value = current.checked_add(delta).ok_or("increment would overflow")?;
        data.insert(key.clone(), new_value);

        Ok(new_value)
    }

    /// Returns the counter at `key`, if any.
    pub fn get(&self, key: &Bytes) -> Option<i64> {
        let data = self.shard(key).data.read().ok()?;
        data.get(key).copied()
    }

    /// Returns every `(key, counter)` pair whose key starts with `prefix`.
    ///
    /// Scans every shard and fails if any of them is poisoned.
    pub fn scan_prefix(&self, prefix: &[u8]) -> std::result::Result<Vec<(Bytes, i64)>, &'static str> {
        let mut result = Vec::new();

        for shard in &self.shards {
            let data = shard.data.read().map_err(|_: PoisonError<_>| POISONED)?;
            result.extend(
                data.iter()
                    .filter(|(key, _)| key.starts_with(prefix))
                    .map(|(key, count)| (key.clone(), *count)),
            );
        }

        Ok(result)
    }
}

#[async_trait]
impl Storage for CounterEngine {
    async fn list(&self, namespace: &str, set: &str) -> Result<Vec<Record>> {
        let prefix = codec::set_prefix(namespace, set)?;
        let entries = self
            .scan_prefix(prefix.as_bytes())
            .map_err(|e| Error::with_source(ErrorKind::ScanRecord, e))?;

        let mut records = Vec::with_capacity(entries.len());
        for (key, count) in entries {
            let text = std::str::from_utf8(&key)
                .map_err(|e| Error::with_source(ErrorKind::ScanRecord, e))?;
            records.push(Record::new(codec::decode(text)?, count));
        }

        trace!(namespace, set, records = records.len(), "Listed counters");
        Ok(records)
    }

    async fn increment(&self, namespace: &str, set: &str, key: &str, delta: i64) -> Result<()> {
        let store_key = Bytes::from(codec::encode(namespace, set, key)?);
        self.incr_by(&store_key, delta)
            .map(|_| ())
            .map_err(|e| Error::with_source(ErrorKind::IncrementCount, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_incr_by() {
        let engine = CounterEngine::new();
        let key = Bytes::from("counter");

        assert_eq!(engine.incr_by(&key, 1), Ok(1));
        assert_eq!(engine.incr_by(&key, 1), Ok(2));
        assert_eq!(engine.incr_by(&key, -5), Ok(-3));
        assert_eq!(engine.get(&key), Some(-3));
    }

    #[test]
    fn test_incr_overflow() {
        let engine = CounterEngine::new();
        let key = Bytes::from("big");

        engine.incr_by(&key, i64::MAX).unwrap();
        assert_eq!(engine.incr_by(&key, 1), Err("increment would overflow"));
        assert_eq!(engine.get(&key), Some(i64::MAX));
    }

    #[test]
    fn test_get_nonexistent() {
        let engine = CounterEngine::new();
        assert_eq!(engine.get(&Bytes::from("missing")), None);
    }

    #[test]
    fn test_scan_prefix() {
        let engine = CounterEngine::new();
        engine.incr_by(&Bytes::from("a:x::01"), 1).unwrap();
        engine.incr_by(&Bytes::from("a:x::02"), 4).unwrap();
        engine.incr_by(&Bytes::from("a:xy::01"), 1).unwrap();
        engine.incr_by(&Bytes::from("a:y::01"), 1).unwrap();

        let mut found = engine.scan_prefix(b"a:x::").unwrap();
        found.sort();
        assert_eq!(
            found,
            vec![(Bytes::from("a:x::01"), 1), (Bytes::from("a:x::02"), 4)]
        );
        assert_eq!(engine.scan_prefix(b"").unwrap().len(), 4);
    }

    #[test]
    fn test_scan_fails_on_poisoned_shard() {
        let engine = CounterEngine::new();
        engine.incr_by(&Bytes::from("a:x::01"), 1).unwrap();

        let poisoned = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = engine.shards[NUM_SHARDS - 1].data.write().unwrap();
            panic!("poison the shard");
        }));
        assert!(poisoned.is_err());

        assert_eq!(engine.scan_prefix(b"a:x::"), Err(POISONED));
    }

    #[test]
    fn test_concurrent_increments() {
        use std::thread;

        let engine = Arc::new(CounterEngine::new());
        let key = Bytes::from("shared");

        let handles: Vec<_> = (0..10)
            .map(|_| {
                let engine = Arc::clone(&engine);
                let key = key.clone();
                thread::spawn(move || {
                    for _ in 0..100 {
                        engine.incr_by(&key, 1).unwrap();
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(engine.get(&key), Some(1000));
    }

    #[tokio::test]
    async fn test_storage_roundtrip() {
        let engine = CounterEngine::new();

        for ip in ["192.168.1.1", "192.168.1.2", "192.168.1.1"] {
            engine.increment("test", "ips", ip, 1).await.unwrap();
        }
        engine.increment("test", "other", "10.0.0.1", 1).await.unwrap();

        let mut records = engine.list("test", "ips").await.unwrap();
        records.sort_by(|a, b| a.key.cmp(&b.key));
        assert_eq!(
            records,
            vec![Record::new("192.168.1.1", 2), Record::new("192.168.1.2", 1)]
        );
    }

    #[tokio::test]
    async fn test_storage_invalid_set() {
        let engine = CounterEngine::new();

        let err = engine.increment("test", "bad set", "1.1.1.1", 1).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidKey);

        let err = engine.list("test", "").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidKey);
    }

    #[tokio::test]
    async fn test_storage_list_poisoned_is_an_error() {
        let engine = CounterEngine::new();
        engine.increment("test", "ips", "10.0.0.1", 1).await.unwrap();

        let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = engine.shards[0].data.write().unwrap();
            panic!("poison the shard");
        }));

        let err = engine.list("test", "ips").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ScanRecord);
    }

    #[tokio::test]
    async fn test_storage_list_undecodable_key() {
        let engine = CounterEngine::new();
        engine.incr_by(&Bytes::from("test:ips::00 01"), 1).unwrap();

        let err = engine.list("test", "ips").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidIpv4Length);
    }
}
