//! Storage Module
//!
//! The [`Storage`] trait is the only thing the importer and exporter know
//! about the key-value store: an atomic add on a counter and a listing of
//! every counter in a namespace/set.
//!
//! ## Backends
//!
//! ```text
//!                    ┌─────────────────────┐
//!                    │   Storage (trait)   │
//!                    │  increment / list   │
//!                    └──────────┬──────────┘
//!              ┌────────────────┴────────────────┐
//!              ▼                                 ▼
//! ┌─────────────────────────┐       ┌─────────────────────────┐
//! │      RespStorage        │       │     CounterEngine       │
//! │ INCRBY / KEYS + MGET    │       │ 64 RwLock shards,       │
//! │ over a connection pool  │       │ in process              │
//! └─────────────────────────┘       └─────────────────────────┘
//! ```
//!
//! Both backends store counters under the composite keys built by
//! [`crate::codec::encode`] and decode them back with [`crate::codec::decode`]
//! when listing.
//!
//! ## Example
//!
//! ```
//! use ipcounter::storage::{CounterEngine, Storage};
//!
//! # tokio_test::block_on(async {
//! let engine = CounterEngine::new();
//! engine.increment("test", "ips", "10.0.0.1", 1).await.unwrap();
//! engine.increment("test", "ips", "10.0.0.1", 1).await.unwrap();
//!
//! let records = engine.list("test", "ips").await.unwrap();
//! assert_eq!(records[0].key, "10.0.0.1");
//! assert_eq!(records[0].count, 2);
//! # });
//! ```

pub mod engine;
pub mod resp;

use crate::error::Result;
use async_trait::async_trait;

pub use engine::CounterEngine;
pub use resp::RespStorage;

/// A decoded counter: the address and how many times it was seen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub key: String,
    pub count: i64,
}

impl Record {
    pub fn new(key: impl Into<String>, count: i64) -> Self {
        Self {
            key: key.into(),
            count,
        }
    }
}

/// Capability interface over the counter store.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Returns every counter in `namespace`/`set`.
    async fn list(&self, namespace: &str, set: &str) -> Result<Vec<Record>>;

    /// Atomically adds `delta` to the counter for `key`, creating it at zero
    /// first if needed.
    async fn increment(&self, namespace: &str, set: &str, key: &str, delta: i64) -> Result<()>;
}

