//! Remote storage over RESP.
//!
//! Counters live on a Redis-compatible server under composite keys:
//!
//! - `increment` sends `INCRBY <key> <delta>`, which the server applies
//!   atomically
//! - `list` sends `KEYS <namespace>:<set>::*`, then `MGET` in batches of
//!   [`MGET_BATCH`] keys
//!
//! Requests go through a small pool of connections. A caller takes the
//! first idle one, or queues on the next in round-robin order when all are
//! busy. A connection left broken by a failed or cancelled request is
//! replaced the next time it is taken.

use crate::codec;
use crate::connection::Connection;
use crate::error::{Error, ErrorKind, Result};
use crate::protocol::RespValue;
use crate::storage::{Record, Storage};
use async_trait::async_trait;
use bytes::Bytes;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

/// Maximum number of keys per `MGET` request.
pub const MGET_BATCH: usize = 512;

/// Connections opened by [`RespStorage::connect`].
pub const DEFAULT_POOL_SIZE: usize = 4;

/// Upper bound on the pool size.
pub const MAX_POOL_SIZE: usize = 64;

/// Counter store on a Redis-compatible server.
#[derive(Debug)]
pub struct RespStorage {
    addr: SocketAddr,
    pool: Vec<Mutex<Connection>>,
    next: AtomicUsize,
}

impl RespStorage {
    /// Connects to the server at `host:port` with [`DEFAULT_POOL_SIZE`]
    /// connections.
    pub async fn connect(host: &str, port: u16) -> Result<Self> {
        Self::connect_pool(host, port, DEFAULT_POOL_SIZE).await
    }

    /// Connects to the server at `host:port` with `size` connections,
    /// clamped to `1..=MAX_POOL_SIZE`.
    pub async fn connect_pool(host: &str, port: u16, size: usize) -> Result<Self> {
        let size = size.clamp(1, MAX_POOL_SIZE);
        let first = Connection::connect((host, port))
            .await
            .map_err(|e| Error::with_source(ErrorKind::Connect, e))?;
        let addr = first.peer_addr();

        let mut pool = Vec::with_capacity(size);
        pool.push(Mutex::new(first));
        while pool.len() < size {
            let conn = Connection::connect(addr)
                .await
                .map_err(|e| Error::with_source(ErrorKind::Connect, e))?;
            pool.push(Mutex::new(conn));
        }
        info!(server = %addr, connections = size, "Connected to store");

        Ok(Self {
            addr,
            pool,
            next: AtomicUsize::new(0),
        })
    }

    /// Number of pooled connections.
    pub fn pool_size(&self) -> usize {
        self.pool.len()
    }

    /// Closes every connection. Failures are logged, not returned.
    pub async fn close(&self) {
        for conn in &self.pool {
            let mut conn = conn.lock().await;
            if conn.is_broken() {
                continue;
            }
            if let Err(e) = conn.shutdown().await {
                warn!(error = %e, "Failed to close store connection");
            }
        }
    }

    /// Takes an idle connection, or waits for one in round-robin order.
    async fn checkout(&self) -> MutexGuard<'_, Connection> {
        let start = self.next.fetch_add(1, Ordering::Relaxed);
        let size = self.pool.len();

        for i in 0..size {
            if let Ok(conn) = self.pool[(start + i) % size].try_lock() {
                return conn;
            }
        }
        self.pool[start % size].lock().await
    }

    async fn request(&self, request: RespValue, kind: ErrorKind) -> Result<RespValue> {
        let mut conn = self.checkout().await;
        if conn.is_broken() {
            warn!(server = %self.addr, "Replacing broken store connection");
            *conn = Connection::connect(self.addr)
                .await
                .map_err(|e| Error::with_source(kind, e))?;
        }

        let reply = conn
            .request(&request)
            .await
            .map_err(|e| Error::with_source(kind, e))?;

        match reply {
            RespValue::Error(msg) => Err(Error::with_source(kind, msg)),
            reply => Ok(reply),
        }
    }

    /// Fetches values for `keys` with one `MGET`.
    async fn fetch(&self, keys: &[RespValue]) -> Result<Vec<RespValue>> {
        let mut args = Vec::with_capacity(keys.len() + 1);
        args.push(RespValue::bulk_string(Bytes::from_static(b"MGET")));
        args.extend_from_slice(keys);

        let values = self
            .request(RespValue::array(args), ErrorKind::ScanRecord)
            .await?
            .into_array()
            .ok_or_else(|| Error::with_source(ErrorKind::ScanRecord, "MGET reply is not an array"))?;

        if values.len() != keys.len() {
            return Err(Error::with_source(
                ErrorKind::ScanRecord,
                format!("MGET returned {} values for {} keys", values.len(), keys.len()),
            ));
        }
        Ok(values)
    }
}

#[async_trait]
impl Storage for RespStorage {
    async fn list(&self, namespace: &str, set: &str) -> Result<Vec<Record>> {
        let pattern = format!("{}*", codec::set_prefix(namespace, set)?);

        let keys = self
            .request(
                RespValue::command([Bytes::from_static(b"KEYS"), Bytes::from(pattern)]),
                ErrorKind::ScanAllRecords,
            )
            .await?
            .into_array()
            .ok_or_else(|| {
                Error::with_source(ErrorKind::ScanAllRecords, "KEYS reply is not an array")
            })?;

        let mut records = Vec::with_capacity(keys.len());
        for batch in keys.chunks(MGET_BATCH) {
            let values = self.fetch(batch).await?;

            for (key, value) in batch.iter().zip(values) {
                let text = key
                    .as_str()
                    .ok_or_else(|| Error::with_source(ErrorKind::ScanRecord, "key is not UTF-8"))?;
                let ip = codec::decode(text)?;

                // Deleted since KEYS, or not a counter
                let Some(count) = value.as_integer() else {
                    debug!(key = text, "Skipping non-integer value");
                    continue;
                };
                records.push(Record::new(ip, count));
            }
        }

        debug!(namespace, set, records = records.len(), "Listed counters");
        Ok(records)
    }

    async fn increment(&self, namespace: &str, set: &str, key: &str, delta: i64) -> Result<()> {
        let store_key = codec::encode(namespace, set, key)?;
        let request = RespValue::command([
            Bytes::from_static(b"INCRBY"),
            Bytes::from(store_key),
            Bytes::from(delta.to_string()),
        ]);

        match self.request(request, ErrorKind::IncrementCount).await? {
            RespValue::Integer(_) => Ok(()),
            other => Err(Error::with_source(
                ErrorKind::IncrementCount,
                format!("unexpected INCRBY reply: {}", other),
            )),
        }
    }
}
