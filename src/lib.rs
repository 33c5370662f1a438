//! # ipcounter - IPv4 Occurrence Counter
//!
//! ipcounter reads a newline-delimited list of IPv4 addresses, adds one to a
//! per-address counter in a key-value store for every line, and later renders
//! a report of all counters.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                              ipcounter                                  │
//! │                                                                         │
//! │  ┌─────────────┐    ┌─────────────────────────┐    ┌─────────────┐      │
//! │  │ input lines │───>│        Service          │───>│   report    │      │
//! │  └─────────────┘    │  import     |   export  │    └─────────────┘      │
//! │                     │  sync / async fan-out   │                         │
//! │                     └────────────┬────────────┘                         │
//! │                                  │ Storage trait                        │
//! │                   ┌──────────────┴──────────────┐                       │
//! │                   ▼                             ▼                       │
//! │        ┌─────────────────────┐       ┌─────────────────────┐            │
//! │        │    RespStorage      │       │   CounterEngine     │            │
//! │        │ Connection + RESP   │       │  sharded, in memory │            │
//! │        └──────────┬──────────┘       └─────────────────────┘            │
//! │                   │       both encode/decode keys with codec            │
//! │                   ▼                                                     │
//! │        Redis-compatible server                                          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```
//! use ipcounter::service::{Mode, Service};
//! use ipcounter::storage::CounterEngine;
//! use std::sync::Arc;
//!
//! # tokio_test::block_on(async {
//! let service = Service::new(Arc::new(CounterEngine::new()));
//!
//! let input = "10.0.0.1\n10.0.0.1\n";
//! service.import(input.as_bytes(), "test", "ips", Mode::Sync).await.unwrap();
//!
//! let report = service.export("test", "ips", Mode::Sync).await.unwrap();
//! assert_eq!(report, "10.0.0.1, count=2\n");
//! # });
//! ```
//!
//! ## Module Overview
//!
//! - [`service`]: import/export orchestration and [`Mode`]
//! - [`codec`]: composite store key encoding and IPv4 decoding
//! - [`storage`]: the [`Storage`] trait and its backends
//! - [`protocol`]: RESP values and parser
//! - [`connection`]: buffered client connection
//! - [`file`]: input/output files
//! - [`config`]: flags and environment
//! - [`error`]: [`Error`] and [`ErrorKind`]

pub mod codec;
pub mod config;
pub mod connection;
pub mod error;
pub mod file;
pub mod protocol;
pub mod service;
pub mod storage;

pub use error::{Error, ErrorKind, Result};
pub use service::{Mode, Service};
pub use storage::{CounterEngine, Record, RespStorage, Storage};

/// The default store port (same as Redis)
pub const DEFAULT_PORT: u16 = 6379;

/// The default store host
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Version of ipcounter
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
