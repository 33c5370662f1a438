//! Client Connection Module
//!
//! Network plumbing for the remote storage backend: a single buffered TCP
//! connection that exchanges RESP requests and replies with a
//! Redis-compatible server.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐  request   ┌──────────────┐   bytes   ┌──────────────┐
//! │ RespStorage  │───────────>│  Connection  │──────────>│    Server    │
//! │              │<───────────│ BufWriter +  │<──────────│              │
//! └──────────────┘   reply    │ RespParser   │   bytes   └──────────────┘
//!                             └──────────────┘
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use ipcounter::connection::Connection;
//! use ipcounter::protocol::RespValue;
//!
//! let mut conn = Connection::connect("127.0.0.1:6379").await?;
//! let reply = conn.request(&RespValue::command(["INCRBY", "hits", "1"])).await?;
//! ```

pub mod client;

pub use client::{Connection, ConnectionError};
