//! RESP Protocol Implementation
//!
//! Wire codec for the remote storage backend: [`RespValue`] builds requests
//! and represents replies, [`RespParser`] turns buffered socket bytes back
//! into values.
//!
//! ## Example
//!
//! ```
//! use ipcounter::protocol::{parse_message, RespValue};
//!
//! let request = RespValue::command(["INCRBY", "test:ips::00", "1"]);
//! let bytes = request.serialize();
//!
//! let (parsed, consumed) = parse_message(&bytes).unwrap().unwrap();
//! assert_eq!(parsed, request);
//! assert_eq!(consumed, bytes.len());
//! ```

pub mod parser;
pub mod types;

pub use parser::{parse_message, FrameScanner, ParseError, ParseResult, RespParser};
pub use types::RespValue;
