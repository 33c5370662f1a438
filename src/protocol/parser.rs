//! Incremental RESP Reply Parser
//!
//! Replies arrive over TCP in arbitrary chunks, so the parser works on
//! whatever bytes are buffered and reports one of:
//! - `Ok(Some((value, consumed)))` - a full value was parsed from `consumed` bytes
//! - `Ok(None)` - the value is incomplete, read more and retry
//! - `Err(ParseError)` - the server sent invalid protocol data
//!
//! The client connection appends socket data to its buffer, calls
//! [`RespParser::parse`], and advances the buffer by `consumed` once a reply
//! is complete.

use crate::protocol::types::{prefix, RespValue, CRLF};
use bytes::Bytes;
use std::num::ParseIntError;
use thiserror::Error;

/// Errors that can occur during RESP parsing.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ParseError {
    /// Unknown type prefix byte
    #[error("unknown type prefix: {0:#04x}")]
    UnknownPrefix(u8),

    /// Invalid integer format
    #[error("invalid integer: {0}")]
    InvalidInteger(String),

    /// Invalid UTF-8 in a simple string or error message
    #[error("invalid UTF-8: {0}")]
    InvalidUtf8(String),

    /// Bulk string length is negative (but not -1 for null)
    #[error("invalid bulk string length: {0}")]
    InvalidBulkLength(i64),

    /// Array length is negative (but not -1 for null)
    #[error("invalid array length: {0}")]
    InvalidArrayLength(i64),

    /// Protocol violation (missing CRLF, etc.)
    #[error("protocol error: {0}")]
    ProtocolError(String),

    /// The message exceeds maximum allowed size
    #[error("message too large: {size} bytes (max: {max})")]
    MessageTooLarge { size: usize, max: usize },
}

/// Result type for parsing operations.
pub type ParseResult<T> = Result<T, ParseError>;

/// Maximum size for a single bulk string (512 MB, same as Redis)
pub const MAX_BULK_SIZE: usize = 512 * 1024 * 1024;

/// Maximum array nesting depth (prevent stack overflow)
pub const MAX_NESTING_DEPTH: usize = 32;

/// An incremental RESP parser.
///
/// # Example
///
/// ```
/// use ipcounter::protocol::{RespParser, RespValue};
///
/// let mut parser = RespParser::new();
/// let (value, consumed) = parser.parse(b":42\r\n").unwrap().unwrap();
/// assert_eq!(value, RespValue::Integer(42));
/// assert_eq!(consumed, 5);
/// ```
#[derive(Debug, Default)]
pub struct RespParser {
    /// Current nesting depth (for array parsing)
    depth: usize,
}

impl RespParser {
    /// Creates a new parser instance.
    pub fn new() -> Self {
        Self { depth: 0 }
    }

    /// Attempts to parse one RESP value from the start of `buf`.
    pub fn parse(&mut self, buf: &[u8]) -> ParseResult<Option<(RespValue, usize)>> {
        self.depth = 0;
        self.parse_value(buf)
    }

    /// Internal recursive parsing function.
    fn parse_value(&mut self, buf: &[u8]) -> ParseResult<Option<(RespValue, usize)>> {
        if buf.is_empty() {
            return Ok(None);
        }

        // Check nesting depth
        if self.depth > MAX_NESTING_DEPTH {
            return Err(ParseError::ProtocolError(format!(
                "maximum nesting depth exceeded: {}",
                MAX_NESTING_DEPTH
            )));
        }

        match buf[0] {
            prefix::SIMPLE_STRING => self.parse_simple_string(buf),
            prefix::ERROR => self.parse_error(buf),
            prefix::INTEGER => self.parse_integer(buf),
            prefix::BULK_STRING => self.parse_bulk_string(buf),
            prefix::ARRAY => self.parse_array(buf),
            other => Err(ParseError::UnknownPrefix(other)),
        }
    }

    /// Parses a simple string: `+<string>\r\n`
    fn parse_simple_string(&mut self, buf: &[u8]) -> ParseResult<Option<(RespValue, usize)>> {
        debug_assert!(buf[0] == prefix::SIMPLE_STRING);

        match find_crlf(&buf[1..]) {
            Some(pos) => {
                let content = &buf[1..1 + pos];
                let s = std::str::from_utf8(content)
                    .map_err(|e| ParseError::InvalidUtf8(e.to_string()))?;

                // +1 for prefix, +2 for CRLF
                let consumed = 1 + pos + 2;
                Ok(Some((RespValue::SimpleString(s.to_string()), consumed)))
            }
            None => Ok(None), // Incomplete
        }
    }

    /// Parses an error: `-<error message>\r\n`
    fn parse_error(&mut self, buf: &[u8]) -> ParseResult<Option<(RespValue, usize)>> {
        debug_assert!(buf[0] == prefix::ERROR);

        match find_crlf(&buf[1..]) {
            Some(pos) => {
                let content = &buf[1..1 + pos];
                let s = std::str::from_utf8(content)
                    .map_err(|e| ParseError::InvalidUtf8(e.to_string()))?;

                let consumed = 1 + pos + 2;
                Ok(Some((RespValue::Error(s.to_string()), consumed)))
            }
            None => Ok(None),
        }
    }

    /// Parses an integer: `:<integer>\r\n`
    fn parse_integer(&mut self, buf: &[u8]) -> ParseResult<Option<(RespValue, usize)>> {
        debug_assert!(buf[0] == prefix::INTEGER);

        match find_crlf(&buf[1..]) {
            Some(pos) => {
                let content = &buf[1..1 + pos];
                let s = std::str::from_utf8(content)
                    .map_err(|e| ParseError::InvalidUtf8(e.to_string()))?;

                let n: i64 = s
                    .parse()
                    .map_err(|e: ParseIntError| ParseError::InvalidInteger(e.to_string()))?;
                let consumed = 1 + pos + 2;
                Ok(Some((RespValue::Integer(n), consumed)))
            }
            None => Ok(None),
        }
    }

    /// Parses a bulk string: `$<length>\r\n<data>\r\n`
    fn parse_bulk_string(&mut self, buf: &[u8]) -> ParseResult<Option<(RespValue, usize)>> {
        debug_assert!(buf[0] == prefix::BULK_STRING);

        // First, find the length line
        let length_end = match find_crlf(&buf[1..]) {
            Some(pos) => pos,
            None => return Ok(None),
        };

        let length_str = std::str::from_utf8(&buf[1..1 + length_end])
            .map_err(|e| ParseError::InvalidUtf8(e.to_string()))?;

        let length: i64 = length_str
            .parse()
            .map_err(|e: ParseIntError| ParseError::InvalidInteger(e.to_string()))?;

        // Handle null bulk string
        if length == -1 {
            let consumed = 1 + length_end + 2; // $-1\r\n
            return Ok(Some((RespValue::Null, consumed)));
        }

        // Validate length
        if length < 0 {
            return Err(ParseError::InvalidBulkLength(length));
        }

        let length = length as usize;

        // Check size limit
        if length > MAX_BULK_SIZE {
            return Err(ParseError::MessageTooLarge {
                size: length,
                max: MAX_BULK_SIZE,
            });
        }

        // Calculate the start of the data
        let data_start = 1 + length_end + 2; // prefix + length + CRLF

        // Check if we have enough data
        let total_needed = data_start + length + 2; // data + CRLF
        if buf.len() < total_needed {
            return Ok(None); // Incomplete
        }

        // Verify trailing CRLF
        if &buf[data_start + length..data_start + length + 2] != CRLF {
            return Err(ParseError::ProtocolError(
                "bulk string missing trailing CRLF".to_string(),
            ));
        }

        // Copy the payload out of the read buffer
        let data = Bytes::copy_from_slice(&buf[data_start..data_start + length]);

        Ok(Some((RespValue::BulkString(data), total_needed)))
    }

    /// Parses an array: `*<count>\r\n<elements...>`
    fn parse_array(&mut self, buf: &[u8]) -> ParseResult<Option<(RespValue, usize)>> {
        debug_assert!(buf[0] == prefix::ARRAY);

        // Find the count line
        let count_end = match find_crlf(&buf[1..]) {
            Some(pos) => pos,
            None => return Ok(None),
        };

        let count_str = std::str::from_utf8(&buf[1..1 + count_end])
            .map_err(|e| ParseError::InvalidUtf8(e.to_string()))?;

        let count: i64 = count_str
            .parse()
            .map_err(|e: ParseIntError| ParseError::InvalidInteger(e.to_string()))?;

        // Handle null array
        if count == -1 {
            let consumed = 1 + count_end + 2;
            return Ok(Some((RespValue::Null, consumed)));
        }

        // Validate count
        if count < 0 {
            return Err(ParseError::InvalidArrayLength(count));
        }

        let count = count as usize;

        // Capacity is capped; the count is server-supplied
        let mut elements = Vec::with_capacity(count.min(1024));
        let mut consumed = 1 + count_end + 2; // *<count>\r\n

        self.depth += 1;

        for _ in 0..count {
            if consumed >= buf.len() {
                return Ok(None); // Incomplete
            }

            match self.parse_value(&buf[consumed..])? {
                Some((value, element_consumed)) => {
                    elements.push(value);
                    consumed += element_consumed;
                }
                None => return Ok(None), // Incomplete
            }
        }

        self.depth -= 1;

        Ok(Some((RespValue::Array(elements), consumed)))
    }
}

/// Resumable check for whether a buffer holds one complete value.
///
/// Only headers and bulk lengths are read, and each call picks up where the
/// previous one stopped. A reply that arrives over many socket reads is
/// therefore scanned once in total, and [`RespParser::parse`] runs once it is
/// complete.
///
/// # Example
///
/// ```
/// use ipcounter::protocol::FrameScanner;
///
/// let mut scanner = FrameScanner::new();
/// assert!(!scanner.is_complete(b"*2\r\n:1\r\n").unwrap());
/// assert!(scanner.is_complete(b"*2\r\n:1\r\n:2\r\n").unwrap());
/// ```
#[derive(Debug, Default)]
pub struct FrameScanner {
    /// Offset of the next element header not yet scanned
    pos: usize,

    /// Elements still expected by each open array, innermost last
    open: Vec<usize>,
}

impl FrameScanner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true once `buf` starts with a complete value.
    ///
    /// Between calls `buf` may only grow at the end; call [`reset`] after the
    /// value has been consumed.
    ///
    /// [`reset`]: FrameScanner::reset
    pub fn is_complete(&mut self, buf: &[u8]) -> ParseResult<bool> {
        loop {
            let Some(&first) = buf.get(self.pos) else {
                return Ok(false);
            };
            let Some(line_len) = find_crlf(&buf[self.pos + 1..]) else {
                return Ok(false);
            };
            let line = &buf[self.pos + 1..self.pos + 1 + line_len];
            let header_end = self.pos + 1 + line_len + 2;

            match first {
                prefix::SIMPLE_STRING | prefix::ERROR | prefix::INTEGER => self.pos = header_end,
                prefix::BULK_STRING => match header_int(line)? {
                    -1 => self.pos = header_end,
                    length if length < 0 => return Err(ParseError::InvalidBulkLength(length)),
                    length => {
                        let length = length as usize;
                        if length > MAX_BULK_SIZE {
                            return Err(ParseError::MessageTooLarge {
                                size: length,
                                max: MAX_BULK_SIZE,
                            });
                        }
                        let end = header_end + length + 2;
                        if buf.len() < end {
                            return Ok(false);
                        }
                        self.pos = end;
                    }
                },
                prefix::ARRAY => match header_int(line)? {
                    -1 | 0 => self.pos = header_end,
                    count if count < 0 => return Err(ParseError::InvalidArrayLength(count)),
                    count => {
                        if self.open.len() >= MAX_NESTING_DEPTH {
                            return Err(ParseError::ProtocolError(format!(
                                "maximum nesting depth exceeded: {}",
                                MAX_NESTING_DEPTH
                            )));
                        }
                        self.pos = header_end;
                        self.open.push(count as usize);
                        continue;
                    }
                },
                other => return Err(ParseError::UnknownPrefix(other)),
            }

            // One element finished; close every array it completes
            loop {
                match self.open.last_mut() {
                    None => return Ok(true),
                    Some(remaining) => {
                        *remaining -= 1;
                        if *remaining > 0 {
                            break;
                        }
                        self.open.pop();
                    }
                }
            }
        }
    }

    /// Forgets all progress, ready for the next value.
    pub fn reset(&mut self) {
        self.pos = 0;
        self.open.clear();
    }
}

fn header_int(line: &[u8]) -> ParseResult<i64> {
    std::str::from_utf8(line)
        .map_err(|e| ParseError::InvalidUtf8(e.to_string()))?
        .parse()
        .map_err(|e: ParseIntError| ParseError::InvalidInteger(e.to_string()))
}

/// Finds the position of the first CRLF in the buffer.
#[inline]
fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == CRLF)
}

/// Parses a single RESP value with a fresh parser.
pub fn parse_message(buf: &[u8]) -> ParseResult<Option<(RespValue, usize)>> {
    RespParser::new().parse(buf)
}
