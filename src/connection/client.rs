//! Client Connection
//!
//! One TCP connection to a Redis-compatible server. Each call to
//! [`Connection::request`] writes a single RESP value and reads until one
//! complete reply has been parsed.
//!
//! ## Request Lifecycle
//!
//! ```text
//! 1. Serialize request, write, flush
//!        │
//!        ▼
//! 2. ┌──────────────────────────────┐
//!    │  Parse reply from buffer     │◄──┐
//!    └───────────┬──────────────────┘   │
//!                │ incomplete           │
//!                ▼                      │
//!    ┌──────────────────────────────┐   │
//!    │  Read more bytes from socket │───┘
//!    └──────────────────────────────┘
//!        │ complete
//!        ▼
//! 3. Advance buffer past the reply, return it
//! ```
//!
//! Replies may span many TCP reads (a `KEYS` reply over a large set), so the
//! buffer grows up to [`MAX_BUFFER_SIZE`]. A [`FrameScanner`] tracks how much
//! of the reply has arrived, and the reply is parsed once it is complete.
//!
//! ## Cancellation
//!
//! A request future may be dropped at any await point:
//!
//! - after the request was written: the reply is still owed. The connection
//!   counts it and discards it before the next request is sent.
//! - while the request was being written: the stream holds a partial command
//!   and the connection is marked broken. So is any I/O or protocol failure.
//!   A broken connection refuses further requests and must be replaced.

use crate::protocol::{FrameScanner, ParseError, RespParser, RespValue};
use bytes::{Buf, BytesMut};
use std::net::SocketAddr;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufWriter};
use tokio::net::{TcpStream, ToSocketAddrs};
use tracing::{debug, trace};

/// Maximum size for the reply buffer (256 MB)
pub const MAX_BUFFER_SIZE: usize = 256 * 1024 * 1024;

/// Initial buffer capacity
const INITIAL_BUFFER_SIZE: usize = 4096;

/// A buffered client connection.
#[derive(Debug)]
pub struct Connection {
    /// The TCP stream, write side buffered
    stream: BufWriter<TcpStream>,

    /// Server address (for logging)
    addr: SocketAddr,

    /// Buffer for incoming reply data
    buffer: BytesMut,

    /// RESP parser
    parser: RespParser,

    /// Progress through the reply being read
    scanner: FrameScanner,

    /// Replies still owed to requests whose callers went away
    owed: usize,

    /// Set when the stream state is unknown
    broken: bool,
}

impl Connection {
    /// Connects to the server at `addr`.
    pub async fn connect(addr: impl ToSocketAddrs) -> Result<Self, ConnectionError> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        let addr = stream.peer_addr()?;
        debug!(server = %addr, "Connected");

        Ok(Self {
            stream: BufWriter::new(stream),
            addr,
            buffer: BytesMut::with_capacity(INITIAL_BUFFER_SIZE),
            parser: RespParser::new(),
            scanner: FrameScanner::new(),
            owed: 0,
            broken: false,
        })
    }

    /// Returns the server address.
    pub fn peer_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Returns true once the connection can no longer be used.
    pub fn is_broken(&self) -> bool {
        self.broken
    }

    /// Sends `request` and waits for its reply.
    ///
    /// Error replies (`-ERR ...`) are returned as [`RespValue::Error`], not
    /// as `Err`; the caller decides what they mean.
    pub async fn request(&mut self, request: &RespValue) -> Result<RespValue, ConnectionError> {
        if self.broken {
            return Err(ConnectionError::Broken);
        }

        while self.owed > 0 {
            let stale = self.read_reply().await?;
            self.owed -= 1;
            debug!(server = %self.addr, reply = %stale, "Discarded reply to abandoned request");
        }

        self.send(request).await?;
        self.owed += 1;

        let reply = self.read_reply().await?;
        self.owed -= 1;
        Ok(reply)
    }

    /// Closes the write half of the connection.
    pub async fn shutdown(&mut self) -> Result<(), ConnectionError> {
        self.stream.flush().await?;
        self.stream.shutdown().await?;
        debug!(server = %self.addr, "Connection closed");
        Ok(())
    }

    async fn send(&mut self, request: &RespValue) -> Result<(), ConnectionError> {
        let bytes = request.serialize();

        // Stays set if the write fails or is cancelled halfway
        self.broken = true;
        self.stream.write_all(&bytes).await?;
        self.stream.flush().await?;
        self.broken = false;

        trace!(server = %self.addr, bytes = bytes.len(), "Sent request");
        Ok(())
    }

    /// Reads until one complete reply is buffered and returns it.
    async fn read_reply(&mut self) -> Result<RespValue, ConnectionError> {
        loop {
            let step = match self.try_parse_reply() {
                Ok(Some(reply)) => return Ok(reply),
                Ok(None) => self.read_more_data().await,
                Err(e) => Err(e),
            };
            if let Err(e) = step {
                self.broken = true;
                return Err(e);
            }
        }
    }

    /// Attempts to parse a reply from the buffer.
    fn try_parse_reply(&mut self) -> Result<Option<RespValue>, ConnectionError> {
        if !self.scanner.is_complete(&self.buffer)? {
            return Ok(None);
        }
        self.scanner.reset();

        match self.parser.parse(&self.buffer)? {
            Some((value, consumed)) => {
                self.buffer.advance(consumed);
                trace!(
                    server = %self.addr,
                    consumed = consumed,
                    remaining = self.buffer.len(),
                    "Parsed reply"
                );
                Ok(Some(value))
            }
            None => Err(ConnectionError::ParseError(ParseError::ProtocolError(
                "reply ended early".to_string(),
            ))),
        }
    }

    /// Reads more data from the socket into the buffer.
    async fn read_more_data(&mut self) -> Result<(), ConnectionError> {
        if self.buffer.len() >= MAX_BUFFER_SIZE {
            return Err(ConnectionError::BufferFull);
        }

        if self.buffer.capacity() - self.buffer.len() < 1024 {
            self.buffer.reserve(INITIAL_BUFFER_SIZE);
        }

        let n = self.stream.get_mut().read_buf(&mut self.buffer).await?;
        if n == 0 {
            return Err(if self.buffer.is_empty() {
                ConnectionError::ServerDisconnected
            } else {
                ConnectionError::UnexpectedEof
            });
        }

        trace!(server = %self.addr, bytes = n, "Read data");
        Ok(())
    }
}

/// Errors that can occur on a client connection.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// I/O error (network issue)
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// The server sent invalid RESP
    #[error("Parse error: {0}")]
    ParseError(#[from] ParseError),

    /// The server closed the connection between replies
    #[error("Server disconnected")]
    ServerDisconnected,

    /// The server closed the connection mid-reply
    #[error("Unexpected end of stream")]
    UnexpectedEof,

    /// Reply buffer size limit exceeded
    #[error("Buffer size limit exceeded")]
    BufferFull,

    /// An earlier failure left the stream in an unknown state
    #[error("Connection is broken")]
    Broken,
}
