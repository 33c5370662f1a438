//! Error Types
//!
//! Every failure surfaced by the importer, exporter, key codec and storage
//! backends is an [`Error`]: a kind from [`ErrorKind`] plus an optional cause.
//!
//! Callers ask "is this failure of kind X" with [`Error::kind`] instead of
//! comparing error values. The cause chain stays reachable through
//! [`std::error::Error::source`].

use thiserror::Error;

/// Boxed cause attached to an [`Error`].
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result type used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// The kind of failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum ErrorKind {
    /// The store key carries no `::` marker followed by hex pairs
    #[error("no hex IP found in store key")]
    NoHexIpFound,

    /// The captured hex run is not valid hex
    #[error("hex decode failed")]
    DecodingHexFailed,

    /// The decoded blob is shorter than 16 bytes
    #[error("invalid byte length for IPv4 conversion")]
    InvalidIpv4Length,

    /// The decoded bytes did not render as an address
    #[error("failed to convert hex to IP")]
    CannotConvertHexToIp,

    /// The store could not be reached
    #[error("failed to connect to store")]
    Connect,

    /// Namespace, set or key cannot form a store key
    #[error("invalid key")]
    InvalidKey,

    /// The store rejected an increment
    #[error("failed to increment count")]
    IncrementCount,

    /// The store rejected a scan of the whole set
    #[error("failed to scan all records")]
    ScanAllRecords,

    /// A single record of a scan could not be read
    #[error("error scanning record")]
    ScanRecord,

    /// A sequential import increment failed
    #[error("failed to set key")]
    SetKey,

    /// The input file could not be opened
    #[error("failed to read input file")]
    ReadInputFile,

    /// The input stream failed mid-read
    #[error("failed to process input file")]
    ProcessInputFile,

    /// One or more concurrent units of work failed
    #[error("failed to process records")]
    ProcessRecords,

    /// Listing the records failed
    #[error("failed to list records")]
    ListRecords,

    /// Appending to the report failed
    #[error("failed to write to report buffer")]
    WriteToBuffer,

    /// The output file could not be created
    #[error("failed to create output file")]
    CreateFile,

    /// The output file could not be written
    #[error("failed to write to output file")]
    WriteFile,
}

/// An error with a kind and an optional underlying cause.
#[derive(Debug, Error)]
#[error("{kind}")]
pub struct Error {
    kind: ErrorKind,
    #[source]
    source: Option<BoxError>,
}

impl Error {
    /// Creates an error without a cause.
    pub fn new(kind: ErrorKind) -> Self {
        Self { kind, source: None }
    }

    /// Creates an error wrapping `source`.
    pub fn with_source(kind: ErrorKind, source: impl Into<BoxError>) -> Self {
        Self {
            kind,
            source: Some(source.into()),
        }
    }

    /// Returns the kind of this error.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns true if this error is of the given kind.
    pub fn is(&self, kind: ErrorKind) -> bool {
        self.kind == kind
    }
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Error::new(kind)
    }
}
