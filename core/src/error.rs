//! Error types for the networking client.
//!
//! # Design
//! Every per-request failure reaches the caller through the completion as a
//! `NetworkingError`, and `code()` gives one numeric space for all of them:
//! HTTP statuses are positive, transport and cancellation codes negative
//! (URL-loading style), so a caller can tell a 404 from a cancel by value.
//!
//! `FixtureError` is different in kind: it is a setup mistake in a test and is
//! returned from the stub registration call itself, never from a request.

use std::fmt;
use std::io;
use std::path::PathBuf;

/// The request was cancelled before the transport resolved it.
pub const CANCELLED_CODE: i32 = -999;
/// Unclassified transport failure.
pub const UNKNOWN_CODE: i32 = -1;
pub const BAD_URL_CODE: i32 = -1000;
pub const TIMED_OUT_CODE: i32 = -1001;
pub const CANNOT_FIND_HOST_CODE: i32 = -1003;
pub const CANNOT_CONNECT_CODE: i32 = -1004;
/// A success response claimed to be JSON but did not parse.
pub const CANNOT_PARSE_RESPONSE_CODE: i32 = -1017;

/// A failure reported by a `Transport` before any HTTP status was received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportError {
    pub code: i32,
    pub message: String,
}

impl TransportError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn cancelled() -> Self {
        Self::new(CANCELLED_CODE, "cancelled")
    }

    pub fn is_cancelled(&self) -> bool {
        self.code == CANCELLED_CODE
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "transport error {}: {}", self.code, self.message)
    }
}

impl std::error::Error for TransportError {}

/// Errors delivered through a request completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetworkingError {
    /// The server answered with a status of 400 or above. `body` is kept for
    /// diagnostics only; the outcome itself carries no body.
    Http { status: u16, body: String },

    /// The request was cancelled by path, by identity, or on client drop.
    Cancelled,

    /// The transport failed without an HTTP status (timeout, DNS, refused).
    Transport(TransportError),

    /// A success response advertised JSON but could not be decoded.
    Deserialization(String),

    /// The request parameters could not be encoded as JSON.
    Serialization(String),
}

impl NetworkingError {
    pub fn code(&self) -> i32 {
        match self {
            NetworkingError::Http { status, .. } => i32::from(*status),
            NetworkingError::Cancelled => CANCELLED_CODE,
            NetworkingError::Transport(error) => error.code,
            NetworkingError::Deserialization(_) => CANNOT_PARSE_RESPONSE_CODE,
            NetworkingError::Serialization(_) => UNKNOWN_CODE,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, NetworkingError::Cancelled)
    }
}

impl From<TransportError> for NetworkingError {
    fn from(error: TransportError) -> Self {
        if error.is_cancelled() {
            NetworkingError::Cancelled
        } else {
            NetworkingError::Transport(error)
        }
    }
}

impl fmt::Display for NetworkingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetworkingError::Http { status, body } if body.is_empty() => {
                write!(f, "HTTP {status}")
            }
            NetworkingError::Http { status, body } => write!(f, "HTTP {status}: {body}"),
            NetworkingError::Cancelled => write!(f, "request cancelled"),
            NetworkingError::Transport(error) => write!(f, "{error}"),
            NetworkingError::Deserialization(msg) => {
                write!(f, "deserialization failed: {msg}")
            }
            NetworkingError::Serialization(msg) => {
                write!(f, "serialization failed: {msg}")
            }
        }
    }
}

impl std::error::Error for NetworkingError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            NetworkingError::Transport(error) => Some(error),
            _ => None,
        }
    }
}

/// Errors raised while registering a file-backed fake response.
#[derive(Debug)]
pub enum FixtureError {
    /// No file exists at the resolved path.
    NotFound { path: PathBuf },

    /// The file exists but could not be read.
    Io { path: PathBuf, source: io::Error },

    /// The file was read but is not valid JSON.
    InvalidJson { path: PathBuf, message: String },
}

impl FixtureError {
    pub fn path(&self) -> &PathBuf {
        match self {
            FixtureError::NotFound { path }
            | FixtureError::Io { path, .. }
            | FixtureError::InvalidJson { path, .. } => path,
        }
    }
}

impl fmt::Display for FixtureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FixtureError::NotFound { path } => {
                write!(f, "fixture not found: {}", path.display())
            }
            FixtureError::Io { path, source } => {
                write!(f, "failed to read fixture {}: {source}", path.display())
            }
            FixtureError::InvalidJson { path, message } => {
                write!(f, "fixture {} is not valid JSON: {message}", path.display())
            }
        }
    }
}

impl std::error::Error for FixtureError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            FixtureError::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}
