//! Error types for corelink
//!
//! Two families are kept apart:
//! - `XaError` is what a transaction manager sees. It carries an XA error code.
//! - `CommsError` is the typed hierarchy of every non-transactional operation
//!   (sessions, sends, ordering contexts, frame decoding).
//!
//! We use `thiserror` for automatic `Display` and `Error` trait implementations.

use crate::xa;
use std::io;
use thiserror::Error;

/// Result type alias for XA operations
pub type XaResult<T> = std::result::Result<T, XaError>;

/// Result type alias for non-transactional operations
pub type CommsResult<T> = std::result::Result<T, CommsError>;

/// An XA error: an XA error code plus a human-readable message
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{} ({code}): {message}", xa::error_code_name(*.code))]
pub struct XaError {
    /// XA error code (`XAER_*` or `XA_RB*`)
    pub code: i32,
    /// Description of the failure
    pub message: String,
}

impl XaError {
    /// Create an error with an arbitrary code
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Routine invoked in an improper context
    pub fn proto(message: impl Into<String>) -> Self {
        Self::new(xa::XAER_PROTO, message)
    }

    /// Invalid arguments
    pub fn inval(message: impl Into<String>) -> Self {
        Self::new(xa::XAER_INVAL, message)
    }

    /// Unknown Xid
    pub fn nota(message: impl Into<String>) -> Self {
        Self::new(xa::XAER_NOTA, message)
    }

    /// Resource manager unavailable
    pub fn rmfail(message: impl Into<String>) -> Self {
        Self::new(xa::XAER_RMFAIL, message)
    }

    /// Resource manager error
    pub fn rmerr(message: impl Into<String>) -> Self {
        Self::new(xa::XAER_RMERR, message)
    }

    /// XA error decoded from a reply frame
    pub fn from_remote(code: i32, message: impl Into<String>) -> Self {
        Self::new(code, message)
    }

    /// Normalize a failure seen around a network exchange.
    ///
    /// An XA error reported by the peer is returned unchanged. Anything else is
    /// logged and becomes `XAER_RMFAIL`.
    pub fn from_comms(err: CommsError, operation: &str) -> Self {
        match err {
            CommsError::Xa(xa_err) => xa_err,
            other => {
                tracing::warn!(
                    operation = operation,
                    error = %other,
                    "XA exchange failed, reporting XAER_RMFAIL"
                );
                Self::rmfail(format!("{} failed: {}", operation, other))
            }
        }
    }
}

/// Error types for non-transactional operations
#[derive(Debug, Error)]
pub enum CommsError {
    /// The link to the messaging engine failed
    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    /// The peer dropped the connection
    #[error("Connection dropped: {0}")]
    ConnectionDropped(String),

    /// The connection has been closed
    #[error("Connection unavailable: {0}")]
    ConnectionUnavailable(String),

    /// A resource on the messaging engine failed
    #[error("Resource error: {0}")]
    Resource(String),

    /// The call was not valid in the current state or with these arguments
    #[error("Incorrect call: {0}")]
    IncorrectCall(String),

    /// The caller is not authorized
    #[error("Not authorized: {0}")]
    NotAuthorized(String),

    /// A capacity bound was reached
    #[error("Limit exceeded: {0}")]
    LimitExceeded(String),

    /// The temporary destination no longer exists
    #[error("Temporary destination not found: {0}")]
    TemporaryDestinationNotFound(String),

    /// The operation is not possible in the current configuration
    #[error("Not possible in current configuration: {0}")]
    NotPossibleInCurrentConfiguration(String),

    /// The transaction was rolled back by the peer
    #[error("Rolled back: {0}")]
    Rollback(String),

    /// Internal error reported by the messaging engine
    #[error("Core error: {0}")]
    CoreError(String),

    /// An exception the client has no typed mapping for
    #[error("Remote exception {code}: {message}")]
    Remote {
        /// Exception id sent by the peer
        code: i16,
        /// Exception message sent by the peer
        message: String,
    },

    /// The peer reported an XA error
    #[error("XA error: {0}")]
    Xa(#[from] XaError),

    /// A frame did not have the expected shape
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// A handle was used before its network identity was assigned
    #[error("Identity not assigned: {0}")]
    IdentityNotAssigned(String),

    /// I/O error while reading or writing a frame
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl CommsError {
    /// True when the error means the link itself is gone
    pub fn is_connection_failure(&self) -> bool {
        matches!(
            self,
            CommsError::ConnectionLost(_) | CommsError::ConnectionDropped(_)
        )
    }
}
