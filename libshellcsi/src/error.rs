//! CSI error types.
//!
//! All service-level errors in `libshellcsi` are represented by the
//! [`CsiError`] enum.  Its variants mirror the status codes a CSI caller
//! branches on, and it implements [`Serialize`]/[`Deserialize`] so errors can
//! travel across the QUIC transport layer.
//!
//! Messages carried by a [`CsiError`] are deliberately short: command lines
//! and raw script output are logged where the failure happens and never
//! copied into the error.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Unified error type for CSI operations.
#[derive(Debug, Error, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub enum CsiError {
    /// The caller supplied a missing or malformed argument, including an
    /// identifier without the expected namespace tag.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The operation depends on an optional command that is not configured,
    /// or on a service this process does not host.
    #[error("unimplemented: {0}")]
    Unimplemented(String),

    /// Another operation currently holds the lock for the same resource.
    #[error("aborted: {0}")]
    Aborted(String),

    /// The mount or a filesystem call was refused by the kernel.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// Script failure, incomplete reply, or an unexpected filesystem error.
    #[error("internal error: {0}")]
    Internal(String),

    /// A QUIC / transport-level error.
    #[error("transport error: {0}")]
    TransportError(String),
}

impl CsiError {
    /// Create a [`CsiError::TransportError`] from anything that implements
    /// [`std::fmt::Display`].
    pub fn transport<E: std::fmt::Display>(e: E) -> Self {
        Self::TransportError(e.to_string())
    }

    /// Create a [`CsiError::Internal`] from anything that implements
    /// [`std::fmt::Display`].
    pub fn internal<E: std::fmt::Display>(e: E) -> Self {
        Self::Internal(e.to_string())
    }

    /// Short name of the status code, used in log fields.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidArgument(_) => "InvalidArgument",
            Self::Unimplemented(_) => "Unimplemented",
            Self::Aborted(_) => "Aborted",
            Self::PermissionDenied(_) => "PermissionDenied",
            Self::Internal(_) => "Internal",
            Self::TransportError(_) => "Unavailable",
        }
    }
}

impl From<tokio::task::JoinError> for CsiError {
    fn from(e: tokio::task::JoinError) -> Self {
        Self::Internal(format!("background task failed: {e}"))
    }
}
