//! Error types for the conversion engine.
//!
//! One enumeration covers every layer of the pipeline: the CVS line protocol,
//! the in-memory history model, the scheduler/fixup/emission passes, and the
//! process entry point. It integrates with `thiserror` for `Display` and
//! source chaining, matching the five error kinds the engine distinguishes:
//! protocol violations, resource exhaustion, internal invariant violations,
//! bad configuration, and upstream connection failures.
//!
//! All variants are fatal: the engine does not retry above the fetch
//! driver's documented degraded-batch fallback, which is not an error path.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CloneError {
    /// Unexpected server reply, malformed entry line, missing `ok`
    /// terminator, or an embedded NUL in a supposedly text line.
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// Allocation failure or a stream I/O failure that isn't better
    /// described as an upstream connection problem.
    #[error("resource exhausted: {0}")]
    Resource(String),

    /// An internal consistency assertion failed: an unknown file/version
    /// was referenced, or a version was fetched without ever receiving a
    /// body for it.
    #[error("internal invariant violated: {0}")]
    Invariant(String),

    /// Bad CLI arguments or an unparsable CVS root string.
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// Socket, connect, fork, or exec failure while reaching the remote
    /// server.
    #[error("could not reach upstream: {0}")]
    Upstream(String),

    /// Wraps the underlying I/O error so call sites can use `?` freely;
    /// classified as resource-exhaustion at the diagnostic boundary.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, CloneError>;

impl CloneError {
    pub fn protocol(msg: impl Into<String>) -> Self {
        CloneError::Protocol(msg.into())
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        CloneError::Invariant(msg.into())
    }

    pub fn configuration(msg: impl Into<String>) -> Self {
        CloneError::Configuration(msg.into())
    }

    pub fn upstream(msg: impl Into<String>) -> Self {
        CloneError::Upstream(msg.into())
    }
}
