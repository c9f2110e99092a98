//! Error types for console-expect

use std::panic::Location;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during expect operations.
///
/// Most methods return `Result<T, ExpectError>`. Two variants are recoverable
/// conditions rather than failures: [`ExpectError::Timeout`] and
/// [`ExpectError::Eof`]. Both carry the output seen so far and the source
/// location of the call that raised them, so a failed wait can be reported
/// from the user's point of view.
///
/// # Examples
///
/// ```no_run
/// use console_expect::{ExpectError, Session};
/// use std::time::Duration;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let mut session = Session::builder()
///     .timeout(Duration::from_secs(5))
///     .spawn("some-command")
///     .await?;
///
/// match session.expect("done").await {
///     Ok(index) => println!("Matched pattern {index}"),
///     Err(ExpectError::Timeout { duration, before, .. }) => {
///         eprintln!("Timed out after {duration:?}, saw {before:?}");
///     }
///     Err(ExpectError::Eof { .. }) => {
///         eprintln!("Process exited unexpectedly");
///     }
///     Err(e) => return Err(e.into()),
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Error, Debug)]
pub enum ExpectError {
    /// Timeout waiting for pattern.
    ///
    /// Returned when no pattern matched before the deadline and the request
    /// did not contain [`Pattern::Timeout`](crate::Pattern::Timeout).
    #[error("Timeout after {duration:?} waiting for {searcher} (called at {caller})")]
    Timeout {
        /// Duration that was waited before timeout
        duration: Duration,
        /// Output received but not consumed by any match
        before: String,
        /// Description of the patterns that were being waited for
        searcher: String,
        /// Source location of the expect call
        caller: &'static Location<'static>,
    },

    /// End of stream reached before a pattern matched.
    ///
    /// Returned when the target exits (or the transport closes) and the
    /// request did not contain [`Pattern::Eof`](crate::Pattern::Eof).
    #[error("End of stream reached before pattern matched (called at {caller})")]
    Eof {
        /// All output that was left unconsumed
        before: String,
        /// Source location of the call
        caller: &'static Location<'static>,
    },

    /// The request itself is malformed.
    ///
    /// Reported before any I/O happens.
    #[error("Invalid request: {0}")]
    Usage(String),

    /// The session or connection was already closed.
    #[error("I/O operation on a closed session")]
    Closed,

    /// Invalid pattern.
    #[error("Invalid pattern: {0}")]
    PatternError(#[from] PatternError),

    /// Transport failure between the host and the capture process.
    #[error("Transport error: {0}")]
    TransportError(#[from] TransportError),

    /// I/O error.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Process spawning error.
    ///
    /// Returned when the target command cannot be resolved, the capture
    /// process cannot be started, or the capture process reports that it
    /// could not launch the target.
    #[error("Failed to spawn process: {0}")]
    SpawnError(String),
}

impl ExpectError {
    /// Output seen before a timeout or end of stream, if this is one of them.
    pub fn before(&self) -> Option<&str> {
        match self {
            ExpectError::Timeout { before, .. } | ExpectError::Eof { before, .. } => Some(before),
            _ => None,
        }
    }

    /// Returns `true` for [`ExpectError::Timeout`].
    pub fn is_timeout(&self) -> bool {
        matches!(self, ExpectError::Timeout { .. })
    }

    /// Returns `true` for [`ExpectError::Eof`].
    pub fn is_eof(&self) -> bool {
        matches!(self, ExpectError::Eof { .. })
    }
}

/// Errors related to pattern creation or matching.
#[derive(Error, Debug)]
pub enum PatternError {
    /// Invalid regex pattern.
    #[error("Invalid regex: {0}")]
    InvalidRegex(#[from] regex::Error),

    /// Empty pattern.
    ///
    /// Returned when a literal pattern is the empty string.
    #[error("Pattern cannot be empty")]
    EmptyPattern,

    /// A regex was given where only literal strings are accepted.
    #[error("Pattern {0} is not a literal string")]
    NotLiteral(usize),
}

/// Errors raised by the host/capture transport.
#[derive(Error, Debug)]
pub enum TransportError {
    /// Connecting to the capture process failed for a reason other than
    /// the endpoint not existing yet.
    #[error("Failed to connect to {endpoint}: {source}")]
    Connect {
        /// Pipe name or socket address
        endpoint: String,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// The capture process never opened its endpoint.
    #[error("Timed out after {timeout:?} connecting to {endpoint}")]
    ConnectTimeout {
        /// Pipe name or socket address
        endpoint: String,
        /// How long connecting was retried
        timeout: Duration,
    },

    /// The handshake frame was missing or malformed.
    #[error("Handshake failed: {0}")]
    Handshake(String),

    /// The connection was closed, by this side or by the peer.
    #[error("Connection closed")]
    Closed,

    /// The selected transport is not available on this platform.
    #[error("Transport not supported on this platform: {0}")]
    Unsupported(&'static str),

    /// I/O error on an established connection.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
