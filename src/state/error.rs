//! Session errors.
//!
//! Every error here is a per-request outcome. None of them is fatal to the
//! process, and the store never retries on the caller's behalf.

use std::time::Duration;

use thiserror::Error;

use super::session::SessionId;

/// Result type for session operations.
pub type SessionResult<T> = Result<T, SessionError>;

/// Errors surfaced to callers of the session store.
#[derive(Debug, Error)]
pub enum SessionError {
    /// No session with this id exists (never created, or evicted).
    #[error("session not found: {0}")]
    NotFound(SessionId),

    /// Input rejected before any mutation.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The session is not in a state where this operation applies.
    #[error("precondition failed: {0}")]
    PreconditionFailed(String),

    /// The round has already started.
    #[error("game has started already")]
    SessionAlreadyStarted,

    /// The round is over; no further transitions are possible.
    #[error("game is already over")]
    SessionAlreadyTerminal,

    /// A wait elapsed before the session reached a state of interest.
    #[error("deadline exceeded after {0:?}")]
    DeadlineExceeded(Duration),

    /// A wait was cancelled by the caller.
    #[error("wait cancelled")]
    Cancelled,

    /// A snapshot could not be encoded or decoded.
    #[error("persistence error: {0}")]
    Persistence(#[from] serde_json::Error),
}

impl SessionError {
    /// Returns true if the caller may simply try the same request again.
    ///
    /// Only waits are retryable. Precondition errors mean the caller raced a
    /// transition and should re-fetch the session before deciding anything.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::DeadlineExceeded(_) | Self::Cancelled)
    }
}
