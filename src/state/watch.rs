//! Waiting for session transitions.
//!
//! A waiter subscribes to the session's slot before looking at its state,
//! so a transition that lands between the check and the wait is never
//! missed. While suspended it holds no lock and burns no CPU. It wakes only
//! when `start` or `resolve` publishes a new state.
//!
//! Registration is the subscription itself. It ends when the wait returns
//! or its future is dropped, whichever comes first, so cancelled or timed
//! out callers leave nothing behind.

use std::future::Future;
use std::time::Duration;

use tracing::debug;

use super::error::{SessionError, SessionResult};
use super::session::{Session, SessionId, SessionStatus};
use super::store::SessionStore;

/// Set of statuses a waiter wants to see.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Interest {
    mask: u8,
}

impl Interest {
    /// Interest in exactly these statuses.
    pub fn of(statuses: &[SessionStatus]) -> Self {
        statuses.iter().fold(Self::default(), |interest, s| interest.with(*s))
    }

    /// Any status past `Open`. A round that starts and ends before the
    /// waiter runs still satisfies it.
    pub fn started() -> Self {
        Self::of(&[
            SessionStatus::InProgress,
            SessionStatus::SpyWon,
            SessionStatus::PeacefulWon,
        ])
    }

    /// Any terminal status.
    pub fn resolved() -> Self {
        Self::of(&[SessionStatus::SpyWon, SessionStatus::PeacefulWon])
    }

    pub fn with(mut self, status: SessionStatus) -> Self {
        self.mask |= Self::bit(status);
        self
    }

    pub fn contains(&self, status: SessionStatus) -> bool {
        self.mask & Self::bit(status) != 0
    }

    pub fn is_empty(&self) -> bool {
        self.mask == 0
    }

    fn bit(status: SessionStatus) -> u8 {
        match status {
            SessionStatus::Open => 1,
            SessionStatus::InProgress => 1 << 1,
            SessionStatus::SpyWon => 1 << 2,
            SessionStatus::PeacefulWon => 1 << 3,
        }
    }
}

impl SessionStore {
    /// Wait until the session's status is in `interest`.
    ///
    /// Returns immediately if it already is. Otherwise suspends until a
    /// transition satisfies the interest, `timeout` elapses, or `cancel`
    /// completes.
    ///
    /// # Errors
    ///
    /// - `NotFound` if the session does not exist or is evicted mid-wait.
    /// - `InvalidArgument` if `interest` is empty.
    /// - `DeadlineExceeded` on timeout. The caller may wait again.
    /// - `Cancelled` if `cancel` resolves first.
    pub async fn await_status<C>(
        &self,
        id: &SessionId,
        interest: Interest,
        timeout: Duration,
        cancel: C,
    ) -> SessionResult<Session>
    where
        C: Future<Output = ()>,
    {
        if interest.is_empty() {
            return Err(SessionError::InvalidArgument(
                "no statuses to wait for".into(),
            ));
        }

        let mut rx = self.subscribe(id)?;
        debug!(session = %id, ?interest, "waiter registered");

        let wait = async {
            match rx.wait_for(|session| interest.contains(session.status)).await {
                Ok(session) => Ok(Session::clone(&session)),
                Err(_) => Err(SessionError::NotFound(id.clone())),
            }
        };

        let result = tokio::select! {
            biased;
            _ = cancel => Err(SessionError::Cancelled),
            waited = tokio::time::timeout(timeout, wait) => match waited {
                Ok(result) => result,
                Err(_) => Err(SessionError::DeadlineExceeded(timeout)),
            },
        };

        debug!(session = %id, ok = result.is_ok(), "waiter released");
        result
    }
}
