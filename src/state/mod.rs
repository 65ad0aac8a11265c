//! State management module for Spyfall sessions.
//!
//! - `location` - Location catalog and sampling without replacement
//! - `session` - Session record and its transition rules
//! - `store` - Concurrent session table with per-session exclusion
//! - `watch` - Waiting for a session to reach a status
//! - `view` - Per-player projections (what a spy may not see)
//! - `config` / `error` - Store configuration and error types
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                          GameService                             │
//! │   create / join / start / check_location      await_start /      │
//! │                  │                            await_resolution   │
//! │                  ▼                                   │           │
//! │  ┌────────────────────────────────────────────┐      │           │
//! │  │               SessionStore                 │      │           │
//! │  │                                            │      │           │
//! │  │  id → slot (watch::Sender<Session>)  ◀─────┼──────┘           │
//! │  │         │  per-session lock,               │  subscribe       │
//! │  │         │  publishes each transition       │                  │
//! │  │         ▼                                  │                  │
//! │  │  Session: Open → InProgress → SpyWon       │                  │
//! │  │                             → PeacefulWon  │                  │
//! │  │                                            │                  │
//! │  │  LocationPool + seeded StdRng              │                  │
//! │  └────────────────────────────────────────────┘                  │
//! └──────────────────────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod error;
pub mod location;
pub mod session;
pub mod store;
pub mod view;
pub mod watch;

use std::future::Future;
use std::sync::Arc;

pub use config::StoreConfig;
pub use error::{SessionError, SessionResult};
pub use location::{sample_without_replacement, LocationPool, DEFAULT_LOCATIONS};
pub use session::{JoinResult, Outcome, PlayerId, Session, SessionId, SessionStatus};
pub use store::SessionStore;
pub use view::{Role, SessionView};
pub use watch::Interest;

/// Inbound entry points for players and lobby creators.
///
/// Cheap to clone; every clone shares one store. Player identities are
/// taken as given: authentication happens before a call reaches here.
#[derive(Debug, Clone)]
pub struct GameService {
    store: Arc<SessionStore>,
}

/// Result of a location check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckResult {
    pub outcome: Outcome,
    pub view: SessionView,
}

impl GameService {
    pub fn new(config: StoreConfig) -> SessionResult<Self> {
        Ok(Self::with_store(Arc::new(SessionStore::new(config)?)))
    }

    pub fn with_store(store: Arc<SessionStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    /// Open a new lobby.
    pub fn create_session(&self, capacity: usize, spy_count: usize) -> SessionResult<SessionView> {
        let session = self.store.create(capacity, spy_count)?;
        Ok(SessionView::public(&session))
    }

    /// Join a lobby as `player_id`.
    pub fn join_session(&self, id: &SessionId, player_id: &str) -> SessionResult<SessionView> {
        let session = self.store.join(id, player_id)?;
        Ok(session.view_for(player_id))
    }

    /// Assign roles and start the round.
    pub fn start_session(&self, id: &SessionId) -> SessionResult<()> {
        self.store.start(id).map(|_| ())
    }

    /// Block until the round has started, then return `player_id`'s view.
    pub async fn await_start<C>(
        &self,
        id: &SessionId,
        player_id: &str,
        cancel: C,
    ) -> SessionResult<SessionView>
    where
        C: Future<Output = ()>,
    {
        let timeout = self.store.config().await_timeout();
        let session = self
            .store
            .await_status(id, Interest::started(), timeout, cancel)
            .await?;
        Ok(session.view_for(player_id))
    }

    /// Claim a location (spy) or accuse (peaceful member).
    pub fn check_location(
        &self,
        id: &SessionId,
        player_id: &str,
        claimed_location: &str,
    ) -> SessionResult<CheckResult> {
        let (session, outcome) = self.store.resolve(id, player_id, claimed_location)?;
        Ok(CheckResult {
            outcome,
            view: session.view_for(player_id),
        })
    }

    /// Block until the round is over, then return `player_id`'s view.
    pub async fn await_resolution<C>(
        &self,
        id: &SessionId,
        player_id: &str,
        cancel: C,
    ) -> SessionResult<SessionView>
    where
        C: Future<Output = ()>,
    {
        let timeout = self.store.config().await_timeout();
        let session = self
            .store
            .await_status(id, Interest::resolved(), timeout, cancel)
            .await?;
        Ok(session.view_for(player_id))
    }
}
