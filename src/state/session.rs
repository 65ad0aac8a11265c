//! Session (lobby) state and its transition rules.
//!
//! # State Diagram
//!
//! ```text
//!              join (room left)
//!                ┌─────┐
//!                ▼     │
//!          ┌───────────┴┐   start (full)   ┌────────────┐
//!   ──────▶│    Open    │─────────────────▶│ InProgress │◀─┐
//!          └────────────┘                  └─────┬──────┘  │ spy guesses wrong
//!                                                │         │
//!                         ┌──────────────────────┼─────────┘
//!                         │ spy guesses secret   │ peaceful accuses
//!                         ▼                      ▼
//!                   ┌──────────┐          ┌─────────────┐
//!                   │  SpyWon  │          │ PeacefulWon │
//!                   └──────────┘          └─────────────┘
//! ```
//!
//! `SpyWon` and `PeacefulWon` are terminal. Every transition validates its
//! guard before touching any field, so a rejected call leaves the session
//! exactly as it was.

use std::collections::HashSet;
use std::fmt;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};

use super::error::{SessionError, SessionResult};
use super::location::sample_without_replacement;

/// Identifier of a player, as supplied by the identity provider.
pub type PlayerId = String;

/// Opaque session handle. Doubles as the shareable lobby code.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for SessionId {
    fn from(token: &str) -> Self {
        Self(token.to_string())
    }
}

impl From<String> for SessionId {
    fn from(token: String) -> Self {
        Self(token)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle status of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SessionStatus {
    /// Accepting players
    #[default]
    #[serde(rename = "Created")]
    Open,
    /// Roles assigned, round running
    #[serde(rename = "Started")]
    InProgress,
    /// A spy named the secret location
    #[serde(rename = "Spy won")]
    SpyWon,
    /// A peaceful player exposed the spies
    #[serde(rename = "Peaceful won")]
    PeacefulWon,
}

impl SessionStatus {
    pub const ALL: [SessionStatus; 4] = [
        Self::Open,
        Self::InProgress,
        Self::SpyWon,
        Self::PeacefulWon,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "Created",
            Self::InProgress => "Started",
            Self::SpyWon => "Spy won",
            Self::PeacefulWon => "Peaceful won",
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(self, Self::Open)
    }

    /// Check if the round has started (in progress or over).
    pub fn has_started(&self) -> bool {
        !self.is_open()
    }

    /// Check if the session is terminal (cannot change).
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::SpyWon | Self::PeacefulWon)
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a location check did to the round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Outcome {
    /// The spy named the secret location.
    SpyWon,
    /// A peaceful player ended the round.
    PeacefulWon,
    /// A spy guessed wrong; the round continues.
    WrongGuess,
}

impl Outcome {
    /// Status the session moves to, if any.
    pub fn status(&self) -> Option<SessionStatus> {
        match self {
            Self::SpyWon => Some(SessionStatus::SpyWon),
            Self::PeacefulWon => Some(SessionStatus::PeacefulWon),
            Self::WrongGuess => None,
        }
    }
}

/// Result of a join attempt that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinResult {
    /// Player appended to the member list
    Joined,
    /// Player was already a member; nothing changed
    AlreadyMember,
}

/// One round of the game.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    /// Unique session id
    #[serde(rename = "token")]
    pub id: SessionId,

    /// Target number of players
    #[serde(rename = "amountpl")]
    pub capacity: usize,

    /// Number of spies to assign at start
    #[serde(rename = "amountspy")]
    pub spy_count: usize,

    /// Players in join order
    #[serde(rename = "allplayers")]
    members: Vec<PlayerId>,

    /// Spies, chosen at start
    #[serde(rename = "spyplayers")]
    spies: Vec<PlayerId>,

    /// Locations drawn for this round
    locations: Vec<String>,

    /// The true location, one of `locations`
    #[serde(rename = "currentloc")]
    secret_location: String,

    /// Current lifecycle status
    pub status: SessionStatus,

    /// Bumped by every applied transition
    pub revision: u64,

    pub created_at: DateTime<Utc>,

    pub started_at: Option<DateTime<Utc>>,

    pub resolved_at: Option<DateTime<Utc>>,
}

impl Session {
    /// Create an open session.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if `spy_count` is not strictly between zero
    /// and `capacity`, or if `secret_location` is not one of `locations`.
    pub fn new(
        id: SessionId,
        capacity: usize,
        spy_count: usize,
        locations: Vec<String>,
        secret_location: String,
    ) -> SessionResult<Self> {
        validate_counts(capacity, spy_count)?;
        if !locations.contains(&secret_location) {
            return Err(SessionError::InvalidArgument(format!(
                "secret location {:?} is not among the drawn locations",
                secret_location
            )));
        }

        Ok(Self {
            id,
            capacity,
            spy_count,
            members: Vec::new(),
            spies: Vec::new(),
            locations,
            secret_location,
            status: SessionStatus::Open,
            revision: 0,
            created_at: Utc::now(),
            started_at: None,
            resolved_at: None,
        })
    }

    /// Players in join order.
    pub fn members(&self) -> &[PlayerId] {
        &self.members
    }

    /// Spies. Empty while the lobby is open.
    pub fn spies(&self) -> &[PlayerId] {
        &self.spies
    }

    /// Locations drawn for this round. Never hand this to a spy.
    pub fn locations(&self) -> &[String] {
        &self.locations
    }

    /// The secret location. Never hand this to a spy.
    pub fn secret_location(&self) -> &str {
        &self.secret_location
    }

    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    pub fn is_full(&self) -> bool {
        self.members.len() >= self.capacity
    }

    pub fn has_member(&self, player_id: &str) -> bool {
        self.members.iter().any(|m| m == player_id)
    }

    pub fn is_spy(&self, player_id: &str) -> bool {
        self.spies.iter().any(|s| s == player_id)
    }

    /// Check every structural invariant of the record.
    ///
    /// Sessions built through `new` and the transitions always pass. This is
    /// for records that arrive from outside, such as a persisted snapshot.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` naming the first broken invariant.
    pub fn validate(&self, allow_overfill: bool) -> SessionResult<()> {
        let broken = |what: String| {
            Err(SessionError::InvalidArgument(format!(
                "session {}: {}",
                self.id, what
            )))
        };

        validate_counts(self.capacity, self.spy_count)?;
        if !self.locations.contains(&self.secret_location) {
            return broken(format!(
                "secret location {:?} is not among the drawn locations",
                self.secret_location
            ));
        }
        if distinct(&self.members) != self.members.len() {
            return broken("member list has duplicates".into());
        }
        if !allow_overfill && self.members.len() > self.capacity {
            return broken(format!(
                "{} members exceed capacity {}",
                self.members.len(),
                self.capacity
            ));
        }

        if self.status.is_open() {
            if !self.spies.is_empty() {
                return broken("open lobby already has spies".into());
            }
            if self.started_at.is_some() || self.resolved_at.is_some() {
                return broken("open lobby carries start or end time".into());
            }
            return Ok(());
        }

        if self.members.len() != self.capacity {
            return broken(format!(
                "started with {} of {} players",
                self.members.len(),
                self.capacity
            ));
        }
        if self.spies.len() != self.spy_count || distinct(&self.spies) != self.spy_count {
            return broken(format!(
                "expected {} distinct spies, found {:?}",
                self.spy_count, self.spies
            ));
        }
        if let Some(stranger) = self.spies.iter().find(|s| !self.has_member(s)) {
            return broken(format!("spy {} is not a member", stranger));
        }
        if self.status.is_terminal() != self.resolved_at.is_some() {
            return broken(format!(
                "status {} does not match resolution time",
                self.status
            ));
        }
        Ok(())
    }

    /// Add a player to an open lobby.
    ///
    /// With `allow_overfill` off, a full lobby rejects new players. With it
    /// on, the member list may grow past `capacity`; `start` then refuses to
    /// run. Joining twice is a no-op.
    pub fn join(&mut self, player_id: &str, allow_overfill: bool) -> SessionResult<JoinResult> {
        self.ensure_not_terminal()?;
        if self.status.has_started() {
            return Err(SessionError::SessionAlreadyStarted);
        }
        if self.has_member(player_id) {
            return Ok(JoinResult::AlreadyMember);
        }
        if !allow_overfill && self.is_full() {
            return Err(SessionError::PreconditionFailed("lobby is full".into()));
        }

        self.members.push(player_id.to_string());
        self.revision += 1;
        Ok(JoinResult::Joined)
    }

    /// Assign spies and start the round.
    pub fn start<R>(&mut self, rng: &mut R) -> SessionResult<()>
    where
        R: Rng + ?Sized,
    {
        self.ensure_not_terminal()?;
        if self.status.has_started() {
            return Err(SessionError::SessionAlreadyStarted);
        }
        if self.members.len() != self.capacity {
            return Err(SessionError::PreconditionFailed(format!(
                "unable to start game: {} of {} players joined",
                self.members.len(),
                self.capacity
            )));
        }

        self.spies = sample_without_replacement(&self.members, self.spy_count, rng);
        self.status = SessionStatus::InProgress;
        self.started_at = Some(Utc::now());
        self.revision += 1;
        Ok(())
    }

    /// Evaluate a location claim.
    ///
    /// A spy naming the secret wins the round; a spy naming anything else
    /// changes nothing and may try again. A peaceful member calling this is
    /// a public accusation and always ends the round in their favour.
    pub fn resolve(&mut self, claimant: &str, claimed_location: &str) -> SessionResult<Outcome> {
        self.ensure_not_terminal()?;
        if self.status.is_open() {
            return Err(SessionError::PreconditionFailed(
                "game has not started".into(),
            ));
        }
        if !self.has_member(claimant) {
            return Err(SessionError::PreconditionFailed(format!(
                "{} is not playing in this session",
                claimant
            )));
        }

        let outcome = if self.is_spy(claimant) {
            if claimed_location == self.secret_location {
                Outcome::SpyWon
            } else {
                Outcome::WrongGuess
            }
        } else {
            Outcome::PeacefulWon
        };

        if let Some(status) = outcome.status() {
            self.status = status;
            self.resolved_at = Some(Utc::now());
            self.revision += 1;
        }
        Ok(outcome)
    }

    fn ensure_not_terminal(&self) -> SessionResult<()> {
        if self.status.is_terminal() {
            return Err(SessionError::SessionAlreadyTerminal);
        }
        Ok(())
    }
}

fn distinct(players: &[PlayerId]) -> usize {
    players.iter().collect::<HashSet<_>>().len()
}

/// Check `0 < spy_count < capacity`.
pub fn validate_counts(capacity: usize, spy_count: usize) -> SessionResult<()> {
    if spy_count == 0 || spy_count >= capacity {
        return Err(SessionError::InvalidArgument(format!(
            "spy count must be between 1 and {} for {} players, got {}",
            capacity.saturating_sub(1),
            capacity,
            spy_count
        )));
    }
    Ok(())
}
