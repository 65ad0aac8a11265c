//! Per-player projections of a session.
//!
//! The stored session knows everything. What a player receives is a view
//! built here, at the boundary. Spies never receive the location list or
//! the secret location, at any status. Peaceful members see both once the
//! round has started. The spy list is only revealed when the round is over.

use serde::Serialize;

use super::session::{PlayerId, Session, SessionId, SessionStatus};

/// Role of a player in a started round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Spy,
    Peaceful,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Spy => "spy",
            Self::Peaceful => "peaceful",
        }
    }
}

/// What one viewer is allowed to know about a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionView {
    #[serde(rename = "token")]
    pub id: SessionId,

    #[serde(rename = "amountpl")]
    pub capacity: usize,

    #[serde(rename = "amountspy")]
    pub spy_count: usize,

    #[serde(rename = "allplayers")]
    pub members: Vec<PlayerId>,

    pub status: SessionStatus,

    /// Viewer's role, once the round has started
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,

    /// Drawn locations; empty unless the viewer may see them
    pub locations: Vec<String>,

    /// Secret location; only for peaceful members of a started round
    #[serde(rename = "currentloc", skip_serializing_if = "Option::is_none")]
    pub secret_location: Option<String>,

    /// Spies; only once the round is over
    #[serde(rename = "spyplayers", skip_serializing_if = "Vec::is_empty")]
    pub spies: Vec<PlayerId>,
}

impl SessionView {
    /// View for someone outside the round, e.g. the lobby creator.
    pub fn public(session: &Session) -> Self {
        Self {
            id: session.id.clone(),
            capacity: session.capacity,
            spy_count: session.spy_count,
            members: session.members().to_vec(),
            status: session.status,
            role: None,
            locations: Vec::new(),
            secret_location: None,
            spies: revealed_spies(session),
        }
    }

    /// View for `player_id`.
    pub fn for_player(session: &Session, player_id: &str) -> Self {
        let mut view = Self::public(session);
        view.role = role_of(session, player_id);
        if view.role == Some(Role::Peaceful) {
            view.locations = session.locations().to_vec();
            view.secret_location = Some(session.secret_location().to_string());
        }
        view
    }

    /// Short human-readable summary for the viewer.
    pub fn message(&self) -> String {
        match (self.status, self.role) {
            (SessionStatus::Open, _) => "Waiting for players".to_string(),
            (SessionStatus::InProgress, Some(role)) => {
                format!("Game has started, you are {}", role.as_str())
            }
            (SessionStatus::InProgress, None) => "Game has started".to_string(),
            (status, _) => status.as_str().to_string(),
        }
    }

    /// Convert to JSON for sending to clients.
    pub fn to_json(&self) -> serde_json::Value {
        let mut value = serde_json::json!(self);
        value["message"] = serde_json::json!(self.message());
        value
    }
}

/// Role of `player_id`, if they are a member of a started round.
pub fn role_of(session: &Session, player_id: &str) -> Option<Role> {
    if session.status.is_open() || !session.has_member(player_id) {
        return None;
    }
    if session.is_spy(player_id) {
        Some(Role::Spy)
    } else {
        Some(Role::Peaceful)
    }
}

fn revealed_spies(session: &Session) -> Vec<PlayerId> {
    if session.status.is_terminal() {
        session.spies().to_vec()
    } else {
        Vec::new()
    }
}

impl Session {
    /// Project this session for `player_id`.
    pub fn view_for(&self, player_id: &str) -> SessionView {
        SessionView::for_player(self, player_id)
    }
}
