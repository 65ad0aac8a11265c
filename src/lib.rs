//! Spyfall State Library
//!
//! This crate provides the lobby and round state for Spyfall, a social
//! deduction game: players gather in a lobby, some of them are secretly made
//! spies, and the round ends when a spy names the hidden location or a
//! peaceful player exposes the spies.
//!
//! # Overview
//!
//! - **Location Pool** - Fixed catalog of locations, sampled without
//!   replacement for each session.
//!
//! - **Session State Machine** - `Open → InProgress → SpyWon | PeacefulWon`,
//!   with guards checked before any field changes.
//!
//! - **Session Store** - The one owner of every session. Mutations of the
//!   same session are serialized; different sessions proceed in parallel.
//!
//! - **Watchers** - Callers can wait (with timeout and cancellation) for a
//!   session to start or finish instead of polling.
//!
//! - **Views** - What each player is allowed to see. Spies never see the
//!   locations.
//!
//! # Design Principles
//!
//! 1. **No read-modify-write from callers** - Joins append under the store's
//!    own lock; nobody writes back a stale member list.
//!
//! 2. **One seeded RNG per store** - Ids, locations and spies all come from
//!    it.
//!
//! 3. **No networking** - This crate is pure state, no HTTP or database.
//!
//! # Example
//!
//! ```rust
//! use spyfall_state::{GameService, Outcome, SessionStatus, StoreConfig};
//!
//! let service = GameService::new(StoreConfig::default()).unwrap();
//!
//! let lobby = service.create_session(3, 1).unwrap();
//! for player in ["alice", "bob", "carol"] {
//!     service.join_session(&lobby.id, player).unwrap();
//! }
//! service.start_session(&lobby.id).unwrap();
//!
//! // Whoever is peaceful can end the round by accusing.
//! let session = service.store().get(&lobby.id).unwrap();
//! let peaceful = session
//!     .members()
//!     .iter()
//!     .find(|p| !session.is_spy(p))
//!     .unwrap();
//! let result = service.check_location(&lobby.id, peaceful, "Bank").unwrap();
//!
//! assert_eq!(result.outcome, Outcome::PeacefulWon);
//! assert_eq!(result.view.status, SessionStatus::PeacefulWon);
//! ```

pub mod state;

// Re-export everything from state module at crate root
pub use state::*;
