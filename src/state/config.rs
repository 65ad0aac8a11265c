//! Store configuration.

use std::collections::HashSet;
use std::time::Duration;

use serde::Deserialize;

use super::error::{SessionError, SessionResult};
use super::location::DEFAULT_LOCATIONS;

/// Locations drawn from the catalog for each session.
pub const DEFAULT_LOCATIONS_PER_SESSION: usize = 12;

/// Random bytes in a session id (rendered as hex).
pub const DEFAULT_TOKEN_BYTES: usize = 3;

/// Upper bound on `token_bytes`.
pub const MAX_TOKEN_BYTES: usize = 16;

/// Default wait for `await_start` / `await_resolution` (5 minutes).
pub const DEFAULT_AWAIT_TIMEOUT_MS: u64 = 300_000;

/// Configuration for a [`SessionStore`](super::store::SessionStore).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Candidate round locations.
    pub catalog: Vec<String>,

    /// How many catalog entries each session shows to peaceful players.
    pub locations_per_session: usize,

    /// Random bytes per session id.
    pub token_bytes: usize,

    /// Fixed RNG seed. `None` seeds once from the OS.
    pub seed: Option<u64>,

    /// Timeout used by the service's blocking waits, in milliseconds.
    pub await_timeout_ms: u64,

    /// Let `join` append past `capacity` while the lobby is open.
    ///
    /// Off by default, which keeps `members.len() <= capacity` at all times.
    /// When on, an overfilled lobby can never start: `start` requires an
    /// exact head count and fails rather than truncating.
    pub allow_overfill: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            catalog: DEFAULT_LOCATIONS.iter().map(|s| s.to_string()).collect(),
            locations_per_session: DEFAULT_LOCATIONS_PER_SESSION,
            token_bytes: DEFAULT_TOKEN_BYTES,
            seed: None,
            await_timeout_ms: DEFAULT_AWAIT_TIMEOUT_MS,
            allow_overfill: false,
        }
    }
}

impl StoreConfig {
    /// Parse a config from JSON. Missing fields take their defaults.
    pub fn from_json(json: &str) -> SessionResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Set the RNG seed.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Replace the location catalog.
    pub fn with_catalog<I, S>(mut self, catalog: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.catalog = catalog.into_iter().map(Into::into).collect();
        self
    }

    /// Set how many locations each session draws.
    pub fn with_locations_per_session(mut self, count: usize) -> Self {
        self.locations_per_session = count;
        self
    }

    /// Set the id width in bytes.
    pub fn with_token_bytes(mut self, bytes: usize) -> Self {
        self.token_bytes = bytes;
        self
    }

    /// Set the default wait timeout. Precision is one millisecond.
    pub fn with_await_timeout(mut self, timeout: Duration) -> Self {
        self.await_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Allow lobbies to accept more members than their capacity.
    pub fn with_overfill(mut self, allow: bool) -> Self {
        self.allow_overfill = allow;
        self
    }

    /// Default wait timeout as a `Duration`.
    pub fn await_timeout(&self) -> Duration {
        Duration::from_millis(self.await_timeout_ms)
    }

    /// Check the config for values the store cannot work with.
    pub fn validate(&self) -> SessionResult<()> {
        if self.catalog.is_empty() {
            return Err(SessionError::InvalidArgument(
                "location catalog is empty".into(),
            ));
        }
        let mut seen = HashSet::with_capacity(self.catalog.len());
        if let Some(dup) = self.catalog.iter().find(|loc| !seen.insert(loc.as_str())) {
            return Err(SessionError::InvalidArgument(format!(
                "location catalog lists {:?} more than once",
                dup
            )));
        }
        if self.locations_per_session == 0 || self.locations_per_session > self.catalog.len() {
            return Err(SessionError::InvalidArgument(format!(
                "locations_per_session must be between 1 and {}, got {}",
                self.catalog.len(),
                self.locations_per_session
            )));
        }
        if self.token_bytes == 0 || self.token_bytes > MAX_TOKEN_BYTES {
            return Err(SessionError::InvalidArgument(format!(
                "token_bytes must be between 1 and {}, got {}",
                MAX_TOKEN_BYTES, self.token_bytes
            )));
        }
        Ok(())
    }
}
