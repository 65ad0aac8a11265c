//! Session store.
//!
//! Owns the authoritative copy of every session. Each session lives in its
//! own slot, a `tokio::sync::watch` channel whose sender holds the current
//! state. Mutations run inside `send_if_modified`, so the slot's lock is the
//! per-session exclusion region and every applied transition is published
//! to watchers in the same critical section.
//!
//! The table lock is only held to look up, insert or remove a slot. Work on
//! different sessions never contends on anything but that short lookup.
//!
//! Lock order: table, then slot, then RNG. Nothing takes the table lock
//! while holding a slot.

use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use chrono::{Duration as ChronoDuration, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::config::StoreConfig;
use super::error::{SessionError, SessionResult};
use super::location::LocationPool;
use super::session::{validate_counts, JoinResult, Outcome, Session, SessionId};

type Slot = Arc<watch::Sender<Session>>;

/// Fresh ids tried by `create` before it gives up.
pub const MAX_ID_ATTEMPTS: usize = 64;

/// Concurrent table of sessions keyed by id.
#[derive(Debug)]
pub struct SessionStore {
    config: StoreConfig,
    pool: LocationPool,
    rng: Mutex<StdRng>,
    sessions: RwLock<HashMap<SessionId, Slot>>,
}

impl SessionStore {
    /// Create an empty store.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the config does not validate.
    pub fn new(config: StoreConfig) -> SessionResult<Self> {
        config.validate()?;
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        Ok(Self {
            pool: LocationPool::new(config.catalog.clone()),
            config,
            rng: Mutex::new(rng),
            sessions: RwLock::new(HashMap::new()),
        })
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Create and register a new open session.
    ///
    /// Candidate ids are drawn without holding the table lock, which is
    /// taken only to claim a vacant id. At most [`MAX_ID_ATTEMPTS`] ids are
    /// tried.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if `spy_count` is not strictly between zero
    /// and `capacity`, and `PreconditionFailed` if no free id turns up
    /// because the id space is (nearly) used up. Nothing is registered in
    /// either case.
    pub fn create(&self, capacity: usize, spy_count: usize) -> SessionResult<Session> {
        validate_counts(capacity, spy_count)?;

        let (locations, secret) = {
            let mut rng = self.rng();
            self.pool
                .sample(self.config.locations_per_session, &mut *rng)?
        };
        let mut session = Session::new(
            SessionId::new(String::new()),
            capacity,
            spy_count,
            locations,
            secret,
        )?;

        for _ in 0..MAX_ID_ATTEMPTS {
            if self.id_space_exhausted() {
                break;
            }
            let candidate = self.next_token();
            let claimed = match self.write_table().entry(candidate) {
                Entry::Vacant(entry) => {
                    session.id = entry.key().clone();
                    let (tx, _) = watch::channel(session.clone());
                    entry.insert(Arc::new(tx));
                    true
                }
                Entry::Occupied(entry) => {
                    debug!(session = %entry.key(), "session id collision, regenerating");
                    false
                }
            };
            if claimed {
                info!(session = %session.id, capacity, spy_count, "session created");
                return Ok(session);
            }
        }

        warn!(count = self.count(), "no free session id left");
        Err(SessionError::PreconditionFailed(
            "session id space exhausted".into(),
        ))
    }

    /// Read-only snapshot of a session.
    pub fn get(&self, id: &SessionId) -> SessionResult<Session> {
        let slot = self.slot(id)?;
        let session = slot.borrow().clone();
        Ok(session)
    }

    /// Add a player to an open session and return the updated snapshot.
    ///
    /// The append happens under the session's own lock, so concurrent joins
    /// never overwrite each other and never interleave with `start`.
    pub fn join(&self, id: &SessionId, player_id: &str) -> SessionResult<Session> {
        let allow_overfill = self.config.allow_overfill;
        let (result, snapshot) =
            self.mutate(id, |session| session.join(player_id, allow_overfill))?;
        if result == JoinResult::Joined {
            debug!(
                session = %id,
                player = player_id,
                members = snapshot.member_count(),
                "player joined"
            );
        }
        Ok(snapshot)
    }

    /// Assign spies and move the session to `InProgress`.
    pub fn start(&self, id: &SessionId) -> SessionResult<Session> {
        let ((), snapshot) = self.mutate(id, |session| {
            let mut rng = self.rng();
            session.start(&mut *rng)
        })?;
        info!(session = %id, spies = snapshot.spy_count, "game started");
        Ok(snapshot)
    }

    /// Evaluate a location claim and apply the resulting transition.
    pub fn resolve(
        &self,
        id: &SessionId,
        claimant: &str,
        claimed_location: &str,
    ) -> SessionResult<(Session, Outcome)> {
        let (outcome, snapshot) =
            self.mutate(id, |session| session.resolve(claimant, claimed_location))?;
        match outcome {
            Outcome::WrongGuess => {
                debug!(session = %id, player = claimant, "spy guessed wrong");
            }
            _ => {
                info!(session = %id, player = claimant, status = %snapshot.status, "game over");
            }
        }
        Ok((snapshot, outcome))
    }

    /// Remove a session. Its waiters are released with `NotFound`.
    pub fn remove(&self, id: &SessionId) -> Option<Session> {
        let slot = self.write_table().remove(id)?;
        let session = slot.borrow().clone();
        Some(session)
    }

    /// Remove terminal sessions resolved more than `max_age` ago.
    pub fn evict_terminal(&self, max_age: ChronoDuration) -> Vec<SessionId> {
        let cutoff = Utc::now() - max_age;
        let mut sessions = self.write_table();
        let expired: Vec<SessionId> = sessions
            .iter()
            .filter(|(_, slot)| {
                let session = slot.borrow();
                session.status.is_terminal()
                    && session.resolved_at.is_some_and(|at| at <= cutoff)
            })
            .map(|(id, _)| id.clone())
            .collect();

        for id in &expired {
            sessions.remove(id);
        }
        if !expired.is_empty() {
            debug!(count = expired.len(), "evicted finished sessions");
        }
        expired
    }

    /// Count sessions.
    pub fn count(&self) -> usize {
        self.read_table().len()
    }

    /// Count sessions that are open or in progress.
    pub fn active_count(&self) -> usize {
        self.read_table()
            .values()
            .filter(|slot| !slot.borrow().status.is_terminal())
            .count()
    }

    /// Get all session ids.
    pub fn ids(&self) -> Vec<SessionId> {
        self.read_table().keys().cloned().collect()
    }

    /// Number of callers currently waiting on a session.
    pub fn watcher_count(&self, id: &SessionId) -> SessionResult<usize> {
        Ok(self.slot(id)?.receiver_count())
    }

    /// Copy of every session, for persistence.
    pub fn snapshot(&self) -> Vec<Session> {
        let slots: Vec<Slot> = self.read_table().values().cloned().collect();
        slots.iter().map(|slot| slot.borrow().clone()).collect()
    }

    /// Serialize every session to JSON.
    pub fn export_json(&self) -> SessionResult<String> {
        Ok(serde_json::to_string(&self.snapshot())?)
    }

    /// Restore sessions from a JSON snapshot. Ids already present are kept
    /// as they are. Returns how many sessions were added.
    pub fn import_json(&self, json: &str) -> SessionResult<usize> {
        let restored: Vec<Session> = serde_json::from_str(json)?;
        self.restore(restored)
    }

    /// Register previously persisted sessions. Ids already present are kept
    /// as they are. Returns how many sessions were added.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if any record breaks a session invariant
    /// (see [`Session::validate`]) or repeats an id. Nothing is registered
    /// in that case.
    pub fn restore(&self, restored: Vec<Session>) -> SessionResult<usize> {
        let mut seen = HashSet::with_capacity(restored.len());
        for session in &restored {
            session.validate(self.config.allow_overfill)?;
            if !seen.insert(&session.id) {
                return Err(SessionError::InvalidArgument(format!(
                    "session {} appears twice in the snapshot",
                    session.id
                )));
            }
        }

        let mut sessions = self.write_table();
        let mut added = 0;
        for session in restored {
            if let Entry::Vacant(entry) = sessions.entry(session.id.clone()) {
                let (tx, _) = watch::channel(session);
                entry.insert(Arc::new(tx));
                added += 1;
            }
        }
        if added > 0 {
            info!(count = added, "sessions restored");
        }
        Ok(added)
    }

    /// Receiver that observes every published state of a session.
    pub(crate) fn subscribe(&self, id: &SessionId) -> SessionResult<watch::Receiver<Session>> {
        Ok(self.slot(id)?.subscribe())
    }

    /// Run `op` under the session's lock. Watchers are woken only if the
    /// operation succeeded and bumped the revision.
    fn mutate<T, F>(&self, id: &SessionId, op: F) -> SessionResult<(T, Session)>
    where
        F: FnOnce(&mut Session) -> SessionResult<T>,
    {
        let slot = self.slot(id)?;
        let mut result = Err(SessionError::NotFound(id.clone()));
        slot.send_if_modified(|session| {
            let revision = session.revision;
            result = op(session).map(|value| (value, session.clone()));
            session.revision != revision
        });
        result
    }

    fn slot(&self, id: &SessionId) -> SessionResult<Slot> {
        self.read_table()
            .get(id)
            .cloned()
            .ok_or_else(|| SessionError::NotFound(id.clone()))
    }

    fn next_token(&self) -> SessionId {
        let mut rng = self.rng();
        let token: String = (0..self.config.token_bytes)
            .map(|_| format!("{:02x}", rng.random::<u8>()))
            .collect();
        SessionId::new(token)
    }

    /// True once every id of the configured width is taken.
    fn id_space_exhausted(&self) -> bool {
        let width = u32::try_from(self.config.token_bytes).unwrap_or(u32::MAX);
        match 256usize.checked_pow(width) {
            Some(space) => self.count() >= space,
            None => false,
        }
    }

    fn rng(&self) -> MutexGuard<'_, StdRng> {
        self.rng.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn read_table(&self) -> std::sync::RwLockReadGuard<'_, HashMap<SessionId, Slot>> {
        self.sessions.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_table(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<SessionId, Slot>> {
        self.sessions.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::session::SessionStatus;
    use pretty_assertions::assert_eq;
    use std::sync::{mpsc, Barrier};
    use std::thread;
    use std::time::Duration;

    fn make_store() -> SessionStore {
        SessionStore::new(StoreConfig::default().with_seed(42)).unwrap()
    }

    fn fill(store: &SessionStore, id: &SessionId, players: &[&str]) {
        for p in players {
            store.join(id, p).unwrap();
        }
    }

    #[test]
    fn test_create() {
        let store = make_store();
        let session = store.create(3, 1).unwrap();

        assert_eq!(session.id.as_str().len(), 6);
        assert!(session
            .id
            .as_str()
            .chars()
            .all(|c| matches!(c, '0'..='9' | 'a'..='f')));
        assert_eq!(session.status, SessionStatus::Open);
        assert_eq!(session.locations().len(), 12);
        assert!(session.locations().contains(&session.secret_location().to_string()));
        assert_eq!(store.count(), 1);
        assert_eq!(store.get(&session.id).unwrap(), session);
    }

    #[test]
    fn test_create_rejects_bad_counts() {
        let store = make_store();
        for (capacity, spies) in [(3, 0), (3, 3), (2, 5)] {
            assert!(matches!(
                store.create(capacity, spies),
                Err(SessionError::InvalidArgument(_))
            ));
        }
        assert_eq!(store.count(), 0);
    }

    #[test]
    fn test_create_avoids_id_collisions() {
        // One-byte ids leave 256 slots; 200 sessions must still be distinct.
        let store = one_byte_store();

        let ids: HashSet<SessionId> = (0..200).map(|_| store.create(3, 1).unwrap().id).collect();

        assert_eq!(ids.len(), 200);
        assert_eq!(store.count(), 200);
    }

    fn one_byte_store() -> SessionStore {
        SessionStore::new(StoreConfig::default().with_seed(5).with_token_bytes(1)).unwrap()
    }

    fn lobby_with_id(token: String) -> Session {
        Session::new(
            SessionId::new(token),
            3,
            1,
            vec!["Bank".into(), "Casino".into()],
            "Bank".into(),
        )
        .unwrap()
    }

    #[test]
    fn test_create_fails_fast_when_ids_run_out() {
        let store = one_byte_store();
        let every_id: Vec<Session> = (0..=u8::MAX)
            .map(|byte| lobby_with_id(format!("{:02x}", byte)))
            .collect();
        assert_eq!(store.restore(every_id).unwrap(), 256);

        let first = SessionId::from("00");
        let (tx, rx) = mpsc::channel();
        thread::scope(|s| {
            let store = &store;
            s.spawn(move || {
                let _ = tx.send(store.create(3, 1));
            });

            // Other sessions stay usable while create looks for an id.
            store.join(&first, "A").unwrap();

            let result = rx
                .recv_timeout(Duration::from_secs(2))
                .expect("create should give up instead of spinning");
            assert!(matches!(result, Err(SessionError::PreconditionFailed(_))));
        });

        assert_eq!(store.count(), 256);
        assert_eq!(store.get(&first).unwrap().member_count(), 1);
    }

    #[test]
    fn test_create_gives_up_on_crowded_id_space() {
        let store = one_byte_store();
        let mut created = HashSet::new();
        let mut exhausted = 0;

        for _ in 0..400 {
            match store.create(3, 1) {
                Ok(session) => assert!(created.insert(session.id)),
                Err(SessionError::PreconditionFailed(_)) => exhausted += 1,
                Err(other) => panic!("unexpected error: {}", other),
            }
        }

        assert!(exhausted >= 400 - 256);
        assert_eq!(created.len(), store.count());
        assert!(store.count() <= 256);
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let config = StoreConfig::default().with_locations_per_session(0);
        assert!(SessionStore::new(config).is_err());
    }

    #[test]
    fn test_unknown_id() {
        let store = make_store();
        let id = SessionId::from("ffffff");

        assert!(matches!(store.get(&id), Err(SessionError::NotFound(_))));
        assert!(matches!(store.join(&id, "A"), Err(SessionError::NotFound(_))));
        assert!(matches!(store.start(&id), Err(SessionError::NotFound(_))));
        assert!(matches!(
            store.resolve(&id, "A", "Bank"),
            Err(SessionError::NotFound(_))
        ));
    }

    #[test]
    fn test_full_round() {
        let store = make_store();
        let id = store.create(3, 1).unwrap().id;
        fill(&store, &id, &["A", "B", "C"]);

        let session = store.start(&id).unwrap();
        assert_eq!(session.status, SessionStatus::InProgress);
        assert_eq!(session.spies().len(), 1);
        assert!(["A", "B", "C"].contains(&session.spies()[0].as_str()));

        let spy = session.spies()[0].clone();
        let secret = session.secret_location().to_string();
        let wrong = session
            .locations()
            .iter()
            .find(|l| **l != secret)
            .cloned()
            .unwrap();

        let (after, outcome) = store.resolve(&id, &spy, &wrong).unwrap();
        assert_eq!(outcome, Outcome::WrongGuess);
        assert_eq!(after.status, SessionStatus::InProgress);

        let (after, outcome) = store.resolve(&id, &spy, &secret).unwrap();
        assert_eq!(outcome, Outcome::SpyWon);
        assert_eq!(after.status, SessionStatus::SpyWon);
        assert_eq!(store.get(&id).unwrap().status, SessionStatus::SpyWon);
    }

    #[test]
    fn test_resolve_after_terminal_is_stable() {
        let store = make_store();
        let id = store.create(3, 1).unwrap().id;
        fill(&store, &id, &["A", "B", "C"]);
        let session = store.start(&id).unwrap();
        let peaceful = session
            .members()
            .iter()
            .find(|m| !session.is_spy(m))
            .cloned()
            .unwrap();

        let (_, outcome) = store.resolve(&id, &peaceful, "Nowhere").unwrap();
        assert_eq!(outcome, Outcome::PeacefulWon);
        let frozen = store.get(&id).unwrap();

        for _ in 0..3 {
            assert!(matches!(
                store.resolve(&id, &peaceful, "Nowhere"),
                Err(SessionError::SessionAlreadyTerminal)
            ));
        }
        assert_eq!(store.get(&id).unwrap(), frozen);
    }

    #[test]
    fn test_overfill_config() {
        let config = StoreConfig::default().with_seed(1).with_overfill(true);
        let store = SessionStore::new(config).unwrap();
        let id = store.create(3, 1).unwrap().id;
        fill(&store, &id, &["A", "B", "C", "D"]);

        assert_eq!(store.get(&id).unwrap().member_count(), 4);
        assert!(matches!(
            store.start(&id),
            Err(SessionError::PreconditionFailed(_))
        ));
    }

    #[test]
    fn test_fourth_join_after_start() {
        let store = make_store();
        let id = store.create(3, 1).unwrap().id;
        fill(&store, &id, &["A", "B", "C"]);
        store.start(&id).unwrap();

        assert!(matches!(
            store.join(&id, "D"),
            Err(SessionError::SessionAlreadyStarted)
        ));
    }

    #[test]
    fn test_concurrent_joins_lose_nothing() {
        const PLAYERS: usize = 32;
        let store = make_store();
        let id = store.create(PLAYERS, 4).unwrap().id;
        let barrier = Barrier::new(PLAYERS);

        thread::scope(|s| {
            for i in 0..PLAYERS {
                let (store, id, barrier) = (&store, &id, &barrier);
                s.spawn(move || {
                    barrier.wait();
                    store.join(id, &format!("player-{}", i)).unwrap();
                });
            }
        });

        let session = store.get(&id).unwrap();
        let distinct: HashSet<&String> = session.members().iter().collect();
        assert_eq!(session.member_count(), PLAYERS);
        assert_eq!(distinct.len(), PLAYERS);
        assert_eq!(session.revision, PLAYERS as u64);
    }

    #[test]
    fn test_start_racing_joins() {
        const PLAYERS: usize = 8;
        let store = make_store();
        let id = store.create(PLAYERS, 2).unwrap().id;

        // Start before anyone joins.
        assert!(matches!(
            store.start(&id),
            Err(SessionError::PreconditionFailed(_))
        ));

        let barrier = Barrier::new(PLAYERS + 1);
        let start_result = thread::scope(|s| {
            for i in 0..PLAYERS {
                let (store, id, barrier) = (&store, &id, &barrier);
                s.spawn(move || {
                    barrier.wait();
                    store.join(id, &format!("player-{}", i)).unwrap();
                });
            }
            let starter = s.spawn(|| {
                barrier.wait();
                store.start(&id)
            });
            starter.join().unwrap()
        });

        let session = store.get(&id).unwrap();
        assert_eq!(session.member_count(), PLAYERS);
        match start_result {
            Ok(started) => {
                assert_eq!(started.member_count(), PLAYERS);
                assert_eq!(session.status, SessionStatus::InProgress);
            }
            Err(err) => {
                assert!(matches!(err, SessionError::PreconditionFailed(_)));
                assert_eq!(session.status, SessionStatus::Open);
                assert!(session.spies().is_empty());
            }
        }
    }

    #[test]
    fn test_remove_and_evict() {
        let store = make_store();
        let open = store.create(3, 1).unwrap().id;
        let done = store.create(3, 1).unwrap().id;
        fill(&store, &done, &["A", "B", "C"]);
        let session = store.start(&done).unwrap();
        let peaceful = session
            .members()
            .iter()
            .find(|m| !session.is_spy(m))
            .cloned()
            .unwrap();
        store.resolve(&done, &peaceful, "Bank").unwrap();

        assert_eq!(store.active_count(), 1);
        assert_eq!(store.evict_terminal(ChronoDuration::hours(1)), Vec::<SessionId>::new());

        let evicted = store.evict_terminal(ChronoDuration::zero());
        assert_eq!(evicted, vec![done.clone()]);
        assert!(matches!(store.get(&done), Err(SessionError::NotFound(_))));

        assert_eq!(store.remove(&open).map(|s| s.id), Some(open.clone()));
        assert!(store.remove(&open).is_none());
        assert_eq!(store.count(), 0);
    }

    #[test]
    fn test_export_import() {
        let store = make_store();
        let id = store.create(3, 1).unwrap().id;
        fill(&store, &id, &["A", "B", "C"]);
        store.start(&id).unwrap();
        let json = store.export_json().unwrap();

        let restored = SessionStore::new(StoreConfig::default().with_seed(7)).unwrap();
        assert_eq!(restored.import_json(&json).unwrap(), 1);
        assert_eq!(restored.get(&id).unwrap(), store.get(&id).unwrap());

        // Importing again keeps what is already there.
        assert_eq!(restored.import_json(&json).unwrap(), 0);
        assert!(matches!(
            restored.import_json("{"),
            Err(SessionError::Persistence(_))
        ));
    }

    #[test]
    fn test_import_rejects_corrupted_snapshot() {
        let store = make_store();
        let json = r#"[{
            "token": "bad001",
            "amountpl": 2,
            "amountspy": 5,
            "allplayers": ["A", "B", "C", "D"],
            "spyplayers": [],
            "currentloc": "Moon",
            "locations": ["Bank"],
            "status": "Started",
            "revision": 4,
            "created_at": "2026-01-01T00:00:00Z",
            "started_at": null,
            "resolved_at": null
        }]"#;

        assert!(matches!(
            store.import_json(json),
            Err(SessionError::InvalidArgument(_))
        ));
        let id = SessionId::from("bad001");
        assert!(matches!(store.get(&id), Err(SessionError::NotFound(_))));
        assert!(matches!(
            store.resolve(&id, "A", "Bank"),
            Err(SessionError::NotFound(_))
        ));
        assert_eq!(store.count(), 0);
    }

    #[test]
    fn test_restore_is_all_or_nothing() {
        let store = make_store();
        let good = lobby_with_id("aaaaaa".into());
        let mut bad = lobby_with_id("bbbbbb".into());
        bad.status = SessionStatus::InProgress;

        assert!(store.restore(vec![good.clone(), bad]).is_err());
        assert_eq!(store.count(), 0);

        let twice = vec![good.clone(), good.clone()];
        assert!(matches!(
            store.restore(twice),
            Err(SessionError::InvalidArgument(_))
        ));

        assert_eq!(store.restore(vec![good.clone()]).unwrap(), 1);
        assert_eq!(store.get(&good.id).unwrap(), good);
    }
}
