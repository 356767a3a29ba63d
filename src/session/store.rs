//! Session Store - multi-backend session persistence
//!
//! The store spreads one [`SessionRecord`] over three backends and never
//! trusts any single one of them. Reads walk the backends in priority order
//! (cookie, session-scoped, durable) and take the first syntactically valid
//! access token; every other backend that disagrees is repaired on the spot.
//! This keeps a session alive when the browser evicts cookies but keeps
//! script storage (Safari ITP) or the other way round (in-app browsers).
//!
//! All backend mutation happens under one lock, so a logout and a concurrent
//! write never interleave. Every `clear()` and every write that replaces the
//! session bumps a generation counter; asynchronous writers capture the
//! generation before suspending and use [`SessionStore::write_if_current`]
//! so a late response can neither resurrect a logged-out session nor
//! overwrite one that was replaced in the meantime.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::error::StorageError;
use crate::models::{Identity, SessionRecord};
use crate::session::keys;
use crate::settings::KeeperSettings;
use crate::storage::{BackendKind, Lifetime, StorageBackend};
use crate::token;
use crate::utils::logging::LoggingHelper;

/// Cookie lifetimes for the two `keep_login` policies
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CookieLifetimes {
    pub session: Duration,
    pub keep_login: Duration,
}

impl CookieLifetimes {
    #[must_use]
    pub fn from_settings(settings: &KeeperSettings) -> Self {
        Self {
            session: settings.session_cookie_lifetime(),
            keep_login: settings.keep_login_cookie_lifetime(),
        }
    }

    fn for_policy(self, keep_login: bool) -> Lifetime {
        if keep_login {
            Lifetime::Persistent(self.keep_login)
        } else {
            Lifetime::Session(self.session)
        }
    }
}

impl Default for CookieLifetimes {
    fn default() -> Self {
        Self::from_settings(&KeeperSettings::default())
    }
}

/// Which backends accepted a write
#[derive(Debug, Default)]
pub struct WriteOutcome {
    pub written: Vec<BackendKind>,
    pub failed: Vec<(BackendKind, StorageError)>,
}

impl WriteOutcome {
    /// At least one backend holds the record
    #[must_use]
    pub fn is_persisted(&self) -> bool {
        !self.written.is_empty()
    }
}

struct StoreState {
    current: Option<SessionRecord>,
    generation: u64,
}

/// Session store over cookie, session-scoped and durable backends
pub struct SessionStore {
    // Read priority order: cookie, session-scoped, durable
    backends: [Arc<dyn StorageBackend>; 3],
    lifetimes: CookieLifetimes,
    state: Mutex<StoreState>,
}

impl SessionStore {
    #[must_use]
    pub fn new(
        cookie: Arc<dyn StorageBackend>,
        session_scoped: Arc<dyn StorageBackend>,
        durable: Arc<dyn StorageBackend>,
        lifetimes: CookieLifetimes,
    ) -> Self {
        Self {
            backends: [cookie, session_scoped, durable],
            lifetimes,
            state: Mutex::new(StoreState {
                current: None,
                generation: 0,
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The last record read or written, without touching the backends
    #[must_use]
    pub fn current(&self) -> Option<SessionRecord> {
        self.state().current.clone()
    }

    /// Generation counter; changes whenever the session is cleared or replaced
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.state().generation
    }

    /// The effective `keep_login` preference
    #[must_use]
    pub fn keep_login(&self) -> bool {
        let state = self.state();
        match &state.current {
            Some(record) => record.keep_login,
            None => self.keep_login_hint().unwrap_or(false),
        }
    }

    // =========================================================================
    // Write
    // =========================================================================

    /// Write the record to every backend it belongs in
    ///
    /// A backend that fails (quota, I/O) is logged and reported in the
    /// outcome; the remaining backends are still written.
    pub fn write(&self, record: &SessionRecord) -> WriteOutcome {
        let mut state = self.state();
        self.write_locked(&mut state, record)
    }

    /// Write only if the session was neither cleared nor replaced since
    /// `generation` was observed
    ///
    /// Returns `None` when the write was discarded.
    pub fn write_if_current(&self, record: &SessionRecord, generation: u64) -> Option<WriteOutcome> {
        let mut state = self.state();
        if state.generation != generation {
            log::info!(
                "Discarding session write from generation {generation}; session changed (now {})",
                state.generation
            );
            return None;
        }
        Some(self.write_locked(&mut state, record))
    }

    fn write_locked(&self, state: &mut StoreState, record: &SessionRecord) -> WriteOutcome {
        let outcome = self.persist_locked(state, record);
        state.generation += 1;
        outcome
    }

    /// Store `record` without starting a new generation
    fn persist_locked(&self, state: &mut StoreState, record: &SessionRecord) -> WriteOutcome {
        let lifetime = self.lifetimes.for_policy(record.keep_login);
        let mut outcome = WriteOutcome::default();

        for backend in &self.backends {
            let result = if backend.kind() == BackendKind::Durable && !record.keep_login {
                Self::demote_durable(backend.as_ref(), lifetime)
            } else {
                Self::write_backend(backend.as_ref(), record, lifetime)
            };

            match result {
                Ok(()) => outcome.written.push(backend.kind()),
                Err(e) => {
                    log::warn!("Session write to {} storage failed: {e}", backend.kind());
                    outcome.failed.push((backend.kind(), e));
                }
            }
        }

        log::debug!(
            "Stored session {} (keep_login={}) in {:?}",
            LoggingHelper::mask_token(&record.access_token),
            record.keep_login,
            outcome.written
        );
        state.current = Some(record.clone());
        outcome
    }

    fn write_backend(
        backend: &dyn StorageBackend,
        record: &SessionRecord,
        lifetime: Lifetime,
    ) -> Result<(), StorageError> {
        backend.set(keys::ACCESS_TOKEN, &record.access_token, lifetime)?;
        set_or_remove(backend, keys::REFRESH_TOKEN, record.refresh_token.as_deref(), lifetime)?;
        backend.set(keys::IS_LOGGED_IN, "true", lifetime)?;
        backend.set(keys::KEEP_LOGIN, bool_str(record.keep_login), lifetime)?;
        set_or_remove(backend, keys::USER_ID, record.identity.user_id.as_deref(), lifetime)?;
        set_or_remove(backend, keys::USER_EMAIL, record.identity.email.as_deref(), lifetime)?;
        set_or_remove(backend, keys::USER_NAME, record.identity.name.as_deref(), lifetime)?;
        let expires_at = token::expires_at_ms(&record.access_token).map(|ms| ms.to_string());
        set_or_remove(backend, keys::TOKEN_EXPIRES_AT, expires_at.as_deref(), lifetime)?;
        Ok(())
    }

    /// Durable storage only keeps the preference when the user did not ask
    /// to stay logged in
    fn demote_durable(backend: &dyn StorageBackend, lifetime: Lifetime) -> Result<(), StorageError> {
        for key in keys::SESSION_KEYS {
            backend.remove(key)?;
        }
        backend.set(keys::KEEP_LOGIN, "false", lifetime)
    }

    // =========================================================================
    // Read
    // =========================================================================

    /// Read the session, repairing backends that lost or disagree with it
    ///
    /// Never fails: unreadable backends and malformed entries count as
    /// absent. Expired tokens are still returned; deciding what to do with
    /// them is up to the caller.
    pub fn read(&self) -> Option<SessionRecord> {
        let mut state = self.state();
        let keep_login_hint = self.keep_login_hint();

        let found = self.backends.iter().find_map(|backend| {
            Self::read_backend(backend.as_ref(), keep_login_hint).map(|record| (backend.kind(), record))
        });

        let Some((source, record)) = found else {
            state.current = None;
            return None;
        };

        self.repair(source, &record);
        state.current = Some(record.clone());
        Some(record)
    }

    fn read_backend(backend: &dyn StorageBackend, keep_login_hint: Option<bool>) -> Option<SessionRecord> {
        let access_token = read_key(backend, keys::ACCESS_TOKEN)?;
        if let Err(e) = token::decode(&access_token) {
            log::debug!("Ignoring malformed token in {} storage: {e}", backend.kind());
            return None;
        }

        let keep_login = read_key(backend, keys::KEEP_LOGIN)
            .and_then(|v| v.parse::<bool>().ok())
            .or(keep_login_hint)
            .unwrap_or(false);

        let identity = Identity {
            user_id: read_key(backend, keys::USER_ID),
            email: read_key(backend, keys::USER_EMAIL),
            name: read_key(backend, keys::USER_NAME),
        };

        Some(SessionRecord {
            access_token,
            refresh_token: read_key(backend, keys::REFRESH_TOKEN),
            keep_login,
            identity,
        })
    }

    /// Write-through to every backend other than `source` that disagrees
    fn repair(&self, source: BackendKind, record: &SessionRecord) {
        let lifetime = self.lifetimes.for_policy(record.keep_login);

        for backend in self.backends.iter().filter(|b| b.kind() != source) {
            if backend.kind() == BackendKind::Durable && !record.keep_login {
                continue;
            }
            if read_key(backend.as_ref(), keys::ACCESS_TOKEN).as_deref() == Some(record.access_token.as_str()) {
                continue;
            }

            match Self::write_backend(backend.as_ref(), record, lifetime) {
                Ok(()) => log::info!(
                    "Repaired {} storage from {source} storage",
                    backend.kind()
                ),
                Err(e) => log::warn!("Could not repair {} storage: {e}", backend.kind()),
            }
        }
    }

    /// First explicit `keep_login` preference found, durable storage first
    fn keep_login_hint(&self) -> Option<bool> {
        self.backends
            .iter()
            .rev()
            .find_map(|backend| read_key(backend.as_ref(), keys::KEEP_LOGIN)?.parse::<bool>().ok())
    }

    // =========================================================================
    // Clear and policy changes
    // =========================================================================

    /// Remove the session from every backend and start a new generation
    ///
    /// Cookies are overwritten with an already-expired copy. Returns the new
    /// generation.
    pub fn clear(&self) -> u64 {
        let mut state = self.state();
        self.clear_locked(&mut state)
    }

    /// Clear only if no other `clear()` happened since `generation`
    ///
    /// Returns the new generation, or `None` when the session had already
    /// been replaced.
    pub fn clear_if_current(&self, generation: u64) -> Option<u64> {
        let mut state = self.state();
        if state.generation != generation {
            return None;
        }
        Some(self.clear_locked(&mut state))
    }

    fn clear_locked(&self, state: &mut StoreState) -> u64 {
        for backend in &self.backends {
            for key in keys::ALL_KEYS {
                if let Err(e) = backend.remove(key) {
                    log::warn!("Failed to remove '{key}' from {} storage: {e}", backend.kind());
                }
            }
        }
        state.current = None;
        state.generation += 1;
        log::debug!("Session cleared, generation {}", state.generation);
        state.generation
    }

    /// Change the `keep_login` preference
    ///
    /// Turning it on promotes the current session into durable storage
    /// immediately; turning it off drops the durable copy.
    pub fn set_keep_login(&self, keep_login: bool) -> WriteOutcome {
        let mut state = self.state();
        let lifetime = self.lifetimes.for_policy(keep_login);

        let Some(mut record) = state.current.clone() else {
            let mut outcome = WriteOutcome::default();
            for backend in &self.backends {
                match backend.set(keys::KEEP_LOGIN, bool_str(keep_login), lifetime) {
                    Ok(()) => outcome.written.push(backend.kind()),
                    Err(e) => outcome.failed.push((backend.kind(), e)),
                }
            }
            return outcome;
        };

        if record.keep_login != keep_login {
            log::info!("keep_login changed {} -> {keep_login}", record.keep_login);
        }
        record.keep_login = keep_login;
        // Same tokens, so an in-flight refresh stays valid
        self.persist_locked(&mut state, &record)
    }

    /// Re-persist the current session to durable storage
    ///
    /// Only applies when `keep_login` is set. Used on page hide and unload so
    /// the session survives process teardown.
    pub fn persist_durable(&self) -> bool {
        let state = self.state();
        let Some(record) = state.current.as_ref().filter(|r| r.keep_login) else {
            return false;
        };

        let lifetime = self.lifetimes.for_policy(true);
        self.backends
            .iter()
            .filter(|b| b.kind() == BackendKind::Durable)
            .all(|backend| match Self::write_backend(backend.as_ref(), record, lifetime) {
                Ok(()) => true,
                Err(e) => {
                    log::warn!("Durable persist failed: {e}");
                    false
                }
            })
    }
}

fn bool_str(value: bool) -> &'static str {
    if value {
        "true"
    } else {
        "false"
    }
}

fn read_key(backend: &dyn StorageBackend, key: &str) -> Option<String> {
    match backend.get(key) {
        Ok(value) => value.filter(|v| !v.is_empty()),
        Err(e) => {
            log::debug!("Reading '{key}' from {} storage failed: {e}", backend.kind());
            None
        }
    }
}

fn set_or_remove(
    backend: &dyn StorageBackend,
    key: &str,
    value: Option<&str>,
    lifetime: Lifetime,
) -> Result<(), StorageError> {
    match value {
        Some(value) => backend.set(key, value, lifetime),
        None => backend.remove(key),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{CookieOptions, CookieStorage, MemoryStorage};
    use crate::testing::{TestBackends, TestTokens};

    fn valid_record(keep_login: bool) -> SessionRecord {
        SessionRecord::new(&TestTokens::valid_for_secs(3600), Some("refresh-1"), keep_login)
            .with_identity(Identity::new("42", "ann@example.com", "Ann"))
    }

    #[test]
    fn test_write_then_read_round_trip() {
        let backends = TestBackends::new();
        let store = backends.store();

        let record = valid_record(true);
        let outcome = store.write(&record);
        assert_eq!(outcome.written.len(), 3);
        assert!(outcome.failed.is_empty());

        // A fresh store over the same backends sees the same session
        let reread = backends.store().read().unwrap();
        assert_eq!(reread.access_token, record.access_token);
        assert_eq!(reread.refresh_token, record.refresh_token);
        assert_eq!(reread.identity, record.identity);
        assert!(reread.keep_login);
    }

    #[test]
    fn test_write_without_keep_login_skips_durable() {
        let backends = TestBackends::new();
        let store = backends.store();

        store.write(&valid_record(false));

        assert!(backends.session.get(keys::ACCESS_TOKEN).unwrap().is_some());
        assert!(backends.cookie.get(keys::ACCESS_TOKEN).unwrap().is_some());
        assert_eq!(backends.durable.get(keys::ACCESS_TOKEN).unwrap(), None);
        assert_eq!(
            backends.durable.get(keys::KEEP_LOGIN).unwrap().as_deref(),
            Some("false")
        );
    }

    #[test]
    fn test_write_survives_one_failing_backend() {
        let backends = TestBackends::with_durable(MemoryStorage::new(BackendKind::Durable).with_quota(8));
        let store = backends.store();

        let outcome = store.write(&valid_record(true));
        assert_eq!(outcome.written, vec![BackendKind::Cookie, BackendKind::SessionScoped]);
        assert_eq!(outcome.failed.len(), 1);
        assert_eq!(outcome.failed[0].0, BackendKind::Durable);
        assert!(outcome.is_persisted());

        assert!(store.read().is_some());
    }

    #[test]
    fn test_cookie_only_session_heals_other_backends() {
        let backends = TestBackends::new();
        let token = TestTokens::valid_for_secs(3600);
        backends.seed(backends.cookie.as_ref(), &token, Some(true));

        let record = backends.store().read().unwrap();
        assert_eq!(record.access_token, token);

        assert_eq!(backends.session.get(keys::ACCESS_TOKEN).unwrap().as_deref(), Some(token.as_str()));
        assert_eq!(backends.durable.get(keys::ACCESS_TOKEN).unwrap().as_deref(), Some(token.as_str()));
    }

    #[test]
    fn test_durable_only_session_heals_cookie() {
        // Cookie evicted by the browser, script storage intact
        let backends = TestBackends::new();
        let token = TestTokens::valid_for_secs(3600);
        backends.seed(backends.durable.as_ref(), &token, Some(true));

        let record = backends.store().read().unwrap();
        assert_eq!(record.access_token, token);
        assert!(record.keep_login);
        assert_eq!(backends.cookie.get(keys::ACCESS_TOKEN).unwrap().as_deref(), Some(token.as_str()));
    }

    #[test]
    fn test_read_prefers_cookie_over_lower_priority() {
        let backends = TestBackends::new();
        let cookie_token = TestTokens::valid_for_secs(3600);
        let stale_token = TestTokens::valid_for_secs(60);
        backends.seed(backends.cookie.as_ref(), &cookie_token, Some(true));
        backends.seed(backends.durable.as_ref(), &stale_token, Some(true));

        let record = backends.store().read().unwrap();
        assert_eq!(record.access_token, cookie_token);
        // Disagreeing durable copy was overwritten
        assert_eq!(
            backends.durable.get(keys::ACCESS_TOKEN).unwrap().as_deref(),
            Some(cookie_token.as_str())
        );
    }

    #[test]
    fn test_malformed_entries_are_skipped() {
        let backends = TestBackends::new();
        let token = TestTokens::valid_for_secs(3600);
        backends.seed(backends.cookie.as_ref(), "garbage", Some(false));
        backends.seed(backends.session.as_ref(), &token, Some(false));

        let record = backends.store().read().unwrap();
        assert_eq!(record.access_token, token);
        // The malformed cookie was repaired
        assert_eq!(backends.cookie.get(keys::ACCESS_TOKEN).unwrap().as_deref(), Some(token.as_str()));
    }

    #[test]
    fn test_read_returns_none_when_all_empty_or_malformed() {
        let backends = TestBackends::new();
        assert!(backends.store().read().is_none());

        backends.seed(backends.session.as_ref(), "not.a.jwt", None);
        assert!(backends.store().read().is_none());
    }

    #[test]
    fn test_expired_token_is_still_read() {
        let backends = TestBackends::new();
        let expired = TestTokens::expired_secs_ago(60);
        backends.seed(backends.session.as_ref(), &expired, Some(false));

        let record = backends.store().read().unwrap();
        assert_eq!(record.access_token, expired);
    }

    #[test]
    fn test_clear_removes_everything_and_bumps_generation() {
        let backends = TestBackends::new();
        let store = backends.store();
        store.write(&valid_record(true));
        let before = store.generation();

        let after = store.clear();
        assert_eq!(after, before + 1);
        assert!(store.current().is_none());
        assert!(store.read().is_none());
        for key in keys::ALL_KEYS {
            assert_eq!(backends.durable.get(key).unwrap(), None);
            assert_eq!(backends.session.get(key).unwrap(), None);
        }
    }

    #[test]
    fn test_clear_expires_real_cookies() {
        let cookie = Arc::new(CookieStorage::new(CookieOptions::default()));
        let store = SessionStore::new(
            cookie.clone(),
            Arc::new(MemoryStorage::session_scoped()),
            Arc::new(MemoryStorage::new(BackendKind::Durable)),
            CookieLifetimes::default(),
        );
        store.write(&valid_record(true));
        store.clear();

        assert_eq!(cookie.get(keys::ACCESS_TOKEN).unwrap(), None);
        let headers = cookie.set_cookie_headers();
        let access = headers
            .iter()
            .find(|h| h.starts_with("accessToken="))
            .unwrap();
        assert!(access.contains("Max-Age=0"));
    }

    #[test]
    fn test_write_if_current_discards_stale_generation() {
        let backends = TestBackends::new();
        let store = backends.store();
        let generation = store.generation();

        store.clear();
        assert!(store.write_if_current(&valid_record(true), generation).is_none());
        assert!(store.read().is_none());

        let generation = store.generation();
        assert!(store.write_if_current(&valid_record(true), generation).is_some());
        assert!(store.read().is_some());
    }

    #[test]
    fn test_replacing_write_invalidates_older_generation() {
        let backends = TestBackends::new();
        let store = backends.store();
        store.write(&valid_record(true));
        let stale = store.generation();

        let replacement = valid_record(true).with_identity(Identity::new("user-456", "b@example.com", "B"));
        store.write(&replacement);
        assert_ne!(store.generation(), stale);
        assert!(store.write_if_current(&valid_record(true), stale).is_none());
        assert!(store.clear_if_current(stale).is_none());
        assert_eq!(store.read().unwrap().identity.user_id.as_deref(), Some("user-456"));

        // Toggling keep_login keeps the same session and generation
        let current = store.generation();
        store.set_keep_login(false);
        assert_eq!(store.generation(), current);
    }

    #[test]
    fn test_clear_if_current_spares_newer_session() {
        let backends = TestBackends::new();
        let store = backends.store();
        let stale = store.generation();

        store.clear();
        let replacement = valid_record(false);
        store.write(&replacement);

        assert!(store.clear_if_current(stale).is_none());
        assert_eq!(store.read().unwrap().access_token, replacement.access_token);

        let current = store.generation();
        assert_eq!(store.clear_if_current(current), Some(current + 1));
        assert!(store.read().is_none());
    }

    #[test]
    fn test_set_keep_login_promotes_to_durable() {
        let backends = TestBackends::new();
        let store = backends.store();
        let record = valid_record(false);
        store.write(&record);
        assert_eq!(backends.durable.get(keys::ACCESS_TOKEN).unwrap(), None);

        store.set_keep_login(true);
        assert_eq!(
            backends.durable.get(keys::ACCESS_TOKEN).unwrap().as_deref(),
            Some(record.access_token.as_str())
        );
        assert!(store.keep_login());

        store.set_keep_login(false);
        assert_eq!(backends.durable.get(keys::ACCESS_TOKEN).unwrap(), None);
        assert!(!store.keep_login());
    }

    #[test]
    fn test_set_keep_login_without_session_stores_preference() {
        let backends = TestBackends::new();
        let store = backends.store();
        store.set_keep_login(true);

        assert_eq!(backends.durable.get(keys::KEEP_LOGIN).unwrap().as_deref(), Some("true"));
        assert!(store.keep_login());
    }

    #[test]
    fn test_persist_durable_requires_keep_login() {
        let backends = TestBackends::new();
        let store = backends.store();

        store.write(&valid_record(false));
        assert!(!store.persist_durable());

        store.write(&valid_record(true));
        backends.durable.end_session();
        assert!(store.persist_durable());
        assert!(backends.durable.get(keys::ACCESS_TOKEN).unwrap().is_some());
    }

    #[test]
    fn test_expiry_key_written() {
        let backends = TestBackends::new();
        let store = backends.store();
        let record = valid_record(true);
        store.write(&record);

        let stored = backends.session.get(keys::TOKEN_EXPIRES_AT).unwrap().unwrap();
        assert_eq!(stored.parse::<u64>().ok(), token::expires_at_ms(&record.access_token));
        assert_eq!(backends.session.get(keys::IS_LOGGED_IN).unwrap().as_deref(), Some("true"));
    }
}
