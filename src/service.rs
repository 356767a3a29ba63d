//! Session service - the consumer-facing entry point
//!
//! One explicitly constructed instance owns the store, the native bridge,
//! the biometric gate, the lifecycle manager and the orchestrator. Consumers
//! read the token, log in and out, and subscribe to events through it; they
//! never touch storage directly.

use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::biometric::BiometricGate;
use crate::bridge::{HostProbe, NativeBridge, OutboundAction, TokenSync};
use crate::error::{BridgeError, DecodeError, StorageError};
use crate::events::{LogoutReason, SessionEvent, SessionEvents};
use crate::lifecycle::TokenLifecycleManager;
use crate::models::SessionRecord;
use crate::orchestrator::AutoLoginOrchestrator;
use crate::refresh::{HttpTokenRefresher, TokenRefresher};
use crate::session::{CookieLifetimes, SessionStore};
use crate::settings::KeeperSettings;
use crate::storage::{
    BackendKind, CookieOptions, CookieStorage, FileStorage, MemoryStorage, StorageBackend,
};
use crate::token;

/// The three storage backends a service persists to
#[derive(Clone)]
pub struct SessionBackends {
    pub cookie: Arc<dyn StorageBackend>,
    pub session_scoped: Arc<dyn StorageBackend>,
    pub durable: Arc<dyn StorageBackend>,
}

impl SessionBackends {
    /// Backends described by the `[application]` and `[storage]` settings
    ///
    /// Durable storage is a JSON file when `storage.durable_path` is set and
    /// in-memory otherwise.
    ///
    /// # Errors
    ///
    /// Returns an error if the durable storage file cannot be opened
    pub fn from_settings(settings: &KeeperSettings) -> Result<Self, StorageError> {
        let durable: Arc<dyn StorageBackend> = match settings.storage.durable_path.as_deref() {
            Some(path) => Arc::new(FileStorage::open(path)?),
            None => {
                log::debug!("No durable storage path configured; using in-memory storage");
                Arc::new(MemoryStorage::new(BackendKind::Durable))
            }
        };

        Ok(Self {
            cookie: Arc::new(CookieStorage::new(CookieOptions::for_origin(
                &settings.application.origin,
            ))),
            session_scoped: Arc::new(MemoryStorage::session_scoped()),
            durable,
        })
    }
}

pub struct SessionService {
    store: Arc<SessionStore>,
    bridge: NativeBridge,
    events: SessionEvents,
    orchestrator: Arc<AutoLoginOrchestrator>,
    push_listener: Mutex<Option<JoinHandle<()>>>,
}

impl SessionService {
    /// Wire up the session components
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime; native pushes are applied
    /// on a spawned task.
    #[must_use]
    pub fn new(
        settings: &KeeperSettings,
        backends: SessionBackends,
        probe: HostProbe,
        refresher: Arc<dyn TokenRefresher>,
    ) -> Self {
        let store = Arc::new(SessionStore::new(
            backends.cookie,
            backends.session_scoped,
            backends.durable,
            CookieLifetimes::from_settings(settings),
        ));
        let bridge = NativeBridge::new(probe, &settings.bridge);
        let events = SessionEvents::default();

        let lifecycle = TokenLifecycleManager::new(
            store.clone(),
            refresher,
            bridge.clone(),
            events.clone(),
            settings.refresh_margin(),
        );
        let gate = BiometricGate::new(bridge.clone(), &settings.bridge.biometric_reason);
        let orchestrator = Arc::new(AutoLoginOrchestrator::new(
            store.clone(),
            bridge.clone(),
            gate,
            lifecycle,
            events.clone(),
            settings.login_info_wait(),
        ));
        let push_listener = orchestrator.spawn_push_listener();

        Self {
            store,
            bridge,
            events,
            orchestrator,
            push_listener: Mutex::new(Some(push_listener)),
        }
    }

    /// Build a service with settings-derived backends and the HTTP refresher
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The durable storage file cannot be opened
    /// - The refresh URL is invalid
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime
    pub fn from_settings(
        settings: &KeeperSettings,
        probe: HostProbe,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let backends = SessionBackends::from_settings(settings)?;
        let refresher = Arc::new(HttpTokenRefresher::from_settings(settings)?);
        Ok(Self::new(settings, backends, probe, refresher))
    }

    // =========================================================================
    // Consumer API
    // =========================================================================

    /// The access token, if one exists and has not expired
    #[must_use]
    pub fn current_token(&self) -> Option<String> {
        let record = self.store.current().or_else(|| self.store.read())?;
        token::is_valid(&record.access_token, token::current_time_ms())
            .then_some(record.access_token)
    }

    /// Whether a non-expired access token exists
    #[must_use]
    pub fn is_logged_in(&self) -> bool {
        self.current_token().is_some()
    }

    /// Store tokens from a web login, keeping the current `keep_login` choice
    ///
    /// # Errors
    ///
    /// Returns `DecodeError::Malformed` if the access token is not a JWT;
    /// nothing is stored in that case
    pub fn set_token(&self, access_token: &str, refresh_token: Option<&str>) -> Result<(), DecodeError> {
        let record = SessionRecord::new(access_token, refresh_token, self.store.keep_login())
            .with_identity_from_token();
        self.login(&record)
    }

    /// Store a complete session record from a web login
    ///
    /// # Errors
    ///
    /// Returns `DecodeError::Malformed` if the access token is not a JWT
    pub fn login(&self, record: &SessionRecord) -> Result<(), DecodeError> {
        token::decode(&record.access_token)?;
        self.orchestrator.establish(record, "web login");
        self.sync_to_host(record);
        Ok(())
    }

    /// Log out: clear every backend and stop refreshing
    pub fn clear_tokens(&self) {
        self.orchestrator.logout(LogoutReason::Explicit);
    }

    /// Restore the session at startup; see [`AutoLoginOrchestrator::restore`]
    pub async fn restore(&self) -> bool {
        self.orchestrator.restore().await
    }

    /// Refresh the access token now
    pub async fn refresh(&self) -> bool {
        self.orchestrator.lifecycle().refresh().await
    }

    /// Change whether the session survives restarts
    pub fn set_keep_login(&self, keep_login: bool) {
        let outcome = self.store.set_keep_login(keep_login);
        if !outcome.failed.is_empty() {
            log::warn!("keep_login not stored everywhere: {:?}", outcome.failed);
        }
        if let Some(record) = self.store.current() {
            self.sync_to_host(&record);
        }
    }

    #[must_use]
    pub fn keep_login(&self) -> bool {
        self.store.keep_login()
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Feed a raw message from the native host
    ///
    /// # Errors
    ///
    /// Returns `BridgeError::Protocol` if the message cannot be parsed
    pub fn handle_native_message(&self, raw: &str) -> Result<(), BridgeError> {
        self.bridge.dispatch(raw)
    }

    /// Page went to the background
    pub fn on_page_hidden(&self) -> bool {
        self.orchestrator.on_page_hidden()
    }

    /// Page is about to unload
    pub fn on_before_unload(&self) -> bool {
        self.orchestrator.on_before_unload()
    }

    #[must_use]
    pub fn biometric(&self) -> &BiometricGate {
        self.orchestrator.gate()
    }

    #[must_use]
    pub fn bridge(&self) -> &NativeBridge {
        &self.bridge
    }

    #[must_use]
    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    /// Stop the push listener and the refresh timer, fail pending requests
    pub fn shutdown(&self) {
        if let Some(listener) = self
            .push_listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            listener.abort();
        }
        self.orchestrator.lifecycle().cancel();
        self.bridge.close();
        log::debug!("Session service shut down");
    }

    fn sync_to_host(&self, record: &SessionRecord) {
        if let Err(e) = self
            .bridge
            .send(&OutboundAction::SyncToken(TokenSync::from(record)))
        {
            log::warn!("Could not sync token to native host: {e}");
        }
    }
}

impl Drop for SessionService {
    fn drop(&mut self) {
        self.shutdown();
    }
}
