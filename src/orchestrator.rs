//! Auto-login orchestration
//!
//! Startup restore, page visibility and unload hooks, and application of
//! native push events. Every session change goes through the store, the
//! lifecycle manager and the event hub in that order.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

use crate::biometric::BiometricGate;
use crate::bridge::{
    BridgeReply, EventKind, InboundEvent, LoginInfo, NativeBridge, OutboundAction, TokenSync,
};
use crate::error::AuthError;
use crate::events::{LogoutReason, SessionEvent, SessionEvents};
use crate::lifecycle::TokenLifecycleManager;
use crate::models::{SessionRecord, TokenPair};
use crate::session::SessionStore;
use crate::token;
use crate::utils::logging::LoggingHelper;

pub struct AutoLoginOrchestrator {
    store: Arc<SessionStore>,
    bridge: NativeBridge,
    gate: BiometricGate,
    lifecycle: TokenLifecycleManager,
    events: SessionEvents,
    login_info_wait: Duration,
}

impl AutoLoginOrchestrator {
    #[must_use]
    pub fn new(
        store: Arc<SessionStore>,
        bridge: NativeBridge,
        gate: BiometricGate,
        lifecycle: TokenLifecycleManager,
        events: SessionEvents,
        login_info_wait: Duration,
    ) -> Self {
        Self {
            store,
            bridge,
            gate,
            lifecycle,
            events,
            login_info_wait,
        }
    }

    #[must_use]
    pub fn gate(&self) -> &BiometricGate {
        &self.gate
    }

    #[must_use]
    pub fn lifecycle(&self) -> &TokenLifecycleManager {
        &self.lifecycle
    }

    // =========================================================================
    // Restore
    // =========================================================================

    /// Restore the session at startup
    ///
    /// Returns whether a usable session exists afterwards. Never fails:
    /// bridge and refresh problems end in "not logged in" (or in a web-only
    /// restore when the host does not answer).
    pub async fn restore(&self) -> bool {
        let Some(record) = self.load_record().await else {
            log::debug!("Restore: no stored session");
            return false;
        };

        if !token::is_valid(&record.access_token, token::current_time_ms()) {
            if record.refresh_token.is_none() {
                log::info!("Restore: access token expired and no refresh token");
                self.logout(LogoutReason::Expired);
                return false;
            }
            log::debug!("Restore: access token expired, refreshing once");
            if !self.lifecycle.refresh().await {
                return false;
            }
        }

        let generation = self.store.generation();
        match self.gate.guard(|| self.finish_restore(generation)).await {
            Ok(restored) => restored,
            Err(err) => {
                log::warn!("Restore aborted: {err}");
                let reason = match err {
                    AuthError::BiometricDenied(_) => LogoutReason::BiometricDenied,
                    AuthError::RefreshFailed(_) => LogoutReason::RefreshFailed,
                    AuthError::MultiDeviceLogout(reason) => LogoutReason::MultiDevice(reason),
                };
                if self.store.generation() == generation {
                    self.logout(reason);
                }
                false
            }
        }
    }

    /// Stored session, or the one the native host hands over
    async fn load_record(&self) -> Option<SessionRecord> {
        if let Some(record) = self.store.read() {
            return Some(record);
        }
        if !self.bridge.is_native() {
            return None;
        }

        log::debug!("Restore: asking native host for login info");
        let reply = self
            .bridge
            .request(
                OutboundAction::RequestLoginInfo,
                EventKind::LoginInfoReceived,
                self.login_info_wait,
            )
            .await;

        match reply {
            Ok(BridgeReply::Reply(InboundEvent::LoginInfoReceived(info))) => {
                let record = Self::record_from_login_info(info)?;
                self.store.write(&record);
                Some(record)
            }
            Ok(BridgeReply::Reply(InboundEvent::AutoLoginFailed { reason, message })) => {
                log::warn!("Native auto-login failed: {reason} ({message:?})");
                self.events
                    .emit(SessionEvent::AutoLoginFailed { reason, message });
                None
            }
            Ok(other) => {
                log::debug!("Restore: no login info from host ({other:?})");
                None
            }
            Err(e) => {
                log::info!("Restore continuing web-only: {e}");
                None
            }
        }
    }

    async fn finish_restore(&self, generation: u64) -> bool {
        let Some(record) = self.store.current() else {
            log::info!("Restore: session ended while waiting for biometrics");
            return false;
        };
        if self.store.generation() != generation {
            // Whoever replaced the session already armed its timer and announced it
            log::info!("Restore: session replaced while waiting for biometrics");
            return true;
        }

        self.lifecycle.schedule_refresh(&record.access_token);
        LoggingHelper::log_login("restore", &record);
        self.events.emit(SessionEvent::Login {
            identity: record.identity.clone(),
            keep_login: record.keep_login,
        });
        true
    }

    fn record_from_login_info(info: LoginInfo) -> Option<SessionRecord> {
        let record = info.user_info.into_record(info.keep_login);
        match token::decode(&record.access_token) {
            Ok(_) => Some(record),
            Err(e) => {
                log::warn!("Ignoring login info with unusable token: {e}");
                None
            }
        }
    }

    // =========================================================================
    // Session transitions
    // =========================================================================

    /// Store a new session, arm its refresh timer and announce it
    pub fn establish(&self, record: &SessionRecord, source: &str) {
        self.store.write(record);
        self.lifecycle.schedule_refresh(&record.access_token);
        LoggingHelper::log_login(source, record);
        self.events.emit(SessionEvent::Login {
            identity: record.identity.clone(),
            keep_login: record.keep_login,
        });
    }

    /// End the session: stop the timer, clear every backend, announce it
    pub fn logout(&self, reason: LogoutReason) {
        self.lifecycle.cancel();
        self.store.clear();
        LoggingHelper::log_logout(&reason);
        self.events.emit(SessionEvent::Logout { reason });
    }

    // =========================================================================
    // Visibility and unload
    // =========================================================================

    /// Page went to the background
    pub fn on_page_hidden(&self) -> bool {
        self.persist_for_teardown(OutboundAction::SyncTokenOnHidden)
    }

    /// Page is about to unload
    pub fn on_before_unload(&self) -> bool {
        self.persist_for_teardown(OutboundAction::SyncTokenOnUnload)
    }

    fn persist_for_teardown(&self, action: fn(TokenSync) -> OutboundAction) -> bool {
        let Some(record) = self.store.current().filter(|r| r.keep_login) else {
            return false;
        };

        let persisted = self.store.persist_durable();
        if let Err(e) = self.bridge.send(&action(TokenSync::from(&record))) {
            log::warn!("Could not sync token to native host before teardown: {e}");
        }
        persisted
    }

    // =========================================================================
    // Native pushes
    // =========================================================================

    /// Apply one push event from the native host
    pub fn apply_push(&self, event: InboundEvent) {
        match event {
            InboundEvent::LoginInfoReceived(info) => {
                if let Some(record) = Self::record_from_login_info(info) {
                    self.establish(&record, "native host");
                }
            }
            InboundEvent::TokenRefreshed(pair) => self.apply_native_refresh(pair),
            InboundEvent::MultiDeviceLogout { reason } => {
                log::warn!("{}", AuthError::MultiDeviceLogout(reason.clone()));
                self.logout(LogoutReason::MultiDevice(reason));
            }
            InboundEvent::AutoLoginFailed { reason, message } => {
                log::warn!("Native auto-login failed: {reason} ({message:?})");
                self.events
                    .emit(SessionEvent::AutoLoginFailed { reason, message });
            }
            unsolicited => {
                log::debug!("Ignoring unsolicited {}", unsolicited.kind());
            }
        }
    }

    fn apply_native_refresh(&self, pair: TokenPair) {
        if let Err(e) = token::decode(&pair.access_token) {
            log::warn!("Ignoring native token refresh: {e}");
            return;
        }

        let record = match self.store.current().or_else(|| self.store.read()) {
            Some(current) => current.refreshed(pair.access_token, pair.refresh_token),
            None => SessionRecord::new(
                &pair.access_token,
                pair.refresh_token.as_deref(),
                self.store.keep_login(),
            )
            .with_identity_from_token(),
        };

        self.store.write(&record);
        self.lifecycle.schedule_refresh(&record.access_token);
        let expires_at_ms = token::expires_at_ms(&record.access_token);
        LoggingHelper::log_refresh_success(&record.access_token, expires_at_ms);
        self.events
            .emit(SessionEvent::TokenRefreshed { expires_at_ms });
    }

    /// Apply native pushes in arrival order on a background task
    #[must_use]
    pub fn spawn_push_listener(self: &Arc<Self>) -> JoinHandle<()> {
        let mut pushes = self.bridge.subscribe();
        let this = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                match pushes.recv().await {
                    Ok(event) => this.apply_push(event),
                    Err(RecvError::Lagged(missed)) => {
                        log::warn!("Push listener lagged; {missed} native event(s) lost");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            log::debug!("Push listener stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::refresh::TokenRefresher;
    use crate::testing::{HostReplies, MockHost, MockRefresher, TestBackends, TestTokens};

    struct Harness {
        orchestrator: Arc<AutoLoginOrchestrator>,
        store: Arc<SessionStore>,
        events: SessionEvents,
    }

    fn harness(backends: &TestBackends, bridge: NativeBridge, refresher: Arc<dyn TokenRefresher>) -> Harness {
        let store = Arc::new(backends.store());
        let events = SessionEvents::default();
        let lifecycle = TokenLifecycleManager::new(
            store.clone(),
            refresher,
            bridge.clone(),
            events.clone(),
            Duration::from_secs(300),
        );
        let orchestrator = Arc::new(AutoLoginOrchestrator::new(
            store.clone(),
            bridge.clone(),
            BiometricGate::new(bridge, "unlock"),
            lifecycle,
            events.clone(),
            Duration::from_secs(3),
        ));
        Harness {
            orchestrator,
            store,
            events,
        }
    }

    #[tokio::test]
    async fn test_restore_valid_stored_session() {
        let backends = TestBackends::new();
        let record = TestBackends::record(&TestTokens::valid_for_secs(3600), true);
        backends.store().write(&record);

        let h = harness(&backends, NativeBridge::web_only(), MockRefresher::unused());
        let mut rx = h.events.subscribe();

        assert!(h.orchestrator.restore().await);
        assert!(h.orchestrator.lifecycle().is_scheduled());
        assert_eq!(
            rx.recv().await.unwrap(),
            SessionEvent::Login {
                identity: record.identity.clone(),
                keep_login: true
            }
        );
    }

    #[tokio::test]
    async fn test_restore_empty_web_is_logged_out() {
        let backends = TestBackends::new();
        let h = harness(&backends, NativeBridge::web_only(), MockRefresher::unused());
        assert!(!h.orchestrator.restore().await);
    }

    #[tokio::test]
    async fn test_restore_expired_refreshes_once() {
        let backends = TestBackends::new();
        backends
            .store()
            .write(&TestBackends::record(&TestTokens::expired_secs_ago(60), false));
        let refresher = MockRefresher::succeeding(&TestTokens::valid_for_secs(3600), None);

        let h = harness(&backends, NativeBridge::web_only(), refresher.clone());
        assert!(h.orchestrator.restore().await);
        assert_eq!(refresher.calls(), 1);
        let current = h.store.current().unwrap();
        assert!(token::is_valid(&current.access_token, token::current_time_ms()));
    }

    #[tokio::test]
    async fn test_restore_expired_refresh_failure_is_logged_out() {
        let backends = TestBackends::new();
        backends
            .store()
            .write(&TestBackends::record(&TestTokens::expired_secs_ago(60), true));
        let refresher = MockRefresher::failing(crate::error::RefreshError::Rejected { status: 401 });

        let h = harness(&backends, NativeBridge::web_only(), refresher.clone());
        assert!(!h.orchestrator.restore().await);
        assert_eq!(refresher.calls(), 1);
        assert!(h.store.read().is_none());
    }

    #[tokio::test]
    async fn test_restore_expired_without_refresh_token() {
        let backends = TestBackends::new();
        backends.store().write(&SessionRecord::new(&TestTokens::expired_secs_ago(60), None, true));
        let refresher = MockRefresher::unused();

        let h = harness(&backends, NativeBridge::web_only(), refresher.clone());
        let mut rx = h.events.subscribe();
        assert!(!h.orchestrator.restore().await);
        assert_eq!(
            rx.recv().await.unwrap(),
            SessionEvent::Logout {
                reason: LogoutReason::Expired
            }
        );
    }

    #[tokio::test]
    async fn test_restore_pulls_login_info_from_host() {
        let backends = TestBackends::new();
        let host = MockHost::new();
        let token = TestTokens::valid_for_secs(3600);
        host.reply_to("requestLoginInfo", HostReplies::login_info(&token, Some("r"), true));

        let h = harness(&backends, host.android_bridge(), MockRefresher::unused());
        assert!(h.orchestrator.restore().await);
        assert_eq!(h.store.read().unwrap().access_token, token);
        assert!(h.store.keep_login());
    }

    #[tokio::test(start_paused = true)]
    async fn test_restore_host_silence_is_web_only() {
        let backends = TestBackends::new();
        let host = MockHost::new();
        let bridge = host.android_bridge();

        let h = harness(&backends, bridge.clone(), MockRefresher::unused());
        assert!(!h.orchestrator.restore().await);
        assert_eq!(bridge.pending_requests(), 0);
    }

    #[tokio::test]
    async fn test_restore_biometric_denied_is_logged_out() {
        let backends = TestBackends::new();
        backends
            .store()
            .write(&TestBackends::record(&TestTokens::valid_for_secs(3600), true));
        let host = MockHost::new();
        host.reply_to("checkBiometricStatus", HostReplies::biometric_status(true, true, true));
        host.reply_to("requestBiometricAuth", HostReplies::biometric_result(false, None));

        let h = harness(&backends, host.android_bridge(), MockRefresher::unused());
        let mut rx = h.events.subscribe();

        assert!(!h.orchestrator.restore().await);
        assert!(!h.orchestrator.lifecycle().is_scheduled());
        assert!(h.store.read().is_none());
        assert_eq!(
            rx.recv().await.unwrap(),
            SessionEvent::Logout {
                reason: LogoutReason::BiometricDenied
            }
        );
    }

    #[tokio::test]
    async fn test_page_hidden_persists_and_notifies_host() {
        let backends = TestBackends::new();
        let host = MockHost::new();
        let h = harness(&backends, host.android_bridge(), MockRefresher::unused());

        let record = TestBackends::record(&TestTokens::valid_for_secs(3600), true);
        h.store.write(&record);
        backends.durable.end_session();

        assert!(h.orchestrator.on_page_hidden());
        assert!(backends.durable_token().is_some());
        assert_eq!(host.sent_actions().last().map(String::as_str), Some("syncTokenOnHidden"));

        assert!(h.orchestrator.on_before_unload());
        let sent = host.sent();
        let unload = sent.last().unwrap();
        assert_eq!(unload["action"], "syncTokenOnUnload");
        assert_eq!(unload["payload"]["token"], record.access_token.as_str());
        assert_eq!(unload["payload"]["keepLogin"], true);
    }

    #[tokio::test]
    async fn test_page_hidden_without_keep_login_does_nothing() {
        let backends = TestBackends::new();
        let host = MockHost::new();
        let h = harness(&backends, host.android_bridge(), MockRefresher::unused());
        h.store
            .write(&TestBackends::record(&TestTokens::valid_for_secs(3600), false));

        assert!(!h.orchestrator.on_page_hidden());
        assert!(host.sent().is_empty());
        assert!(backends.durable_token().is_none());
    }

    #[tokio::test]
    async fn test_push_login_and_multi_device_logout() {
        let backends = TestBackends::new();
        let host = MockHost::new();
        let bridge = host.android_bridge();
        let h = harness(&backends, bridge.clone(), MockRefresher::unused());
        let listener = h.orchestrator.spawn_push_listener();
        let mut rx = h.events.subscribe();

        let token = TestTokens::valid_for_secs(3600);
        host.push(HostReplies::login_info(&token, None, false));
        assert!(matches!(rx.recv().await.unwrap(), SessionEvent::Login { keep_login: false, .. }));
        assert_eq!(h.store.read().unwrap().access_token, token);

        host.push(HostReplies::multi_device_logout("signed in elsewhere"));
        assert_eq!(
            rx.recv().await.unwrap(),
            SessionEvent::Logout {
                reason: LogoutReason::MultiDevice("signed in elsewhere".to_string())
            }
        );
        assert!(h.store.read().is_none());
        assert!(!h.orchestrator.lifecycle().is_scheduled());
        listener.abort();
    }

    #[tokio::test]
    async fn test_push_token_refresh_keeps_identity() {
        let backends = TestBackends::new();
        let h = harness(&backends, NativeBridge::web_only(), MockRefresher::unused());
        let record = TestBackends::record(&TestTokens::valid_for_secs(60), true);
        h.store.write(&record);

        let fresh = TestTokens::valid_for_secs(7200);
        h.orchestrator.apply_push(InboundEvent::TokenRefreshed(TokenPair {
            access_token: fresh.clone(),
            refresh_token: None,
        }));

        let current = h.store.read().unwrap();
        assert_eq!(current.access_token, fresh);
        assert_eq!(current.refresh_token, record.refresh_token);
        assert_eq!(current.identity, record.identity);

        // Garbage tokens from the host are ignored
        h.orchestrator.apply_push(InboundEvent::TokenRefreshed(TokenPair {
            access_token: "garbage".to_string(),
            refresh_token: None,
        }));
        assert_eq!(h.store.read().unwrap().access_token, fresh);
    }

    #[tokio::test]
    async fn test_push_auto_login_failed_is_surfaced() {
        let backends = TestBackends::new();
        let h = harness(&backends, NativeBridge::web_only(), MockRefresher::unused());
        let mut rx = h.events.subscribe();

        h.orchestrator.apply_push(InboundEvent::AutoLoginFailed {
            reason: "token_expired".to_string(),
            message: Some("Please log in again".to_string()),
        });
        assert_eq!(
            rx.recv().await.unwrap(),
            SessionEvent::AutoLoginFailed {
                reason: "token_expired".to_string(),
                message: Some("Please log in again".to_string())
            }
        );
    }
}
