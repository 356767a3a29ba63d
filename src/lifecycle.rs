//! Token lifecycle: the refresh timer and de-duplicated refresh calls
//!
//! Exactly one timer is armed at a time; re-arming aborts the previous one.
//! Concurrent `refresh()` callers share a single network call running on its
//! own task, so a caller that gives up waiting does not cancel the refresh
//! for the others.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::bridge::{NativeBridge, OutboundAction, TokenSync};
use crate::error::{AuthError, RefreshError};
use crate::events::{LogoutReason, SessionEvent, SessionEvents};
use crate::models::SessionRecord;
use crate::refresh::TokenRefresher;
use crate::session::SessionStore;
use crate::token;
use crate::utils::logging::LoggingHelper;

/// Delay until a token with `remaining_ms` left should be refreshed
///
/// `margin` before expiry, or at half the remaining lifetime when less than
/// `margin` is left. An expired token is refreshed at once.
#[must_use]
pub fn refresh_delay(remaining_ms: u64, margin: Duration) -> Duration {
    let margin_ms = u64::try_from(margin.as_millis()).unwrap_or(u64::MAX);
    if remaining_ms > margin_ms {
        Duration::from_millis(remaining_ms - margin_ms)
    } else {
        Duration::from_millis(remaining_ms / 2)
    }
}

type RefreshOutcome = watch::Receiver<Option<bool>>;

struct LifecycleInner {
    store: Arc<SessionStore>,
    refresher: Arc<dyn TokenRefresher>,
    bridge: NativeBridge,
    events: SessionEvents,
    margin: Duration,
    timer: Mutex<Option<JoinHandle<()>>>,
    in_flight: Mutex<Option<RefreshOutcome>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Owns the refresh timer and performs refreshes
#[derive(Clone)]
pub struct TokenLifecycleManager {
    inner: Arc<LifecycleInner>,
}

impl TokenLifecycleManager {
    #[must_use]
    pub fn new(
        store: Arc<SessionStore>,
        refresher: Arc<dyn TokenRefresher>,
        bridge: NativeBridge,
        events: SessionEvents,
        margin: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(LifecycleInner {
                store,
                refresher,
                bridge,
                events,
                margin,
                timer: Mutex::new(None),
                in_flight: Mutex::new(None),
            }),
        }
    }

    /// Arm the refresh timer for `access_token`, replacing any armed timer
    ///
    /// Returns the delay, or `None` if the token has no readable expiry (the
    /// previous timer is cancelled either way).
    pub fn schedule_refresh(&self, access_token: &str) -> Option<Duration> {
        self.inner.schedule(access_token)
    }

    /// Refresh now, joining a refresh already in flight
    ///
    /// On failure the session is cleared and `Logout` emitted. Returns
    /// `false` as well when the session was cleared while the call was in
    /// flight; the response is dropped in that case.
    pub async fn refresh(&self) -> bool {
        self.inner.refresh().await
    }

    /// Disarm the refresh timer
    pub fn cancel(&self) {
        self.inner.cancel();
    }

    #[must_use]
    pub fn is_scheduled(&self) -> bool {
        lock(&self.inner.timer)
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Whether a refresh call is running right now
    #[must_use]
    pub fn is_refreshing(&self) -> bool {
        lock(&self.inner.in_flight).is_some()
    }
}

impl LifecycleInner {
    fn schedule(self: &Arc<Self>, access_token: &str) -> Option<Duration> {
        let now = token::current_time_ms();
        let Some(expires_at) = token::expires_at_ms(access_token) else {
            log::warn!("Not scheduling refresh: token has no readable expiry");
            self.cancel();
            return None;
        };

        let delay = refresh_delay(expires_at.saturating_sub(now), self.margin);
        let this = Arc::clone(self);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            log::debug!("Refresh timer fired");
            this.refresh().await;
        });

        if let Some(previous) = lock(&self.timer).replace(handle) {
            previous.abort();
        }
        log::debug!("Refresh scheduled in {delay:?}");
        Some(delay)
    }

    fn cancel(&self) {
        if let Some(handle) = lock(&self.timer).take() {
            handle.abort();
            log::debug!("Refresh timer cancelled");
        }
    }

    async fn refresh(self: &Arc<Self>) -> bool {
        let mut outcome = {
            let mut in_flight = lock(&self.in_flight);
            if let Some(outcome) = in_flight.as_ref() {
                log::debug!("Joining refresh already in flight");
                outcome.clone()
            } else {
                let (sender, receiver) = watch::channel(None);
                *in_flight = Some(receiver.clone());

                let this = Arc::clone(self);
                tokio::spawn(async move {
                    let result = this.run_refresh().await;
                    *lock(&this.in_flight) = None;
                    let _ = sender.send(Some(result));
                });
                receiver
            }
        };

        let refreshed = match outcome.wait_for(Option::is_some).await {
            Ok(result) => (*result).unwrap_or(false),
            Err(_) => {
                log::warn!("Refresh task ended without a result");
                false
            }
        };
        refreshed
    }

    async fn run_refresh(self: &Arc<Self>) -> bool {
        let generation = self.store.generation();
        let Some(record) = self.store.current().or_else(|| self.store.read()) else {
            log::debug!("Nothing to refresh: no session");
            return false;
        };

        let result = match record.refresh_token.as_deref() {
            Some(refresh_token) => self.refresher.refresh(refresh_token).await,
            None => Err(RefreshError::MissingRefreshToken),
        };

        match result.and_then(|pair| {
            token::decode(&pair.access_token)
                .map(|_| record.refreshed(pair.access_token, pair.refresh_token))
                .map_err(|e| RefreshError::InvalidResponse(e.to_string()))
        }) {
            Ok(next) => self.apply_refreshed(&next, generation),
            Err(err) => {
                self.fail(&AuthError::RefreshFailed(err), generation);
                false
            }
        }
    }

    fn apply_refreshed(self: &Arc<Self>, next: &SessionRecord, generation: u64) -> bool {
        if self.store.write_if_current(next, generation).is_none() {
            log::info!("Dropping refresh response: session ended or was replaced while refreshing");
            return false;
        }

        let expires_at_ms = token::expires_at_ms(&next.access_token);
        LoggingHelper::log_refresh_success(&next.access_token, expires_at_ms);
        self.schedule(&next.access_token);

        if let Err(e) = self
            .bridge
            .send(&OutboundAction::SyncToken(TokenSync::from(next)))
        {
            log::warn!("Could not sync refreshed token to native host: {e}");
        }
        self.events.emit(SessionEvent::TokenRefreshed { expires_at_ms });
        true
    }

    fn fail(&self, err: &AuthError, generation: u64) {
        log::warn!("{err}");
        if self.store.clear_if_current(generation).is_none() {
            log::debug!("Session already replaced; not logging out after failed refresh");
            return;
        }
        self.cancel();
        let reason = LogoutReason::RefreshFailed;
        LoggingHelper::log_logout(&reason);
        self.events.emit(SessionEvent::Logout { reason });
    }
}
