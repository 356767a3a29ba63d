//! Mock objects and fake implementations for testing
//!
//! [`MockHost`] plays the native app behind the bridge; [`MockRefresher`]
//! stands in for the refresh endpoint.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;

use crate::bridge::{HostProbe, MessageSink, NativeBridge};
use crate::error::{BridgeError, RefreshError};
use crate::models::TokenPair;
use crate::refresh::TokenRefresher;
use crate::settings::BridgeSettings;

/// A scripted native host
///
/// Records every message the bridge posts and answers scripted actions.
/// Replies and pushes travel through a queue pumped into the bridge on a
/// background task, so they arrive asynchronously as they would from a real
/// WebView.
pub struct MockHost {
    sent: Mutex<Vec<Value>>,
    scripted: Mutex<HashMap<String, Value>>,
    echo_ids: AtomicBool,
    fail_posts: AtomicBool,
    outbox: mpsc::UnboundedSender<String>,
    inbox: Mutex<Option<mpsc::UnboundedReceiver<String>>>,
}

impl MockHost {
    #[must_use]
    pub fn new() -> Arc<Self> {
        let (outbox, inbox) = mpsc::unbounded_channel();
        Arc::new(Self {
            sent: Mutex::new(Vec::new()),
            scripted: Mutex::new(HashMap::new()),
            echo_ids: AtomicBool::new(true),
            fail_posts: AtomicBool::new(false),
            outbox,
            inbox: Mutex::new(Some(inbox)),
        })
    }

    /// Answer without `replyTo`, like hosts that do not echo ids
    #[must_use]
    pub fn without_id_echo(self: Arc<Self>) -> Arc<Self> {
        self.echo_ids.store(false, Ordering::SeqCst);
        self
    }

    /// An Android host probe posting into this mock
    #[must_use]
    pub fn probe(self: &Arc<Self>) -> HostProbe {
        HostProbe::android(self.clone())
    }

    /// A bridge to this host, already connected
    ///
    /// # Panics
    ///
    /// Panics outside a Tokio runtime or if the host is already connected
    #[must_use]
    pub fn android_bridge(self: &Arc<Self>) -> NativeBridge {
        let bridge = NativeBridge::new(self.probe(), &BridgeSettings::default());
        self.connect(&bridge);
        bridge
    }

    /// Start delivering replies and pushes into `bridge`
    ///
    /// # Panics
    ///
    /// Panics outside a Tokio runtime or if the host is already connected
    pub fn connect(&self, bridge: &NativeBridge) -> JoinHandle<()> {
        let mut inbox = self.inbox.lock().unwrap().take().expect("MockHost already connected");
        let bridge = bridge.clone();
        tokio::spawn(async move {
            while let Some(raw) = inbox.recv().await {
                let _ = bridge.dispatch(&raw);
            }
        })
    }

    /// Reply with `event` whenever `action` is posted
    ///
    /// # Panics
    ///
    /// Panics if the mock's lock is poisoned
    pub fn reply_to(&self, action: &str, event: Value) {
        self.scripted.lock().unwrap().insert(action.to_string(), event);
    }

    /// Send an unsolicited event to the page
    ///
    /// # Panics
    ///
    /// Panics if the pump has stopped
    pub fn push(&self, event: Value) {
        self.outbox.send(event.to_string()).unwrap();
    }

    /// Make every post fail with a transport error
    pub fn fail_posts(&self, fail: bool) {
        self.fail_posts.store(fail, Ordering::SeqCst);
    }

    /// Every message posted so far, parsed
    ///
    /// # Panics
    ///
    /// Panics if the mock's lock is poisoned
    #[must_use]
    pub fn sent(&self) -> Vec<Value> {
        self.sent.lock().unwrap().clone()
    }

    /// The `action` of every message posted so far
    #[must_use]
    pub fn sent_actions(&self) -> Vec<String> {
        self.sent()
            .iter()
            .filter_map(|m| m["action"].as_str().map(ToString::to_string))
            .collect()
    }
}

impl MessageSink for MockHost {
    fn post(&self, message: &str) -> Result<(), BridgeError> {
        if self.fail_posts.load(Ordering::SeqCst) {
            return Err(BridgeError::Transport("mock host refused message".to_string()));
        }

        let parsed: Value =
            serde_json::from_str(message).map_err(|e| BridgeError::Protocol(e.to_string()))?;
        self.sent.lock().unwrap().push(parsed.clone());

        let action = parsed["action"].as_str().unwrap_or_default();
        let Some(mut reply) = self.scripted.lock().unwrap().get(action).cloned() else {
            return Ok(());
        };
        if self.echo_ids.load(Ordering::SeqCst) {
            if let (Some(id), Some(object)) = (parsed["id"].as_str(), reply.as_object_mut()) {
                object.insert("replyTo".to_string(), Value::from(id));
            }
        }
        self.outbox
            .send(reply.to_string())
            .map_err(|e| BridgeError::Transport(e.to_string()))
    }
}

/// A refresher returning a fixed outcome and counting calls
pub struct MockRefresher {
    response: Result<TokenPair, RefreshError>,
    calls: AtomicUsize,
    last_refresh_token: Mutex<Option<String>>,
    held: AtomicBool,
    gate: Semaphore,
}

impl MockRefresher {
    fn with_response(response: Result<TokenPair, RefreshError>) -> Arc<Self> {
        Arc::new(Self {
            response,
            calls: AtomicUsize::new(0),
            last_refresh_token: Mutex::new(None),
            held: AtomicBool::new(false),
            gate: Semaphore::new(0),
        })
    }

    /// Every call returns these tokens
    #[must_use]
    pub fn succeeding(access_token: &str, refresh_token: Option<&str>) -> Arc<Self> {
        Self::with_response(Ok(TokenPair {
            access_token: access_token.to_string(),
            refresh_token: refresh_token.map(ToString::to_string),
        }))
    }

    /// Every call fails with `error`
    #[must_use]
    pub fn failing(error: RefreshError) -> Arc<Self> {
        Self::with_response(Err(error))
    }

    /// For components that should never refresh
    #[must_use]
    pub fn unused() -> Arc<Self> {
        Self::failing(RefreshError::Network("no refresh endpoint in this test".to_string()))
    }

    /// Block calls until [`MockRefresher::release`]
    #[must_use]
    pub fn held(self: Arc<Self>) -> Arc<Self> {
        self.held.store(true, Ordering::SeqCst);
        self
    }

    /// Let held calls (and all later ones) complete
    pub fn release(&self) {
        self.held.store(false, Ordering::SeqCst);
        self.gate.add_permits(Semaphore::MAX_PERMITS / 2);
    }

    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// # Panics
    ///
    /// Panics if the mock's lock is poisoned
    #[must_use]
    pub fn last_refresh_token(&self) -> Option<String> {
        self.last_refresh_token.lock().unwrap().clone()
    }

    /// Yield until at least `n` calls have started
    pub async fn wait_for_calls(&self, n: usize) {
        while self.calls() < n {
            tokio::task::yield_now().await;
        }
    }
}

#[async_trait]
impl TokenRefresher for MockRefresher {
    async fn refresh(&self, refresh_token: &str) -> Result<TokenPair, RefreshError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_refresh_token.lock().unwrap() = Some(refresh_token.to_string());

        if self.held.load(Ordering::SeqCst) {
            if let Ok(permit) = self.gate.acquire().await {
                permit.forget();
            }
        }
        self.response.clone()
    }
}
