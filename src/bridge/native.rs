//! Native bridge: request correlation, the pending table and push fan-out
//!
//! Replies that echo a request id go to that request only. Replies without
//! an id fall back to the oldest request waiting for the same event kind.
//! Everything else is broadcast to push subscribers in arrival order.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::{broadcast, oneshot};
use uuid::Uuid;

use super::protocol::{EventKind, InboundEvent, InboundMessage, OutboundAction};
use super::transport::{HostProbe, MessageSink, NativeTransport};
use crate::error::BridgeError;
use crate::settings::BridgeSettings;
use crate::utils::logging::LoggingHelper;

const PUSH_CHANNEL_CAPACITY: usize = 64;

/// Result of a fire-and-forget send
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Sent,
    NotAvailable,
}

/// Result of a request expecting a reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeReply {
    Reply(InboundEvent),
    NotAvailable,
}

struct PendingRequest {
    id: String,
    expects: EventKind,
    reply: oneshot::Sender<InboundEvent>,
}

struct BridgeInner {
    transport: NativeTransport,
    sink: Option<Arc<dyn MessageSink>>,
    // Oldest first, so replies without a correlation id go to the earliest waiter
    pending: Mutex<Vec<PendingRequest>>,
    pushes: broadcast::Sender<InboundEvent>,
    status_timeout: Duration,
    interactive_timeout: Duration,
}

impl BridgeInner {
    fn pending(&self) -> MutexGuard<'_, Vec<PendingRequest>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Removes a pending request on every exit path, including a dropped future
struct PendingGuard<'a> {
    inner: &'a BridgeInner,
    id: String,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.inner.pending().retain(|p| p.id != self.id);
    }
}

/// Message channel between the web side and the native host
///
/// Cheap to clone; clones share the pending-request table and the push
/// channel.
#[derive(Clone)]
pub struct NativeBridge {
    inner: Arc<BridgeInner>,
}

impl NativeBridge {
    /// Detect the host environment once and build the bridge
    #[must_use]
    pub fn new(probe: HostProbe, settings: &BridgeSettings) -> Self {
        let transport = probe.detect(&settings.handler_name);
        log::info!("Native bridge environment: {transport}");

        let (pushes, _) = broadcast::channel(PUSH_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(BridgeInner {
                transport,
                sink: probe.sink.filter(|_| transport != NativeTransport::None),
                pending: Mutex::new(Vec::new()),
                pushes,
                status_timeout: Duration::from_millis(settings.status_timeout_ms),
                interactive_timeout: Duration::from_millis(settings.interactive_timeout_ms),
            }),
        }
    }

    /// A bridge for a plain browser
    #[must_use]
    pub fn web_only() -> Self {
        Self::new(HostProbe::browser(), &BridgeSettings::default())
    }

    #[must_use]
    pub fn environment(&self) -> NativeTransport {
        self.inner.transport
    }

    #[must_use]
    pub fn is_native(&self) -> bool {
        self.inner.transport != NativeTransport::None
    }

    /// Deadline for status queries
    #[must_use]
    pub fn status_timeout(&self) -> Duration {
        self.inner.status_timeout
    }

    /// Deadline for operations that wait on the user
    #[must_use]
    pub fn interactive_timeout(&self) -> Duration {
        self.inner.interactive_timeout
    }

    /// Number of requests still waiting for a reply
    #[must_use]
    pub fn pending_requests(&self) -> usize {
        self.inner.pending().len()
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<InboundEvent> {
        self.inner.pushes.subscribe()
    }

    fn post(&self, action: &OutboundAction, id: Option<&str>) -> Result<Delivery, BridgeError> {
        let Some(sink) = &self.inner.sink else {
            return Ok(Delivery::NotAvailable);
        };
        let message = action.to_message(id)?;
        LoggingHelper::log_bridge_send(action.name(), id);
        sink.post(&message)?;
        Ok(Delivery::Sent)
    }

    /// Send a message that expects no reply
    ///
    /// # Errors
    ///
    /// Returns an error if the message cannot be serialized or the host
    /// refuses it. A missing host is `Delivery::NotAvailable`, not an error.
    pub fn send(&self, action: &OutboundAction) -> Result<Delivery, BridgeError> {
        self.post(action, None)
    }

    /// Send a message and wait for the host's reply
    ///
    /// The reply is the message that echoes the generated correlation id or,
    /// when the host does not echo ids, the first `expects` event that arrives
    /// while this request is the oldest one waiting for that kind. A message
    /// echoing some other id never satisfies this request.
    ///
    /// # Errors
    ///
    /// - `BridgeError::Timeout` if no reply arrives within `timeout`
    /// - `BridgeError::Closed` if the bridge was shut down while waiting
    /// - transport and serialization errors from sending
    pub async fn request(
        &self,
        action: OutboundAction,
        expects: EventKind,
        timeout: Duration,
    ) -> Result<BridgeReply, BridgeError> {
        if !self.is_native() {
            return Ok(BridgeReply::NotAvailable);
        }

        let id = Uuid::new_v4().to_string();
        let (reply, receiver) = oneshot::channel();
        self.inner.pending().push(PendingRequest {
            id: id.clone(),
            expects,
            reply,
        });
        let _guard = PendingGuard {
            inner: &self.inner,
            id: id.clone(),
        };

        self.post(&action, Some(&id))?;

        match tokio::time::timeout(timeout, receiver).await {
            Ok(Ok(event)) => Ok(BridgeReply::Reply(event)),
            Ok(Err(_)) => Err(BridgeError::Closed(action.name().to_string())),
            Err(_) => {
                log::warn!("Native host did not answer '{}' within {timeout:?}", action.name());
                Err(BridgeError::Timeout {
                    action: action.name().to_string(),
                    timeout,
                })
            }
        }
    }

    /// Handle a raw message from the host
    ///
    /// # Errors
    ///
    /// Returns `BridgeError::Protocol` if the message cannot be parsed; the
    /// message is dropped
    pub fn dispatch(&self, raw: &str) -> Result<(), BridgeError> {
        let message = InboundMessage::parse(raw).inspect_err(|e| {
            log::warn!("Dropping native message: {e}");
        })?;
        self.deliver(message);
        Ok(())
    }

    /// Route an inbound message to its waiting request, or broadcast it
    pub fn deliver(&self, message: InboundMessage) {
        let InboundMessage { reply_to, event } = message;

        let waiter = {
            let mut pending = self.inner.pending();
            let index = match reply_to.as_deref() {
                Some(id) => pending.iter().position(|p| p.id == id),
                None => pending.iter().position(|p| p.expects == event.kind()),
            };
            index.map(|i| pending.remove(i))
        };

        let event = match waiter {
            Some(waiter) => match waiter.reply.send(event) {
                Ok(()) => {
                    log::debug!("Native reply matched request {}", waiter.id);
                    return;
                }
                // The requester went away between lookup and send
                Err(event) => event,
            },
            None => event,
        };

        log::debug!("Native push: {}", event.kind());
        if self.inner.pushes.send(event).is_err() {
            log::debug!("No subscribers for native push");
        }
    }

    /// Fail every waiting request with `BridgeError::Closed`
    pub fn close(&self) {
        let dropped = std::mem::take(&mut *self.inner.pending());
        if !dropped.is_empty() {
            log::debug!("Closing bridge with {} pending request(s)", dropped.len());
        }
    }
}
