//! Native host bridge
//!
//! When the page runs inside a native app's WebView the host and the web
//! side exchange JSON messages. Requests that need an answer are correlated
//! through a pending-request table; everything else the host sends is a push
//! event delivered to subscribers in arrival order. In a plain browser every
//! call resolves immediately as "not available".
//!
//! - [`transport`] - environment detection and the host message sink
//! - [`protocol`] - outbound actions and inbound events
//! - [`native`] - the bridge itself

pub mod native;
pub mod protocol;
pub mod transport;

pub use native::{BridgeReply, Delivery, NativeBridge};
pub use protocol::{
    BiometricStatus, EventKind, InboundEvent, InboundMessage, LoginInfo, NativeUserInfo,
    OutboundAction, TokenSync,
};
pub use transport::{HostProbe, MessageSink, NativeTransport};
