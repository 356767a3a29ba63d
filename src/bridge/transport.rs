use std::fmt;
use std::sync::Arc;

use crate::error::BridgeError;

/// How the page is hosted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NativeTransport {
    /// Plain browser; every bridge call resolves as not available
    None,
    /// Android WebView (`ReactNativeWebView.postMessage` or `nativeApp`)
    AndroidWebView,
    /// iOS WKWebView (`webkit.messageHandlers.<name>.postMessage`)
    IosWebKit,
}

impl fmt::Display for NativeTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NativeTransport::None => write!(f, "web"),
            NativeTransport::AndroidWebView => write!(f, "android-webview"),
            NativeTransport::IosWebKit => write!(f, "ios-webkit"),
        }
    }
}

/// The host-side function a serialized message is posted to
pub trait MessageSink: Send + Sync {
    /// Hand one serialized message to the host
    ///
    /// # Errors
    ///
    /// Returns `BridgeError::Transport` if the host refused the message
    fn post(&self, message: &str) -> Result<(), BridgeError>;
}

/// What the host injected into the page, inspected once at startup
#[derive(Clone, Default)]
pub struct HostProbe {
    pub react_native_webview: bool,
    pub webkit_handlers: Vec<String>,
    pub native_app: bool,
    pub sink: Option<Arc<dyn MessageSink>>,
}

impl HostProbe {
    /// A plain browser with no native host
    #[must_use]
    pub fn browser() -> Self {
        Self::default()
    }

    /// Android WebView exposing `ReactNativeWebView`
    #[must_use]
    pub fn android(sink: Arc<dyn MessageSink>) -> Self {
        Self {
            react_native_webview: true,
            sink: Some(sink),
            ..Self::default()
        }
    }

    /// iOS WKWebView exposing `webkit.messageHandlers.<handler>`
    #[must_use]
    pub fn ios(handler: &str, sink: Arc<dyn MessageSink>) -> Self {
        Self {
            webkit_handlers: vec![handler.to_string()],
            sink: Some(sink),
            ..Self::default()
        }
    }

    /// Decide the transport; `handler_name` is the WebKit handler to look for
    #[must_use]
    pub fn detect(&self, handler_name: &str) -> NativeTransport {
        let transport = if self.react_native_webview || self.native_app {
            NativeTransport::AndroidWebView
        } else if self.webkit_handlers.iter().any(|h| h == handler_name) {
            NativeTransport::IosWebKit
        } else {
            NativeTransport::None
        };

        if transport != NativeTransport::None && self.sink.is_none() {
            log::warn!("Native host markers found but no message sink supplied; running web-only");
            return NativeTransport::None;
        }
        transport
    }
}

impl fmt::Debug for HostProbe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostProbe")
            .field("react_native_webview", &self.react_native_webview)
            .field("webkit_handlers", &self.webkit_handlers)
            .field("native_app", &self.native_app)
            .field("sink", &self.sink.is_some())
            .finish()
    }
}
