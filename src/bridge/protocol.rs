//! Wire format of the native bridge
//!
//! Outbound: `{"id"?, "action", "payload"?}`. `id` is only present on
//! requests that expect a reply.
//!
//! Inbound: `{"replyTo"?, "event", "detail"}`. Hosts that do not echo
//! correlation ids omit `replyTo`; their replies are matched by event kind.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::error::BridgeError;
use crate::models::{Identity, SessionRecord, TokenPair};

/// Token snapshot sent to the host
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenSync {
    pub token: String,
    pub refresh_token: Option<String>,
    pub keep_login: bool,
}

impl From<&SessionRecord> for TokenSync {
    fn from(record: &SessionRecord) -> Self {
        Self {
            token: record.access_token.clone(),
            refresh_token: record.refresh_token.clone(),
            keep_login: record.keep_login,
        }
    }
}

/// Messages the web side sends to the native host
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundAction {
    RequestLoginInfo,
    SyncToken(TokenSync),
    SyncTokenOnUnload(TokenSync),
    SyncTokenOnHidden(TokenSync),
    RequestBiometricAuth { reason: String },
    CheckBiometricStatus,
    EnableBiometricAuth,
    SetBiometricAutoLogin { require: bool },
}

impl OutboundAction {
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            OutboundAction::RequestLoginInfo => "requestLoginInfo",
            OutboundAction::SyncToken(_) => "syncToken",
            OutboundAction::SyncTokenOnUnload(_) => "syncTokenOnUnload",
            OutboundAction::SyncTokenOnHidden(_) => "syncTokenOnHidden",
            OutboundAction::RequestBiometricAuth { .. } => "requestBiometricAuth",
            OutboundAction::CheckBiometricStatus => "checkBiometricStatus",
            OutboundAction::EnableBiometricAuth => "enableBiometricAuth",
            OutboundAction::SetBiometricAutoLogin { .. } => "setBiometricAutoLogin",
        }
    }

    fn payload(&self) -> Option<Value> {
        match self {
            OutboundAction::SyncToken(sync)
            | OutboundAction::SyncTokenOnUnload(sync)
            | OutboundAction::SyncTokenOnHidden(sync) => serde_json::to_value(sync).ok(),
            OutboundAction::RequestBiometricAuth { reason } => {
                Some(serde_json::json!({ "reason": reason }))
            }
            OutboundAction::SetBiometricAutoLogin { require } => {
                Some(serde_json::json!({ "require": require }))
            }
            OutboundAction::RequestLoginInfo
            | OutboundAction::CheckBiometricStatus
            | OutboundAction::EnableBiometricAuth => None,
        }
    }

    /// Serialize into the outbound envelope
    ///
    /// # Errors
    ///
    /// Returns `BridgeError::Protocol` if the payload cannot be serialized
    pub fn to_message(&self, id: Option<&str>) -> Result<String, BridgeError> {
        #[derive(Serialize)]
        struct Envelope<'a> {
            #[serde(skip_serializing_if = "Option::is_none")]
            id: Option<&'a str>,
            action: &'static str,
            #[serde(skip_serializing_if = "Option::is_none")]
            payload: Option<Value>,
        }

        serde_json::to_string(&Envelope {
            id,
            action: self.name(),
            payload: self.payload(),
        })
        .map_err(|e| BridgeError::Protocol(e.to_string()))
    }
}

/// Event names the host can send
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    LoginInfoReceived,
    TokenRefreshed,
    MultiDeviceLogout,
    AutoLoginFailed,
    BiometricAuthResult,
    BiometricStatusResult,
}

impl EventKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::LoginInfoReceived => "loginInfoReceived",
            EventKind::TokenRefreshed => "tokenRefreshed",
            EventKind::MultiDeviceLogout => "multiDeviceLogout",
            EventKind::AutoLoginFailed => "autoLoginFailed",
            EventKind::BiometricAuthResult => "biometricAuthResult",
            EventKind::BiometricStatusResult => "biometricStatusResult",
        }
    }

    fn parse(name: &str) -> Option<Self> {
        [
            EventKind::LoginInfoReceived,
            EventKind::TokenRefreshed,
            EventKind::MultiDeviceLogout,
            EventKind::AutoLoginFailed,
            EventKind::BiometricAuthResult,
            EventKind::BiometricStatusResult,
        ]
        .into_iter()
        .find(|kind| kind.as_str() == name)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Login data pushed by the host
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NativeUserInfo {
    #[serde(alias = "token")]
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

impl NativeUserInfo {
    #[must_use]
    pub fn into_record(self, keep_login: bool) -> SessionRecord {
        let identity = Identity {
            user_id: self.user_id,
            email: self.email,
            name: self.name,
        };
        SessionRecord::new(&self.access_token, self.refresh_token.as_deref(), keep_login)
            .with_identity(identity)
            .with_identity_from_token()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginInfo {
    pub user_info: NativeUserInfo,
    #[serde(default)]
    pub keep_login: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BiometricStatus {
    #[serde(default)]
    pub is_available: bool,
    #[serde(default)]
    pub biometric_type: Option<String>,
    #[serde(default)]
    pub is_enabled: bool,
    #[serde(default)]
    pub require_for_auto_login: bool,
}

/// Events the host sends, replies and pushes alike
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    LoginInfoReceived(LoginInfo),
    TokenRefreshed(TokenPair),
    MultiDeviceLogout {
        reason: String,
    },
    AutoLoginFailed {
        reason: String,
        message: Option<String>,
    },
    BiometricAuthResult {
        success: bool,
        error: Option<String>,
    },
    BiometricStatusResult(BiometricStatus),
}

impl InboundEvent {
    #[must_use]
    pub fn kind(&self) -> EventKind {
        match self {
            InboundEvent::LoginInfoReceived(_) => EventKind::LoginInfoReceived,
            InboundEvent::TokenRefreshed(_) => EventKind::TokenRefreshed,
            InboundEvent::MultiDeviceLogout { .. } => EventKind::MultiDeviceLogout,
            InboundEvent::AutoLoginFailed { .. } => EventKind::AutoLoginFailed,
            InboundEvent::BiometricAuthResult { .. } => EventKind::BiometricAuthResult,
            InboundEvent::BiometricStatusResult(_) => EventKind::BiometricStatusResult,
        }
    }
}

/// A parsed inbound envelope
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub reply_to: Option<String>,
    pub event: InboundEvent,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawInbound {
    #[serde(default)]
    reply_to: Option<String>,
    event: String,
    #[serde(default)]
    detail: Value,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TokenRefreshedDetail {
    token_data: TokenPair,
}

#[derive(Deserialize, Default)]
struct ReasonDetail {
    #[serde(default)]
    reason: String,
    #[serde(default)]
    message: Option<String>,
}

impl ReasonDetail {
    // Some hosts send these events without any detail
    fn from_detail(kind: EventKind, value: Value) -> Result<Self, BridgeError> {
        if value.is_null() {
            Ok(Self::default())
        } else {
            detail(kind, value)
        }
    }
}

#[derive(Deserialize)]
struct BiometricResultDetail {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    error: Option<String>,
}

fn detail<T: serde::de::DeserializeOwned>(kind: EventKind, detail: Value) -> Result<T, BridgeError> {
    serde_json::from_value(detail)
        .map_err(|e| BridgeError::Protocol(format!("invalid '{kind}' detail: {e}")))
}

impl InboundMessage {
    /// Parse a raw message from the host
    ///
    /// # Errors
    ///
    /// Returns `BridgeError::Protocol` for invalid JSON, an unknown event name
    /// or a detail that does not match the event
    pub fn parse(raw: &str) -> Result<Self, BridgeError> {
        let raw: RawInbound =
            serde_json::from_str(raw).map_err(|e| BridgeError::Protocol(e.to_string()))?;
        let kind = EventKind::parse(&raw.event)
            .ok_or_else(|| BridgeError::Protocol(format!("unknown event '{}'", raw.event)))?;

        let event = match kind {
            EventKind::LoginInfoReceived => InboundEvent::LoginInfoReceived(detail(kind, raw.detail)?),
            EventKind::TokenRefreshed => {
                let parsed: TokenRefreshedDetail = detail(kind, raw.detail)?;
                InboundEvent::TokenRefreshed(parsed.token_data)
            }
            EventKind::MultiDeviceLogout => {
                let parsed = ReasonDetail::from_detail(kind, raw.detail)?;
                InboundEvent::MultiDeviceLogout {
                    reason: parsed.reason,
                }
            }
            EventKind::AutoLoginFailed => {
                let parsed = ReasonDetail::from_detail(kind, raw.detail)?;
                InboundEvent::AutoLoginFailed {
                    reason: parsed.reason,
                    message: parsed.message,
                }
            }
            EventKind::BiometricAuthResult => {
                let parsed: BiometricResultDetail = detail(kind, raw.detail)?;
                InboundEvent::BiometricAuthResult {
                    success: parsed.success,
                    error: parsed.error,
                }
            }
            EventKind::BiometricStatusResult => {
                InboundEvent::BiometricStatusResult(detail(kind, raw.detail)?)
            }
        };

        Ok(Self {
            reply_to: raw.reply_to,
            event,
        })
    }
}
