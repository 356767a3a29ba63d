// Centralized logging utilities so tokens never reach the log in full
use chrono::{DateTime, Utc};
use log::{debug, info, warn};

use crate::events::LogoutReason;
use crate::models::SessionRecord;

pub struct LoggingHelper;

impl LoggingHelper {
    /// Shorten a token to a recognisable prefix and its length
    #[must_use]
    pub fn mask_token(token: &str) -> String {
        let prefix: String = token.chars().take(6).collect();
        if prefix.len() == token.len() {
            "***".to_string()
        } else {
            format!("{prefix}...({} chars)", token.len())
        }
    }

    /// Log a login in a standardized format
    pub fn log_login(source: &str, record: &SessionRecord) {
        info!(
            "Session established via {source}: user={}, keep_login={}, refresh_token={}",
            record.identity.user_id.as_deref().unwrap_or("unknown"),
            record.keep_login,
            if record.refresh_token.is_some() { "present" } else { "missing" }
        );
    }

    /// Log a logout with its reason
    pub fn log_logout(reason: &LogoutReason) {
        match reason {
            LogoutReason::Explicit => info!("Session ended by logout"),
            LogoutReason::MultiDevice(detail) => {
                warn!("Session invalidated by another device: {detail}");
            }
            other => info!("Session ended: {other:?}"),
        }
    }

    /// Log a completed refresh
    pub fn log_refresh_success(access_token: &str, expires_at_ms: Option<u64>) {
        let expires_at = expires_at_ms
            .and_then(|ms| i64::try_from(ms).ok())
            .and_then(DateTime::<Utc>::from_timestamp_millis)
            .map_or_else(|| "unknown".to_string(), |at| at.to_rfc3339());
        debug!(
            "Refreshed access token {} (expires {expires_at})",
            Self::mask_token(access_token)
        );
    }

    /// Log outgoing bridge traffic without payload contents
    pub fn log_bridge_send(action: &str, correlation_id: Option<&str>) {
        debug!(
            "Bridge -> native: {action}{}",
            correlation_id.map(|id| format!(" (id {id})")).unwrap_or_default()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_token_hides_body() {
        let masked = LoggingHelper::mask_token("eyJhbGciOiJIUzI1NiJ9.payload.signature");
        assert_eq!(masked, "eyJhbG...(38 chars)");
        assert!(!masked.contains("payload"));
    }

    #[test]
    fn test_mask_short_token() {
        assert_eq!(LoggingHelper::mask_token("abc"), "***");
        assert_eq!(LoggingHelper::mask_token(""), "***");
    }
}
