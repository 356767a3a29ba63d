//! Token refresh over HTTP
//!
//! `POST <refresh_url>` with `{"refreshToken": "..."}` answers
//! `{"accessToken": "...", "refreshToken"?: "..."}`.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Serialize;
use std::time::Duration;
use url::Url;

use crate::error::RefreshError;
use crate::models::TokenPair;
use crate::settings::KeeperSettings;

/// Exchanges a refresh token for a new access token
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    /// Perform one refresh call
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The server rejects the refresh token
    /// - The request fails or times out
    /// - The response is not a token pair
    async fn refresh(&self, refresh_token: &str) -> Result<TokenPair, RefreshError>;
}

/// Refresher calling the configured HTTP endpoint
pub struct HttpTokenRefresher {
    client: reqwest::Client,
    endpoint: Url,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RefreshRequest<'a> {
    refresh_token: &'a str,
}

impl HttpTokenRefresher {
    /// Create a refresher for `endpoint`
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built
    pub fn new(endpoint: Url, timeout: Duration) -> Result<Self, RefreshError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RefreshError::Network(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, endpoint })
    }

    /// Create a refresher from the `[refresh]` settings
    ///
    /// # Errors
    ///
    /// Returns an error if the configured URL is invalid or the HTTP client
    /// cannot be built
    pub fn from_settings(settings: &KeeperSettings) -> Result<Self, RefreshError> {
        let endpoint = settings.refresh_endpoint().map_err(|e| {
            RefreshError::Network(format!("invalid refresh URL '{}': {e}", settings.refresh.url))
        })?;
        Self::new(
            endpoint,
            Duration::from_secs(settings.refresh.request_timeout_secs),
        )
    }

    #[must_use]
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

fn classify_status(status: StatusCode) -> Option<RefreshError> {
    if status.is_success() {
        None
    } else if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        Some(RefreshError::Rejected {
            status: status.as_u16(),
        })
    } else {
        Some(RefreshError::Network(format!("refresh endpoint returned {status}")))
    }
}

#[async_trait]
impl TokenRefresher for HttpTokenRefresher {
    async fn refresh(&self, refresh_token: &str) -> Result<TokenPair, RefreshError> {
        log::debug!("Refreshing access token via {}", self.endpoint);

        let response = self
            .client
            .post(self.endpoint.clone())
            .json(&RefreshRequest { refresh_token })
            .send()
            .await
            .map_err(|e| RefreshError::Network(e.to_string()))?;

        if let Some(err) = classify_status(response.status()) {
            log::warn!("Token refresh failed: {err}");
            return Err(err);
        }

        let pair: TokenPair = response
            .json()
            .await
            .map_err(|e| RefreshError::InvalidResponse(e.to_string()))?;

        if pair.access_token.is_empty() {
            return Err(RefreshError::InvalidResponse(
                "empty accessToken".to_string(),
            ));
        }
        Ok(pair)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn refresher_for(server: &MockServer) -> HttpTokenRefresher {
        let url = Url::parse(&format!("{}/api/auth/refresh", server.uri())).unwrap();
        HttpTokenRefresher::new(url, Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn test_status_classification() {
        assert!(classify_status(StatusCode::OK).is_none());
        assert_eq!(
            classify_status(StatusCode::UNAUTHORIZED),
            Some(RefreshError::Rejected { status: 401 })
        );
        assert_eq!(
            classify_status(StatusCode::FORBIDDEN),
            Some(RefreshError::Rejected { status: 403 })
        );
        assert!(matches!(
            classify_status(StatusCode::BAD_GATEWAY),
            Some(RefreshError::Network(_))
        ));
    }

    #[test]
    fn test_from_settings_rejects_relative_url() {
        let mut settings = KeeperSettings::default();
        settings.refresh.url = "/api/auth/refresh".to_string();
        assert!(HttpTokenRefresher::from_settings(&settings).is_err());

        settings.refresh.url = "https://shop.example.com/api/auth/refresh".to_string();
        let refresher = HttpTokenRefresher::from_settings(&settings).unwrap();
        assert_eq!(refresher.endpoint().path(), "/api/auth/refresh");
    }

    #[tokio::test]
    async fn test_refresh_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/auth/refresh"))
            .and(header("content-type", "application/json"))
            .and(body_json(json!({ "refreshToken": "r1" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "accessToken": "new.access.token",
                "refreshToken": "r2"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let pair = refresher_for(&server).await.refresh("r1").await.unwrap();
        assert_eq!(pair.access_token, "new.access.token");
        assert_eq!(pair.refresh_token.as_deref(), Some("r2"));
    }

    #[tokio::test]
    async fn test_refresh_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/auth/refresh"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({})))
            .mount(&server)
            .await;

        assert_eq!(
            refresher_for(&server).await.refresh("expired").await.unwrap_err(),
            RefreshError::Rejected { status: 401 }
        );
    }

    #[tokio::test]
    async fn test_refresh_server_error_is_network_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(502))
            .mount(&server)
            .await;

        assert!(matches!(
            refresher_for(&server).await.refresh("r1").await.unwrap_err(),
            RefreshError::Network(_)
        ));
    }

    #[tokio::test]
    async fn test_refresh_invalid_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "unexpected": true })))
            .mount(&server)
            .await;

        assert!(matches!(
            refresher_for(&server).await.refresh("r1").await.unwrap_err(),
            RefreshError::InvalidResponse(_)
        ));
    }
}
