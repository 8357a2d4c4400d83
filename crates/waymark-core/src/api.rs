//! HTTP client for the ingestion service REST API.
//!
//! # Example
//!
//! ```no_run
//! use waymark_core::api::HttpLocationApi;
//!
//! # fn example() -> waymark_core::Result<()> {
//! let api = HttpLocationApi::new("https://ingest.example.net/api/v1")?;
//! # Ok(())
//! # }
//! ```

use std::sync::RwLock;

use async_trait::async_trait;
use base64::Engine;
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use tracing::debug;

use waymark_types::wire::{
    LastKnownLocation, LocationPayload, LogRequest, LoginRequest, LoginResponse, LogoutResponse,
    SubscribeResponse, SubscriptionRequest,
};

use crate::error::{Error, Result};
use crate::traits::LocationApi;

/// Header carrying the encoded session credential.
pub const AUTH_HEADER: &str = "AUTHKEY";

/// Build the auth header value:
/// `base64("publishableKey=<k>,applicationId=<app>,lokiId=<session>")`.
#[must_use]
pub fn auth_key(publishable_key: &str, application_id: &str, session_id: &str) -> String {
    let raw = format!(
        "publishableKey={publishable_key},applicationId={application_id},lokiId={session_id}"
    );
    base64::engine::general_purpose::STANDARD.encode(raw)
}

/// reqwest-backed ingestion-service client.
pub struct HttpLocationApi {
    client: Client,
    base_url: String,
    auth_key: RwLock<Option<String>>,
}

impl HttpLocationApi {
    /// Create a client for the given base URL, with reqwest's default
    /// timeout behavior. Use [`Self::with_client`] to customize.
    pub fn new(base_url: &str) -> Result<Self> {
        Self::with_client(base_url, Client::new())
    }

    /// Create a client with a custom reqwest Client.
    pub fn with_client(base_url: &str, client: Client) -> Result<Self> {
        // Normalize URL (remove trailing slash)
        let base_url = base_url.trim_end_matches('/').to_string();

        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(Error::InvalidUrl(format!(
                "URL must start with http:// or https://, got: {base_url}"
            )));
        }

        Ok(Self {
            client,
            base_url,
            auth_key: RwLock::new(None),
        })
    }

    /// Get the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        let key = self
            .auth_key
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();
        match key {
            Some(key) => request.header(AUTH_HEADER, key),
            None => request,
        }
    }

    async fn handle<T: DeserializeOwned>(&self, response: Response) -> Result<T> {
        let status = response.status();
        if status.is_success() {
            Ok(response.json().await?)
        } else {
            let message = response.text().await.unwrap_or_default();
            Err(Error::api(status.as_u16(), message))
        }
    }

    async fn handle_empty(&self, response: Response) -> Result<()> {
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            let message = response.text().await.unwrap_or_default();
            Err(Error::api(status.as_u16(), message))
        }
    }
}

#[async_trait]
impl LocationApi for HttpLocationApi {
    fn set_auth_key(&self, auth_key: Option<String>) {
        *self
            .auth_key
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = auth_key;
    }

    async fn login(&self, request: &LoginRequest) -> Result<LoginResponse> {
        let url = format!("{}/login", self.base_url);
        debug!(%url, "Logging in");
        let response = self
            .authorize(self.client.post(&url))
            .json(request)
            .send()
            .await?;
        self.handle(response).await
    }

    async fn logout(&self, device_id: &str) -> Result<LogoutResponse> {
        let url = format!("{}/{device_id}/logout", self.base_url);
        let response = self.authorize(self.client.post(&url)).send().await?;
        self.handle(response).await
    }

    async fn last_known_location(&self, user_id: &str) -> Result<LastKnownLocation> {
        let url = format!("{}/lastknownlocation/{user_id}", self.base_url);
        let response = self.authorize(self.client.get(&url)).send().await?;
        self.handle(response).await
    }

    async fn subscribe(&self, request: &SubscriptionRequest) -> Result<SubscribeResponse> {
        let url = format!("{}/subscribe", self.base_url);
        let response = self
            .authorize(self.client.post(&url))
            .json(request)
            .send()
            .await?;
        self.handle(response).await
    }

    async fn unsubscribe(&self, request: &SubscriptionRequest) -> Result<SubscribeResponse> {
        let url = format!("{}/unsubscribe", self.base_url);
        let response = self
            .authorize(self.client.post(&url))
            .json(request)
            .send()
            .await?;
        self.handle(response).await
    }

    async fn send_location(&self, payload: &LocationPayload) -> Result<()> {
        let url = format!("{}/location", self.base_url);
        let response = self
            .authorize(self.client.post(&url))
            .json(payload)
            .send()
            .await?;
        self.handle_empty(response).await
    }

    async fn upload_log(&self, request: &LogRequest) -> Result<()> {
        let url = format!("{}/clientdiagnostic/log", self.base_url);
        let response = self
            .authorize(self.client.post(&url))
            .json(request)
            .send()
            .await?;
        self.handle_empty(response).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_key_encoding() {
        let key = auth_key("pk_123", "com.example.app", "user-1");
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(key)
            .unwrap();
        assert_eq!(
            String::from_utf8(decoded).unwrap(),
            "publishableKey=pk_123,applicationId=com.example.app,lokiId=user-1"
        );
    }

    #[test]
    fn test_new_rejects_bad_urls() {
        assert!(HttpLocationApi::new("ftp://example.net").is_err());
        assert!(HttpLocationApi::new("example.net").is_err());
        assert!(HttpLocationApi::new("https://example.net/api/").is_ok());
    }

    #[test]
    fn test_base_url_normalized() {
        let api = HttpLocationApi::new("https://example.net/api/").unwrap();
        assert_eq!(api.base_url(), "https://example.net/api");
    }
}
