//! `reqwest`-backed implementation of [`ChatApi`].

use std::time::Duration;

use parking_lot::RwLock;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use url::Url;

use parley_proto::message::{MessageId, MessageWriteRequest, ReceiptKind, User};

use super::{ApiError, ChatApi};

/// HTTP client for the chat service's REST endpoints.
///
/// Paths are resolved relative to `base_url`, so a base of
/// `http://host:8080/api` targets `http://host:8080/api/messages`.
#[derive(Debug)]
pub struct HttpChatApi {
    client: Client,
    base_url: Url,
    token: RwLock<Option<String>>,
}

impl HttpChatApi {
    /// Creates a client for `base_url`.
    ///
    /// `token`, when set, is sent as `Authorization: Bearer <token>` on
    /// every request.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Transport`] if the URL is invalid or the HTTP
    /// client cannot be built.
    pub fn new(base_url: &str, token: Option<String>, timeout: Duration) -> Result<Self, ApiError> {
        let mut base_url =
            Url::parse(base_url).map_err(|e| ApiError::Transport(format!("invalid base URL: {e}")))?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ApiError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            base_url,
            token: RwLock::new(token),
        })
    }

    /// Replaces the bearer credential used by subsequent requests.
    pub fn set_token(&self, token: Option<String>) {
        *self.token.write() = token;
    }

    /// Returns the resolved base URL.
    #[must_use]
    pub const fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, path: &str, query: &[(&str, &str)]) -> Result<Url, ApiError> {
        let mut url = self
            .base_url
            .join(path)
            .map_err(|e| ApiError::Transport(format!("invalid endpoint {path}: {e}")))?;
        if !query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in query {
                pairs.append_pair(key, value);
            }
        }
        Ok(url)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match self.token.read().as_deref() {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn execute(&self, request: RequestBuilder) -> Result<reqwest::Response, ApiError> {
        let response = self
            .authorized(request)
            .send()
            .await
            .map_err(|e| {
                tracing::warn!(err = %e, "REST request failed");
                ApiError::Transport(e.to_string())
            })?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            return Err(ApiError::Unauthorized);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    async fn execute_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, ApiError> {
        self.execute(request)
            .await?
            .json::<T>()
            .await
            .map_err(|e| ApiError::Decode(e.to_string()))
    }
}

impl ChatApi for HttpChatApi {
    async fn list_users(&self) -> Result<Vec<User>, ApiError> {
        let url = self.endpoint("auth/users", &[])?;
        self.execute_json(self.client.get(url)).await
    }

    async fn fetch_history(&self, user1: &str, user2: &str) -> Result<Vec<Value>, ApiError> {
        let url = self.endpoint("messages", &[("user1", user1), ("user2", user2)])?;
        // The service answers `null` rather than `[]` for an empty history.
        let records: Option<Vec<Value>> = self.execute_json(self.client.get(url)).await?;
        Ok(records.unwrap_or_default())
    }

    async fn create_message(&self, request: &MessageWriteRequest) -> Result<Value, ApiError> {
        let url = self.endpoint("messages", &[])?;
        self.execute_json(self.client.post(url).json(request)).await
    }

    async fn acknowledge(
        &self,
        kind: ReceiptKind,
        message_id: &MessageId,
        recipient_id: &str,
    ) -> Result<(), ApiError> {
        let url = self.endpoint(
            &format!("messages/{}", kind.as_str()),
            &[
                ("message_id", message_id.as_str()),
                ("recipient_id", recipient_id),
            ],
        )?;
        self.execute(self.client.post(url)).await?;
        Ok(())
    }
}
