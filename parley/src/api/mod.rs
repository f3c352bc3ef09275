//! REST collaborator surface consumed by the client core.
//!
//! Defines the [`ChatApi`] trait covering the five endpoints the core
//! depends on. Concrete implementations:
//! - [`http::HttpChatApi`]: `reqwest`-backed client for a live service
//! - [`memory::InMemoryChatApi`]: in-process fake for tests and demos
//!
//! Message-shaped responses are returned as raw JSON; normalization is the
//! caller's job so that every record, pushed or fetched, goes through the
//! same alias table.

pub mod http;
pub mod memory;

use serde_json::Value;

use parley_proto::message::{MessageId, MessageWriteRequest, ReceiptKind, User};

/// Errors returned by [`ChatApi`] calls.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApiError {
    /// The service rejected the credential (HTTP 401).
    #[error("credential rejected by the service")]
    Unauthorized,

    /// The service answered with a non-success status.
    #[error("service returned status {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body, possibly empty.
        body: String,
    },

    /// The request never produced a response (DNS, connect, timeout).
    #[error("request failed: {0}")]
    Transport(String),

    /// The response body was not what the endpoint promises.
    #[error("could not decode response: {0}")]
    Decode(String),
}

impl ApiError {
    /// Whether this error means the session credential is no longer valid.
    #[must_use]
    pub const fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Unauthorized)
    }
}

/// Async access to the chat service's REST endpoints.
///
/// Implementations must be cheap to share: the runtime wraps them in an
/// `Arc` and calls them from spawned tasks.
pub trait ChatApi: Send + Sync + 'static {
    /// `GET /auth/users`: every user known to the service.
    fn list_users(&self) -> impl Future<Output = Result<Vec<User>, ApiError>> + Send;

    /// `GET /messages?user1=&user2=`: raw history records between two users.
    fn fetch_history(
        &self,
        user1: &str,
        user2: &str,
    ) -> impl Future<Output = Result<Vec<Value>, ApiError>> + Send;

    /// `POST /messages`: durable write. Returns the created record as sent
    /// back by the service, which may not be message-shaped.
    fn create_message(
        &self,
        request: &MessageWriteRequest,
    ) -> impl Future<Output = Result<Value, ApiError>> + Send;

    /// `POST /messages/{delivered|read}?message_id=&recipient_id=`.
    fn acknowledge(
        &self,
        kind: ReceiptKind,
        message_id: &MessageId,
        recipient_id: &str,
    ) -> impl Future<Output = Result<(), ApiError>> + Send;
}

/// Lets a caller keep a handle on the same service it hands to the runtime.
impl<T: ChatApi> ChatApi for std::sync::Arc<T> {
    fn list_users(&self) -> impl Future<Output = Result<Vec<User>, ApiError>> + Send {
        (**self).list_users()
    }

    fn fetch_history(
        &self,
        user1: &str,
        user2: &str,
    ) -> impl Future<Output = Result<Vec<Value>, ApiError>> + Send {
        (**self).fetch_history(user1, user2)
    }

    fn create_message(
        &self,
        request: &MessageWriteRequest,
    ) -> impl Future<Output = Result<Value, ApiError>> + Send {
        (**self).create_message(request)
    }

    fn acknowledge(
        &self,
        kind: ReceiptKind,
        message_id: &MessageId,
        recipient_id: &str,
    ) -> impl Future<Output = Result<(), ApiError>> + Send {
        (**self).acknowledge(kind, message_id, recipient_id)
    }
}
