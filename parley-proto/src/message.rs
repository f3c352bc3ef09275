//! Canonical message and user types for the Parley protocol.
//!
//! [`Message`] is the shape every inbound record is normalized into (see
//! [`crate::normalize`]). [`MessageWriteRequest`] is the body sent both over
//! the realtime connection and to `POST /messages`.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Prefix marking a locally generated, not yet confirmed message id.
pub const OPTIMISTIC_PREFIX: &str = "optimistic-";

/// Current UTC time as an RFC 3339 string with millisecond precision.
#[must_use]
pub fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

/// Identifier of a message.
///
/// Either assigned by the server or synthesized locally for an optimistic
/// entry (see [`MessageId::optimistic`]).
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(String);

impl MessageId {
    /// Wraps a server-assigned identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Creates a fresh synthetic identifier for an unconfirmed local send.
    #[must_use]
    pub fn optimistic() -> Self {
        Self(format!("{OPTIMISTIC_PREFIX}{}", Uuid::now_v7()))
    }

    /// Whether this id was synthesized locally and is awaiting confirmation.
    #[must_use]
    pub fn is_optimistic(&self) -> bool {
        self.0.starts_with(OPTIMISTIC_PREFIX)
    }

    /// Whether the id is missing altogether.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the string form of the id.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Which acknowledgement a receipt carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReceiptKind {
    /// The recipient's client received the message.
    Delivered,
    /// The recipient displayed the message.
    Read,
}

impl ReceiptKind {
    /// Wire name, also used as the REST path segment.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Delivered => "delivered",
            Self::Read => "read",
        }
    }
}

impl std::fmt::Display for ReceiptKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A chat message in canonical form.
///
/// `delivered` and `read` are monotonic inside the client core: once set
/// they are never cleared.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Server-assigned or optimistic identifier.
    pub id: MessageId,
    /// Author of the message.
    pub sender_id: String,
    /// Addressee. Informational only when `is_broadcast` is set.
    pub recipient_id: String,
    /// Text body. A message without content is not displayed.
    pub content: String,
    /// Optional reference to an uploaded resource.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_url: Option<String>,
    /// Whether the message is addressed to every peer.
    #[serde(default)]
    pub is_broadcast: bool,
    /// Creation time as reported by the producer.
    pub created_at: String,
    /// Whether the recipient acknowledged receipt.
    #[serde(default)]
    pub delivered: bool,
    /// Whether the recipient acknowledged reading.
    #[serde(default)]
    pub read: bool,
}

impl Message {
    /// Builds the optimistic entry shown while `request` is being persisted.
    #[must_use]
    pub fn optimistic(request: &MessageWriteRequest) -> Self {
        Self {
            id: MessageId::optimistic(),
            sender_id: request.sender_id.clone(),
            recipient_id: request.recipient_id.clone(),
            content: request.content.clone(),
            media_url: request.media_url.clone(),
            is_broadcast: request.is_broadcast,
            created_at: request.created_at.clone(),
            delivered: false,
            read: false,
        }
    }

    /// Whether the message has a non-empty body.
    #[must_use]
    pub fn has_content(&self) -> bool {
        !self.content.is_empty()
    }

    /// Whether the acknowledgement of `kind` has been recorded.
    #[must_use]
    pub const fn has_receipt(&self, kind: ReceiptKind) -> bool {
        match kind {
            ReceiptKind::Delivered => self.delivered,
            ReceiptKind::Read => self.read,
        }
    }

    /// Records an acknowledgement. Flags only ever go from `false` to `true`.
    pub const fn set_receipt(&mut self, kind: ReceiptKind) {
        match kind {
            ReceiptKind::Delivered => self.delivered = true,
            ReceiptKind::Read => self.read = true,
        }
    }

    /// Whether the message was exchanged between `a` and `b`, in either direction.
    #[must_use]
    pub fn connects(&self, a: &str, b: &str) -> bool {
        (self.sender_id == a && self.recipient_id == b)
            || (self.sender_id == b && self.recipient_id == a)
    }
}

/// A known user of the service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Unique identifier; the join key for roster and presence.
    #[serde(alias = "ID")]
    pub id: String,
    /// Display name.
    #[serde(default, alias = "Username")]
    pub username: String,
    /// Contact address.
    #[serde(default, alias = "Email")]
    pub email: String,
}

/// Body of a message write, sent over the socket and to the REST endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageWriteRequest {
    /// Author (the local user).
    pub sender_id: String,
    /// Addressee.
    pub recipient_id: String,
    /// Text body.
    pub content: String,
    /// Optional uploaded resource reference.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_url: Option<String>,
    /// Whether the message goes to every peer.
    #[serde(default)]
    pub is_broadcast: bool,
    /// Client-side creation time, shared with the optimistic entry.
    pub created_at: String,
}

impl MessageWriteRequest {
    /// Creates a direct-message request stamped with the current time.
    pub fn new(
        sender_id: impl Into<String>,
        recipient_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            sender_id: sender_id.into(),
            recipient_id: recipient_id.into(),
            content: content.into(),
            media_url: None,
            is_broadcast: false,
            created_at: now_rfc3339(),
        }
    }

    /// Attaches an uploaded resource reference.
    #[must_use]
    pub fn with_media(mut self, media_url: impl Into<String>) -> Self {
        self.media_url = Some(media_url.into());
        self
    }

    /// Marks the request as a broadcast.
    #[must_use]
    pub fn broadcast(mut self, is_broadcast: bool) -> Self {
        self.is_broadcast = is_broadcast;
        self
    }
}
