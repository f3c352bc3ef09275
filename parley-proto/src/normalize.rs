//! Normalization of inbound message records.
//!
//! The service emits message records in two casings: the REST layer
//! serializes its storage model with capitalized keys (`SenderID`,
//! `CreatedAt`), while realtime pushes and DTOs use snake case
//! (`sender_id`, `created_at`). [`normalize`] resolves every field of
//! [`Message`] through a fixed alias list ([`Field::aliases`]) and always
//! returns a value, falling back to defaults for anything missing.

use serde_json::{Map, Value};

use crate::message::{Message, MessageId, now_rfc3339};

/// A field of the canonical [`Message`] and the wire keys it may arrive under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    Id,
    SenderId,
    RecipientId,
    Content,
    MediaUrl,
    IsBroadcast,
    CreatedAt,
    Delivered,
    Read,
}

impl Field {
    /// Wire keys tried for this field, highest priority first.
    #[must_use]
    pub const fn aliases(self) -> &'static [&'static str] {
        match self {
            Self::Id => &["ID", "id"],
            Self::SenderId => &["SenderID", "sender_id"],
            Self::RecipientId => &["RecipientID", "recipient_id"],
            Self::Content => &["Content", "content"],
            Self::MediaUrl => &["MediaURL", "media_url"],
            Self::IsBroadcast => &["IsBroadcast", "is_broadcast"],
            Self::CreatedAt => &["CreatedAt", "created_at", "timestamp"],
            Self::Delivered => &["Delivered", "delivered"],
            Self::Read => &["Read", "read"],
        }
    }
}

/// Maps a raw record of unknown casing to a canonical [`Message`].
///
/// Never fails. A record that is not a JSON object produces a message made
/// entirely of fallbacks (empty strings, `false` flags, `created_at` = now);
/// callers decide whether the result is usable.
#[must_use]
pub fn normalize(record: &Value) -> Message {
    let empty = Map::new();
    let fields = record.as_object().unwrap_or(&empty);

    Message {
        id: MessageId::new(text(fields, Field::Id).unwrap_or_default()),
        sender_id: text(fields, Field::SenderId).unwrap_or_default(),
        recipient_id: text(fields, Field::RecipientId).unwrap_or_default(),
        content: text(fields, Field::Content).unwrap_or_default(),
        media_url: text(fields, Field::MediaUrl),
        is_broadcast: flag(fields, Field::IsBroadcast),
        created_at: text(fields, Field::CreatedAt).unwrap_or_else(now_rfc3339),
        delivered: flag(fields, Field::Delivered),
        read: flag(fields, Field::Read),
    }
}

/// Whether `record` carries sender, recipient and content under one casing.
///
/// Used to accept untyped frames that are bare message records.
#[must_use]
pub fn is_message_shaped(record: &Map<String, Value>) -> bool {
    let present = |key: &str| match record.get(key) {
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Number(_)) => true,
        _ => false,
    };
    (present("Content") && present("SenderID") && present("RecipientID"))
        || (present("content") && present("sender_id") && present("recipient_id"))
}

/// First alias holding a non-empty string (or a number, rendered in decimal).
fn text(fields: &Map<String, Value>, field: Field) -> Option<String> {
    field
        .aliases()
        .iter()
        .find_map(|alias| match fields.get(*alias)? {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
}

/// First alias that is present and non-null decides the flag.
fn flag(fields: &Map<String, Value>, field: Field) -> bool {
    field
        .aliases()
        .iter()
        .find_map(|alias| fields.get(*alias).filter(|v| !v.is_null()))
        .and_then(Value::as_bool)
        .unwrap_or(false)
}
