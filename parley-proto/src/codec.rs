//! JSON framing for the realtime connection.
//!
//! Outbound frames are `{"type": ..., "payload": ...}` envelopes produced by
//! [`encode`]. Inbound frames are classified by [`decode`] on their `type`
//! discriminator. The service is loose about where it puts fields: receipt
//! ids and presence data may sit at the top level of the frame or inside
//! `payload`, so lookups try both.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::message::{Message, MessageId, MessageWriteRequest, ReceiptKind, User};
use crate::normalize::{is_message_shaped, normalize};
use crate::presence::PresenceUpdate;

/// Error type for frame encode/decode operations.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The frame is not valid JSON, or could not be serialized.
    #[error("malformed frame: {0}")]
    Json(#[from] serde_json::Error),
    /// The frame parsed but is not a JSON object.
    #[error("frame is not a JSON object")]
    NotAnObject,
    /// A recognized frame type lacks the data it must carry.
    #[error("`{kind}` frame is missing `{field}`")]
    MissingField {
        /// The frame's `type`.
        kind: &'static str,
        /// The field that could not be found.
        field: &'static str,
    },
}

/// Frames the client sends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundFrame {
    /// Realtime copy of a message being sent.
    Message {
        /// The message being written.
        payload: MessageWriteRequest,
    },
    /// Ask the service for the full online-user list.
    GetOnlineUsers,
}

/// A classified inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundFrame {
    /// A message push, already normalized. May still lack content.
    Message(Message),
    /// A delivery or read acknowledgement for one of our messages.
    Receipt {
        /// Which acknowledgement.
        kind: ReceiptKind,
        /// The acknowledged message.
        message_id: MessageId,
    },
    /// An online/offline change or snapshot.
    Presence(PresenceUpdate),
    /// An error reported by the service.
    Error(Value),
    /// Well-formed JSON that is not something the client acts on.
    Unrecognized(Option<String>),
}

/// Encodes an outbound frame as JSON text.
///
/// # Errors
///
/// Returns [`CodecError::Json`] if serialization fails.
pub fn encode(frame: &OutboundFrame) -> Result<String, CodecError> {
    Ok(serde_json::to_string(frame)?)
}

/// Parses and classifies an inbound text frame.
///
/// # Errors
///
/// Returns [`CodecError`] when the text is not a JSON object or when a
/// recognized frame type lacks its required field.
pub fn decode(text: &str) -> Result<InboundFrame, CodecError> {
    let value: Value = serde_json::from_str(text)?;
    let Value::Object(frame) = value else {
        return Err(CodecError::NotAnObject);
    };

    let kind = frame.get("type").and_then(Value::as_str).map(str::to_owned);
    let Some(kind) = kind else {
        if is_message_shaped(&frame) {
            return Ok(InboundFrame::Message(normalize(&Value::Object(frame))));
        }
        return Ok(InboundFrame::Unrecognized(None));
    };

    match kind.as_str() {
        "message" => match frame.get("payload") {
            Some(payload) if payload.is_object() => Ok(InboundFrame::Message(normalize(payload))),
            _ => Err(CodecError::MissingField {
                kind: "message",
                field: "payload",
            }),
        },
        "delivered" => decode_receipt(&frame, ReceiptKind::Delivered, "delivered"),
        "read" => decode_receipt(&frame, ReceiptKind::Read, "read"),
        "online_users" => {
            let ids = lookup(&frame, &["userIds", "user_ids"])
                .or_else(|| frame.get("payload").filter(|p| p.is_array()))
                .and_then(Value::as_array)
                .ok_or(CodecError::MissingField {
                    kind: "online_users",
                    field: "userIds",
                })?;
            Ok(InboundFrame::Presence(PresenceUpdate::OnlineUsers {
                user_ids: ids.iter().filter_map(id_string).collect(),
            }))
        }
        "user_online" => {
            let user = lookup(&frame, &["user"])
                .or_else(|| frame.get("payload").filter(|p| p.get("id").is_some()))
                .and_then(|v| serde_json::from_value::<User>(v.clone()).ok());
            let user_id = lookup_id(&frame)
                .or_else(|| user.as_ref().map(|u| u.id.clone()))
                .ok_or(CodecError::MissingField {
                    kind: "user_online",
                    field: "userId",
                })?;
            Ok(InboundFrame::Presence(PresenceUpdate::UserOnline {
                user_id,
                user,
            }))
        }
        "user_offline" => {
            let user_id = lookup_id(&frame)
                .or_else(|| frame.get("payload").and_then(|p| p.get("id")).and_then(id_string))
                .ok_or(CodecError::MissingField {
                    kind: "user_offline",
                    field: "userId",
                })?;
            Ok(InboundFrame::Presence(PresenceUpdate::UserOffline { user_id }))
        }
        "error" => Ok(InboundFrame::Error(
            frame
                .get("payload")
                .cloned()
                .unwrap_or(Value::Object(frame)),
        )),
        other => Ok(InboundFrame::Unrecognized(Some(other.to_string()))),
    }
}

fn decode_receipt(
    frame: &Map<String, Value>,
    kind: ReceiptKind,
    name: &'static str,
) -> Result<InboundFrame, CodecError> {
    let message_id = lookup(frame, &["message_id", "messageId"])
        .and_then(id_string)
        .ok_or(CodecError::MissingField {
            kind: name,
            field: "message_id",
        })?;
    Ok(InboundFrame::Receipt {
        kind,
        message_id: MessageId::new(message_id),
    })
}

/// Finds the first of `keys` at the top level of the frame, then inside
/// an object `payload`.
fn lookup<'a>(frame: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    let payload = frame.get("payload").and_then(Value::as_object);
    keys.iter()
        .find_map(|k| frame.get(*k).filter(|v| !v.is_null()))
        .or_else(|| payload.and_then(|p| keys.iter().find_map(|k| p.get(*k).filter(|v| !v.is_null()))))
}

/// The subject user id of a presence frame: `userId`/`user_id`, or a bare
/// string payload.
fn lookup_id(frame: &Map<String, Value>) -> Option<String> {
    lookup(frame, &["userId", "user_id"])
        .and_then(id_string)
        .or_else(|| frame.get("payload").and_then(Value::as_str).map(str::to_string))
        .filter(|id| !id.is_empty())
}

fn id_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
