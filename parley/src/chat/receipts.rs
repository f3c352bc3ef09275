//! Delivered/read acknowledgement bookkeeping.
//!
//! An acknowledgement is requested at most once per message and kind while
//! a request is outstanding, and never when the local flag is already set.
//! The local flag flips only when the service accepts the request (or
//! pushes the receipt itself).

use std::collections::HashSet;

use parley_proto::message::{MessageId, ReceiptKind};

use super::ConversationStore;

/// An acknowledgement the caller should send to the service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AckRequest {
    /// Delivered or read.
    pub kind: ReceiptKind,
    /// The acknowledged message.
    pub message_id: MessageId,
    /// The local user, on whose behalf the acknowledgement is made.
    pub recipient_id: String,
}

/// Tracks outstanding acknowledgement requests.
#[derive(Debug, Clone, Default)]
pub struct DeliveryReceiptCoordinator {
    in_flight: HashSet<(ReceiptKind, MessageId)>,
}

impl DeliveryReceiptCoordinator {
    /// Creates a coordinator with nothing in flight.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Forgets outstanding requests; their completions will still apply
    /// their flags if the message is on screen.
    pub fn clear(&mut self) {
        self.in_flight.clear();
    }

    /// Number of requests awaiting a response.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Decides whether acknowledging `message_id` needs a request.
    ///
    /// Returns `None` when the flag is already set locally, a request is
    /// already outstanding, or the id cannot be acknowledged (empty or
    /// optimistic).
    pub fn request(
        &mut self,
        store: &ConversationStore,
        kind: ReceiptKind,
        message_id: &MessageId,
        recipient_id: &str,
    ) -> Option<AckRequest> {
        if message_id.is_empty() || message_id.is_optimistic() {
            tracing::debug!(%kind, id = %message_id, "message has no service id; not acknowledging");
            return None;
        }
        if store.find(message_id).is_some_and(|m| m.has_receipt(kind)) {
            return None;
        }
        if !self.in_flight.insert((kind, message_id.clone())) {
            tracing::debug!(%kind, id = %message_id, "acknowledgement already in flight");
            return None;
        }
        Some(AckRequest {
            kind,
            message_id: message_id.clone(),
            recipient_id: recipient_id.to_owned(),
        })
    }

    /// The service accepted the acknowledgement. Sets the local flag and
    /// returns whether it changed.
    pub fn confirmed(
        &mut self,
        store: &mut ConversationStore,
        kind: ReceiptKind,
        message_id: &MessageId,
    ) -> bool {
        self.in_flight.remove(&(kind, message_id.clone()));
        store.set_receipt(message_id, kind)
    }

    /// The service rejected the acknowledgement or could not be reached.
    /// The flag stays unset and a later request may retry.
    pub fn failed(&mut self, kind: ReceiptKind, message_id: &MessageId) {
        self.in_flight.remove(&(kind, message_id.clone()));
    }

    /// A receipt pushed by the service for one of the local user's messages.
    pub fn apply_push(
        &self,
        store: &mut ConversationStore,
        kind: ReceiptKind,
        message_id: &MessageId,
    ) -> bool {
        store.set_receipt(message_id, kind)
    }
}
