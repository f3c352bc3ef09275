//! Conversation state: the active peer and the messages shown for it.
//!
//! [`ConversationStore`] is plain data with synchronous operations. It does
//! not talk to the network; callers turn its return values into REST calls
//! and socket frames. Submodules:
//! - [`receipts`]: delivered/read acknowledgement bookkeeping

pub mod receipts;

use serde_json::Value;

use parley_proto::message::{Message, MessageId, MessageWriteRequest, ReceiptKind};
use parley_proto::normalize::normalize;

/// A history fetch the caller should perform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryRequest {
    /// Identifies the selection that issued the fetch.
    pub request_id: u64,
    /// The local user.
    pub user1: String,
    /// The selected peer.
    pub user2: String,
}

/// Outcome of routing an inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Received {
    /// The message had no content and was discarded.
    Dropped,
    /// The message belongs to a conversation that is not on screen.
    NotShown,
    /// A message with the same id is already in the sequence.
    Duplicate,
    /// The message was appended.
    Appended {
        /// The selected peer sent it to the local user; a delivery
        /// acknowledgement is due.
        acknowledge: bool,
    },
}

/// Outcome of applying a durable-write response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Confirmation {
    /// The optimistic entry was replaced by the confirmed record.
    Reconciled(MessageId),
    /// The confirmed record was already present; the optimistic entry was
    /// removed.
    AlreadyPresent(MessageId),
    /// Neither the optimistic entry nor the record's conversation is on
    /// screen any more.
    NotShown(MessageId),
    /// The response lacked an id or content; the optimistic entry stays.
    Unconfirmed,
}

/// Messages for the selected peer, plus the bookkeeping around them.
#[derive(Debug, Clone, Default)]
pub struct ConversationStore {
    local_user: Option<String>,
    selected_peer: Option<String>,
    messages: Vec<Message>,
    loading: bool,
    // Monotonic across resets so responses to earlier sessions stay stale.
    load_seq: u64,
}

impl ConversationStore {
    /// Creates an empty store with no local user.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Clears all conversation state and records the local user.
    pub fn reset(&mut self, local_user: Option<String>) {
        self.local_user = local_user;
        self.selected_peer = None;
        self.messages.clear();
        self.loading = false;
        self.load_seq += 1;
    }

    /// The authenticated user, if any.
    #[must_use]
    pub fn local_user(&self) -> Option<&str> {
        self.local_user.as_deref()
    }

    /// The peer whose conversation is shown, if any.
    #[must_use]
    pub fn selected_peer(&self) -> Option<&str> {
        self.selected_peer.as_deref()
    }

    /// The displayed message sequence.
    #[must_use]
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Whether a history fetch for the current selection is outstanding.
    #[must_use]
    pub const fn is_loading(&self) -> bool {
        self.loading
    }

    /// Looks up a displayed message by id.
    #[must_use]
    pub fn find(&self, id: &MessageId) -> Option<&Message> {
        self.messages.iter().find(|m| &m.id == id)
    }

    fn contains(&self, id: &MessageId) -> bool {
        !id.is_empty() && self.find(id).is_some()
    }

    fn is_active(&self, message: &Message) -> bool {
        match (self.local_user.as_deref(), self.selected_peer.as_deref()) {
            (Some(local), Some(peer)) => message.connects(local, peer),
            _ => false,
        }
    }

    /// Makes `peer` the active conversation and starts loading its history.
    ///
    /// The current messages stay visible until the history arrives. Returns
    /// `None` when there is no local user.
    pub fn select_peer(&mut self, peer: String) -> Option<HistoryRequest> {
        let local = self.local_user.clone()?;
        self.load_seq += 1;
        self.loading = true;
        self.selected_peer = Some(peer.clone());
        Some(HistoryRequest {
            request_id: self.load_seq,
            user1: local,
            user2: peer,
        })
    }

    /// Replaces the sequence with fetched history.
    ///
    /// Returns `false`, changing nothing, if a later selection superseded
    /// `request_id`.
    pub fn apply_history(&mut self, request_id: u64, records: &[Value]) -> bool {
        if request_id != self.load_seq {
            tracing::debug!(request_id, current = self.load_seq, "discarding superseded history");
            return false;
        }
        self.messages = records.iter().map(normalize).collect();
        self.loading = false;
        true
    }

    /// Ends the loading state after a failed fetch, keeping the sequence.
    pub fn history_failed(&mut self, request_id: u64) {
        if request_id == self.load_seq {
            self.loading = false;
        }
    }

    /// Appends the optimistic entry for `request` and returns its id.
    pub fn begin_send(&mut self, request: &MessageWriteRequest) -> MessageId {
        let message = Message::optimistic(request);
        let id = message.id.clone();
        self.messages.push(message);
        id
    }

    /// Applies the durable-write response for the send that created
    /// `optimistic_id`.
    ///
    /// The response only counts as a confirmation when it carries both an
    /// id and content. When it does, the optimistic entry is removed and
    /// the confirmed record takes its place, unless a record with the same
    /// id is already shown.
    pub fn confirm_send(&mut self, optimistic_id: &MessageId, response: &Value) -> Confirmation {
        let confirmed = normalize(response);
        if confirmed.id.is_empty() || !confirmed.has_content() {
            return Confirmation::Unconfirmed;
        }

        let before = self.messages.len();
        self.messages.retain(|m| &m.id != optimistic_id);
        let had_optimistic = self.messages.len() != before;
        let id = confirmed.id.clone();

        if self.contains(&id) {
            return Confirmation::AlreadyPresent(id);
        }
        if !had_optimistic && !self.is_active(&confirmed) && !confirmed.is_broadcast {
            return Confirmation::NotShown(id);
        }
        self.messages.push(confirmed);
        Confirmation::Reconciled(id)
    }

    /// Routes a pushed message into the sequence.
    pub fn receive(&mut self, message: Message) -> Received {
        if !message.has_content() {
            return Received::Dropped;
        }
        let active = self.is_active(&message);
        if !active && !message.is_broadcast {
            return Received::NotShown;
        }
        if self.contains(&message.id) {
            return Received::Duplicate;
        }
        let acknowledge = active
            && self.selected_peer.as_deref() == Some(message.sender_id.as_str())
            && self.local_user.as_deref() == Some(message.recipient_id.as_str());
        self.messages.push(message);
        Received::Appended { acknowledge }
    }

    /// Sets the `kind` flag on the message with `id`. Returns whether a
    /// flag changed.
    pub fn set_receipt(&mut self, id: &MessageId, kind: ReceiptKind) -> bool {
        match self.messages.iter_mut().find(|m| &m.id == id) {
            Some(message) if !message.has_receipt(kind) => {
                message.set_receipt(kind);
                true
            }
            _ => false,
        }
    }
}
