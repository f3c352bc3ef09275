//! The client's state machine.
//!
//! [`ClientState::dispatch`] is the single entry point: it takes one
//! [`Input`] (a user command, an inbound frame, or the completion of a
//! REST call), updates the conversation, presence, and receipt state, and
//! returns the [`Effect`]s the runtime must carry out. Nothing in here
//! performs I/O, so every ordering of completions can be replayed in a
//! plain unit test.

use serde_json::Value;

use parley_proto::codec::{InboundFrame, OutboundFrame};
use parley_proto::message::{Message, MessageId, MessageWriteRequest, ReceiptKind, User};

use crate::api::ApiError;
use crate::chat::receipts::{AckRequest, DeliveryReceiptCoordinator};
use crate::chat::{Confirmation, ConversationStore, HistoryRequest, Received};
use crate::connection::ConnectionState;
use crate::presence::PresenceTracker;

/// Something the client must react to.
#[derive(Debug, Clone, PartialEq)]
pub enum Input {
    /// The user authenticated as `user_id`.
    Authenticated {
        /// The local user.
        user_id: String,
    },
    /// The user logged out.
    LoggedOut,
    /// The user opened the conversation with `peer_id`.
    SelectPeer {
        /// The peer to show.
        peer_id: String,
    },
    /// The user sent a message.
    Send {
        /// Addressee. Informational for broadcasts.
        recipient_id: String,
        /// Text body.
        content: String,
        /// Optional uploaded resource reference.
        media_url: Option<String>,
        /// Address every peer.
        is_broadcast: bool,
    },
    /// The user viewed a message.
    MarkRead {
        /// The viewed message.
        message_id: MessageId,
    },
    /// A frame arrived on the realtime connection.
    Inbound(InboundFrame),
    /// The roster fetch finished.
    RosterLoaded {
        /// Session the fetch was issued in.
        session: u64,
        /// Users, or the failure.
        result: Result<Vec<User>, ApiError>,
    },
    /// A history fetch finished.
    HistoryLoaded {
        /// The request this answers.
        request_id: u64,
        /// Raw records, or the failure.
        result: Result<Vec<Value>, ApiError>,
    },
    /// A durable write finished.
    SendPersisted {
        /// Session the write was issued in.
        session: u64,
        /// Id of the optimistic entry the write belongs to.
        optimistic_id: MessageId,
        /// The service's response body, or the failure.
        result: Result<Value, ApiError>,
    },
    /// An acknowledgement request finished.
    ReceiptAcknowledged {
        /// Delivered or read.
        kind: ReceiptKind,
        /// The acknowledged message.
        message_id: MessageId,
        /// Whether the service accepted it.
        result: Result<(), ApiError>,
    },
}

/// Something the application should be told about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientNotice {
    /// The service rejected the session credential. The session should be
    /// ended and the user asked to authenticate again.
    AuthenticationInvalid,
    /// A message could not be persisted. Its optimistic entry stays on
    /// screen.
    SendFailed {
        /// Id of the optimistic entry.
        optimistic_id: MessageId,
        /// What went wrong.
        error: String,
    },
    /// The service reported an error over the realtime connection.
    ServiceError(String),
}

/// Work the runtime performs on behalf of [`ClientState`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Fetch the roster; answer with [`Input::RosterLoaded`].
    FetchRoster {
        /// Echoed back in the answer.
        session: u64,
    },
    /// Ask for the online-user snapshot once the connection is open.
    RequestPresenceSnapshot,
    /// Fetch history; answer with [`Input::HistoryLoaded`].
    FetchHistory(HistoryRequest),
    /// Write a frame if the connection is open; drop it otherwise.
    PushFrame(OutboundFrame),
    /// Persist a message; answer with [`Input::SendPersisted`].
    PersistMessage {
        /// Echoed back in the answer.
        session: u64,
        /// Id of the optimistic entry.
        optimistic_id: MessageId,
        /// What to write.
        request: MessageWriteRequest,
    },
    /// Send an acknowledgement; answer with [`Input::ReceiptAcknowledged`].
    Acknowledge(AckRequest),
    /// Surface a notice to the application.
    Notify(ClientNotice),
}

/// A point-in-time view of everything the UI renders.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChatSnapshot {
    /// Realtime connection state.
    pub connection: ConnectionState,
    /// The authenticated user.
    pub local_user_id: Option<String>,
    /// The open conversation.
    pub selected_peer: Option<String>,
    /// Whether the open conversation's history is loading.
    pub is_loading_messages: bool,
    /// Messages of the open conversation, plus broadcasts.
    pub messages: Vec<Message>,
    /// Known users, excluding the local user.
    pub roster: Vec<User>,
    /// Ids of online users, excluding the local user, sorted.
    pub online_user_ids: Vec<String>,
}

impl ChatSnapshot {
    /// Whether `user_id` is online.
    #[must_use]
    pub fn is_online(&self, user_id: &str) -> bool {
        self.online_user_ids.iter().any(|id| id == user_id)
    }
}

/// Conversation, presence, and receipt state, driven by [`Self::dispatch`].
#[derive(Debug, Clone, Default)]
pub struct ClientState {
    /// Bumped on every login and logout; completions from an older
    /// session are dropped.
    session: u64,
    store: ConversationStore,
    presence: PresenceTracker,
    receipts: DeliveryReceiptCoordinator,
}

impl ClientState {
    /// Creates an unauthenticated client state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Conversation state.
    #[must_use]
    pub const fn store(&self) -> &ConversationStore {
        &self.store
    }

    /// Presence state.
    #[must_use]
    pub const fn presence(&self) -> &PresenceTracker {
        &self.presence
    }

    /// Current session generation.
    #[must_use]
    pub const fn session(&self) -> u64 {
        self.session
    }

    /// Builds a snapshot for rendering.
    #[must_use]
    pub fn snapshot(&self, connection: ConnectionState) -> ChatSnapshot {
        ChatSnapshot {
            connection,
            local_user_id: self.store.local_user().map(str::to_owned),
            selected_peer: self.store.selected_peer().map(str::to_owned),
            is_loading_messages: self.store.is_loading(),
            messages: self.store.messages().to_vec(),
            roster: self.presence.roster().to_vec(),
            online_user_ids: self.presence.online().map(str::to_owned).collect(),
        }
    }

    /// Applies one input and returns the effects it requires, in order.
    pub fn dispatch(&mut self, input: Input) -> Vec<Effect> {
        let mut effects = Vec::new();
        match input {
            Input::Authenticated { user_id } => {
                tracing::info!(user_id = %user_id, "session started");
                self.store.reset(Some(user_id.clone()));
                self.presence.reset(Some(user_id));
                self.receipts.clear();
                self.session += 1;
                effects.push(Effect::FetchRoster {
                    session: self.session,
                });
                effects.push(Effect::RequestPresenceSnapshot);
            }
            Input::LoggedOut => {
                tracing::info!("session ended");
                self.store.reset(None);
                self.presence.reset(None);
                self.receipts.clear();
                self.session += 1;
            }
            Input::SelectPeer { peer_id } => match self.store.select_peer(peer_id) {
                Some(request) => effects.push(Effect::FetchHistory(request)),
                None => tracing::warn!("cannot open a conversation before authenticating"),
            },
            Input::Send {
                recipient_id,
                content,
                media_url,
                is_broadcast,
            } => self.send(recipient_id, content, media_url, is_broadcast, &mut effects),
            Input::MarkRead { message_id } => {
                self.acknowledge(ReceiptKind::Read, &message_id, &mut effects);
            }
            Input::Inbound(frame) => self.on_frame(frame, &mut effects),
            Input::RosterLoaded { session, .. } | Input::SendPersisted { session, .. }
                if session != self.session =>
            {
                tracing::debug!(
                    session,
                    current = self.session,
                    "dropping completion from an ended session"
                );
            }
            Input::RosterLoaded {
                result: Ok(users), ..
            } => {
                tracing::debug!(count = users.len(), "roster loaded");
                self.presence.set_roster(users);
            }
            Input::RosterLoaded { result: Err(e), .. } => {
                tracing::warn!(err = %e, "failed to load roster");
                Self::report(&e, &mut effects);
            }
            Input::HistoryLoaded {
                request_id,
                result: Ok(records),
            } => {
                if self.store.apply_history(request_id, &records) {
                    tracing::debug!(count = records.len(), "history loaded");
                }
            }
            Input::HistoryLoaded {
                request_id,
                result: Err(e),
            } => {
                tracing::warn!(err = %e, "failed to load history");
                self.store.history_failed(request_id);
                Self::report(&e, &mut effects);
            }
            Input::SendPersisted {
                optimistic_id,
                result: Ok(response),
                ..
            } => match self.store.confirm_send(&optimistic_id, &response) {
                Confirmation::Reconciled(id) => {
                    tracing::debug!(optimistic = %optimistic_id, id = %id, "send confirmed");
                }
                Confirmation::AlreadyPresent(id) | Confirmation::NotShown(id) => {
                    tracing::debug!(optimistic = %optimistic_id, id = %id, "send confirmed off screen");
                }
                Confirmation::Unconfirmed => {
                    tracing::debug!(optimistic = %optimistic_id, "write response is not a message; keeping optimistic entry");
                }
            },
            Input::SendPersisted {
                optimistic_id,
                result: Err(e),
                ..
            } => {
                tracing::warn!(optimistic = %optimistic_id, err = %e, "failed to persist message");
                if e.is_unauthorized() {
                    effects.push(Effect::Notify(ClientNotice::AuthenticationInvalid));
                }
                effects.push(Effect::Notify(ClientNotice::SendFailed {
                    optimistic_id,
                    error: e.to_string(),
                }));
            }
            Input::ReceiptAcknowledged {
                kind,
                message_id,
                result: Ok(()),
            } => {
                self.receipts.confirmed(&mut self.store, kind, &message_id);
            }
            Input::ReceiptAcknowledged {
                kind,
                message_id,
                result: Err(e),
            } => {
                tracing::warn!(%kind, id = %message_id, err = %e, "acknowledgement failed");
                self.receipts.failed(kind, &message_id);
                Self::report(&e, &mut effects);
            }
        }
        effects
    }

    fn report(error: &ApiError, effects: &mut Vec<Effect>) {
        if error.is_unauthorized() {
            effects.push(Effect::Notify(ClientNotice::AuthenticationInvalid));
        }
    }

    fn send(
        &mut self,
        recipient_id: String,
        content: String,
        media_url: Option<String>,
        is_broadcast: bool,
        effects: &mut Vec<Effect>,
    ) {
        let Some(local) = self.store.local_user().map(str::to_owned) else {
            tracing::warn!("cannot send before authenticating");
            return;
        };
        if content.is_empty() {
            tracing::debug!("ignoring empty message");
            return;
        }

        let mut request =
            MessageWriteRequest::new(local, recipient_id, content).broadcast(is_broadcast);
        if let Some(media_url) = media_url {
            request = request.with_media(media_url);
        }

        let optimistic_id = self.store.begin_send(&request);
        effects.push(Effect::PushFrame(OutboundFrame::Message {
            payload: request.clone(),
        }));
        effects.push(Effect::PersistMessage {
            session: self.session,
            optimistic_id,
            request,
        });
    }

    fn acknowledge(&mut self, kind: ReceiptKind, message_id: &MessageId, effects: &mut Vec<Effect>) {
        let Some(local) = self.store.local_user() else {
            return;
        };
        if let Some(request) = self.receipts.request(&self.store, kind, message_id, local) {
            effects.push(Effect::Acknowledge(request));
        }
    }

    fn on_frame(&mut self, frame: InboundFrame, effects: &mut Vec<Effect>) {
        match frame {
            InboundFrame::Message(message) => {
                let id = message.id.clone();
                match self.store.receive(message) {
                    Received::Appended { acknowledge } => {
                        if acknowledge {
                            self.acknowledge(ReceiptKind::Delivered, &id, effects);
                        }
                    }
                    Received::Dropped => tracing::warn!(id = %id, "dropping message without content"),
                    Received::NotShown => tracing::debug!(id = %id, "message for another conversation"),
                    Received::Duplicate => tracing::debug!(id = %id, "duplicate message"),
                }
            }
            InboundFrame::Receipt { kind, message_id } => {
                self.receipts.apply_push(&mut self.store, kind, &message_id);
            }
            InboundFrame::Presence(update) => {
                tracing::debug!(%update, "presence update");
                self.presence.apply(update);
            }
            InboundFrame::Error(payload) => {
                tracing::warn!(%payload, "service reported an error");
                effects.push(Effect::Notify(ClientNotice::ServiceError(payload.to_string())));
            }
            InboundFrame::Unrecognized(kind) => {
                tracing::debug!(?kind, "ignoring unrecognized frame");
            }
        }
    }
}
