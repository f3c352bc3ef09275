//! Runtime that drives [`ClientState`] against the network.
//!
//! A single control task owns the state, the [`ConnectionManager`], and the
//! [`ChatApi`] handle. Everything that happens (commands from the
//! application, socket and timer signals, REST completions) arrives on a
//! channel and is applied in arrival order, one at a time.
//!
//! # Architecture
//!
//! ```text
//! application ─── ClientCommand ──→ control task ──→ ConnectionManager ──→ socket task
//!             ←── ChatSnapshot ────  (ClientState)  ←── ConnectionSignal ─┘
//!             ←── ClientNotice ────       │   ↑
//!                                         ↓   └── Input (completion) ── REST task
//!                                      spawn ───────────────────────────┘
//! ```

use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use parley_proto::codec::OutboundFrame;
use parley_proto::message::MessageId;

use crate::api::ChatApi;
use crate::connection::{
    ConnectionManager, ConnectionSignal, ConnectionState, DEFAULT_RECONNECT_DELAY, Dialer,
    Endpoint,
};
use crate::state::{ChatSnapshot, ClientNotice, ClientState, Effect, Input};

/// Default channel capacity for commands, signals, and notices.
const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// Commands sent from the application to the control task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientCommand {
    /// Start a session: connect with `token` and load the roster.
    Authenticate {
        /// The local user.
        user_id: String,
        /// Credential for the realtime connection.
        token: String,
    },
    /// End the session: disconnect and clear all state.
    Logout,
    /// Open the conversation with `peer_id`.
    SelectPeer {
        /// The peer to show.
        peer_id: String,
    },
    /// Send a message to `recipient_id`, or to everyone.
    SendMessage {
        /// Addressee. Informational for broadcasts.
        recipient_id: String,
        /// Text body.
        content: String,
        /// Optional uploaded resource reference.
        media_url: Option<String>,
        /// Address every peer.
        is_broadcast: bool,
    },
    /// Mark a displayed message as read.
    MarkRead {
        /// The viewed message.
        message_id: MessageId,
    },
    /// Disconnect and stop the control task.
    Shutdown,
}

/// Configuration for the runtime.
#[derive(Debug, Clone)]
pub struct NetConfig {
    /// Where the realtime service lives.
    pub endpoint: Endpoint,
    /// Delay before reconnecting after the socket closes.
    pub reconnect_delay: Duration,
    /// Capacity of the command, signal, completion, and notice channels.
    pub channel_capacity: usize,
}

impl NetConfig {
    /// Creates a `NetConfig` with the default reconnect delay and capacity.
    #[must_use]
    pub const fn new(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

/// The application's side of a running client.
#[derive(Debug)]
pub struct ClientHandle {
    /// Where to send commands.
    pub commands: mpsc::Sender<ClientCommand>,
    /// Latest state, updated after every change.
    pub snapshots: watch::Receiver<ChatSnapshot>,
    /// Notices that need the application's attention.
    pub notices: mpsc::Receiver<ClientNotice>,
    /// The control task. Finishes after [`ClientCommand::Shutdown`] or when
    /// every command sender is dropped.
    pub task: JoinHandle<()>,
}

impl ClientHandle {
    /// The current snapshot.
    #[must_use]
    pub fn snapshot(&self) -> ChatSnapshot {
        self.snapshots.borrow().clone()
    }

    /// Sends a command, returning `false` if the control task has stopped.
    pub async fn send(&self, command: ClientCommand) -> bool {
        self.commands.send(command).await.is_ok()
    }
}

/// Spawn the control task and return the application's handle to it.
///
/// Must be called from within a Tokio runtime. The client starts
/// unauthenticated and disconnected; send [`ClientCommand::Authenticate`]
/// to begin.
pub fn spawn_client<A, D>(config: NetConfig, api: A, dialer: D) -> ClientHandle
where
    A: ChatApi,
    D: Dialer,
{
    let capacity = config.channel_capacity.max(1);
    let (cmd_tx, cmd_rx) = mpsc::channel(capacity);
    let (signal_tx, signal_rx) = mpsc::channel(capacity);
    let (done_tx, done_rx) = mpsc::channel(capacity);
    let (notice_tx, notice_rx) = mpsc::channel(capacity);
    let (snapshot_tx, snapshot_rx) = watch::channel(ChatSnapshot::default());

    let runtime = Runtime {
        state: ClientState::new(),
        connection: ConnectionManager::new(
            dialer,
            config.endpoint,
            config.reconnect_delay,
            signal_tx,
        ),
        api: Arc::new(api),
        presence_pending: false,
        completions: done_tx,
        snapshots: snapshot_tx,
        notices: notice_tx,
    };
    let task = tokio::spawn(runtime.run(cmd_rx, signal_rx, done_rx));

    ClientHandle {
        commands: cmd_tx,
        snapshots: snapshot_rx,
        notices: notice_rx,
        task,
    }
}

/// One unit of work for the control task.
enum Event {
    Command(ClientCommand),
    Signal(ConnectionSignal),
    Completed(Input),
}

struct Runtime<A, D> {
    state: ClientState,
    connection: ConnectionManager<D>,
    api: Arc<A>,
    /// A presence snapshot was asked for before the socket opened.
    presence_pending: bool,
    completions: mpsc::Sender<Input>,
    snapshots: watch::Sender<ChatSnapshot>,
    notices: mpsc::Sender<ClientNotice>,
}

impl<A: ChatApi, D: Dialer> Runtime<A, D> {
    async fn run(
        mut self,
        mut commands: mpsc::Receiver<ClientCommand>,
        mut signals: mpsc::Receiver<ConnectionSignal>,
        mut completions: mpsc::Receiver<Input>,
    ) {
        loop {
            let event = tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => Event::Command(command),
                    None => {
                        tracing::debug!("all command senders dropped");
                        break;
                    }
                },
                // Both channels stay open: `self` holds a sender for each.
                Some(signal) = signals.recv() => Event::Signal(signal),
                Some(input) = completions.recv() => Event::Completed(input),
            };
            if self.handle(event).is_break() {
                break;
            }
            self.publish();
        }
        self.connection.disconnect();
        self.publish();
        tracing::info!("client task exiting");
    }

    fn handle(&mut self, event: Event) -> ControlFlow<()> {
        let effects = match event {
            Event::Command(ClientCommand::Authenticate { user_id, token }) => {
                if let Err(e) = self.connection.connect(&token) {
                    tracing::error!(err = %e, "cannot open realtime connection");
                    self.notify(ClientNotice::ServiceError(e.to_string()));
                }
                self.state.dispatch(Input::Authenticated { user_id })
            }
            Event::Command(ClientCommand::Logout) => {
                self.connection.disconnect();
                self.presence_pending = false;
                self.state.dispatch(Input::LoggedOut)
            }
            Event::Command(ClientCommand::Shutdown) => return ControlFlow::Break(()),
            Event::Command(ClientCommand::SelectPeer { peer_id }) => {
                self.state.dispatch(Input::SelectPeer { peer_id })
            }
            Event::Command(ClientCommand::SendMessage {
                recipient_id,
                content,
                media_url,
                is_broadcast,
            }) => self.state.dispatch(Input::Send {
                recipient_id,
                content,
                media_url,
                is_broadcast,
            }),
            Event::Command(ClientCommand::MarkRead { message_id }) => {
                self.state.dispatch(Input::MarkRead { message_id })
            }
            Event::Signal(signal) => {
                let frame = self.connection.handle(signal);
                self.flush_presence_request();
                match frame {
                    Some(frame) => self.state.dispatch(Input::Inbound(frame)),
                    None => Vec::new(),
                }
            }
            Event::Completed(input) => self.state.dispatch(input),
        };
        self.execute(effects);
        ControlFlow::Continue(())
    }

    fn execute(&mut self, effects: Vec<Effect>) {
        let mut auth_reported = false;
        for effect in effects {
            match effect {
                Effect::FetchRoster { session } => {
                    let api = Arc::clone(&self.api);
                    self.spawn_call(async move {
                        Input::RosterLoaded {
                            session,
                            result: api.list_users().await,
                        }
                    });
                }
                Effect::RequestPresenceSnapshot => {
                    self.presence_pending = true;
                    self.flush_presence_request();
                    if self.presence_pending {
                        tracing::debug!("presence snapshot deferred until connected");
                    }
                }
                Effect::FetchHistory(request) => {
                    let api = Arc::clone(&self.api);
                    self.spawn_call(async move {
                        let result = api.fetch_history(&request.user1, &request.user2).await;
                        Input::HistoryLoaded {
                            request_id: request.request_id,
                            result,
                        }
                    });
                }
                Effect::PushFrame(frame) => {
                    if !self.connection.send(&frame) {
                        tracing::debug!("realtime copy skipped; relying on durable write");
                    }
                }
                Effect::PersistMessage {
                    session,
                    optimistic_id,
                    request,
                } => {
                    let api = Arc::clone(&self.api);
                    self.spawn_call(async move {
                        let result = api.create_message(&request).await;
                        Input::SendPersisted {
                            session,
                            optimistic_id,
                            result,
                        }
                    });
                }
                Effect::Acknowledge(ack) => {
                    let api = Arc::clone(&self.api);
                    self.spawn_call(async move {
                        let result = api
                            .acknowledge(ack.kind, &ack.message_id, &ack.recipient_id)
                            .await;
                        Input::ReceiptAcknowledged {
                            kind: ack.kind,
                            message_id: ack.message_id,
                            result,
                        }
                    });
                }
                Effect::Notify(notice) => {
                    if notice == ClientNotice::AuthenticationInvalid {
                        // Late rejections after logout are moot.
                        if auth_reported || self.state.store().local_user().is_none() {
                            continue;
                        }
                        auth_reported = true;
                        tracing::warn!("credential rejected by the service");
                    }
                    self.notify(notice);
                }
            }
        }
    }

    /// Sends the deferred presence request once the socket is open.
    fn flush_presence_request(&mut self) {
        if !self.presence_pending || self.connection.state() != ConnectionState::Connected {
            return;
        }
        if self.connection.send(&OutboundFrame::GetOnlineUsers) {
            tracing::debug!("presence snapshot requested");
            self.presence_pending = false;
        }
    }

    fn spawn_call<F>(&self, call: F)
    where
        F: Future<Output = Input> + Send + 'static,
    {
        let completions = self.completions.clone();
        tokio::spawn(async move {
            let input = call.await;
            // The control task only stops on shutdown; late results are moot.
            let _ = completions.send(input).await;
        });
    }

    fn notify(&self, notice: ClientNotice) {
        if let Err(e) = self.notices.try_send(notice) {
            tracing::warn!(err = %e, "notice channel full or closed, dropping notice");
        }
    }

    fn publish(&self) {
        let snapshot = self.state.snapshot(self.connection.state());
        self.snapshots.send_if_modified(|current| {
            if *current == snapshot {
                false
            } else {
                *current = snapshot;
                true
            }
        });
    }
}
