//! Realtime connection lifecycle.
//!
//! [`ConnectionManager`] owns at most one live socket at a time and drives
//! it through [`ConnectionState`]. Socket I/O happens in a task spawned by a
//! [`Dialer`]; that task reports back through an mpsc channel with
//! [`ConnectionSignal`]s tagged by the [`Epoch`] they belong to.
//!
//! Every `connect`, reconnect attempt, and `disconnect` advances the epoch,
//! so a close event or timer from a superseded socket can never flip the
//! state of its replacement or schedule a duplicate reconnect.
//!
//! Dialers:
//! - [`ws::WsDialer`]: `tokio-tungstenite` client for a live service
//! - [`loopback::LoopbackDialer`]: scripted in-process sockets for tests

pub mod loopback;
pub mod ws;

use std::fmt;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use url::Url;

use parley_proto::codec::{self, InboundFrame, OutboundFrame};

/// Delay between a connection closing and the next attempt.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(2);

/// Errors raised while opening a realtime connection.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// The endpoint could not be turned into a valid URL.
    #[error("invalid endpoint URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// The handshake did not finish in time.
    #[error("connection attempt timed out")]
    Timeout,

    /// The service could not be reached.
    #[error("service unreachable: {0}")]
    Unreachable(String),

    /// The WebSocket handshake or stream failed.
    #[error("websocket error: {0}")]
    WebSocket(String),
}

/// Lifecycle of the realtime connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// No socket and no pending reconnect.
    #[default]
    Disconnected,
    /// A socket is being opened.
    Connecting,
    /// The socket is open; frames can be sent.
    Connected,
    /// The socket closed and a reconnect is scheduled.
    Reconnecting,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Reconnecting => write!(f, "reconnecting"),
        }
    }
}

/// Generation counter identifying one socket instance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Epoch(u64);

impl Epoch {
    #[must_use]
    const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for Epoch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Something that happened on a socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// The handshake completed.
    Opened,
    /// A text frame arrived.
    Frame(String),
    /// The socket closed, or never opened. `reason` is set on failure.
    Closed {
        /// Human-readable failure cause.
        reason: Option<String>,
    },
}

/// Input to [`ConnectionManager::handle`], posted by socket and timer tasks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionSignal {
    /// A socket event.
    Link {
        /// Socket generation that produced the event.
        epoch: Epoch,
        /// What happened.
        event: LinkEvent,
    },
    /// The reconnect delay scheduled after `epoch` closed has elapsed.
    ReconnectDue {
        /// Generation whose close scheduled the timer.
        epoch: Epoch,
    },
}

/// Write side of one socket, handed out by a [`Dialer`].
///
/// Dropping or closing the link tells the socket task to close the
/// connection and exit.
#[derive(Debug)]
pub struct Link {
    outbound: mpsc::UnboundedSender<String>,
    task: Option<JoinHandle<()>>,
}

impl Link {
    /// Wraps the outbound queue of a socket and the task driving it.
    #[must_use]
    pub const fn new(outbound: mpsc::UnboundedSender<String>, task: Option<JoinHandle<()>>) -> Self {
        Self { outbound, task }
    }

    /// Queues a text frame. Returns `false` if the socket task is gone.
    #[must_use]
    pub fn send(&self, text: String) -> bool {
        self.outbound.send(text).is_ok()
    }

    /// Releases the socket. The task closes it gracefully and exits.
    pub fn close(self) {
        drop(self.outbound);
        // Detach: the task notices the closed queue on its own.
        drop(self.task);
    }
}

/// Opens sockets on behalf of a [`ConnectionManager`].
pub trait Dialer: Send + 'static {
    /// Starts opening a socket to `url`.
    ///
    /// Must return immediately. Every outcome, including failure to open,
    /// is reported on `signals` as a [`ConnectionSignal::Link`] tagged with
    /// `epoch`.
    fn dial(&self, url: Url, epoch: Epoch, signals: mpsc::Sender<ConnectionSignal>) -> Link;
}

/// Where the realtime service lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// Host name or address.
    pub host: String,
    /// TCP port.
    pub port: u16,
    /// Use `wss://` instead of `ws://`.
    pub secure: bool,
}

impl Endpoint {
    /// Builds the socket URL carrying `credential` as the `token` query parameter.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::InvalidUrl`] if host and port do not form a URL.
    pub fn url(&self, credential: &str) -> Result<Url, ConnectionError> {
        let scheme = if self.secure { "wss" } else { "ws" };
        let mut url = Url::parse(&format!("{scheme}://{}:{}/ws", self.host, self.port))?;
        url.query_pairs_mut().append_pair("token", credential);
        Ok(url)
    }
}

/// Owns the realtime socket and its reconnect policy.
///
/// All methods are synchronous and must be called from a single task; the
/// reconnect timer is spawned on the ambient Tokio runtime.
pub struct ConnectionManager<D> {
    dialer: D,
    endpoint: Endpoint,
    reconnect_delay: Duration,
    signals: mpsc::Sender<ConnectionSignal>,
    state: ConnectionState,
    credential: Option<String>,
    epoch: Epoch,
    link: Option<Link>,
    reconnect_timer: Option<JoinHandle<()>>,
}

impl<D: Dialer> ConnectionManager<D> {
    /// Creates a disconnected manager. Socket and timer tasks report on `signals`.
    pub fn new(
        dialer: D,
        endpoint: Endpoint,
        reconnect_delay: Duration,
        signals: mpsc::Sender<ConnectionSignal>,
    ) -> Self {
        Self {
            dialer,
            endpoint,
            reconnect_delay,
            signals,
            state: ConnectionState::Disconnected,
            credential: None,
            epoch: Epoch::default(),
            link: None,
            reconnect_timer: None,
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub const fn state(&self) -> ConnectionState {
        self.state
    }

    /// Generation of the current (or most recent) socket.
    #[must_use]
    pub const fn epoch(&self) -> Epoch {
        self.epoch
    }

    /// Whether a reconnect timer is pending.
    #[must_use]
    pub const fn reconnect_pending(&self) -> bool {
        self.reconnect_timer.is_some()
    }

    /// Opens a socket authenticated with `credential`, replacing any
    /// existing socket and cancelling a pending reconnect.
    ///
    /// The credential is kept so that reconnects reuse it.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::InvalidUrl`] if the endpoint URL cannot be
    /// built; the manager is left disconnected.
    pub fn connect(&mut self, credential: &str) -> Result<(), ConnectionError> {
        self.cancel_reconnect();
        self.release_link();
        self.credential = Some(credential.to_owned());
        self.dial()
    }

    /// Queues a frame on the open socket.
    ///
    /// Returns `false`, without side effects, unless the state is
    /// [`ConnectionState::Connected`].
    pub fn send(&self, frame: &OutboundFrame) -> bool {
        if self.state != ConnectionState::Connected {
            tracing::debug!(state = %self.state, "frame dropped: not connected");
            return false;
        }
        let Some(link) = &self.link else {
            return false;
        };
        match codec::encode(frame) {
            Ok(text) => link.send(text),
            Err(e) => {
                tracing::warn!(err = %e, "failed to encode outbound frame");
                false
            }
        }
    }

    /// Closes the socket, cancels any pending reconnect, and forgets the
    /// credential. Events from the closed socket are ignored afterwards.
    pub fn disconnect(&mut self) {
        self.credential = None;
        self.cancel_reconnect();
        self.release_link();
        self.epoch = self.epoch.next();
        if self.state != ConnectionState::Disconnected {
            tracing::info!("realtime connection closed by client");
        }
        self.state = ConnectionState::Disconnected;
    }

    /// Applies a signal from a socket or timer task.
    ///
    /// Returns the decoded frame when the signal carries one. Signals from
    /// superseded epochs are discarded.
    pub fn handle(&mut self, signal: ConnectionSignal) -> Option<InboundFrame> {
        match signal {
            ConnectionSignal::Link { epoch, event } => {
                if epoch != self.epoch {
                    tracing::debug!(%epoch, current = %self.epoch, "ignoring event from stale socket");
                    return None;
                }
                self.on_link_event(event)
            }
            ConnectionSignal::ReconnectDue { epoch } => {
                if epoch != self.epoch || self.credential.is_none() {
                    tracing::debug!(%epoch, "ignoring stale reconnect timer");
                    return None;
                }
                self.reconnect_timer = None;
                tracing::info!("reconnecting");
                if let Err(e) = self.dial() {
                    tracing::warn!(err = %e, "reconnect attempt failed");
                }
                None
            }
        }
    }

    fn on_link_event(&mut self, event: LinkEvent) -> Option<InboundFrame> {
        match event {
            LinkEvent::Opened => {
                tracing::info!(epoch = %self.epoch, "realtime connection open");
                self.state = ConnectionState::Connected;
                None
            }
            LinkEvent::Frame(text) => match codec::decode(&text) {
                Ok(frame) => Some(frame),
                Err(e) => {
                    // Malformed frame: log and skip, keep the socket.
                    tracing::warn!(err = %e, "malformed inbound frame, skipping");
                    None
                }
            },
            LinkEvent::Closed { reason } => {
                self.link = None;
                match reason {
                    Some(reason) => tracing::warn!(%reason, "realtime connection lost"),
                    None => tracing::info!("realtime connection closed by service"),
                }
                if self.credential.is_some() {
                    self.schedule_reconnect();
                } else {
                    self.state = ConnectionState::Disconnected;
                }
                None
            }
        }
    }

    fn dial(&mut self) -> Result<(), ConnectionError> {
        let Some(credential) = &self.credential else {
            return Ok(());
        };
        self.epoch = self.epoch.next();
        let url = match self.endpoint.url(credential) {
            Ok(url) => url,
            Err(e) => {
                self.state = ConnectionState::Disconnected;
                return Err(e);
            }
        };
        tracing::debug!(epoch = %self.epoch, host = %self.endpoint.host, "opening realtime connection");
        self.link = Some(self.dialer.dial(url, self.epoch, self.signals.clone()));
        self.state = ConnectionState::Connecting;
        Ok(())
    }

    fn schedule_reconnect(&mut self) {
        self.cancel_reconnect();
        self.state = ConnectionState::Reconnecting;
        let epoch = self.epoch;
        let delay = self.reconnect_delay;
        let signals = self.signals.clone();
        tracing::info!(delay_ms = delay.as_millis(), "scheduling reconnect");
        self.reconnect_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = signals.send(ConnectionSignal::ReconnectDue { epoch }).await;
        }));
    }

    fn cancel_reconnect(&mut self) {
        if let Some(timer) = self.reconnect_timer.take() {
            timer.abort();
        }
    }

    fn release_link(&mut self) {
        if let Some(link) = self.link.take() {
            link.close();
        }
    }
}

impl<D> Drop for ConnectionManager<D> {
    fn drop(&mut self) {
        if let Some(timer) = self.reconnect_timer.take() {
            timer.abort();
        }
    }
}
