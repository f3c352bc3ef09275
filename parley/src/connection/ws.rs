//! WebSocket dialer backed by `tokio-tungstenite`.
//!
//! Each dial spawns one task that owns the whole socket: it performs the
//! handshake (with a timeout), forwards text frames to the connection
//! manager, and writes frames queued on the [`Link`]. The task ends when
//! the service closes the socket, a read or write fails, or the link is
//! released by the client.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use url::Url;

use super::{ConnectionError, ConnectionSignal, Dialer, Epoch, Link, LinkEvent};

/// Default handshake timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Opens real WebSocket connections.
#[derive(Debug, Clone)]
pub struct WsDialer {
    connect_timeout: Duration,
}

impl WsDialer {
    /// Creates a dialer that gives up on a handshake after `connect_timeout`.
    #[must_use]
    pub const fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl Default for WsDialer {
    fn default() -> Self {
        Self::new(DEFAULT_CONNECT_TIMEOUT)
    }
}

impl Dialer for WsDialer {
    fn dial(&self, url: Url, epoch: Epoch, signals: mpsc::Sender<ConnectionSignal>) -> Link {
        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run_socket(url, epoch, self.connect_timeout, rx, signals));
        Link::new(tx, Some(task))
    }
}

/// Why the socket task stopped.
enum Exit {
    /// The service closed, or a read/write failed. Report it.
    Closed(Option<String>),
    /// The client released the link. Nobody is listening for this epoch.
    Released,
}

async fn run_socket(
    url: Url,
    epoch: Epoch,
    connect_timeout: Duration,
    mut outbound: mpsc::UnboundedReceiver<String>,
    signals: mpsc::Sender<ConnectionSignal>,
) {
    let emit = move |event| ConnectionSignal::Link { epoch, event };

    let handshake = tokio::time::timeout(connect_timeout, connect_async(url.as_str()));
    let stream = tokio::select! {
        result = handshake => match result {
            Ok(Ok((stream, _response))) => stream,
            Ok(Err(e)) => {
                let err = map_ws_connect_error(e);
                tracing::warn!(host = ?url.host_str(), err = %err, "websocket connect failed");
                let _ = signals.send(emit(LinkEvent::Closed { reason: Some(err.to_string()) })).await;
                return;
            }
            Err(_) => {
                tracing::warn!(host = ?url.host_str(), "websocket connect timed out");
                let reason = ConnectionError::Timeout.to_string();
                let _ = signals.send(emit(LinkEvent::Closed { reason: Some(reason) })).await;
                return;
            }
        },
        None = outbound.recv() => {
            tracing::debug!(%epoch, "dial abandoned before handshake finished");
            return;
        }
    };

    if signals.send(emit(LinkEvent::Opened)).await.is_err() {
        return;
    }

    let (mut writer, mut reader) = stream.split();
    let exit = loop {
        tokio::select! {
            incoming = reader.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    let event = emit(LinkEvent::Frame(text.as_str().to_owned()));
                    if signals.send(event).await.is_err() {
                        // Manager dropped: the client is shutting down.
                        break Exit::Released;
                    }
                }
                Some(Ok(Message::Close(_))) | None => {
                    tracing::info!("websocket closed by service");
                    break Exit::Closed(None);
                }
                Some(Ok(Message::Binary(data))) => {
                    tracing::debug!(len = data.len(), "ignoring binary frame");
                }
                Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => {}
                Some(Err(e)) => {
                    tracing::warn!(err = %e, "websocket read error");
                    break Exit::Closed(Some(e.to_string()));
                }
            },
            queued = outbound.recv() => match queued {
                Some(text) => {
                    if let Err(e) = writer.send(Message::Text(text.into())).await {
                        tracing::warn!(err = %e, "websocket write failed");
                        break Exit::Closed(Some(e.to_string()));
                    }
                }
                None => break Exit::Released,
            },
        }
    };

    match exit {
        Exit::Closed(reason) => {
            let _ = signals.send(emit(LinkEvent::Closed { reason })).await;
        }
        Exit::Released => {
            let _ = writer.send(Message::Close(None)).await;
            tracing::debug!(%epoch, "websocket released by client");
        }
    }
}

/// Map a `tokio_tungstenite` connection error to a [`ConnectionError`].
fn map_ws_connect_error(err: tokio_tungstenite::tungstenite::Error) -> ConnectionError {
    use tokio_tungstenite::tungstenite::Error as WsError;
    match err {
        WsError::Io(io_err)
            if matches!(
                io_err.kind(),
                std::io::ErrorKind::ConnectionRefused | std::io::ErrorKind::AddrNotAvailable
            ) =>
        {
            ConnectionError::Unreachable(io_err.to_string())
        }
        WsError::Http(response) => {
            ConnectionError::WebSocket(format!("handshake rejected: status {}", response.status()))
        }
        other => ConnectionError::WebSocket(other.to_string()),
    }
}
