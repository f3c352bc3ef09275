//! Scripted in-process sockets for testing.
//!
//! [`LoopbackDialer`] never touches the network. Each dial records a
//! [`LoopbackSocket`] that the test drives by hand: open it, push frames,
//! close it, and inspect what the client wrote.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;
use url::Url;

use super::{ConnectionSignal, Dialer, Epoch, Link, LinkEvent};

/// One dialed socket, controlled by the test.
#[derive(Debug)]
pub struct LoopbackSocket {
    url: Url,
    epoch: Epoch,
    signals: mpsc::Sender<ConnectionSignal>,
    outbound: Mutex<mpsc::UnboundedReceiver<String>>,
}

impl LoopbackSocket {
    /// The URL the client dialed.
    #[must_use]
    pub const fn url(&self) -> &Url {
        &self.url
    }

    /// Generation this socket was dialed for.
    #[must_use]
    pub const fn epoch(&self) -> Epoch {
        self.epoch
    }

    async fn emit(&self, event: LinkEvent) {
        let _ = self
            .signals
            .send(ConnectionSignal::Link {
                epoch: self.epoch,
                event,
            })
            .await;
    }

    /// Completes the handshake.
    pub async fn open(&self) {
        self.emit(LinkEvent::Opened).await;
    }

    /// Delivers a text frame from the service.
    pub async fn push(&self, text: &str) {
        self.emit(LinkEvent::Frame(text.to_owned())).await;
    }

    /// Closes the socket from the service side.
    pub async fn close(&self) {
        self.emit(LinkEvent::Closed { reason: None }).await;
    }

    /// Reports that the socket failed to open or broke.
    pub async fn fail(&self, reason: &str) {
        self.emit(LinkEvent::Closed {
            reason: Some(reason.to_owned()),
        })
        .await;
    }

    /// Next frame the client wrote, if any.
    #[must_use]
    pub fn try_recv_sent(&self) -> Option<String> {
        self.outbound.lock().try_recv().ok()
    }

    /// Every frame the client wrote and nobody has read yet.
    #[must_use]
    pub fn drain_sent(&self) -> Vec<String> {
        let mut rx = self.outbound.lock();
        std::iter::from_fn(|| rx.try_recv().ok()).collect()
    }

    /// Whether the client let go of this socket and nothing is left unread.
    ///
    /// Consumes one pending frame if there is one.
    #[must_use]
    pub fn is_released(&self) -> bool {
        matches!(
            self.outbound.lock().try_recv(),
            Err(TryRecvError::Disconnected)
        )
    }
}

/// A [`Dialer`] that records sockets instead of connecting.
///
/// Clones share the same record, so a test can keep one clone while the
/// connection manager owns another.
#[derive(Debug, Clone, Default)]
pub struct LoopbackDialer {
    sockets: Arc<Mutex<Vec<Arc<LoopbackSocket>>>>,
}

impl LoopbackDialer {
    /// Creates a dialer with no recorded sockets.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of dials so far.
    #[must_use]
    pub fn dial_count(&self) -> usize {
        self.sockets.lock().len()
    }

    /// The most recently dialed socket.
    #[must_use]
    pub fn last(&self) -> Option<Arc<LoopbackSocket>> {
        self.sockets.lock().last().cloned()
    }
}

impl Dialer for LoopbackDialer {
    fn dial(&self, url: Url, epoch: Epoch, signals: mpsc::Sender<ConnectionSignal>) -> Link {
        let (tx, rx) = mpsc::unbounded_channel();
        self.sockets.lock().push(Arc::new(LoopbackSocket {
            url,
            epoch,
            signals,
            outbound: Mutex::new(rx),
        }));
        Link::new(tx, None)
    }
}
