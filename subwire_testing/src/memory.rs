//! In-memory duplex transport for deterministic protocol tests.

use std::{
    io,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
};

use async_trait::async_trait;
use tokio::sync::mpsc;

use subwire::{
    protocol::Message,
    transport::{Connect, ConnectError, Transport},
};

/// Shared cell recording the close code a link was closed with.
pub type CloseProbe = Arc<Mutex<Option<u16>>>;

/// One end of an in-memory duplex link.
///
/// Closing one end drops its sender, so the peer observes `recv() == None`.
/// Both ends share one close probe, so a test holding either end observes
/// which close code was used, whoever closed first.
pub struct MemoryTransport {
    tx: Option<mpsc::UnboundedSender<String>>,
    rx: mpsc::UnboundedReceiver<String>,
    close_code: CloseProbe,
}

impl MemoryTransport {
    /// A handle observing the close code of this link.
    #[must_use]
    pub fn close_probe(&self) -> CloseProbe { Arc::clone(&self.close_code) }

    /// Test convenience: push one encoded protocol message to the peer.
    ///
    /// # Panics
    /// Panics when this end is closed or the peer is gone.
    pub fn send_message(&self, message: &Message) {
        let frame = message.encode().expect("encode message");
        self.send_raw(&frame);
    }

    /// Test convenience: push one raw frame, decodable or not.
    ///
    /// # Panics
    /// Panics when this end is closed or the peer is gone.
    pub fn send_raw(&self, frame: &str) {
        self.tx
            .as_ref()
            .expect("transport already closed")
            .send(frame.to_owned())
            .expect("peer end dropped");
    }

    /// Test convenience: receive and decode the next message.
    ///
    /// # Panics
    /// Panics when the peer sent an undecodable frame.
    pub async fn recv_message(&mut self) -> Option<Message> {
        let frame = self.rx.recv().await?;
        Some(Message::decode(&frame).expect("peer sent undecodable frame"))
    }
}

/// Create a connected pair of in-memory transports.
#[must_use]
pub fn memory_pair() -> (MemoryTransport, MemoryTransport) {
    let (a_tx, b_rx) = mpsc::unbounded_channel();
    let (b_tx, a_rx) = mpsc::unbounded_channel();
    let close_code = Arc::new(Mutex::new(None));
    (
        MemoryTransport {
            tx: Some(a_tx),
            rx: a_rx,
            close_code: Arc::clone(&close_code),
        },
        MemoryTransport {
            tx: Some(b_tx),
            rx: b_rx,
            close_code,
        },
    )
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn send(&mut self, frame: String) -> io::Result<()> {
        match &self.tx {
            Some(tx) if tx.send(frame).is_ok() => Ok(()),
            _ => Err(io::Error::new(io::ErrorKind::BrokenPipe, "transport closed")),
        }
    }

    async fn recv(&mut self) -> Option<String> { self.rx.recv().await }

    async fn close(&mut self, code: u16) {
        *self.close_code.lock().expect("close probe lock") = Some(code);
        self.tx = None;
    }
}

/// Connector minting one fresh in-memory pair per attempt.
///
/// Server ends are delivered through the receiver returned by
/// [`MemoryConnector::new`]; tests either drive them by hand or feed them
/// to a server engine. Clones share the same acceptor and counters.
#[derive(Clone)]
pub struct MemoryConnector {
    accepting: Arc<AtomicBool>,
    protocol_rejection: Arc<Mutex<Option<u16>>>,
    attempts: Arc<AtomicUsize>,
    server_ends: mpsc::UnboundedSender<MemoryTransport>,
}

impl MemoryConnector {
    /// Create a connector and the stream of accepted server-side ends.
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<MemoryTransport>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                accepting: Arc::new(AtomicBool::new(true)),
                protocol_rejection: Arc::new(Mutex::new(None)),
                attempts: Arc::new(AtomicUsize::new(0)),
                server_ends: tx,
            },
            rx,
        )
    }

    /// Make every further connect attempt fail.
    pub fn reject_further(&self) { self.accepting.store(false, Ordering::SeqCst); }

    /// Make every further attempt fail subprotocol negotiation with `code`,
    /// as an endpoint that answers but speaks no compatible protocol would.
    pub fn reject_protocol(&self, code: u16) {
        *self.protocol_rejection.lock().expect("rejection lock") = Some(code);
    }

    /// Number of connect attempts made so far, accepted or not.
    #[must_use]
    pub fn attempts(&self) -> usize { self.attempts.load(Ordering::SeqCst) }
}

#[async_trait]
impl Connect for MemoryConnector {
    type Transport = MemoryTransport;

    async fn connect(&self) -> Result<MemoryTransport, ConnectError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if let Some(code) = *self.protocol_rejection.lock().expect("rejection lock") {
            return Err(ConnectError::ProtocolRejected { code });
        }
        if !self.accepting.load(Ordering::SeqCst) {
            return Err(ConnectError::Refused("listener gone".to_owned()));
        }
        let (client, server) = memory_pair();
        if self.server_ends.send(server).is_err() {
            return Err(ConnectError::Refused("acceptor dropped".to_owned()));
        }
        Ok(client)
    }
}
