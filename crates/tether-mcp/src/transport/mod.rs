//! Transports move raw JSON-RPC text between the client and one server.
//!
//! A transport knows nothing about ids, methods or the handshake. It
//! delivers each complete inbound message as a [`TransportEvent::Message`]
//! and reports failures and closure on the same channel. The
//! [`ProtocolHandler`](crate::ProtocolHandler) sits on top and gives the
//! messages meaning.
//!
//! ```text
//!   StdioTransport      subprocess, NDJSON over stdin/stdout
//!   HttpTransport       one POST per message, reply body is the response
//!   WebSocketTransport  persistent socket, one text frame per message
//! ```

mod factory;
mod http;
mod stdio;
mod websocket;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::config::TransportKind;
use crate::error::Result;

pub use factory::{DefaultTransportFactory, TransportFactory};
pub use http::HttpTransport;
pub use stdio::StdioTransport;
pub use websocket::WebSocketTransport;

/// Something that happened on a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// One complete inbound message.
    Message(String),
    /// A failure on the underlying channel.
    Error(String),
    /// The channel is gone. Delivered at most once.
    Closed,
}

/// Bidirectional message channel to one server.
///
/// All methods take `&self`; implementations keep their state behind
/// interior mutability so one transport can be shared between the handler's
/// send path and the manager's teardown path.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Which kind of transport this is.
    fn kind(&self) -> TransportKind;

    /// Open the channel. Must be called once before [`Transport::send`].
    async fn connect(&self) -> Result<()>;

    /// Transmit one complete message. Sends are delivered in call order.
    async fn send(&self, message: String) -> Result<()>;

    /// Whether the channel is currently usable.
    fn is_connected(&self) -> bool;

    /// Release the channel. Safe to call more than once.
    async fn close(&self) -> Result<()>;

    /// Take the inbound event stream. Returns `None` after the first call.
    fn take_events(&self) -> Option<mpsc::UnboundedReceiver<TransportEvent>>;
}

/// Sending half of a transport's event stream.
///
/// Guarantees at most one [`TransportEvent::Closed`] and drops anything
/// emitted after it.
#[derive(Debug, Clone)]
pub(crate) struct EventSink {
    tx: mpsc::UnboundedSender<TransportEvent>,
    closed: Arc<AtomicBool>,
}

impl EventSink {
    pub(crate) fn channel() -> (Self, mpsc::UnboundedReceiver<TransportEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                tx,
                closed: Arc::new(AtomicBool::new(false)),
            },
            rx,
        )
    }

    pub(crate) fn message(&self, message: String) {
        if !self.is_closed() {
            let _ = self.tx.send(TransportEvent::Message(message));
        }
    }

    pub(crate) fn error(&self, error: impl Into<String>) {
        if !self.is_closed() {
            let _ = self.tx.send(TransportEvent::Error(error.into()));
        }
    }

    /// Emit `Closed` unless it was already emitted.
    pub(crate) fn closed(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            let _ = self.tx.send(TransportEvent::Closed);
        }
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Holder for the receiving half until a consumer takes it.
#[derive(Debug)]
pub(crate) struct EventSlot(parking_lot::Mutex<Option<mpsc::UnboundedReceiver<TransportEvent>>>);

impl EventSlot {
    pub(crate) fn new(rx: mpsc::UnboundedReceiver<TransportEvent>) -> Self {
        Self(parking_lot::Mutex::new(Some(rx)))
    }

    pub(crate) fn take(&self) -> Option<mpsc::UnboundedReceiver<TransportEvent>> {
        self.0.lock().take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_closed_is_delivered_once() {
        let (sink, mut rx) = EventSink::channel();
        sink.message("a".into());
        sink.closed();
        sink.closed();
        sink.message("late".into());
        sink.error("late");

        assert_eq!(rx.try_recv().unwrap(), TransportEvent::Message("a".into()));
        assert_eq!(rx.try_recv().unwrap(), TransportEvent::Closed);
        assert!(rx.try_recv().is_err());
        assert!(sink.is_closed());
    }

    #[test]
    fn test_event_slot_yields_once() {
        let (_sink, rx) = EventSink::channel();
        let slot = EventSlot::new(rx);
        assert!(slot.take().is_some());
        assert!(slot.take().is_none());
    }
}
