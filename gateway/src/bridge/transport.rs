//! Telephony side of a call, decoupled from the WebSocket implementation.
//!
//! The handler owns the socket: it feeds inbound text frames into
//! [`TelephonyTransport::inbound`] and drains [`Outbound`] messages into the
//! socket from a single writer task, so frames reach the provider in the
//! order they were queued.

use futures::stream::{BoxStream, Stream, StreamExt};
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Receive failed: {0}")]
    Receive(String),

    #[error("Telephony transport closed")]
    Closed,
}

/// Messages for the telephony writer task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Frame(String),
    /// Close the socket; nothing is written after this.
    Close { code: u16, reason: String },
}

pub type InboundStream = BoxStream<'static, Result<String, TransportError>>;

#[derive(Debug, Clone)]
pub struct TelephonySender {
    tx: mpsc::Sender<Outbound>,
}

impl TelephonySender {
    pub fn new(tx: mpsc::Sender<Outbound>) -> Self {
        Self { tx }
    }

    pub async fn send_frame(&self, frame: String) -> Result<(), TransportError> {
        self.tx
            .send(Outbound::Frame(frame))
            .await
            .map_err(|_| TransportError::Closed)
    }

    pub async fn close(&self, code: u16, reason: impl Into<String>) -> Result<(), TransportError> {
        self.tx
            .send(Outbound::Close {
                code,
                reason: reason.into(),
            })
            .await
            .map_err(|_| TransportError::Closed)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

pub struct TelephonyTransport {
    pub inbound: InboundStream,
    pub outbound: TelephonySender,
}

impl TelephonyTransport {
    pub fn new<S>(inbound: S, outbound: TelephonySender) -> Self
    where
        S: Stream<Item = Result<String, TransportError>> + Send + 'static,
    {
        Self {
            inbound: inbound.boxed(),
            outbound,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sender_reports_closed_channel() {
        let (tx, rx) = mpsc::channel(1);
        let sender = TelephonySender::new(tx);
        drop(rx);
        assert!(sender.is_closed());
        assert!(matches!(
            sender.send_frame("{}".to_string()).await,
            Err(TransportError::Closed)
        ));
    }

    #[tokio::test]
    async fn test_close_is_queued_after_frames() {
        let (tx, mut rx) = mpsc::channel(4);
        let sender = TelephonySender::new(tx);
        sender.send_frame("a".to_string()).await.unwrap();
        sender.close(1000, "bye").await.unwrap();
        assert_eq!(rx.recv().await, Some(Outbound::Frame("a".to_string())));
        assert_eq!(
            rx.recv().await,
            Some(Outbound::Close {
                code: 1000,
                reason: "bye".to_string()
            })
        );
    }
}
