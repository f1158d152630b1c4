//! Connection seam between the transport and the broker.
//!
//! The transport owns the socket. For each accepted connection it builds a
//! [`PluginStream`] (the cloneable outbound half) and drives the broker
//! through the [`FrameHandler`] trait: one `on_connect`, then `on_frame` per
//! inbound frame in stream order, then exactly one `on_disconnect`.
//!
//! All outbound frames for one connection funnel through the stream's bounded
//! queue and are written by a single writer task, so producers on any task
//! may send concurrently without interleaving frames.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::{TransportError, TransportResult};
use crate::protocol::{InboundFrame, OutboundFrame};

/// Identifies one accepted connection for the lifetime of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Handle to the outbound half of a plugin connection.
///
/// Cloning is cheap; all clones feed the same writer task. Dropping the last
/// clone does not close the connection; use [`close`](Self::close).
#[derive(Clone)]
pub struct PluginStream {
    id: ConnectionId,
    frame_tx: mpsc::Sender<OutboundFrame>,
    shutdown: Arc<CancellationToken>,
}

impl PluginStream {
    /// Creates a stream handle over an outbound frame queue.
    pub fn new(
        id: ConnectionId,
        frame_tx: mpsc::Sender<OutboundFrame>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            id,
            frame_tx,
            shutdown: Arc::new(shutdown),
        }
    }

    /// The connection this stream belongs to.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Queues a frame, waiting for queue space if necessary.
    pub async fn send(&self, frame: OutboundFrame) -> TransportResult<()> {
        self.frame_tx
            .send(frame)
            .await
            .map_err(|_| TransportError::ConnectionClosed)
    }

    /// Queues a frame without waiting. Used by paths that must not block the
    /// caller (event fan-out); a full queue drops the frame.
    pub fn try_send(&self, frame: OutboundFrame) -> TransportResult<()> {
        self.frame_tx.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => TransportError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => TransportError::ConnectionClosed,
        })
    }

    /// Whether the connection has been closed or told to close.
    pub fn is_closed(&self) -> bool {
        self.shutdown.is_cancelled() || self.frame_tx.is_closed()
    }

    /// Signals the transport to tear the connection down.
    pub fn close(&self) {
        self.shutdown.cancel();
    }

    /// Token that fires when the connection goes away.
    pub fn closed_token(&self) -> &CancellationToken {
        &self.shutdown
    }
}

impl fmt::Debug for PluginStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginStream")
            .field("id", &self.id)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// The broker side of a plugin connection.
///
/// The transport guarantees per-connection call ordering: `on_connect`,
/// then `on_frame` in wire order, then `on_disconnect` exactly once.
/// Implementations must not block the reader for long-running work.
#[async_trait]
pub trait FrameHandler: Send + Sync {
    /// A connection was accepted; `stream` is the outbound half.
    async fn on_connect(&self, stream: PluginStream);

    /// One inbound frame arrived.
    async fn on_frame(&self, id: ConnectionId, frame: InboundFrame);

    /// The connection ended (EOF, I/O error, or local close).
    async fn on_disconnect(&self, id: ConnectionId);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn try_send_reports_full_queue() {
        let (tx, _rx) = mpsc::channel(1);
        let stream = PluginStream::new(ConnectionId(1), tx, CancellationToken::new());

        stream.try_send(OutboundFrame::not_registered()).unwrap();
        let err = stream.try_send(OutboundFrame::not_registered()).unwrap_err();
        assert!(matches!(err, TransportError::QueueFull));
    }

    #[tokio::test]
    async fn send_fails_after_receiver_drop() {
        let (tx, rx) = mpsc::channel(1);
        let stream = PluginStream::new(ConnectionId(2), tx, CancellationToken::new());
        drop(rx);

        let err = stream.send(OutboundFrame::not_registered()).await.unwrap_err();
        assert!(matches!(err, TransportError::ConnectionClosed));
        assert!(stream.is_closed());
    }

    #[test]
    fn close_cancels_token() {
        let (tx, _rx) = mpsc::channel(1);
        let stream = PluginStream::new(ConnectionId(3), tx, CancellationToken::new());
        assert!(!stream.is_closed());
        stream.close();
        assert!(stream.is_closed());
        assert!(stream.closed_token().is_cancelled());
    }
}
