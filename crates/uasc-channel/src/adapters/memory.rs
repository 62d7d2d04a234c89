//! In-process duplex transport.
//!
//! Two connected endpoints exchanging whole frames over unbounded channels.
//! Used by the test suite and for in-process client/server bridges.

use crate::domain::TransportError;
use crate::ports::{Transport, TransportLimits};
use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tracing::trace;

/// One end of an in-memory frame pipe.
pub struct MemoryTransport {
    outbound: Mutex<Option<mpsc::UnboundedSender<Vec<u8>>>>,
    inbound: tokio::sync::Mutex<mpsc::UnboundedReceiver<Vec<u8>>>,
    closed: watch::Sender<bool>,
    limits: TransportLimits,
}

impl MemoryTransport {
    /// Two connected endpoints sharing `limits`.
    pub fn pair(limits: TransportLimits) -> (Self, Self) {
        let (a_tx, a_rx) = mpsc::unbounded_channel();
        let (b_tx, b_rx) = mpsc::unbounded_channel();
        (Self::new(a_tx, b_rx, limits), Self::new(b_tx, a_rx, limits))
    }

    fn new(
        outbound: mpsc::UnboundedSender<Vec<u8>>,
        inbound: mpsc::UnboundedReceiver<Vec<u8>>,
        limits: TransportLimits,
    ) -> Self {
        let (closed, _) = watch::channel(false);
        Self {
            outbound: Mutex::new(Some(outbound)),
            inbound: tokio::sync::Mutex::new(inbound),
            closed,
            limits,
        }
    }

    /// Whether `close` was called on this end.
    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn write(&self, frame: &[u8]) -> Result<(), TransportError> {
        let limit = self.limits.send_buffer_size as usize;
        if limit > 0 && frame.len() > limit {
            return Err(TransportError::MessageTooLarge {
                size: frame.len(),
                limit,
            });
        }

        let outbound = self.outbound.lock();
        let sender = outbound.as_ref().ok_or(TransportError::ConnectionClosed)?;
        sender
            .send(frame.to_vec())
            .map_err(|_| TransportError::ConnectionClosed)?;
        trace!(len = frame.len(), "Memory transport wrote frame");
        Ok(())
    }

    async fn receive(&self) -> Result<Vec<u8>, TransportError> {
        let mut closed = self.closed.subscribe();
        if *closed.borrow_and_update() {
            return Err(TransportError::ConnectionClosed);
        }

        let mut inbound = self.inbound.lock().await;
        tokio::select! {
            frame = inbound.recv() => frame.ok_or(TransportError::ConnectionClosed),
            _ = closed.wait_for(|closed| *closed) => Err(TransportError::ConnectionClosed),
        }
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.closed.send_replace(true);
        // Dropping the sender ends the peer's stream.
        self.outbound.lock().take();
        Ok(())
    }

    fn limits(&self) -> TransportLimits {
        self.limits
    }
}
