//! Outbound port: the byte stream a secure channel runs over.
//!
//! A transport moves whole frames. It never splits or merges them, so the
//! secure channel can treat every `receive` result as exactly one chunk.

use crate::domain::TransportError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Limits negotiated by the connection handshake.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportLimits {
    /// Largest chunk this side accepts
    pub receive_buffer_size: u32,
    /// Largest chunk this side sends
    pub send_buffer_size: u32,
    /// Largest reassembled message, 0 for no limit
    pub max_message_size: u32,
    /// Most chunks per message, 0 for no limit
    pub max_chunk_count: u32,
}

impl TransportLimits {
    /// Smallest buffer size the protocol allows.
    pub const MIN_BUFFER_SIZE: u32 = 8192;
}

impl Default for TransportLimits {
    fn default() -> Self {
        Self {
            receive_buffer_size: 0xFFFF,
            send_buffer_size: 0xFFFF,
            max_message_size: 2 * 1024 * 1024,
            max_chunk_count: 512,
        }
    }
}

/// Frame-oriented byte stream.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Write one complete frame.
    async fn write(&self, frame: &[u8]) -> Result<(), TransportError>;

    /// Read the next complete frame.
    async fn receive(&self) -> Result<Vec<u8>, TransportError>;

    /// Close the stream. Pending and later receives fail with
    /// `ConnectionClosed`.
    async fn close(&self) -> Result<(), TransportError>;

    /// Limits in effect for this stream.
    fn limits(&self) -> TransportLimits;
}
