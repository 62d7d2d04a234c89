//! # UASC Channel - OPC UA Secure Conversation
//!
//! The secure channel layer of OPC UA: every service request between a
//! client and a server travels through it.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                        SecureChannel                           │
//! │                                                                │
//! │  open / renew / close        send_request / call / respond     │
//! │          │                               │                     │
//! │          └──────────┬────────────────────┘                     │
//! │                     ▼                                          │
//! │   chunking → sign → encrypt          PendingRequests (oneshot) │
//! │                     │                          ▲               │
//! │                     ▼                          │               │
//! │                 Transport ──► verify → decrypt → reassemble    │
//! └─────────────────────┼──────────────────────────────────────────┘
//!                       │
//!          TcpTransport (UACP Hello/Acknowledge) or MemoryTransport
//! ```
//!
//! # Modules
//!
//! - `domain`: configuration, errors, status codes, counters, chunk
//!   reassembly, pending request store
//! - `codec`: UASC headers, built-in types and handshake service bodies
//! - `ports`: the `Transport` trait and typed service bodies
//! - `adapters`: TCP and in-memory transports
//! - `service`: the channel engine
//!
//! # Usage
//!
//! ```ignore
//! use std::sync::Arc;
//! use uasc_channel::{SecureChannel, SecureChannelConfig, TcpTransport, TransportLimits};
//!
//! let transport = TcpTransport::connect("opc.tcp://localhost:4840", TransportLimits::default()).await?;
//! let channel = Arc::new(SecureChannel::new(SecureChannelConfig::default(), Arc::new(transport))?);
//! let mut receiver = channel.spawn_receive_loop();
//! channel.open().await?;
//! ```
//!
//! Cryptography lives in the `uasc-crypto` crate.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod adapters;
pub mod codec;
pub mod domain;
pub mod ports;
pub mod service;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

// Re-exports
pub use adapters::{MemoryTransport, TcpTransport};
pub use codec::{
    ExpandedNodeId, GenericRequest, GenericResponse, NodeId, RequestHeader, ResponseHeader,
    ServiceMessage,
};
pub use domain::{
    ChannelError, ChannelState, CodecError, ConfigError, MessageSecurityMode, Role,
    SecureChannelConfig, StatusCode, TransportError,
};
pub use ports::{ServiceRequest, ServiceResponse, Transport, TransportLimits};
pub use service::{InboundMessage, ReceiveLoop, SecureChannel, TIMEOUT_LENIENCY};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    #[test]
    fn test_version() {
        assert!(!super::VERSION.is_empty());
    }
}
