//! Domain types for the secure channel.
//!
//! Pure state with no I/O: configuration, errors, status codes, counters,
//! chunk reassembly and the pending request store.

pub mod chunks;
pub mod config;
pub mod counters;
pub mod error;
pub mod pending;
pub mod state;
pub mod status;

// Re-exports for convenience
pub use chunks::ChunkAccumulator;
pub use config::{MessageSecurityMode, Role, SecureChannelConfig};
pub use counters::{IdCounter, SequenceCounter, SEQUENCE_NUMBER_WRAP};
pub use error::{ChannelError, CodecError, ConfigError, TransportError};
pub use pending::{Delivery, PendingRequests, PendingStats};
pub use state::{ChannelState, StateCell};
pub use status::StatusCode;
