//! Error types for the secure channel layer.
//!
//! Errors are split by layer: `CodecError` for wire decoding, `TransportError`
//! for the byte stream, `ConfigError` for configuration and `ChannelError`
//! for everything a channel user observes.

use crate::domain::state::ChannelState;
use crate::domain::status::StatusCode;
use std::time::Duration;
use thiserror::Error;
use uasc_crypto::CryptoError;

/// Wire format errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CodecError {
    /// Input ended before a field was complete
    #[error("Truncated input: needed {needed} bytes, {remaining} remaining")]
    Truncated {
        /// Bytes the field required
        needed: usize,
        /// Bytes left in the input
        remaining: usize,
    },

    /// Unknown three-letter message type
    #[error("Invalid message type: {0:?}")]
    InvalidMessageType([u8; 3]),

    /// Unknown chunk type byte
    #[error("Invalid chunk type: 0x{0:02X}")]
    InvalidChunkType(u8),

    /// A length prefix is negative (other than -1) or too large
    #[error("Invalid length prefix: {0}")]
    InvalidLength(i32),

    /// Size field does not match the frame length
    #[error("Message size field {declared} does not match frame length {actual}")]
    SizeMismatch {
        /// Value of the size field
        declared: u32,
        /// Actual frame length
        actual: usize,
    },

    /// Unsupported NodeId encoding byte
    #[error("Unsupported NodeId encoding: 0x{0:02X}")]
    InvalidNodeIdEncoding(u8),

    /// A string is not valid UTF-8
    #[error("Invalid UTF-8 string")]
    InvalidUtf8,

    /// The body carries a type id other than the expected one
    #[error("Unexpected type id: expected {expected}, got {actual}")]
    UnexpectedTypeId {
        /// Expected type id
        expected: String,
        /// Decoded type id
        actual: String,
    },

    /// An enumerated field carries an undefined value
    #[error("Invalid {field} value: {value}")]
    InvalidEnumValue {
        /// Field name
        field: &'static str,
        /// Decoded value
        value: u32,
    },

    /// Padding bytes are inconsistent with the frame
    #[error("Invalid padding")]
    InvalidPadding,

    /// A field required in this context is null
    #[error("Missing {0}")]
    MissingField(&'static str),

    /// Nested structures exceed the decoding depth limit
    #[error("Nesting deeper than {0} levels")]
    NestingTooDeep(usize),
}

/// Byte stream errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// The peer closed the connection or the transport was closed locally
    #[error("Connection closed")]
    ConnectionClosed,

    /// Underlying I/O failure
    #[error("I/O error: {0}")]
    Io(String),

    /// The peer sent a connection protocol error message
    #[error("Protocol error {status}: {reason}")]
    Protocol {
        /// Status code carried by the ERR message
        status: StatusCode,
        /// Reason string carried by the ERR message
        reason: String,
    },

    /// A frame exceeds the negotiated buffer size
    #[error("Frame of {size} bytes exceeds limit of {limit}")]
    MessageTooLarge {
        /// Frame size
        size: usize,
        /// Negotiated limit
        limit: usize,
    },

    /// The connection handshake failed
    #[error("Handshake failed: {0}")]
    Handshake(String),
}

impl TransportError {
    /// Status code reported for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::ConnectionClosed => StatusCode::BAD_CONNECTION_CLOSED,
            Self::Io(_) | Self::Handshake(_) => StatusCode::BAD_COMMUNICATION_ERROR,
            Self::Protocol { status, .. } => *status,
            Self::MessageTooLarge { .. } => StatusCode::BAD_TCP_MESSAGE_TOO_LARGE,
        }
    }
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::UnexpectedEof
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::BrokenPipe => Self::ConnectionClosed,
            _ => Self::Io(err.to_string()),
        }
    }
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// No provider is registered for the policy URI
    #[error("Unsupported security policy: {0}")]
    UnsupportedPolicy(String),

    /// Security mode cannot be combined with the policy
    #[error("Security policy '{policy}' cannot be used with mode {mode}")]
    SecurityModeRejected {
        /// Policy URI
        policy: String,
        /// Requested mode
        mode: String,
    },

    /// A secured policy requires a private key
    #[error("Security policy '{0}' requires a private key")]
    MissingPrivateKey(String),

    /// A secured policy requires a local certificate
    #[error("Security policy '{0}' requires a certificate")]
    MissingCertificate(String),

    /// A secured client channel requires the server certificate
    #[error("Security policy '{0}' requires the remote certificate")]
    MissingRemoteCertificate(String),

    /// Timeout values must be non-zero
    #[error("Invalid timeout: {0}")]
    InvalidTimeout(String),

    /// Invalid limit value
    #[error("Invalid limit: {0}")]
    InvalidLimit(String),
}

/// Errors observed by secure channel users.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ChannelError {
    /// The channel is closed; no further traffic is possible
    #[error("Secure channel closed")]
    EndOfStream,

    /// The transport failed
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// A frame or service body could not be decoded
    #[error("Decoding error: {0}")]
    Decoding(#[from] CodecError),

    /// Signature, decryption, certificate or key checks failed
    #[error("Security checks failed")]
    SecurityChecksFailed,

    /// No response arrived before the deadline
    #[error("Request {request_id} timed out after {timeout:?}")]
    Timeout {
        /// Request id of the expired request
        request_id: u32,
        /// Timeout that elapsed
        timeout: Duration,
    },

    /// The peer reported a failure, either as a service result or an abort chunk
    #[error("Peer reported {code}{}", format_reason(.reason))]
    Status {
        /// Reported status code
        code: StatusCode,
        /// Reason text, present for abort chunks
        reason: Option<String>,
    },

    /// Too many intermediate chunks for one request id
    #[error("Request {request_id} exceeded {limit} chunks")]
    TooManyChunks {
        /// Request id
        request_id: u32,
        /// Negotiated chunk limit
        limit: u32,
    },

    /// A message exceeds the negotiated maximum size
    #[error("Message of {size} bytes exceeds limit of {limit}")]
    MessageTooLarge {
        /// Message size
        size: usize,
        /// Negotiated limit
        limit: usize,
    },

    /// The operation is not allowed in the current channel state
    #[error("{operation} not allowed in state {state:?}")]
    InvalidState {
        /// Attempted operation
        operation: &'static str,
        /// Current state
        state: ChannelState,
    },

    /// A request id already has a pending response slot
    #[error("Duplicate pending request id {0}")]
    DuplicateRequestId(u32),

    /// The response carries an unexpected service type
    #[error("Unexpected service {0}")]
    UnexpectedService(&'static str),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

fn format_reason(reason: &Option<String>) -> String {
    reason
        .as_deref()
        .map(|r| format!(": {r}"))
        .unwrap_or_default()
}

impl From<CryptoError> for ChannelError {
    fn from(err: CryptoError) -> Self {
        // The cause stays in the log, the peer-facing error stays opaque.
        tracing::debug!(error = %err, "Security check failed");
        Self::SecurityChecksFailed
    }
}

impl ChannelError {
    /// Shorthand for a peer status without reason.
    pub fn status(code: StatusCode) -> Self {
        Self::Status { code, reason: None }
    }

    /// Status code reported for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::EndOfStream => StatusCode::BAD_SECURE_CHANNEL_CLOSED,
            Self::Transport(err) => err.status_code(),
            Self::Decoding(_) | Self::UnexpectedService(_) => StatusCode::BAD_DECODING_ERROR,
            Self::SecurityChecksFailed => StatusCode::BAD_SECURITY_CHECKS_FAILED,
            Self::Timeout { .. } => StatusCode::BAD_TIMEOUT,
            Self::Status { code, .. } => *code,
            Self::TooManyChunks { .. } => StatusCode::BAD_ENCODING_LIMITS_EXCEEDED,
            Self::MessageTooLarge { .. } => StatusCode::BAD_TCP_MESSAGE_TOO_LARGE,
            Self::InvalidState { .. } => StatusCode::BAD_INVALID_STATE,
            Self::DuplicateRequestId(_) => StatusCode::BAD_INTERNAL_ERROR,
            Self::Config(_) => StatusCode::BAD_CONFIGURATION_ERROR,
        }
    }

    /// Whether the error ends the channel.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::EndOfStream | Self::Transport(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(
            ChannelError::SecurityChecksFailed.status_code(),
            StatusCode::BAD_SECURITY_CHECKS_FAILED
        );
        assert_eq!(
            ChannelError::Timeout {
                request_id: 1,
                timeout: Duration::from_secs(1)
            }
            .status_code(),
            StatusCode::BAD_TIMEOUT
        );
        assert_eq!(
            ChannelError::status(StatusCode::BAD_NONCE_INVALID).status_code(),
            StatusCode::BAD_NONCE_INVALID
        );
        assert_eq!(
            ChannelError::Transport(TransportError::Protocol {
                status: StatusCode::BAD_TCP_SECURE_CHANNEL_UNKNOWN,
                reason: "gone".into(),
            })
            .status_code(),
            StatusCode::BAD_TCP_SECURE_CHANNEL_UNKNOWN
        );
    }

    #[test]
    fn test_terminal_classification() {
        assert!(ChannelError::EndOfStream.is_terminal());
        assert!(ChannelError::Transport(TransportError::ConnectionClosed).is_terminal());
        assert!(!ChannelError::SecurityChecksFailed.is_terminal());
        assert!(!ChannelError::status(StatusCode::BAD_TIMEOUT).is_terminal());
    }

    #[test]
    fn test_crypto_errors_are_opaque() {
        let err: ChannelError = CryptoError::SignatureVerificationFailed.into();
        assert_eq!(err, ChannelError::SecurityChecksFailed);
        assert_eq!(err.to_string(), "Security checks failed");
    }

    #[test]
    fn test_status_display_with_reason() {
        let err = ChannelError::Status {
            code: StatusCode::BAD_TCP_INTERNAL_ERROR,
            reason: Some("server busy".into()),
        };
        assert_eq!(
            err.to_string(),
            "Peer reported BAD_TCP_INTERNAL_ERROR (0x80820000): server busy"
        );
    }

    #[test]
    fn test_io_eof_is_connection_closed() {
        let io = std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "eof");
        assert_eq!(TransportError::from(io), TransportError::ConnectionClosed);
    }
}
