//! OPC UA status codes used by the secure channel layer.
//!
//! Only the codes this layer produces or inspects are named; any other
//! value received from a peer is carried through unchanged.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A 32-bit OPC UA status code.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StatusCode(pub u32);

macro_rules! status_codes {
    ($($name:ident = $value:literal,)*) => {
        impl StatusCode {
            $(
                #[allow(missing_docs)]
                pub const $name: StatusCode = StatusCode($value);
            )*

            /// Symbolic name, if the code is known.
            pub fn name(&self) -> Option<&'static str> {
                match self.0 {
                    $($value => Some(stringify!($name)),)*
                    _ => None,
                }
            }
        }
    };
}

status_codes! {
    GOOD = 0x0000_0000,
    BAD_UNEXPECTED_ERROR = 0x8001_0000,
    BAD_INTERNAL_ERROR = 0x8002_0000,
    BAD_COMMUNICATION_ERROR = 0x8005_0000,
    BAD_ENCODING_ERROR = 0x8006_0000,
    BAD_DECODING_ERROR = 0x8007_0000,
    BAD_ENCODING_LIMITS_EXCEEDED = 0x8008_0000,
    BAD_UNKNOWN_RESPONSE = 0x8009_0000,
    BAD_TIMEOUT = 0x800A_0000,
    BAD_SERVICE_UNSUPPORTED = 0x800B_0000,
    BAD_SHUTDOWN = 0x800C_0000,
    BAD_CERTIFICATE_INVALID = 0x8012_0000,
    BAD_SECURITY_CHECKS_FAILED = 0x8013_0000,
    BAD_SECURE_CHANNEL_ID_INVALID = 0x8022_0000,
    BAD_NONCE_INVALID = 0x8024_0000,
    BAD_SECURITY_MODE_REJECTED = 0x8054_0000,
    BAD_SECURITY_POLICY_REJECTED = 0x8055_0000,
    BAD_TCP_MESSAGE_TYPE_INVALID = 0x807E_0000,
    BAD_TCP_SECURE_CHANNEL_UNKNOWN = 0x807F_0000,
    BAD_TCP_MESSAGE_TOO_LARGE = 0x8080_0000,
    BAD_TCP_INTERNAL_ERROR = 0x8082_0000,
    BAD_SECURE_CHANNEL_CLOSED = 0x8086_0000,
    BAD_SECURE_CHANNEL_TOKEN_UNKNOWN = 0x8087_0000,
    BAD_SEQUENCE_NUMBER_INVALID = 0x8088_0000,
    BAD_CONFIGURATION_ERROR = 0x8089_0000,
    BAD_CONNECTION_CLOSED = 0x80AE_0000,
    BAD_INVALID_STATE = 0x80AF_0000,
    BAD_REQUEST_TOO_LARGE = 0x80B8_0000,
    BAD_RESPONSE_TOO_LARGE = 0x80B9_0000,
}

impl StatusCode {
    /// Severity bits are `00`.
    pub fn is_good(&self) -> bool {
        self.0 & 0xC000_0000 == 0
    }

    /// Severity bits are `10`.
    pub fn is_bad(&self) -> bool {
        self.0 & 0x8000_0000 != 0
    }
}

impl From<u32> for StatusCode {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{} (0x{:08X})", name, self.0),
            None => write!(f, "0x{:08X}", self.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity() {
        assert!(StatusCode::GOOD.is_good());
        assert!(!StatusCode::GOOD.is_bad());
        assert!(StatusCode::BAD_TIMEOUT.is_bad());
        // Uncertain is neither good nor bad.
        assert!(!StatusCode(0x4000_0000).is_good());
        assert!(!StatusCode(0x4000_0000).is_bad());
    }

    #[test]
    fn test_display() {
        assert_eq!(StatusCode::BAD_TIMEOUT.to_string(), "BAD_TIMEOUT (0x800A0000)");
        assert_eq!(StatusCode(0x8123_0000).to_string(), "0x81230000");
    }
}
