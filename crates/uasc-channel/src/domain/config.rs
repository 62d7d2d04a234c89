//! Secure channel configuration with validation.

use crate::domain::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use uasc_crypto::{RsaPrivateKey, SECURITY_POLICY_URI_NONE};

/// Protection applied to regular channel traffic.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageSecurityMode {
    /// No signature, no encryption
    #[default]
    None,
    /// Signed
    Sign,
    /// Signed and encrypted
    SignAndEncrypt,
}

impl MessageSecurityMode {
    /// Wire value.
    pub fn as_u32(&self) -> u32 {
        match self {
            Self::None => 1,
            Self::Sign => 2,
            Self::SignAndEncrypt => 3,
        }
    }

    /// Parse a wire value. 0 (`Invalid`) and unknown values yield `None`.
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            1 => Some(Self::None),
            2 => Some(Self::Sign),
            3 => Some(Self::SignAndEncrypt),
            _ => None,
        }
    }

    /// Whether outgoing MSG/CLO frames carry a signature.
    pub fn signs(&self) -> bool {
        !matches!(self, Self::None)
    }

    /// Whether outgoing MSG/CLO frames are encrypted.
    pub fn encrypts(&self) -> bool {
        matches!(self, Self::SignAndEncrypt)
    }
}

impl fmt::Display for MessageSecurityMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::None => "None",
            Self::Sign => "Sign",
            Self::SignAndEncrypt => "SignAndEncrypt",
        };
        f.write_str(name)
    }
}

/// Which side of the handshake this channel plays.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    /// Sends Open and service requests, decodes generic bodies as responses
    #[default]
    Client,
    /// Answers Open requests, decodes generic bodies as requests
    Server,
}

/// Secure channel configuration.
///
/// Key material is never serialized; set it with the `with_*` helpers.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecureChannelConfig {
    /// Security policy URI
    pub security_policy_uri: String,
    /// Security mode for regular traffic
    pub security_mode: MessageSecurityMode,
    /// Handshake role
    pub role: Role,
    /// Requested token lifetime
    #[serde(with = "humantime_serde")]
    pub lifetime: Duration,
    /// Default per-request timeout
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
    /// The first request id is `request_id_seed + 1`
    pub request_id_seed: u32,
    /// Capacity of the unsolicited message stream
    pub unsolicited_capacity: usize,
    /// DER-encoded local certificate
    #[serde(skip)]
    pub certificate: Option<Vec<u8>>,
    /// Local private key
    #[serde(skip)]
    pub local_key: Option<RsaPrivateKey>,
    /// DER-encoded peer certificate; learned from the first Open request in the server role
    #[serde(skip)]
    pub remote_certificate: Option<Vec<u8>>,
}

impl Default for SecureChannelConfig {
    fn default() -> Self {
        Self {
            security_policy_uri: SECURITY_POLICY_URI_NONE.to_string(),
            security_mode: MessageSecurityMode::None,
            role: Role::Client,
            lifetime: Duration::from_secs(3600),
            request_timeout: Duration::from_secs(10),
            request_id_seed: 0,
            unsolicited_capacity: 64,
            certificate: None,
            local_key: None,
            remote_certificate: None,
        }
    }
}

impl SecureChannelConfig {
    /// Configuration for `policy_uri` and `mode`, defaults elsewhere.
    pub fn new(policy_uri: impl Into<String>, mode: MessageSecurityMode) -> Self {
        Self {
            security_policy_uri: policy_uri.into(),
            security_mode: mode,
            ..Self::default()
        }
    }

    /// Set the handshake role.
    pub fn with_role(mut self, role: Role) -> Self {
        self.role = role;
        self
    }

    /// Set the local certificate and private key.
    pub fn with_local_identity(mut self, certificate: Vec<u8>, key: RsaPrivateKey) -> Self {
        self.certificate = Some(certificate);
        self.local_key = Some(key);
        self
    }

    /// Set the peer certificate.
    pub fn with_remote_certificate(mut self, certificate: Vec<u8>) -> Self {
        self.remote_certificate = Some(certificate);
        self
    }

    /// Set the default request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set the requested token lifetime.
    pub fn with_lifetime(mut self, lifetime: Duration) -> Self {
        self.lifetime = lifetime;
        self
    }

    /// Set the request id seed.
    pub fn with_request_id_seed(mut self, seed: u32) -> Self {
        self.request_id_seed = seed;
        self
    }

    /// Whether the policy is the no-security policy.
    pub fn is_policy_none(&self) -> bool {
        self.security_policy_uri == SECURITY_POLICY_URI_NONE
    }

    /// Force mode None under policy None.
    pub fn normalize(&mut self) {
        if self.is_policy_none() {
            self.security_mode = MessageSecurityMode::None;
        }
    }

    /// Requested lifetime in milliseconds, saturated to `u32`.
    pub fn lifetime_ms(&self) -> u32 {
        u32::try_from(self.lifetime.as_millis()).unwrap_or(u32::MAX)
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.security_policy_uri.is_empty() {
            return Err(ConfigError::UnsupportedPolicy(String::new()));
        }

        if !self.is_policy_none() {
            if self.security_mode == MessageSecurityMode::None {
                return Err(ConfigError::SecurityModeRejected {
                    policy: self.security_policy_uri.clone(),
                    mode: self.security_mode.to_string(),
                });
            }
            if self.local_key.is_none() {
                return Err(ConfigError::MissingPrivateKey(
                    self.security_policy_uri.clone(),
                ));
            }
            if self.certificate.is_none() {
                return Err(ConfigError::MissingCertificate(
                    self.security_policy_uri.clone(),
                ));
            }
            if self.role == Role::Client && self.remote_certificate.is_none() {
                return Err(ConfigError::MissingRemoteCertificate(
                    self.security_policy_uri.clone(),
                ));
            }
        }

        if self.request_timeout.is_zero() {
            return Err(ConfigError::InvalidTimeout(
                "request_timeout cannot be 0".into(),
            ));
        }
        if self.lifetime.is_zero() {
            return Err(ConfigError::InvalidTimeout("lifetime cannot be 0".into()));
        }
        if self.unsolicited_capacity == 0 {
            return Err(ConfigError::InvalidLimit(
                "unsolicited_capacity cannot be 0".into(),
            ));
        }

        Ok(())
    }
}

impl fmt::Debug for SecureChannelConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecureChannelConfig")
            .field("security_policy_uri", &self.security_policy_uri)
            .field("security_mode", &self.security_mode)
            .field("role", &self.role)
            .field("lifetime", &self.lifetime)
            .field("request_timeout", &self.request_timeout)
            .field("request_id_seed", &self.request_id_seed)
            .field("has_certificate", &self.certificate.is_some())
            .field("has_local_key", &self.local_key.is_some())
            .field("has_remote_certificate", &self.remote_certificate.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uasc_crypto::testing::key_pair;
    use uasc_crypto::SECURITY_POLICY_URI_BASIC256;

    #[test]
    fn test_default_config_is_valid() {
        let config = SecureChannelConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.is_policy_none());
        assert_eq!(config.lifetime_ms(), 3_600_000);
    }

    #[test]
    fn test_policy_none_forces_mode_none() {
        let mut config = SecureChannelConfig::new(
            SECURITY_POLICY_URI_NONE,
            MessageSecurityMode::SignAndEncrypt,
        );
        config.normalize();
        assert_eq!(config.security_mode, MessageSecurityMode::None);
    }

    #[test]
    fn test_secured_policy_rejects_mode_none() {
        let config = SecureChannelConfig::new(SECURITY_POLICY_URI_BASIC256, MessageSecurityMode::None);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::SecurityModeRejected { .. })
        ));
    }

    #[test]
    fn test_secured_policy_requires_key_material() {
        let config = SecureChannelConfig::new(SECURITY_POLICY_URI_BASIC256, MessageSecurityMode::Sign);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingPrivateKey(_))
        ));

        let (key, cert) = key_pair(1024, false);
        let config = config.with_local_identity(cert, key);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingRemoteCertificate(_))
        ));

        // Servers learn the peer certificate from the handshake.
        assert!(config.clone().with_role(Role::Server).validate().is_ok());
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let config = SecureChannelConfig::default().with_request_timeout(Duration::ZERO);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidTimeout(_))
        ));
    }

    #[test]
    fn test_serde_roundtrip_skips_keys() {
        let (key, cert) = key_pair(1024, false);
        let config = SecureChannelConfig::default().with_local_identity(cert, key);

        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains("\"request_timeout\":\"10s\""));

        let parsed: SecureChannelConfig = serde_json::from_str(&json).unwrap();
        assert!(parsed.local_key.is_none());
        assert_eq!(parsed.request_timeout, config.request_timeout);
        assert_eq!(parsed.role, Role::Client);
    }

    #[test]
    fn test_security_mode_wire_values() {
        for mode in [
            MessageSecurityMode::None,
            MessageSecurityMode::Sign,
            MessageSecurityMode::SignAndEncrypt,
        ] {
            assert_eq!(MessageSecurityMode::from_u32(mode.as_u32()), Some(mode));
        }
        assert_eq!(MessageSecurityMode::from_u32(0), None);
    }
}
