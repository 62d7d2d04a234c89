//! # Security Policies
//!
//! The fixed algorithm combinations an OPC UA secure channel can negotiate.
//!
//! | Policy | Symmetric | MAC | Asym. signature | Asym. encryption | Key bits |
//! |--------|-----------|-----|-----------------|------------------|----------|
//! | `None` | - | - | - | - | - |
//! | `Basic128Rsa15` | AES-128-CBC | HMAC-SHA1 | PKCS1v15-SHA1 | PKCS1v15 | 1024-2048 |
//! | `Basic256` | AES-256-CBC | HMAC-SHA1 | PKCS1v15-SHA1 | OAEP-SHA1 | 1024-2048 |
//! | `Basic256Sha256` | AES-256-CBC | HMAC-SHA256 | PKCS1v15-SHA256 | OAEP-SHA1 | 2048-4096 |
//! | `Aes128_Sha256_RsaOaep` | AES-128-CBC | HMAC-SHA256 | PKCS1v15-SHA256 | OAEP-SHA1 | 2048-4096 |
//! | `Aes256_Sha256_RsaPss` | AES-256-CBC | HMAC-SHA256 | PSS-SHA256 | OAEP-SHA256 | 2048-4096 |

use crate::asymmetric::{RsaEncryption, RsaSignature};
use crate::kdf::PrfHash;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Security policy URI for no security.
pub const SECURITY_POLICY_URI_NONE: &str = "http://opcfoundation.org/UA/SecurityPolicy#None";
/// Security policy URI for Basic128Rsa15.
pub const SECURITY_POLICY_URI_BASIC128RSA15: &str =
    "http://opcfoundation.org/UA/SecurityPolicy#Basic128Rsa15";
/// Security policy URI for Basic256.
pub const SECURITY_POLICY_URI_BASIC256: &str =
    "http://opcfoundation.org/UA/SecurityPolicy#Basic256";
/// Security policy URI for Basic256Sha256.
pub const SECURITY_POLICY_URI_BASIC256SHA256: &str =
    "http://opcfoundation.org/UA/SecurityPolicy#Basic256Sha256";
/// Security policy URI for Aes128_Sha256_RsaOaep.
pub const SECURITY_POLICY_URI_AES128SHA256RSAOAEP: &str =
    "http://opcfoundation.org/UA/SecurityPolicy#Aes128_Sha256_RsaOaep";
/// Security policy URI for Aes256_Sha256_RsaPss.
pub const SECURITY_POLICY_URI_AES256SHA256RSAPSS: &str =
    "http://opcfoundation.org/UA/SecurityPolicy#Aes256_Sha256_RsaPss";

/// AES block size in bytes, shared by every real policy.
pub const AES_BLOCK_SIZE: usize = 16;

/// Built-in security policies.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SecurityPolicy {
    /// No signing, no encryption
    #[default]
    None,
    /// Deprecated 128-bit policy
    Basic128Rsa15,
    /// Deprecated 256-bit policy with SHA-1
    Basic256,
    /// 256-bit policy with SHA-256
    Basic256Sha256,
    /// AES-128 with SHA-256 and RSA-OAEP
    Aes128Sha256RsaOaep,
    /// AES-256 with SHA-256 and RSA-PSS
    Aes256Sha256RsaPss,
}

/// Parameters of a security policy.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PolicyParameters {
    /// Hash used for key derivation and the symmetric MAC
    pub prf: PrfHash,
    /// Derived signing key length in bytes
    pub signing_key_length: usize,
    /// Derived encryption key length in bytes
    pub encryption_key_length: usize,
    /// Asymmetric signature scheme
    pub asymmetric_signature: RsaSignature,
    /// Asymmetric encryption scheme
    pub asymmetric_encryption: RsaEncryption,
    /// Minimum asymmetric key size in bits
    pub min_key_bits: usize,
    /// Maximum asymmetric key size in bits
    pub max_key_bits: usize,
    /// Nonce length in bytes
    pub nonce_length: usize,
}

impl SecurityPolicy {
    /// All built-in policies, in order of increasing strength.
    pub const ALL: [SecurityPolicy; 6] = [
        SecurityPolicy::None,
        SecurityPolicy::Basic128Rsa15,
        SecurityPolicy::Basic256,
        SecurityPolicy::Basic256Sha256,
        SecurityPolicy::Aes128Sha256RsaOaep,
        SecurityPolicy::Aes256Sha256RsaPss,
    ];

    /// Policy URI.
    pub fn uri(&self) -> &'static str {
        match self {
            Self::None => SECURITY_POLICY_URI_NONE,
            Self::Basic128Rsa15 => SECURITY_POLICY_URI_BASIC128RSA15,
            Self::Basic256 => SECURITY_POLICY_URI_BASIC256,
            Self::Basic256Sha256 => SECURITY_POLICY_URI_BASIC256SHA256,
            Self::Aes128Sha256RsaOaep => SECURITY_POLICY_URI_AES128SHA256RSAOAEP,
            Self::Aes256Sha256RsaPss => SECURITY_POLICY_URI_AES256SHA256RSAPSS,
        }
    }

    /// Look up a policy by URI.
    pub fn from_uri(uri: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.uri() == uri)
    }

    /// Returns `None` for the no-security policy, the parameters otherwise.
    pub fn parameters(&self) -> Option<PolicyParameters> {
        let params = match self {
            Self::None => return None,
            Self::Basic128Rsa15 => PolicyParameters {
                prf: PrfHash::Sha1,
                signing_key_length: 16,
                encryption_key_length: 16,
                asymmetric_signature: RsaSignature::Pkcs1v15Sha1,
                asymmetric_encryption: RsaEncryption::Pkcs1v15,
                min_key_bits: 1024,
                max_key_bits: 2048,
                nonce_length: 16,
            },
            Self::Basic256 => PolicyParameters {
                prf: PrfHash::Sha1,
                signing_key_length: 24,
                encryption_key_length: 32,
                asymmetric_signature: RsaSignature::Pkcs1v15Sha1,
                asymmetric_encryption: RsaEncryption::OaepSha1,
                min_key_bits: 1024,
                max_key_bits: 2048,
                nonce_length: 32,
            },
            Self::Basic256Sha256 => PolicyParameters {
                prf: PrfHash::Sha256,
                signing_key_length: 32,
                encryption_key_length: 32,
                asymmetric_signature: RsaSignature::Pkcs1v15Sha256,
                asymmetric_encryption: RsaEncryption::OaepSha1,
                min_key_bits: 2048,
                max_key_bits: 4096,
                nonce_length: 32,
            },
            Self::Aes128Sha256RsaOaep => PolicyParameters {
                prf: PrfHash::Sha256,
                signing_key_length: 32,
                encryption_key_length: 16,
                asymmetric_signature: RsaSignature::Pkcs1v15Sha256,
                asymmetric_encryption: RsaEncryption::OaepSha1,
                min_key_bits: 2048,
                max_key_bits: 4096,
                nonce_length: 32,
            },
            Self::Aes256Sha256RsaPss => PolicyParameters {
                prf: PrfHash::Sha256,
                signing_key_length: 32,
                encryption_key_length: 32,
                asymmetric_signature: RsaSignature::PssSha256,
                asymmetric_encryption: RsaEncryption::OaepSha256,
                min_key_bits: 2048,
                max_key_bits: 4096,
                nonce_length: 32,
            },
        };
        Some(params)
    }

    /// Whether this is the no-security policy.
    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }
}

impl fmt::Display for SecurityPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.uri())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uri_lookup_roundtrip() {
        for policy in SecurityPolicy::ALL {
            assert_eq!(SecurityPolicy::from_uri(policy.uri()), Some(policy));
        }
        assert_eq!(
            SecurityPolicy::from_uri("http://opcfoundation.org/UA/SecurityPolicy#Bogus"),
            None
        );
    }

    #[test]
    fn test_key_size_windows() {
        let legacy = SecurityPolicy::Basic256.parameters().unwrap();
        assert_eq!((legacy.min_key_bits, legacy.max_key_bits), (1024, 2048));

        let modern = SecurityPolicy::Basic256Sha256.parameters().unwrap();
        assert_eq!((modern.min_key_bits, modern.max_key_bits), (2048, 4096));
    }

    #[test]
    fn test_none_has_no_parameters() {
        assert!(SecurityPolicy::None.parameters().is_none());
        assert!(SecurityPolicy::None.is_none());
    }
}
