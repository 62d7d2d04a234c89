//! # UASC Crypto - Secure Channel Cryptography
//!
//! Algorithm bundles for the OPC UA secure conversation layer.
//!
//! ## Components
//!
//! | Module | Algorithm | Use Case |
//! |--------|-----------|----------|
//! | `policy` | Policy table | URI lookup, key size windows, nonce lengths |
//! | `kdf` | P_SHA1 / P_SHA256 | Symmetric key derivation from nonces |
//! | `asymmetric` | RSA PKCS#1 v1.5, OAEP, PSS | OpenSecureChannel handshake |
//! | `symmetric` | AES-CBC, HMAC | Regular channel traffic |
//! | `registry` | URI -> provider | Builds bundles, accepts injected policies |
//! | `certificate` | X.509, SHA-1 | Peer key extraction and thumbprints |
//!
//! ## Security Properties
//!
//! - **Key windows**: bundles refuse keys outside the policy's declared size
//! - **Derived keys**: zeroized on drop
//! - **MAC checks**: constant-time comparison

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod algorithm;
pub mod asymmetric;
pub mod certificate;
pub mod errors;
pub mod kdf;
pub mod policy;
pub mod registry;
pub mod symmetric;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

// Re-exports
pub use algorithm::{Decryptor, Encryptor, SecurityAlgorithm, Signer, Verifier};
pub use certificate::{public_key, thumbprint, THUMBPRINT_LENGTH};
pub use errors::CryptoError;
pub use kdf::{derive_keys, DerivedKeys, PrfHash};
pub use policy::{
    SecurityPolicy, SECURITY_POLICY_URI_AES128SHA256RSAOAEP,
    SECURITY_POLICY_URI_AES256SHA256RSAPSS, SECURITY_POLICY_URI_BASIC128RSA15,
    SECURITY_POLICY_URI_BASIC256, SECURITY_POLICY_URI_BASIC256SHA256, SECURITY_POLICY_URI_NONE,
};
pub use registry::{PolicyProvider, PolicyRegistry, StandardPolicy};
pub use rsa::{RsaPrivateKey, RsaPublicKey};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    #[test]
    fn test_version() {
        assert!(!super::VERSION.is_empty());
    }
}
