//! Crypto error types.

use thiserror::Error;

/// Cryptographic operation errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CryptoError {
    /// The security policy URI is not registered
    #[error("Unsupported security policy: {0}")]
    UnsupportedPolicy(String),

    /// RSA key size outside the window declared by the policy
    #[error("Key size {bits} bits outside {policy} range {min}..={max}")]
    KeySizeOutOfRange {
        /// Policy URI the key was checked against
        policy: String,
        /// Actual modulus size in bits
        bits: usize,
        /// Minimum accepted size in bits
        min: usize,
        /// Maximum accepted size in bits
        max: usize,
    },

    /// A policy other than None was used without key material
    #[error("Missing {0} key for asymmetric security policy")]
    MissingKey(&'static str),

    /// Invalid key length
    #[error("Invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength {
        /// Expected key length in bytes
        expected: usize,
        /// Actual key length in bytes
        actual: usize,
    },

    /// Invalid nonce length
    #[error("Invalid nonce length: expected {expected}, got {actual}")]
    InvalidNonceLength {
        /// Expected nonce length in bytes
        expected: usize,
        /// Actual nonce length in bytes
        actual: usize,
    },

    /// Input is not a whole number of cipher blocks
    #[error("Input length {len} is not a multiple of block size {block_size}")]
    UnalignedInput {
        /// Input length in bytes
        len: usize,
        /// Cipher block size in bytes
        block_size: usize,
    },

    /// Encryption failed
    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    /// Decryption failed
    #[error("Decryption failed: {0}")]
    DecryptionFailed(String),

    /// Signing failed
    #[error("Signing failed: {0}")]
    SigningFailed(String),

    /// Signature verification failed
    #[error("Signature verification failed")]
    SignatureVerificationFailed,

    /// Certificate could not be parsed or holds no RSA key
    #[error("Invalid certificate: {0}")]
    InvalidCertificate(String),
}
