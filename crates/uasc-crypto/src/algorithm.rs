//! # Algorithm Bundle
//!
//! A `SecurityAlgorithm` groups the four primitives one side of a channel
//! needs: encrypt for the peer, decrypt from the peer, sign locally and
//! verify the peer's signature.

use crate::CryptoError;

/// Encrypts outgoing bytes.
pub trait Encryptor: Send + Sync {
    /// Encrypt `plaintext`.
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError>;
    /// Ciphertext block size.
    fn block_size(&self) -> usize;
    /// Plaintext bytes that fit into one ciphertext block.
    fn plaintext_block_size(&self) -> usize;
}

/// Decrypts incoming bytes.
pub trait Decryptor: Send + Sync {
    /// Decrypt `ciphertext`.
    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError>;
    /// Ciphertext block size.
    fn block_size(&self) -> usize;
}

/// Produces local signatures.
pub trait Signer: Send + Sync {
    /// Sign `message`.
    fn sign(&self, message: &[u8]) -> Result<Vec<u8>, CryptoError>;
    /// Length of produced signatures.
    fn signature_length(&self) -> usize;
}

/// Checks remote signatures.
pub trait Verifier: Send + Sync {
    /// Verify `signature` over `message`.
    fn verify(&self, message: &[u8], signature: &[u8]) -> Result<(), CryptoError>;
    /// Length of expected signatures.
    fn signature_length(&self) -> usize;
}

/// Identity primitives for the no-security policy.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoSecurity;

impl Encryptor for NoSecurity {
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        Ok(plaintext.to_vec())
    }

    fn block_size(&self) -> usize {
        1
    }

    fn plaintext_block_size(&self) -> usize {
        1
    }
}

impl Decryptor for NoSecurity {
    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        Ok(ciphertext.to_vec())
    }

    fn block_size(&self) -> usize {
        1
    }
}

impl Signer for NoSecurity {
    fn sign(&self, _message: &[u8]) -> Result<Vec<u8>, CryptoError> {
        Ok(Vec::new())
    }

    fn signature_length(&self) -> usize {
        0
    }
}

impl Verifier for NoSecurity {
    fn verify(&self, _message: &[u8], _signature: &[u8]) -> Result<(), CryptoError> {
        Ok(())
    }

    fn signature_length(&self) -> usize {
        0
    }
}

/// Cryptographic primitives for one channel direction pair.
pub struct SecurityAlgorithm {
    uri: String,
    nonce_length: usize,
    encryptor: Box<dyn Encryptor>,
    decryptor: Box<dyn Decryptor>,
    signer: Box<dyn Signer>,
    verifier: Box<dyn Verifier>,
}

impl SecurityAlgorithm {
    /// Assemble a bundle from its parts.
    pub fn new(
        uri: impl Into<String>,
        nonce_length: usize,
        encryptor: Box<dyn Encryptor>,
        decryptor: Box<dyn Decryptor>,
        signer: Box<dyn Signer>,
        verifier: Box<dyn Verifier>,
    ) -> Self {
        Self {
            uri: uri.into(),
            nonce_length,
            encryptor,
            decryptor,
            signer,
            verifier,
        }
    }

    /// Pass-through bundle used for the no-security policy.
    pub fn none(uri: impl Into<String>) -> Self {
        Self::new(
            uri,
            0,
            Box::new(NoSecurity),
            Box::new(NoSecurity),
            Box::new(NoSecurity),
            Box::new(NoSecurity),
        )
    }

    /// Policy URI this bundle implements.
    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// Nonce length required by the policy.
    pub fn nonce_length(&self) -> usize {
        self.nonce_length
    }

    /// Encrypt for the peer.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        self.encryptor.encrypt(plaintext)
    }

    /// Decrypt from the peer.
    pub fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        self.decryptor.decrypt(ciphertext)
    }

    /// Sign locally.
    pub fn sign(&self, message: &[u8]) -> Result<Vec<u8>, CryptoError> {
        self.signer.sign(message)
    }

    /// Verify the peer's signature.
    pub fn verify_signature(&self, message: &[u8], signature: &[u8]) -> Result<(), CryptoError> {
        self.verifier.verify(message, signature)
    }

    /// Ciphertext block size of outgoing messages.
    pub fn block_size(&self) -> usize {
        self.encryptor.block_size()
    }

    /// Plaintext block size of outgoing messages.
    pub fn plaintext_block_size(&self) -> usize {
        self.encryptor.plaintext_block_size()
    }

    /// Ciphertext block size of incoming messages.
    pub fn remote_block_size(&self) -> usize {
        self.decryptor.block_size()
    }

    /// Length of local signatures.
    pub fn signature_length(&self) -> usize {
        self.signer.signature_length()
    }

    /// Length of the peer's signatures.
    pub fn remote_signature_length(&self) -> usize {
        self.verifier.signature_length()
    }
}

impl std::fmt::Debug for SecurityAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecurityAlgorithm")
            .field("uri", &self.uri)
            .field("block_size", &self.block_size())
            .field("signature_length", &self.signature_length())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_none_bundle_is_identity() {
        let alg = SecurityAlgorithm::none(crate::SECURITY_POLICY_URI_NONE);

        assert_eq!(alg.encrypt(b"abc").unwrap(), b"abc");
        assert_eq!(alg.decrypt(b"abc").unwrap(), b"abc");
        assert!(alg.sign(b"abc").unwrap().is_empty());
        assert!(alg.verify_signature(b"abc", &[]).is_ok());
        assert_eq!(alg.signature_length(), 0);
        assert_eq!(alg.nonce_length(), 0);
    }
}
