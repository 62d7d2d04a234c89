//! # Asymmetric Primitives
//!
//! RSA encryption and signatures used to secure OpenSecureChannel messages.
//! Inputs larger than one RSA block are split into blocks transparently.

use crate::algorithm::{Decryptor, Encryptor, Signer, Verifier};
use crate::CryptoError;
use rsa::traits::PublicKeyParts;
use rsa::{Oaep, Pkcs1v15Encrypt, Pkcs1v15Sign, Pss, RsaPrivateKey, RsaPublicKey};
use sha1::Sha1;
use sha2::{Digest, Sha256};

/// RSA encryption padding scheme.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RsaEncryption {
    /// RSAES-PKCS1-v1_5
    Pkcs1v15,
    /// RSAES-OAEP with SHA-1
    OaepSha1,
    /// RSAES-OAEP with SHA-256
    OaepSha256,
}

impl RsaEncryption {
    /// Bytes of each RSA block consumed by padding.
    pub fn overhead(&self) -> usize {
        match self {
            Self::Pkcs1v15 => 11,
            Self::OaepSha1 => 42,
            Self::OaepSha256 => 66,
        }
    }
}

/// RSA signature scheme.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RsaSignature {
    /// RSASSA-PKCS1-v1_5 over SHA-1
    Pkcs1v15Sha1,
    /// RSASSA-PKCS1-v1_5 over SHA-256
    Pkcs1v15Sha256,
    /// RSASSA-PSS over SHA-256
    PssSha256,
}

impl RsaSignature {
    fn digest(&self, message: &[u8]) -> Vec<u8> {
        match self {
            Self::Pkcs1v15Sha1 => Sha1::digest(message).to_vec(),
            Self::Pkcs1v15Sha256 | Self::PssSha256 => Sha256::digest(message).to_vec(),
        }
    }
}

/// Modulus size of a public key in bits.
pub fn key_bits(key: &RsaPublicKey) -> usize {
    key.size() * 8
}

/// Encrypts with the peer's public key.
pub struct RsaEncryptor {
    scheme: RsaEncryption,
    key: RsaPublicKey,
}

impl RsaEncryptor {
    /// Create an encryptor for `key`.
    pub fn new(scheme: RsaEncryption, key: RsaPublicKey) -> Self {
        Self { scheme, key }
    }
}

impl Encryptor for RsaEncryptor {
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let block = self.plaintext_block_size();
        let mut rng = rand::thread_rng();
        let mut out = Vec::with_capacity(plaintext.len().div_ceil(block.max(1)) * self.block_size());

        for chunk in plaintext.chunks(block) {
            let encrypted = match self.scheme {
                RsaEncryption::Pkcs1v15 => self.key.encrypt(&mut rng, Pkcs1v15Encrypt, chunk),
                RsaEncryption::OaepSha1 => self.key.encrypt(&mut rng, Oaep::new::<Sha1>(), chunk),
                RsaEncryption::OaepSha256 => {
                    self.key.encrypt(&mut rng, Oaep::new::<Sha256>(), chunk)
                }
            }
            .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;
            out.extend_from_slice(&encrypted);
        }

        Ok(out)
    }

    fn block_size(&self) -> usize {
        self.key.size()
    }

    fn plaintext_block_size(&self) -> usize {
        self.key.size() - self.scheme.overhead()
    }
}

/// Decrypts with the local private key.
pub struct RsaDecryptor {
    scheme: RsaEncryption,
    key: RsaPrivateKey,
}

impl RsaDecryptor {
    /// Create a decryptor for `key`.
    pub fn new(scheme: RsaEncryption, key: RsaPrivateKey) -> Self {
        Self { scheme, key }
    }
}

impl Decryptor for RsaDecryptor {
    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let block = self.block_size();
        if ciphertext.len() % block != 0 {
            return Err(CryptoError::UnalignedInput {
                len: ciphertext.len(),
                block_size: block,
            });
        }

        let mut out = Vec::with_capacity(ciphertext.len());
        for chunk in ciphertext.chunks(block) {
            let decrypted = match self.scheme {
                RsaEncryption::Pkcs1v15 => self.key.decrypt(Pkcs1v15Encrypt, chunk),
                RsaEncryption::OaepSha1 => self.key.decrypt(Oaep::new::<Sha1>(), chunk),
                RsaEncryption::OaepSha256 => self.key.decrypt(Oaep::new::<Sha256>(), chunk),
            }
            .map_err(|e| CryptoError::DecryptionFailed(e.to_string()))?;
            out.extend_from_slice(&decrypted);
        }

        Ok(out)
    }

    fn block_size(&self) -> usize {
        self.key.size()
    }
}

/// Signs with the local private key.
pub struct RsaSigner {
    scheme: RsaSignature,
    key: RsaPrivateKey,
}

impl RsaSigner {
    /// Create a signer for `key`.
    pub fn new(scheme: RsaSignature, key: RsaPrivateKey) -> Self {
        Self { scheme, key }
    }
}

impl Signer for RsaSigner {
    fn sign(&self, message: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let hashed = self.scheme.digest(message);
        match self.scheme {
            RsaSignature::Pkcs1v15Sha1 => self.key.sign(Pkcs1v15Sign::new::<Sha1>(), &hashed),
            RsaSignature::Pkcs1v15Sha256 => self.key.sign(Pkcs1v15Sign::new::<Sha256>(), &hashed),
            RsaSignature::PssSha256 => {
                self.key
                    .sign_with_rng(&mut rand::thread_rng(), Pss::new::<Sha256>(), &hashed)
            }
        }
        .map_err(|e| CryptoError::SigningFailed(e.to_string()))
    }

    fn signature_length(&self) -> usize {
        self.key.size()
    }
}

/// Verifies with the peer's public key.
pub struct RsaVerifier {
    scheme: RsaSignature,
    key: RsaPublicKey,
}

impl RsaVerifier {
    /// Create a verifier for `key`.
    pub fn new(scheme: RsaSignature, key: RsaPublicKey) -> Self {
        Self { scheme, key }
    }
}

impl Verifier for RsaVerifier {
    fn verify(&self, message: &[u8], signature: &[u8]) -> Result<(), CryptoError> {
        let hashed = self.scheme.digest(message);
        match self.scheme {
            RsaSignature::Pkcs1v15Sha1 => {
                self.key
                    .verify(Pkcs1v15Sign::new::<Sha1>(), &hashed, signature)
            }
            RsaSignature::Pkcs1v15Sha256 => {
                self.key
                    .verify(Pkcs1v15Sign::new::<Sha256>(), &hashed, signature)
            }
            RsaSignature::PssSha256 => self.key.verify(Pss::new::<Sha256>(), &hashed, signature),
        }
        .map_err(|_| CryptoError::SignatureVerificationFailed)
    }

    fn signature_length(&self) -> usize {
        self.key.size()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::rsa_key;

    #[test]
    fn test_multi_block_roundtrip() {
        let key = rsa_key(1024);
        let enc = RsaEncryptor::new(RsaEncryption::OaepSha1, key.to_public_key());
        let dec = RsaDecryptor::new(RsaEncryption::OaepSha1, key.clone());

        // three and a half plaintext blocks
        let plaintext: Vec<u8> = (0..(enc.plaintext_block_size() * 7 / 2))
            .map(|i| i as u8)
            .collect();
        let ciphertext = enc.encrypt(&plaintext).unwrap();

        assert_eq!(ciphertext.len(), 4 * enc.block_size());
        assert_eq!(dec.decrypt(&ciphertext).unwrap(), plaintext);
    }

    #[test]
    fn test_empty_plaintext() {
        let key = rsa_key(1024);
        let enc = RsaEncryptor::new(RsaEncryption::Pkcs1v15, key.to_public_key());
        let dec = RsaDecryptor::new(RsaEncryption::Pkcs1v15, key.clone());

        let ciphertext = enc.encrypt(&[]).unwrap();
        assert!(ciphertext.is_empty());
        assert!(dec.decrypt(&ciphertext).unwrap().is_empty());
    }

    #[test]
    fn test_unaligned_ciphertext_rejected() {
        let key = rsa_key(1024);
        let dec = RsaDecryptor::new(RsaEncryption::Pkcs1v15, key.clone());
        assert!(matches!(
            dec.decrypt(&[0u8; 100]),
            Err(CryptoError::UnalignedInput { .. })
        ));
    }

    #[test]
    fn test_signature_schemes() {
        let key = rsa_key(2048);
        for scheme in [
            RsaSignature::Pkcs1v15Sha1,
            RsaSignature::Pkcs1v15Sha256,
            RsaSignature::PssSha256,
        ] {
            let signer = RsaSigner::new(scheme, key.clone());
            let verifier = RsaVerifier::new(scheme, key.to_public_key());

            let signature = signer.sign(b"open secure channel").unwrap();
            assert_eq!(signature.len(), signer.signature_length());
            assert!(verifier.verify(b"open secure channel", &signature).is_ok());
            assert!(verifier.verify(b"open secure channel!", &signature).is_err());
        }
    }
}
