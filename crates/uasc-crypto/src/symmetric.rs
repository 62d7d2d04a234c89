//! # Symmetric Primitives
//!
//! AES-CBC and HMAC keyed from the derived channel keys.
//!
//! The cipher runs without padding: the secure channel framing pads every
//! message to a whole number of blocks before encryption.

use crate::algorithm::{Decryptor, Encryptor, Signer, Verifier};
use crate::kdf::PrfHash;
use crate::policy::AES_BLOCK_SIZE;
use crate::CryptoError;
use aes::cipher::{block_padding::NoPadding, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use aes::{Aes128, Aes256};
use zeroize::Zeroizing;

type Aes128CbcEnc = cbc::Encryptor<Aes128>;
type Aes128CbcDec = cbc::Decryptor<Aes128>;
type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;

/// AES-CBC with a fixed key and IV.
pub struct AesCbc {
    key: Zeroizing<Vec<u8>>,
    iv: Zeroizing<Vec<u8>>,
}

impl AesCbc {
    /// Create a cipher from a 16 or 32 byte key and a 16 byte IV.
    ///
    /// # Errors
    ///
    /// Returns `CryptoError::InvalidKeyLength` for other key or IV sizes.
    pub fn new(key: &[u8], iv: &[u8]) -> Result<Self, CryptoError> {
        if key.len() != 16 && key.len() != 32 {
            return Err(CryptoError::InvalidKeyLength {
                expected: 32,
                actual: key.len(),
            });
        }
        if iv.len() != AES_BLOCK_SIZE {
            return Err(CryptoError::InvalidKeyLength {
                expected: AES_BLOCK_SIZE,
                actual: iv.len(),
            });
        }
        Ok(Self {
            key: Zeroizing::new(key.to_vec()),
            iv: Zeroizing::new(iv.to_vec()),
        })
    }

    fn check_aligned(data: &[u8]) -> Result<(), CryptoError> {
        if data.len() % AES_BLOCK_SIZE != 0 {
            return Err(CryptoError::UnalignedInput {
                len: data.len(),
                block_size: AES_BLOCK_SIZE,
            });
        }
        Ok(())
    }
}

impl Encryptor for AesCbc {
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        Self::check_aligned(plaintext)?;
        let invalid = |e: aes::cipher::InvalidLength| CryptoError::EncryptionFailed(e.to_string());

        let ciphertext = if self.key.len() == 16 {
            Aes128CbcEnc::new_from_slices(&self.key, &self.iv)
                .map_err(invalid)?
                .encrypt_padded_vec_mut::<NoPadding>(plaintext)
        } else {
            Aes256CbcEnc::new_from_slices(&self.key, &self.iv)
                .map_err(invalid)?
                .encrypt_padded_vec_mut::<NoPadding>(plaintext)
        };
        Ok(ciphertext)
    }

    fn block_size(&self) -> usize {
        AES_BLOCK_SIZE
    }

    fn plaintext_block_size(&self) -> usize {
        AES_BLOCK_SIZE
    }
}

impl Decryptor for AesCbc {
    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        Self::check_aligned(ciphertext)?;
        let invalid = |e: aes::cipher::InvalidLength| CryptoError::DecryptionFailed(e.to_string());

        let plaintext = if self.key.len() == 16 {
            Aes128CbcDec::new_from_slices(&self.key, &self.iv)
                .map_err(invalid)?
                .decrypt_padded_vec_mut::<NoPadding>(ciphertext)
        } else {
            Aes256CbcDec::new_from_slices(&self.key, &self.iv)
                .map_err(invalid)?
                .decrypt_padded_vec_mut::<NoPadding>(ciphertext)
        };
        plaintext.map_err(|e| CryptoError::DecryptionFailed(e.to_string()))
    }

    fn block_size(&self) -> usize {
        AES_BLOCK_SIZE
    }
}

/// HMAC signing and verification with a derived key.
pub struct HmacSigner {
    prf: PrfHash,
    key: Zeroizing<Vec<u8>>,
}

impl HmacSigner {
    /// Create a MAC for `key`.
    pub fn new(prf: PrfHash, key: &[u8]) -> Self {
        Self {
            prf,
            key: Zeroizing::new(key.to_vec()),
        }
    }
}

impl Signer for HmacSigner {
    fn sign(&self, message: &[u8]) -> Result<Vec<u8>, CryptoError> {
        self.prf.hmac(&self.key, &[message])
    }

    fn signature_length(&self) -> usize {
        self.prf.output_len()
    }
}

impl Verifier for HmacSigner {
    fn verify(&self, message: &[u8], signature: &[u8]) -> Result<(), CryptoError> {
        if self.prf.verify(&self.key, message, signature) {
            Ok(())
        } else {
            Err(CryptoError::SignatureVerificationFailed)
        }
    }

    fn signature_length(&self) -> usize {
        self.prf.output_len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        for key_len in [16, 32] {
            let cipher = AesCbc::new(&vec![7u8; key_len], &[1u8; 16]).unwrap();
            let plaintext = [42u8; 64];

            let ciphertext = Encryptor::encrypt(&cipher, &plaintext).unwrap();
            assert_ne!(ciphertext, plaintext);
            assert_eq!(Decryptor::decrypt(&cipher, &ciphertext).unwrap(), plaintext);
        }
    }

    #[test]
    fn test_wrong_key_fails() {
        let a = AesCbc::new(&[1u8; 32], &[0u8; 16]).unwrap();
        let b = AesCbc::new(&[2u8; 32], &[0u8; 16]).unwrap();

        let ciphertext = Encryptor::encrypt(&a, &[9u8; 32]).unwrap();
        assert_ne!(Decryptor::decrypt(&b, &ciphertext).unwrap(), [9u8; 32]);
    }

    #[test]
    fn test_unaligned_input_rejected() {
        let cipher = AesCbc::new(&[1u8; 16], &[0u8; 16]).unwrap();
        assert!(matches!(
            Encryptor::encrypt(&cipher, &[0u8; 15]),
            Err(CryptoError::UnalignedInput { .. })
        ));
    }

    #[test]
    fn test_invalid_key_length() {
        assert!(matches!(
            AesCbc::new(&[0u8; 24], &[0u8; 16]),
            Err(CryptoError::InvalidKeyLength { .. })
        ));
    }

    #[test]
    fn test_hmac_sign_verify() {
        let mac = HmacSigner::new(PrfHash::Sha1, b"signing-key");
        let signature = mac.sign(b"message").unwrap();

        assert_eq!(signature.len(), Signer::signature_length(&mac));
        assert!(mac.verify(b"message", &signature).is_ok());
        assert!(mac.verify(b"massage", &signature).is_err());
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn aes_roundtrip_any_block_count(
                key in prop::collection::vec(any::<u8>(), 32),
                iv in prop::array::uniform16(any::<u8>()),
                blocks in prop::collection::vec(prop::array::uniform16(any::<u8>()), 0..16)
            ) {
                let cipher = AesCbc::new(&key, &iv).unwrap();
                let plaintext: Vec<u8> = blocks.concat();
                let ciphertext = Encryptor::encrypt(&cipher, &plaintext).unwrap();
                prop_assert_eq!(Decryptor::decrypt(&cipher, &ciphertext).unwrap(), plaintext);
            }

            #[test]
            fn hmac_detects_any_bit_flip(
                message in prop::collection::vec(any::<u8>(), 1..256),
                bit in any::<usize>()
            ) {
                let mac = HmacSigner::new(PrfHash::Sha256, b"key");
                let signature = mac.sign(&message).unwrap();

                let mut tampered = message.clone();
                let bit = bit % (tampered.len() * 8);
                tampered[bit / 8] ^= 1 << (bit % 8);
                prop_assert!(mac.verify(&tampered, &signature).is_err());
            }
        }
    }
}
