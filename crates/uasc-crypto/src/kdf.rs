//! # Key Derivation
//!
//! P_SHA pseudorandom stretch (RFC 2246 style) used to turn the two channel
//! nonces into symmetric signing key, encryption key and IV.

use crate::CryptoError;
use hmac::{Hmac, Mac};
use sha1::Sha1;
use sha2::Sha256;
use zeroize::Zeroizing;

type HmacSha1 = Hmac<Sha1>;
type HmacSha256 = Hmac<Sha256>;

/// Hash function driving both the PRF and the symmetric MAC.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PrfHash {
    /// HMAC-SHA1 (20 byte output)
    Sha1,
    /// HMAC-SHA256 (32 byte output)
    Sha256,
}

impl PrfHash {
    /// MAC output length in bytes.
    pub fn output_len(&self) -> usize {
        match self {
            Self::Sha1 => 20,
            Self::Sha256 => 32,
        }
    }

    /// Keyed hash over the concatenation of `parts`.
    ///
    /// # Errors
    ///
    /// Returns `CryptoError::SigningFailed` if the MAC rejects the key.
    pub fn hmac(&self, key: &[u8], parts: &[&[u8]]) -> Result<Vec<u8>, CryptoError> {
        let invalid = |e: hmac::digest::InvalidLength| CryptoError::SigningFailed(e.to_string());
        match self {
            Self::Sha1 => {
                let mut mac = <HmacSha1 as Mac>::new_from_slice(key).map_err(invalid)?;
                for part in parts {
                    mac.update(part);
                }
                Ok(mac.finalize().into_bytes().to_vec())
            }
            Self::Sha256 => {
                let mut mac = <HmacSha256 as Mac>::new_from_slice(key).map_err(invalid)?;
                for part in parts {
                    mac.update(part);
                }
                Ok(mac.finalize().into_bytes().to_vec())
            }
        }
    }

    /// Constant-time MAC check.
    pub fn verify(&self, key: &[u8], message: &[u8], tag: &[u8]) -> bool {
        match self {
            Self::Sha1 => <HmacSha1 as Mac>::new_from_slice(key)
                .map(|mut mac| {
                    mac.update(message);
                    mac.verify_slice(tag).is_ok()
                })
                .unwrap_or(false),
            Self::Sha256 => <HmacSha256 as Mac>::new_from_slice(key)
                .map(|mut mac| {
                    mac.update(message);
                    mac.verify_slice(tag).is_ok()
                })
                .unwrap_or(false),
        }
    }
}

/// Key material for one direction of a channel.
#[derive(Clone)]
pub struct DerivedKeys {
    /// MAC key
    pub signing_key: Zeroizing<Vec<u8>>,
    /// Block cipher key
    pub encryption_key: Zeroizing<Vec<u8>>,
    /// CBC initialization vector
    pub iv: Zeroizing<Vec<u8>>,
}

impl std::fmt::Debug for DerivedKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DerivedKeys")
            .field("signing_key_len", &self.signing_key.len())
            .field("encryption_key_len", &self.encryption_key.len())
            .field("iv_len", &self.iv.len())
            .finish()
    }
}

/// Derive signing key, encryption key and IV from `secret` and `seed`.
///
/// `A(0) = seed`, `A(i) = HMAC(secret, A(i-1))`, output is
/// `HMAC(secret, A(1) ++ seed) ++ HMAC(secret, A(2) ++ seed) ++ ...` until
/// `signing_length + encrypting_length + block_size` bytes are available.
/// The three keys are sliced out in that order.
///
/// # Errors
///
/// Propagates MAC construction failures.
pub fn derive_keys(
    prf: PrfHash,
    secret: &[u8],
    seed: &[u8],
    signing_length: usize,
    encrypting_length: usize,
    block_size: usize,
) -> Result<DerivedKeys, CryptoError> {
    let total = signing_length + encrypting_length + block_size;
    let mut stream = Zeroizing::new(Vec::with_capacity(total + prf.output_len()));
    let mut a = prf.hmac(secret, &[seed])?;

    while stream.len() < total {
        stream.extend_from_slice(&prf.hmac(secret, &[&a, seed])?);
        a = prf.hmac(secret, &[&a])?;
    }

    let (signing, rest) = stream.split_at(signing_length);
    let (encryption, rest) = rest.split_at(encrypting_length);

    Ok(DerivedKeys {
        signing_key: Zeroizing::new(signing.to_vec()),
        encryption_key: Zeroizing::new(encryption.to_vec()),
        iv: Zeroizing::new(rest[..block_size].to_vec()),
    })
}
