//! X.509 helpers: RSA key extraction and SHA-1 thumbprints.

use crate::CryptoError;
use rsa::pkcs8::DecodePublicKey;
use rsa::RsaPublicKey;
use sha1::{Digest, Sha1};
use x509_cert::der::{Decode, Encode};
use x509_cert::Certificate;

/// Length of a certificate thumbprint in bytes.
pub const THUMBPRINT_LENGTH: usize = 20;

/// RSA public key of a DER-encoded certificate.
///
/// # Errors
///
/// Returns `CryptoError::InvalidCertificate` if the certificate cannot be
/// parsed or does not carry an RSA key.
pub fn public_key(der: &[u8]) -> Result<RsaPublicKey, CryptoError> {
    let cert =
        Certificate::from_der(der).map_err(|e| CryptoError::InvalidCertificate(e.to_string()))?;
    let spki = cert
        .tbs_certificate
        .subject_public_key_info
        .to_der()
        .map_err(|e| CryptoError::InvalidCertificate(e.to_string()))?;
    RsaPublicKey::from_public_key_der(&spki)
        .map_err(|e| CryptoError::InvalidCertificate(e.to_string()))
}

/// SHA-1 digest of a DER-encoded certificate.
pub fn thumbprint(der: &[u8]) -> [u8; THUMBPRINT_LENGTH] {
    Sha1::digest(der).into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{rsa_key, self_signed_certificate};

    #[test]
    fn test_public_key_matches_private_key() {
        let key = rsa_key(1024);
        let der = self_signed_certificate(&key);

        assert_eq!(public_key(&der).unwrap(), key.to_public_key());
    }

    #[test]
    fn test_garbage_rejected() {
        assert!(matches!(
            public_key(b"not a certificate"),
            Err(CryptoError::InvalidCertificate(_))
        ));
    }

    #[test]
    fn test_thumbprint_is_sha1() {
        let digest = thumbprint(b"abc");
        assert_eq!(
            digest[..4],
            [0xa9, 0x99, 0x3e, 0x36],
            "SHA-1(\"abc\") starts with a9993e36"
        );
    }
}
