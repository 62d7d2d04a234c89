//! Test fixtures: cached RSA keys and self-signed certificates.
//!
//! Key generation is slow, so each size is generated once per test binary.

#![allow(clippy::expect_used)]

use rsa::pkcs8::EncodePublicKey;
use rsa::RsaPrivateKey;
use std::sync::OnceLock;
use std::time::Duration;
use x509_cert::certificate::{Certificate, TbsCertificate, Version};
use x509_cert::der::asn1::BitString;
use x509_cert::der::{Decode, Encode};
use x509_cert::name::Name;
use x509_cert::serial_number::SerialNumber;
use x509_cert::spki::{AlgorithmIdentifierOwned, ObjectIdentifier, SubjectPublicKeyInfoOwned};
use x509_cert::time::Validity;

const SHA256_WITH_RSA: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.1.11");

static LOCAL_1024: OnceLock<RsaPrivateKey> = OnceLock::new();
static LOCAL_2048: OnceLock<RsaPrivateKey> = OnceLock::new();
static PEER_1024: OnceLock<RsaPrivateKey> = OnceLock::new();
static PEER_2048: OnceLock<RsaPrivateKey> = OnceLock::new();

fn generate(bits: usize) -> RsaPrivateKey {
    RsaPrivateKey::new(&mut rand::thread_rng(), bits).expect("rsa key generation")
}

fn cached(slot: Option<&'static OnceLock<RsaPrivateKey>>, bits: usize) -> RsaPrivateKey {
    match slot {
        Some(slot) => slot.get_or_init(|| generate(bits)).clone(),
        None => generate(bits),
    }
}

/// Local test key. 1024 and 2048 bit keys are cached.
pub fn rsa_key(bits: usize) -> RsaPrivateKey {
    let slot = match bits {
        1024 => Some(&LOCAL_1024),
        2048 => Some(&LOCAL_2048),
        _ => None,
    };
    cached(slot, bits)
}

/// A second key of the same size, distinct from [`rsa_key`].
pub fn peer_rsa_key(bits: usize) -> RsaPrivateKey {
    let slot = match bits {
        1024 => Some(&PEER_1024),
        2048 => Some(&PEER_2048),
        _ => None,
    };
    cached(slot, bits)
}

/// DER certificate carrying the public half of `key`.
///
/// The signature is a placeholder; only the subject key is meaningful.
pub fn self_signed_certificate(key: &RsaPrivateKey) -> Vec<u8> {
    let spki_der = key
        .to_public_key()
        .to_public_key_der()
        .expect("encode public key");
    let algorithm = AlgorithmIdentifierOwned {
        oid: SHA256_WITH_RSA,
        parameters: None,
    };

    let tbs_certificate = TbsCertificate {
        version: Version::V3,
        serial_number: SerialNumber::new(&[1]).expect("serial"),
        signature: algorithm.clone(),
        issuer: Name::default(),
        validity: Validity::from_now(Duration::from_secs(3600)).expect("validity"),
        subject: Name::default(),
        subject_public_key_info: SubjectPublicKeyInfoOwned::from_der(spki_der.as_bytes())
            .expect("decode spki"),
        issuer_unique_id: None,
        subject_unique_id: None,
        extensions: None,
    };

    Certificate {
        tbs_certificate,
        signature_algorithm: algorithm,
        signature: BitString::from_bytes(&[0u8; 8]).expect("signature"),
    }
    .to_der()
    .expect("encode certificate")
}

/// Key and matching certificate for one side of a test channel.
pub fn key_pair(bits: usize, peer: bool) -> (RsaPrivateKey, Vec<u8>) {
    let key = if peer { peer_rsa_key(bits) } else { rsa_key(bits) };
    let cert = self_signed_certificate(&key);
    (key, cert)
}
