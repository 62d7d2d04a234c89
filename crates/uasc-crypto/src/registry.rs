//! # Policy Registry
//!
//! Maps security policy URIs to the providers that build algorithm bundles.
//! The registry is a plain value: each channel may hold its own, and tests
//! can register synthetic providers next to the built-in ones.

use crate::algorithm::SecurityAlgorithm;
use crate::asymmetric::{key_bits, RsaDecryptor, RsaEncryptor, RsaSigner, RsaVerifier};
use crate::kdf::derive_keys;
use crate::policy::{PolicyParameters, SecurityPolicy, AES_BLOCK_SIZE};
use crate::symmetric::{AesCbc, HmacSigner};
use crate::CryptoError;
use rsa::{RsaPrivateKey, RsaPublicKey};
use std::collections::HashMap;
use std::sync::Arc;

/// Builds algorithm bundles for one security policy.
pub trait PolicyProvider: Send + Sync {
    /// Policy URI served by this provider.
    fn uri(&self) -> &str;

    /// Nonce length exchanged during Open/Renew.
    fn nonce_length(&self) -> usize;

    /// Bundle for the Open handshake, keyed by certificates.
    fn asymmetric(
        &self,
        local_key: Option<&RsaPrivateKey>,
        remote_key: Option<&RsaPublicKey>,
    ) -> Result<SecurityAlgorithm, CryptoError>;

    /// Bundle for regular traffic, keyed by the two exchanged nonces.
    fn symmetric(
        &self,
        local_nonce: &[u8],
        remote_nonce: &[u8],
    ) -> Result<SecurityAlgorithm, CryptoError>;
}

/// Provider for one of the built-in policies.
#[derive(Debug, Clone, Copy)]
pub struct StandardPolicy {
    policy: SecurityPolicy,
}

impl StandardPolicy {
    /// Provider for `policy`.
    pub fn new(policy: SecurityPolicy) -> Self {
        Self { policy }
    }

    /// The wrapped policy.
    pub fn policy(&self) -> SecurityPolicy {
        self.policy
    }

    fn check_key_size(&self, params: &PolicyParameters, bits: usize) -> Result<(), CryptoError> {
        if bits < params.min_key_bits || bits > params.max_key_bits {
            return Err(CryptoError::KeySizeOutOfRange {
                policy: self.policy.uri().to_string(),
                bits,
                min: params.min_key_bits,
                max: params.max_key_bits,
            });
        }
        Ok(())
    }

    fn check_nonce(params: &PolicyParameters, nonce: &[u8]) -> Result<(), CryptoError> {
        if nonce.len() != params.nonce_length {
            return Err(CryptoError::InvalidNonceLength {
                expected: params.nonce_length,
                actual: nonce.len(),
            });
        }
        Ok(())
    }
}

impl PolicyProvider for StandardPolicy {
    fn uri(&self) -> &str {
        self.policy.uri()
    }

    fn nonce_length(&self) -> usize {
        self.policy.parameters().map_or(0, |p| p.nonce_length)
    }

    fn asymmetric(
        &self,
        local_key: Option<&RsaPrivateKey>,
        remote_key: Option<&RsaPublicKey>,
    ) -> Result<SecurityAlgorithm, CryptoError> {
        let Some(params) = self.policy.parameters() else {
            return Ok(SecurityAlgorithm::none(self.policy.uri()));
        };

        let local = local_key.ok_or(CryptoError::MissingKey("local private key"))?;
        let remote = remote_key.ok_or(CryptoError::MissingKey("remote public key"))?;
        self.check_key_size(&params, key_bits(&local.to_public_key()))?;
        self.check_key_size(&params, key_bits(remote))?;

        Ok(SecurityAlgorithm::new(
            self.policy.uri(),
            params.nonce_length,
            Box::new(RsaEncryptor::new(params.asymmetric_encryption, remote.clone())),
            Box::new(RsaDecryptor::new(params.asymmetric_encryption, local.clone())),
            Box::new(RsaSigner::new(params.asymmetric_signature, local.clone())),
            Box::new(RsaVerifier::new(params.asymmetric_signature, remote.clone())),
        ))
    }

    fn symmetric(
        &self,
        local_nonce: &[u8],
        remote_nonce: &[u8],
    ) -> Result<SecurityAlgorithm, CryptoError> {
        let Some(params) = self.policy.parameters() else {
            return Ok(SecurityAlgorithm::none(self.policy.uri()));
        };
        Self::check_nonce(&params, local_nonce)?;
        Self::check_nonce(&params, remote_nonce)?;

        let derive = |secret: &[u8], seed: &[u8]| {
            derive_keys(
                params.prf,
                secret,
                seed,
                params.signing_key_length,
                params.encryption_key_length,
                AES_BLOCK_SIZE,
            )
        };
        // Outgoing keys are seeded by our nonce, incoming by the peer's.
        let local = derive(remote_nonce, local_nonce)?;
        let remote = derive(local_nonce, remote_nonce)?;

        Ok(SecurityAlgorithm::new(
            self.policy.uri(),
            0,
            Box::new(AesCbc::new(&local.encryption_key, &local.iv)?),
            Box::new(AesCbc::new(&remote.encryption_key, &remote.iv)?),
            Box::new(HmacSigner::new(params.prf, &local.signing_key)),
            Box::new(HmacSigner::new(params.prf, &remote.signing_key)),
        ))
    }
}

/// Lookup table from policy URI to provider.
#[derive(Clone)]
pub struct PolicyRegistry {
    providers: HashMap<String, Arc<dyn PolicyProvider>>,
}

impl PolicyRegistry {
    /// An empty registry.
    pub fn empty() -> Self {
        Self {
            providers: HashMap::new(),
        }
    }

    /// Add or replace the provider for its URI.
    pub fn register(&mut self, provider: Arc<dyn PolicyProvider>) {
        self.providers.insert(provider.uri().to_string(), provider);
    }

    /// Provider for `uri`.
    ///
    /// # Errors
    ///
    /// Returns `CryptoError::UnsupportedPolicy` if nothing is registered.
    pub fn get(&self, uri: &str) -> Result<Arc<dyn PolicyProvider>, CryptoError> {
        self.providers
            .get(uri)
            .cloned()
            .ok_or_else(|| CryptoError::UnsupportedPolicy(uri.to_string()))
    }

    /// Whether `uri` is registered.
    pub fn contains(&self, uri: &str) -> bool {
        self.providers.contains_key(uri)
    }

    /// Asymmetric bundle for `uri`.
    pub fn asymmetric(
        &self,
        uri: &str,
        local_key: Option<&RsaPrivateKey>,
        remote_key: Option<&RsaPublicKey>,
    ) -> Result<SecurityAlgorithm, CryptoError> {
        self.get(uri)?.asymmetric(local_key, remote_key)
    }

    /// Symmetric bundle for `uri`.
    pub fn symmetric(
        &self,
        uri: &str,
        local_nonce: &[u8],
        remote_nonce: &[u8],
    ) -> Result<SecurityAlgorithm, CryptoError> {
        self.get(uri)?.symmetric(local_nonce, remote_nonce)
    }
}

impl Default for PolicyRegistry {
    /// Registry holding every built-in policy.
    fn default() -> Self {
        let mut registry = Self::empty();
        for policy in SecurityPolicy::ALL {
            registry.register(Arc::new(StandardPolicy::new(policy)));
        }
        registry
    }
}

impl std::fmt::Debug for PolicyRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut uris: Vec<_> = self.providers.keys().collect();
        uris.sort();
        f.debug_struct("PolicyRegistry").field("uris", &uris).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{peer_rsa_key, rsa_key};
    use rand::RngCore;

    fn nonce(len: usize) -> Vec<u8> {
        let mut nonce = vec![0u8; len];
        rand::thread_rng().fill_bytes(&mut nonce);
        nonce
    }

    fn keys_for(policy: SecurityPolicy) -> (RsaPrivateKey, RsaPrivateKey) {
        let bits = policy.parameters().map_or(2048, |p| p.min_key_bits.max(1024));
        (rsa_key(bits), peer_rsa_key(bits))
    }

    #[test]
    fn test_default_registry_has_all_policies() {
        let registry = PolicyRegistry::default();
        for policy in SecurityPolicy::ALL {
            assert!(registry.contains(policy.uri()));
        }
        assert!(matches!(
            registry.get("urn:bogus").err(),
            Some(CryptoError::UnsupportedPolicy(_))
        ));
    }

    #[test]
    fn test_asymmetric_roundtrip_every_policy() {
        let registry = PolicyRegistry::default();
        for policy in SecurityPolicy::ALL.into_iter().skip(1) {
            let (client, server) = keys_for(policy);
            let client_alg = registry
                .asymmetric(policy.uri(), Some(&client), Some(&server.to_public_key()))
                .unwrap();
            let server_alg = registry
                .asymmetric(policy.uri(), Some(&server), Some(&client.to_public_key()))
                .unwrap();

            for len in [0, 1, client_alg.plaintext_block_size() + 5, 600] {
                let plaintext = vec![0x5A; len];
                let ciphertext = client_alg.encrypt(&plaintext).unwrap();
                assert_eq!(server_alg.decrypt(&ciphertext).unwrap(), plaintext, "{policy}");
            }

            let mut signature = client_alg.sign(b"hello").unwrap();
            assert_eq!(signature.len(), server_alg.remote_signature_length());
            assert!(server_alg.verify_signature(b"hello", &signature).is_ok());
            signature[3] ^= 0x10;
            assert!(server_alg.verify_signature(b"hello", &signature).is_err());
        }
    }

    #[test]
    fn test_symmetric_cross_pairing_every_policy() {
        let registry = PolicyRegistry::default();
        for policy in SecurityPolicy::ALL.into_iter().skip(1) {
            let len = policy.parameters().unwrap().nonce_length;
            let (client_nonce, server_nonce) = (nonce(len), nonce(len));

            let client = registry
                .symmetric(policy.uri(), &client_nonce, &server_nonce)
                .unwrap();
            let server = registry
                .symmetric(policy.uri(), &server_nonce, &client_nonce)
                .unwrap();

            let plaintext = vec![7u8; 48];
            assert_eq!(server.decrypt(&client.encrypt(&plaintext).unwrap()).unwrap(), plaintext);
            assert_eq!(client.decrypt(&server.encrypt(&plaintext).unwrap()).unwrap(), plaintext);

            let mut message = b"symmetric message".to_vec();
            let signature = server.sign(&message).unwrap();
            assert!(client.verify_signature(&message, &signature).is_ok());
            message[0] ^= 0x01;
            assert!(client.verify_signature(&message, &signature).is_err());
        }
    }

    #[test]
    fn test_key_size_outside_window_rejected() {
        let registry = PolicyRegistry::default();
        let small = rsa_key(1024);
        let peer = peer_rsa_key(2048);

        let err = registry
            .asymmetric(
                SecurityPolicy::Basic256Sha256.uri(),
                Some(&small),
                Some(&peer.to_public_key()),
            )
            .unwrap_err();
        assert!(matches!(
            err,
            CryptoError::KeySizeOutOfRange {
                bits: 1024,
                min: 2048,
                ..
            }
        ));
    }

    #[test]
    fn test_missing_key_rejected() {
        let registry = PolicyRegistry::default();
        assert!(matches!(
            registry.asymmetric(SecurityPolicy::Basic256.uri(), None, None),
            Err(CryptoError::MissingKey(_))
        ));
    }

    #[test]
    fn test_wrong_nonce_length_rejected() {
        let registry = PolicyRegistry::default();
        assert!(matches!(
            registry.symmetric(SecurityPolicy::Basic256.uri(), &[0u8; 16], &[0u8; 32]),
            Err(CryptoError::InvalidNonceLength { expected: 32, actual: 16 })
        ));
    }

    #[test]
    fn test_none_policy_needs_no_material() {
        let registry = PolicyRegistry::default();
        let asym = registry
            .asymmetric(SecurityPolicy::None.uri(), None, None)
            .unwrap();
        let sym = registry.symmetric(SecurityPolicy::None.uri(), &[], &[]).unwrap();

        assert_eq!(asym.signature_length(), 0);
        assert_eq!(sym.encrypt(b"plain").unwrap(), b"plain");
    }

    struct Fake;

    impl PolicyProvider for Fake {
        fn uri(&self) -> &str {
            "urn:test:fake"
        }

        fn nonce_length(&self) -> usize {
            0
        }

        fn asymmetric(
            &self,
            _: Option<&RsaPrivateKey>,
            _: Option<&RsaPublicKey>,
        ) -> Result<SecurityAlgorithm, CryptoError> {
            Ok(SecurityAlgorithm::none(self.uri()))
        }

        fn symmetric(&self, _: &[u8], _: &[u8]) -> Result<SecurityAlgorithm, CryptoError> {
            Ok(SecurityAlgorithm::none(self.uri()))
        }
    }

    #[test]
    fn test_injected_provider() {
        let mut registry = PolicyRegistry::empty();
        registry.register(Arc::new(Fake));

        assert!(registry.contains("urn:test:fake"));
        assert!(!registry.contains(SecurityPolicy::None.uri()));
        assert_eq!(
            registry.symmetric("urn:test:fake", &[], &[]).unwrap().uri(),
            "urn:test:fake"
        );
    }
}
