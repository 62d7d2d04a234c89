//! Secure channel engine.
//!
//! `SecureChannel` owns one transport and runs the Open/Renew/Close
//! handshake on top of it. Any number of tasks may send requests
//! concurrently; a single receive loop reads frames, reassembles chunks and
//! hands responses to the waiting senders by request id.
//!
//! ```text
//!  send_request ──► send lock (seq, request id) ──► sign/encrypt ──► Transport
//!       ▲                                                               │
//!       │ oneshot                                                       ▼
//!  PendingRequests ◄── dispatch ◄── reassemble ◄── verify/decrypt ◄── receive
//!                          │
//!                          └──► unsolicited stream (ReceiveLoop)
//! ```

mod framing;
mod receive;
mod send;


pub use receive::{InboundMessage, ReceiveLoop};

use crate::codec::ServiceMessage;
use crate::domain::{
    ChannelError, ChannelState, ChunkAccumulator, ConfigError, IdCounter, MessageSecurityMode,
    PendingRequests, PendingStats, SecureChannelConfig, SequenceCounter, StateCell,
};
use crate::ports::{Transport, TransportLimits};
use parking_lot::{Mutex, RwLock};
use rand::RngCore;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uasc_crypto::{certificate, PolicyProvider, PolicyRegistry, RsaPrivateKey, SecurityAlgorithm};

/// Margin added to request timeouts so the peer's own timeout handling
/// answers first.
pub const TIMEOUT_LENIENCY: Duration = Duration::from_millis(250);

/// Symmetric keys of one security token.
#[derive(Clone)]
struct TokenKeys {
    token_id: u32,
    algorithm: Arc<SecurityAlgorithm>,
}

/// Security material shared between senders and the receive loop. Bundles
/// are swapped as whole `Arc`s under the lock.
struct SecurityContext {
    mode: MessageSecurityMode,
    asymmetric: Option<Arc<SecurityAlgorithm>>,
    current: Option<TokenKeys>,
    /// Kept after a renewal for frames still in flight under the old token.
    previous: Option<TokenKeys>,
    remote_certificate: Option<Vec<u8>>,
    revised_lifetime: u32,
}

impl SecurityContext {
    fn keys_for(&self, token_id: u32) -> Option<Arc<SecurityAlgorithm>> {
        [&self.current, &self.previous]
            .into_iter()
            .flatten()
            .find(|k| k.token_id == token_id)
            .map(|k| Arc::clone(&k.algorithm))
    }

    fn install(&mut self, keys: TokenKeys, revised_lifetime: u32) {
        self.previous = self.current.replace(keys);
        self.revised_lifetime = revised_lifetime;
    }
}

/// Counters advanced together under the send lock.
struct SendState {
    sequence: SequenceCounter,
    request_id: IdCounter,
    request_handle: IdCounter,
}

/// Local nonce of an Open request awaiting its response.
struct PendingOpen {
    request_id: u32,
    nonce: Vec<u8>,
}

/// A UASC secure channel over one transport.
pub struct SecureChannel {
    config: SecureChannelConfig,
    provider: Arc<dyn PolicyProvider>,
    transport: Arc<dyn Transport>,
    state: StateCell,
    secure_channel_id: AtomicU32,
    security: RwLock<SecurityContext>,
    sender: tokio::sync::Mutex<SendState>,
    pending: PendingRequests<ServiceMessage>,
    pending_open: Mutex<Option<PendingOpen>>,
    chunks: Mutex<ChunkAccumulator>,
}

impl SecureChannel {
    /// Channel over `transport` using the built-in policies.
    ///
    /// # Errors
    ///
    /// Fails if the configuration is invalid, or, for clients of a secured
    /// policy, if the server certificate or the local key does not fit the
    /// policy.
    pub fn new(
        config: SecureChannelConfig,
        transport: Arc<dyn Transport>,
    ) -> Result<Self, ChannelError> {
        Self::with_registry(config, transport, &PolicyRegistry::default())
    }

    /// Channel over `transport` resolving the policy in `registry`.
    pub fn with_registry(
        mut config: SecureChannelConfig,
        transport: Arc<dyn Transport>,
        registry: &PolicyRegistry,
    ) -> Result<Self, ChannelError> {
        config.normalize();
        config.validate()?;
        let provider = registry
            .get(&config.security_policy_uri)
            .map_err(|_| ConfigError::UnsupportedPolicy(config.security_policy_uri.clone()))?;

        // Servers learn the client certificate from the first Open request.
        let asymmetric = if config.is_policy_none() || config.remote_certificate.is_some() {
            let bundle = asymmetric_bundle(
                provider.as_ref(),
                config.local_key.as_ref(),
                config.remote_certificate.as_deref(),
            )?;
            Some(Arc::new(bundle))
        } else {
            None
        };

        let security = SecurityContext {
            mode: config.security_mode,
            asymmetric,
            current: None,
            previous: None,
            remote_certificate: config.remote_certificate.clone(),
            revised_lifetime: 0,
        };
        let sender = SendState {
            sequence: SequenceCounter::default(),
            request_id: IdCounter::starting_after(config.request_id_seed),
            request_handle: IdCounter::default(),
        };
        let max_chunk_count = transport.limits().max_chunk_count;

        info!(
            policy = %config.security_policy_uri,
            mode = %config.security_mode,
            role = ?config.role,
            "Created secure channel"
        );
        Ok(Self {
            config,
            provider,
            transport,
            state: StateCell::new(),
            secure_channel_id: AtomicU32::new(0),
            security: RwLock::new(security),
            sender: tokio::sync::Mutex::new(sender),
            pending: PendingRequests::new(),
            pending_open: Mutex::new(None),
            chunks: Mutex::new(ChunkAccumulator::new(max_chunk_count)),
        })
    }

    fn build_asymmetric(
        &self,
        remote_certificate: Option<&[u8]>,
    ) -> Result<SecurityAlgorithm, ChannelError> {
        asymmetric_bundle(
            self.provider.as_ref(),
            self.config.local_key.as_ref(),
            remote_certificate,
        )
    }

    fn new_nonce(&self) -> Vec<u8> {
        let mut nonce = vec![0u8; self.provider.nonce_length()];
        rand::thread_rng().fill_bytes(&mut nonce);
        nonce
    }

    /// Current state.
    pub fn state(&self) -> ChannelState {
        self.state.get()
    }

    /// Channel id assigned by the server, 0 before the first Open completes.
    pub fn secure_channel_id(&self) -> u32 {
        self.secure_channel_id.load(Ordering::Acquire)
    }

    /// Id of the security token used for outgoing traffic, if any.
    pub fn token_id(&self) -> Option<u32> {
        self.security.read().current.as_ref().map(|k| k.token_id)
    }

    /// Token lifetime granted by the last Open or Renew, in milliseconds.
    pub fn revised_lifetime(&self) -> u32 {
        self.security.read().revised_lifetime
    }

    /// Security mode of regular traffic.
    pub fn security_mode(&self) -> MessageSecurityMode {
        self.security.read().mode
    }

    /// Peer certificate, if known.
    pub fn remote_certificate(&self) -> Option<Vec<u8>> {
        self.security.read().remote_certificate.clone()
    }

    /// Configuration in effect.
    pub fn config(&self) -> &SecureChannelConfig {
        &self.config
    }

    /// Limits of the underlying transport.
    pub fn limits(&self) -> TransportLimits {
        self.transport.limits()
    }

    /// Number of requests waiting for a response.
    pub fn pending_requests(&self) -> usize {
        self.pending.len()
    }

    /// Whether a response slot exists for `request_id`.
    pub fn is_pending(&self, request_id: u32) -> bool {
        self.pending.contains(request_id)
    }

    /// Pending request counters.
    pub fn pending_stats(&self) -> &PendingStats {
        self.pending.stats()
    }

    /// Move to Closed, fail every waiter and close the transport.
    async fn teardown(&self) {
        let previous = self.state.close();
        let failed = self.pending.fail_all(&ChannelError::EndOfStream);
        self.pending_open.lock().take();
        self.chunks.lock().clear();
        if previous != ChannelState::Closed {
            info!(
                secure_channel_id = self.secure_channel_id(),
                failed, "Secure channel closed"
            );
        }
        if let Err(e) = self.transport.close().await {
            warn!(error = %e, "Failed to close transport");
        }
        debug!(?previous, "Teardown complete");
    }
}

fn asymmetric_bundle(
    provider: &dyn PolicyProvider,
    local_key: Option<&RsaPrivateKey>,
    remote_certificate: Option<&[u8]>,
) -> Result<SecurityAlgorithm, ChannelError> {
    let remote_key = remote_certificate
        .map(certificate::public_key)
        .transpose()?;
    Ok(provider.asymmetric(local_key, remote_key.as_ref())?)
}

impl std::fmt::Debug for SecureChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecureChannel")
            .field("secure_channel_id", &self.secure_channel_id())
            .field("state", &self.state())
            .field("policy", &self.config.security_policy_uri)
            .field("mode", &self.security_mode())
            .field("pending", &self.pending.len())
            .finish()
    }
}
