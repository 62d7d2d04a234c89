//! Test fixtures: matching client/server configurations and channel pairs
//! over the in-memory transport.

#![allow(clippy::expect_used)]

use crate::adapters::MemoryTransport;
use crate::domain::{ChannelError, MessageSecurityMode, Role, SecureChannelConfig};
use crate::ports::TransportLimits;
use crate::service::SecureChannel;
use std::sync::Arc;

pub use uasc_crypto::testing::{key_pair, peer_rsa_key, rsa_key, self_signed_certificate};

/// Client and server configurations for `policy_uri` and `mode`.
///
/// Secured policies get distinct `key_bits` RSA identities; the client
/// trusts the server certificate up front.
pub fn config_pair(
    policy_uri: &str,
    mode: MessageSecurityMode,
    key_bits: usize,
) -> (SecureChannelConfig, SecureChannelConfig) {
    let client = SecureChannelConfig::new(policy_uri, mode);
    let server = SecureChannelConfig::new(policy_uri, mode).with_role(Role::Server);
    if client.is_policy_none() {
        return (client, server);
    }

    let (client_key, client_cert) = key_pair(key_bits, false);
    let (server_key, server_cert) = key_pair(key_bits, true);
    (
        client
            .with_local_identity(client_cert, client_key)
            .with_remote_certificate(server_cert.clone()),
        server.with_local_identity(server_cert, server_key),
    )
}

/// Client and server channels connected by a [`MemoryTransport`] pair.
pub fn channel_pair(
    client: SecureChannelConfig,
    server: SecureChannelConfig,
    limits: TransportLimits,
) -> Result<(Arc<SecureChannel>, Arc<SecureChannel>), ChannelError> {
    let (client_end, server_end) = MemoryTransport::pair(limits);
    let client = SecureChannel::new(client, Arc::new(client_end))?;
    let server = SecureChannel::new(server, Arc::new(server_end))?;
    Ok((Arc::new(client), Arc::new(server)))
}

/// Install a test subscriber once; repeated calls are no-ops.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "uasc_channel=debug".into()),
        )
        .with_test_writer()
        .try_init();
}
