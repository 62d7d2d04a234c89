//! # Secure Channel Integration Tests
//!
//! Client and server channels talking to each other through the public API:
//! every built-in policy end to end, token renewal, typed calls, request
//! correlation under concurrency and the TCP transport.

use bytes::{BufMut, BytesMut};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use uasc_channel::codec::binary::put_string;
use uasc_channel::codec::Reader;
use uasc_channel::{
    ChannelError, ChannelState, CodecError, ExpandedNodeId, GenericRequest, GenericResponse,
    MemoryTransport, MessageSecurityMode, RequestHeader, ResponseHeader, Role, SecureChannel,
    SecureChannelConfig, ServiceMessage, ServiceRequest, ServiceResponse, StatusCode,
    TcpTransport, TransportLimits,
};
use uasc_crypto::testing::key_pair;
use uasc_crypto::{
    SECURITY_POLICY_URI_AES128SHA256RSAOAEP, SECURITY_POLICY_URI_AES256SHA256RSAPSS,
    SECURITY_POLICY_URI_BASIC128RSA15, SECURITY_POLICY_URI_BASIC256,
    SECURITY_POLICY_URI_BASIC256SHA256, SECURITY_POLICY_URI_NONE,
};

// =============================================================================
// TEST FIXTURES
// =============================================================================

const ECHO_REQUEST: u32 = 631;
const ECHO_RESPONSE: u32 = 634;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "uasc_channel=debug".into()),
        )
        .with_test_writer()
        .try_init();
}

fn configs(
    policy_uri: &str,
    mode: MessageSecurityMode,
    key_bits: usize,
) -> (SecureChannelConfig, SecureChannelConfig) {
    let client = SecureChannelConfig::new(policy_uri, mode);
    let server = SecureChannelConfig::new(policy_uri, mode).with_role(Role::Server);
    if policy_uri == SECURITY_POLICY_URI_NONE {
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

fn connect(
    client: SecureChannelConfig,
    server: SecureChannelConfig,
) -> (Arc<SecureChannel>, Arc<SecureChannel>) {
    let (client_end, server_end) = MemoryTransport::pair(TransportLimits::default());
    (
        Arc::new(SecureChannel::new(client, Arc::new(client_end)).unwrap()),
        Arc::new(SecureChannel::new(server, Arc::new(server_end)).unwrap()),
    )
}

fn echo_request(body: &[u8]) -> ServiceMessage {
    ServiceMessage::Request(GenericRequest {
        type_id: ExpandedNodeId::ns0(ECHO_REQUEST),
        request_header: RequestHeader::default(),
        body: body.to_vec(),
    })
}

/// Answer every request with its own body until the channel ends.
fn spawn_echo_server(server: Arc<SecureChannel>) -> JoinHandle<()> {
    let mut inbound = server.spawn_receive_loop();
    tokio::spawn(async move {
        while let Some(message) = inbound.recv().await {
            let Ok(ServiceMessage::Request(request)) = message.result else {
                continue;
            };
            let response = ServiceMessage::Response(GenericResponse {
                type_id: ExpandedNodeId::ns0(ECHO_RESPONSE),
                response_header: ResponseHeader::new(
                    request.request_header.request_handle,
                    StatusCode::GOOD,
                ),
                body: request.body,
            });
            if server
                .send_response(message.request_id, response)
                .await
                .is_err()
            {
                break;
            }
        }
    })
}

async fn echo(client: &SecureChannel, body: &[u8]) -> Vec<u8> {
    match client.send_request(echo_request(body), None).await.unwrap() {
        ServiceMessage::Response(response) => response.body,
        other => panic!("unexpected {}", other.name()),
    }
}

/// Typed request carrying one string.
struct Echo {
    text: String,
}

impl ServiceRequest for Echo {
    const TYPE_ID: u32 = ECHO_REQUEST;

    fn encode_body(&self, buf: &mut BytesMut) {
        put_string(buf, Some(&self.text));
    }
}

#[derive(Debug, PartialEq)]
struct EchoReply {
    text: Option<String>,
}

impl ServiceResponse for EchoReply {
    const TYPE_ID: u32 = ECHO_RESPONSE;

    fn decode_body(reader: &mut Reader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            text: reader.read_string()?,
        })
    }
}

// =============================================================================
// POLICIES END TO END
// =============================================================================

async fn roundtrip(policy_uri: &str, mode: MessageSecurityMode, key_bits: usize) {
    init_tracing();
    let (client, server) = configs(policy_uri, mode, key_bits);
    let (client, server) = connect(client, server);
    let _client_loop = client.spawn_receive_loop();
    let server_task = spawn_echo_server(Arc::clone(&server));

    client.open().await.unwrap();
    assert_eq!(client.state(), ChannelState::Open);
    assert_eq!(server.state(), ChannelState::Open);
    assert_eq!(client.security_mode(), server.security_mode());

    let small = echo(&client, b"hello").await;
    assert_eq!(small, b"hello");

    // Larger than one chunk in every policy.
    let large: Vec<u8> = (0..200_000u32).map(|i| (i * 7 % 256) as u8).collect();
    assert_eq!(echo(&client, &large).await, large);

    client.close().await.unwrap();
    server_task.await.unwrap();
    assert_eq!(server.state(), ChannelState::Closed);
}

#[tokio::test]
async fn test_policy_none() {
    roundtrip(SECURITY_POLICY_URI_NONE, MessageSecurityMode::None, 0).await;
}

#[tokio::test]
async fn test_basic128rsa15_sign_and_encrypt() {
    roundtrip(
        SECURITY_POLICY_URI_BASIC128RSA15,
        MessageSecurityMode::SignAndEncrypt,
        1024,
    )
    .await;
}

#[tokio::test]
async fn test_basic256_sign() {
    roundtrip(SECURITY_POLICY_URI_BASIC256, MessageSecurityMode::Sign, 1024).await;
}

#[tokio::test]
async fn test_basic256sha256_sign_and_encrypt() {
    roundtrip(
        SECURITY_POLICY_URI_BASIC256SHA256,
        MessageSecurityMode::SignAndEncrypt,
        2048,
    )
    .await;
}

#[tokio::test]
async fn test_aes128sha256rsaoaep_sign_and_encrypt() {
    roundtrip(
        SECURITY_POLICY_URI_AES128SHA256RSAOAEP,
        MessageSecurityMode::SignAndEncrypt,
        2048,
    )
    .await;
}

#[tokio::test]
async fn test_aes256sha256rsapss_sign() {
    roundtrip(
        SECURITY_POLICY_URI_AES256SHA256RSAPSS,
        MessageSecurityMode::Sign,
        2048,
    )
    .await;
}

// =============================================================================
// HANDSHAKE
// =============================================================================

#[tokio::test]
async fn test_renew_installs_new_token() {
    init_tracing();
    let (client, server) = configs(
        SECURITY_POLICY_URI_BASIC256SHA256,
        MessageSecurityMode::SignAndEncrypt,
        2048,
    );
    let (client, server) = connect(
        client.with_lifetime(Duration::from_secs(600)),
        server.with_lifetime(Duration::from_secs(60)),
    );
    let _client_loop = client.spawn_receive_loop();
    let _server_task = spawn_echo_server(Arc::clone(&server));

    client.open().await.unwrap();
    let first_token = client.token_id().unwrap();
    assert_eq!(client.revised_lifetime(), 60_000, "server caps the lifetime");
    let channel_id = client.secure_channel_id();

    client.renew().await.unwrap();
    assert_ne!(client.token_id().unwrap(), first_token);
    assert_eq!(client.token_id(), server.token_id());
    assert_eq!(client.secure_channel_id(), channel_id);

    assert_eq!(echo(&client, b"after renew").await, b"after renew");
}

#[tokio::test]
async fn test_wrong_server_certificate_fails_open() {
    init_tracing();
    let (client, server) = configs(
        SECURITY_POLICY_URI_BASIC256SHA256,
        MessageSecurityMode::Sign,
        2048,
    );
    // Trust the client's own certificate instead of the server's.
    let own_cert = client.certificate.clone().unwrap();
    let client = client
        .with_remote_certificate(own_cert)
        .with_request_timeout(Duration::from_millis(200));
    let (client, server) = connect(client, server);
    let _client_loop = client.spawn_receive_loop();
    let _server_loop = server.spawn_receive_loop();

    let err = client.open().await.unwrap_err();
    assert!(matches!(err, ChannelError::Timeout { .. }), "got {err:?}");
    assert_eq!(client.state(), ChannelState::Created);
    assert_eq!(server.state(), ChannelState::Created);
}

#[test]
fn test_secured_policy_requires_identity() {
    let config = SecureChannelConfig::new(
        SECURITY_POLICY_URI_BASIC256SHA256,
        MessageSecurityMode::Sign,
    );
    let (transport, _) = MemoryTransport::pair(TransportLimits::default());

    let err = SecureChannel::new(config, Arc::new(transport)).unwrap_err();
    assert!(matches!(err, ChannelError::Config(_)));
}

#[test]
fn test_unknown_policy_rejected() {
    let config = SecureChannelConfig::new(
        "http://example.com/UA/SecurityPolicy#Rot13",
        MessageSecurityMode::Sign,
    );
    let (transport, _) = MemoryTransport::pair(TransportLimits::default());

    assert!(SecureChannel::new(config, Arc::new(transport)).is_err());
}

// =============================================================================
// REQUESTS
// =============================================================================

#[tokio::test]
async fn test_typed_call() {
    init_tracing();
    let (client, server) = configs(SECURITY_POLICY_URI_NONE, MessageSecurityMode::None, 0);
    let (client, server) = connect(client, server);
    let _client_loop = client.spawn_receive_loop();
    let _server_task = spawn_echo_server(server);
    client.open().await.unwrap();

    let (header, reply): (ResponseHeader, EchoReply) = client
        .call(
            &Echo {
                text: "typed".into(),
            },
            None,
        )
        .await
        .unwrap();
    assert!(header.service_result.is_good());
    assert_eq!(
        reply,
        EchoReply {
            text: Some("typed".into())
        }
    );
}

#[tokio::test]
async fn test_concurrent_requests_are_correlated() {
    init_tracing();
    let (client, server) = configs(
        SECURITY_POLICY_URI_BASIC256SHA256,
        MessageSecurityMode::SignAndEncrypt,
        2048,
    );
    let (client, server) = connect(client, server);
    let _client_loop = client.spawn_receive_loop();
    let _server_task = spawn_echo_server(server);
    client.open().await.unwrap();

    let tasks: Vec<_> = (0..32u32)
        .map(|i| {
            let client = Arc::clone(&client);
            tokio::spawn(async move {
                let mut body = BytesMut::new();
                body.put_u32_le(i);
                body.put_bytes(i as u8, i as usize * 100);
                let sent = body.to_vec();
                let received = echo(&client, &sent).await;
                assert_eq!(received, sent);
            })
        })
        .collect();
    for task in tasks {
        task.await.unwrap();
    }
    assert_eq!(client.pending_requests(), 0);
}

// =============================================================================
// TCP TRANSPORT
// =============================================================================

#[tokio::test]
async fn test_tcp_end_to_end() {
    init_tracing();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let (client_config, server_config) = configs(
        SECURITY_POLICY_URI_BASIC256SHA256,
        MessageSecurityMode::SignAndEncrypt,
        2048,
    );

    let server_task = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let transport = TcpTransport::accept(stream, TransportLimits::default())
            .await
            .unwrap();
        let server = Arc::new(SecureChannel::new(server_config, Arc::new(transport)).unwrap());
        spawn_echo_server(server).await.unwrap();
    });

    let transport = TcpTransport::connect(
        &format!("opc.tcp://127.0.0.1:{port}"),
        TransportLimits::default(),
    )
    .await
    .unwrap();
    let client = Arc::new(SecureChannel::new(client_config, Arc::new(transport)).unwrap());
    let _client_loop = client.spawn_receive_loop();

    client.open().await.unwrap();
    let body = vec![0x5A; 150_000];
    assert_eq!(echo(&client, &body).await, body);

    client.close().await.unwrap();
    server_task.await.unwrap();
}
