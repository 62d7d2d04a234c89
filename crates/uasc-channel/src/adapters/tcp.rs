//! OPC UA Connection Protocol over TCP.
//!
//! `connect` and `accept` run the `HEL`/`ACK` handshake, after which every
//! `receive` returns exactly one frame as delimited by its size field.

use crate::codec::uacp::{
    self, Acknowledge, ErrorMessage, Hello, UacpMessageType, PROTOCOL_VERSION, UACP_HEADER_LENGTH,
};
use crate::codec::BinaryDecode;
use crate::domain::{StatusCode, TransportError};
use crate::ports::{Transport, TransportLimits};
use async_trait::async_trait;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

/// Default port of `opc.tcp` endpoints.
pub const DEFAULT_PORT: u16 = 4840;

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// A TCP stream after a completed connection handshake.
pub struct TcpTransport {
    reader: Mutex<OwnedReadHalf>,
    writer: Mutex<OwnedWriteHalf>,
    closed: watch::Sender<bool>,
    limits: TransportLimits,
    peer: Option<SocketAddr>,
}

impl TcpTransport {
    /// Connect to `endpoint_url` and send `HEL` with `limits`. The limits in
    /// effect afterwards are the ones revised by the server's `ACK`.
    pub async fn connect(
        endpoint_url: &str,
        limits: TransportLimits,
    ) -> Result<Self, TransportError> {
        let address = socket_address(endpoint_url)?;
        let stream = TcpStream::connect(&address).await?;
        stream.set_nodelay(true)?;
        let peer = stream.peer_addr().ok();
        let (mut reader, mut writer) = stream.into_split();

        let hello = Hello {
            protocol_version: PROTOCOL_VERSION,
            receive_buffer_size: limits.receive_buffer_size,
            send_buffer_size: limits.send_buffer_size,
            max_message_size: limits.max_message_size,
            max_chunk_count: limits.max_chunk_count,
            endpoint_url: endpoint_url.to_string(),
        };
        writer
            .write_all(&uacp::frame(UacpMessageType::Hello, &hello))
            .await?;

        let frame = tokio::time::timeout(
            HANDSHAKE_TIMEOUT,
            read_frame(&mut reader, limits.receive_buffer_size),
        )
        .await
        .map_err(|_| TransportError::Handshake("no ACK before timeout".into()))??;

        if UacpMessageType::from_tag(&frame[..3]) != Some(UacpMessageType::Acknowledge) {
            return Err(TransportError::Handshake(format!(
                "expected ACK, got {}",
                String::from_utf8_lossy(&frame[..3])
            )));
        }
        let ack = Acknowledge::from_bytes(&frame[UACP_HEADER_LENGTH..])
            .map_err(|e| TransportError::Handshake(e.to_string()))?;

        let revised = TransportLimits {
            receive_buffer_size: limits.receive_buffer_size.min(ack.send_buffer_size),
            send_buffer_size: limits.send_buffer_size.min(ack.receive_buffer_size),
            max_message_size: ack.max_message_size,
            max_chunk_count: ack.max_chunk_count,
        };
        info!(endpoint = endpoint_url, ?revised, "Connection handshake complete");

        Ok(Self::from_halves(reader, writer, revised, peer))
    }

    /// Server side: wait for `HEL` on an accepted stream and answer with
    /// `ACK` carrying the revised `limits`.
    pub async fn accept(stream: TcpStream, limits: TransportLimits) -> Result<Self, TransportError> {
        stream.set_nodelay(true)?;
        let peer = stream.peer_addr().ok();
        let (mut reader, mut writer) = stream.into_split();

        let frame = tokio::time::timeout(
            HANDSHAKE_TIMEOUT,
            read_frame(&mut reader, limits.receive_buffer_size),
        )
        .await
        .map_err(|_| TransportError::Handshake("no HEL before timeout".into()))??;

        if UacpMessageType::from_tag(&frame[..3]) != Some(UacpMessageType::Hello) {
            return Err(reject(
                &mut writer,
                StatusCode::BAD_TCP_MESSAGE_TYPE_INVALID,
                "expected HEL",
            )
            .await);
        }
        let hello = Hello::from_bytes(&frame[UACP_HEADER_LENGTH..])
            .map_err(|e| TransportError::Handshake(e.to_string()))?;
        if hello.receive_buffer_size < TransportLimits::MIN_BUFFER_SIZE
            || hello.send_buffer_size < TransportLimits::MIN_BUFFER_SIZE
        {
            return Err(reject(
                &mut writer,
                StatusCode::BAD_COMMUNICATION_ERROR,
                "buffer sizes below minimum",
            )
            .await);
        }

        let revised = TransportLimits {
            receive_buffer_size: limits.receive_buffer_size.min(hello.send_buffer_size),
            send_buffer_size: limits.send_buffer_size.min(hello.receive_buffer_size),
            max_message_size: hello.max_message_size,
            max_chunk_count: hello.max_chunk_count,
        };
        let ack = Acknowledge {
            protocol_version: PROTOCOL_VERSION,
            receive_buffer_size: revised.receive_buffer_size,
            send_buffer_size: revised.send_buffer_size,
            max_message_size: limits.max_message_size,
            max_chunk_count: limits.max_chunk_count,
        };
        writer
            .write_all(&uacp::frame(UacpMessageType::Acknowledge, &ack))
            .await?;
        info!(?peer, endpoint = %hello.endpoint_url, "Accepted connection");

        Ok(Self::from_halves(reader, writer, revised, peer))
    }

    fn from_halves(
        reader: OwnedReadHalf,
        writer: OwnedWriteHalf,
        limits: TransportLimits,
        peer: Option<SocketAddr>,
    ) -> Self {
        let (closed, _) = watch::channel(false);
        Self {
            reader: Mutex::new(reader),
            writer: Mutex::new(writer),
            closed,
            limits,
            peer,
        }
    }

    /// Remote address, if known.
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn write(&self, frame: &[u8]) -> Result<(), TransportError> {
        if *self.closed.borrow() {
            return Err(TransportError::ConnectionClosed);
        }
        let limit = self.limits.send_buffer_size as usize;
        if limit > 0 && frame.len() > limit {
            return Err(TransportError::MessageTooLarge {
                size: frame.len(),
                limit,
            });
        }
        let mut writer = self.writer.lock().await;
        writer.write_all(frame).await?;
        Ok(())
    }

    async fn receive(&self) -> Result<Vec<u8>, TransportError> {
        let mut closed = self.closed.subscribe();
        if *closed.borrow_and_update() {
            return Err(TransportError::ConnectionClosed);
        }

        let mut reader = self.reader.lock().await;
        let frame = tokio::select! {
            frame = read_frame(&mut reader, self.limits.receive_buffer_size) => frame?,
            _ = closed.wait_for(|closed| *closed) => return Err(TransportError::ConnectionClosed),
        };

        if UacpMessageType::from_tag(&frame[..3]) == Some(UacpMessageType::Error) {
            let err = ErrorMessage::from_bytes(&frame[UACP_HEADER_LENGTH..])
                .map_err(|e| TransportError::Io(e.to_string()))?;
            warn!(status = %err.error, reason = %err.reason, "Peer sent ERR");
            return Err(TransportError::Protocol {
                status: err.error,
                reason: err.reason,
            });
        }
        Ok(frame)
    }

    async fn close(&self) -> Result<(), TransportError> {
        if self.closed.send_replace(true) {
            return Ok(());
        }
        debug!(peer = ?self.peer, "Closing TCP transport");
        let mut writer = self.writer.lock().await;
        writer.shutdown().await?;
        Ok(())
    }

    fn limits(&self) -> TransportLimits {
        self.limits
    }
}

/// Read one frame whose total size is the `u32` at offset 4.
async fn read_frame(reader: &mut OwnedReadHalf, limit: u32) -> Result<Vec<u8>, TransportError> {
    let mut header = [0u8; UACP_HEADER_LENGTH];
    reader.read_exact(&mut header).await?;

    let size = u32::from_le_bytes([header[4], header[5], header[6], header[7]]) as usize;
    if size < UACP_HEADER_LENGTH {
        return Err(TransportError::Io(format!("invalid frame size {size}")));
    }
    if limit > 0 && size > limit as usize {
        return Err(TransportError::MessageTooLarge {
            size,
            limit: limit as usize,
        });
    }

    let mut frame = vec![0u8; size];
    frame[..UACP_HEADER_LENGTH].copy_from_slice(&header);
    reader.read_exact(&mut frame[UACP_HEADER_LENGTH..]).await?;
    Ok(frame)
}

async fn reject(writer: &mut OwnedWriteHalf, error: StatusCode, reason: &str) -> TransportError {
    let message = ErrorMessage {
        error,
        reason: reason.to_string(),
    };
    if let Err(e) = writer
        .write_all(&uacp::frame(UacpMessageType::Error, &message))
        .await
    {
        debug!(error = %e, "Failed to send ERR");
    }
    TransportError::Handshake(reason.to_string())
}

/// `host:port` of an `opc.tcp://host[:port][/path]` URL.
fn socket_address(endpoint_url: &str) -> Result<String, TransportError> {
    let rest = endpoint_url
        .strip_prefix("opc.tcp://")
        .ok_or_else(|| TransportError::Handshake(format!("unsupported URL {endpoint_url}")))?;
    let authority = rest.split('/').next().unwrap_or_default();
    if authority.is_empty() {
        return Err(TransportError::Handshake(format!(
            "missing host in {endpoint_url}"
        )));
    }

    let has_port = match authority.rsplit_once(':') {
        Some((host, port)) => {
            port.parse::<u16>().is_ok() && (!host.starts_with('[') || host.ends_with(']'))
        }
        None => false,
    };
    if has_port {
        Ok(authority.to_string())
    } else {
        Ok(format!("{authority}:{DEFAULT_PORT}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[test]
    fn test_socket_address() {
        assert_eq!(
            socket_address("opc.tcp://localhost:4841/UA/Server").unwrap(),
            "localhost:4841"
        );
        assert_eq!(socket_address("opc.tcp://plc01").unwrap(), "plc01:4840");
        assert_eq!(socket_address("opc.tcp://[::1]:4850").unwrap(), "[::1]:4850");
        assert_eq!(socket_address("opc.tcp://[::1]").unwrap(), "[::1]:4840");
        assert!(socket_address("http://localhost").is_err());
    }

    #[tokio::test]
    async fn test_handshake_and_frames() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("opc.tcp://{}/test", listener.local_addr().unwrap());

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let limits = TransportLimits {
                receive_buffer_size: 8192,
                ..TransportLimits::default()
            };
            TcpTransport::accept(stream, limits).await.unwrap()
        });
        let client = TcpTransport::connect(&url, TransportLimits::default())
            .await
            .unwrap();
        let server = server.await.unwrap();

        assert_eq!(client.limits().send_buffer_size, 8192);
        assert_eq!(server.limits().receive_buffer_size, 8192);

        let mut frame = b"MSGF".to_vec();
        frame.extend_from_slice(&16u32.to_le_bytes());
        frame.extend_from_slice(&[1, 2, 3, 4, 5, 6, 7, 8]);
        client.write(&frame).await.unwrap();
        assert_eq!(server.receive().await.unwrap(), frame);

        client.close().await.unwrap();
        assert_eq!(server.receive().await, Err(TransportError::ConnectionClosed));
    }

    #[tokio::test]
    async fn test_error_message_is_protocol_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("opc.tcp://{}", listener.local_addr().unwrap());

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let transport = TcpTransport::accept(stream, TransportLimits::default())
                .await
                .unwrap();
            let err = ErrorMessage {
                error: StatusCode::BAD_TCP_SECURE_CHANNEL_UNKNOWN,
                reason: "unknown channel".into(),
            };
            transport
                .write(&uacp::frame(UacpMessageType::Error, &err))
                .await
                .unwrap();
            transport
        });
        let client = TcpTransport::connect(&url, TransportLimits::default())
            .await
            .unwrap();
        let _server = server.await.unwrap();

        assert_eq!(
            client.receive().await,
            Err(TransportError::Protocol {
                status: StatusCode::BAD_TCP_SECURE_CHANNEL_UNKNOWN,
                reason: "unknown channel".into(),
            })
        );
    }
}
