//! Send path: handshake operations, requests and responses.

use super::framing::{self, Protection, EXTRA_PADDING_THRESHOLD};
use super::{PendingOpen, SecureChannel, TIMEOUT_LENIENCY};
use crate::codec::uacp::PROTOCOL_VERSION;
use crate::codec::{
    AsymmetricSecurityHeader, BinaryEncode, ChunkType, CloseSecureChannelRequest, ExpandedNodeId,
    GenericRequest, Header, MessageType, OpenSecureChannelRequest, Reader, RequestHeader,
    ResponseHeader, SecurityHeader, SecurityTokenRequestType, SequenceHeader, ServiceMessage,
    SymmetricSecurityHeader, HEADER_LENGTH, SEQUENCE_HEADER_LENGTH,
};
use crate::domain::{
    ChannelError, ChannelState, CodecError, Delivery, MessageSecurityMode, SequenceCounter,
};
use crate::ports::{ServiceRequest, ServiceResponse};
use bytes::{BufMut, BytesMut};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};
use uasc_crypto::{thumbprint, SecurityAlgorithm};

type ResponseSlot = oneshot::Receiver<Delivery<ServiceMessage>>;

impl SecureChannel {
    /// Run the Open handshake.
    ///
    /// On success the channel is Open and regular traffic uses the derived
    /// symmetric keys. On failure the channel stays Created.
    pub async fn open(&self) -> Result<(), ChannelError> {
        let state = self.state.get();
        if state != ChannelState::Created {
            return Err(ChannelError::InvalidState {
                operation: "open",
                state,
            });
        }
        self.request_token(SecurityTokenRequestType::Issue).await?;
        info!(
            secure_channel_id = self.secure_channel_id(),
            token_id = ?self.token_id(),
            lifetime_ms = self.revised_lifetime(),
            "Secure channel open"
        );
        Ok(())
    }

    /// Request a new security token. Sequence numbers continue unchanged.
    pub async fn renew(&self) -> Result<(), ChannelError> {
        let state = self.state.get();
        if state != ChannelState::Open {
            return Err(ChannelError::InvalidState {
                operation: "renew",
                state,
            });
        }
        self.request_token(SecurityTokenRequestType::Renew).await?;
        info!(token_id = ?self.token_id(), "Security token renewed");
        Ok(())
    }

    async fn request_token(
        &self,
        request_type: SecurityTokenRequestType,
    ) -> Result<(), ChannelError> {
        let nonce = self.new_nonce();
        let request = ServiceMessage::OpenRequest(OpenSecureChannelRequest {
            request_header: RequestHeader::default(),
            client_protocol_version: PROTOCOL_VERSION,
            request_type,
            security_mode: self.security_mode(),
            client_nonce: (!nonce.is_empty()).then(|| nonce.clone()),
            requested_lifetime: self.config.lifetime_ms(),
        });

        let timeout = self.config.request_timeout;
        let (request_id, slot) = self.transmit(request, None, timeout, Some(nonce)).await?;
        let Some(slot) = slot else {
            return Err(ChannelError::UnexpectedService("OpenSecureChannelRequest"));
        };
        let result = self.wait_response(request_id, slot, timeout).await;

        {
            let mut pending_open = self.pending_open.lock();
            if pending_open
                .as_ref()
                .is_some_and(|p| p.request_id == request_id)
            {
                pending_open.take();
            }
        }

        match result? {
            ServiceMessage::OpenResponse(_) => Ok(()),
            other => Err(ChannelError::UnexpectedService(other.name())),
        }
    }

    /// Close the channel.
    ///
    /// An Open channel first sends a close request; failures to do so are
    /// logged. Always ends Closed with every waiter failed.
    pub async fn close(&self) -> Result<(), ChannelError> {
        if self.state.is(ChannelState::Open) {
            let request = ServiceMessage::CloseRequest(CloseSecureChannelRequest::default());
            match self
                .transmit(request, None, self.config.request_timeout, None)
                .await
            {
                Ok((request_id, _)) => debug!(request_id, "Sent CloseSecureChannelRequest"),
                Err(e) => warn!(error = %e, "Failed to send CloseSecureChannelRequest"),
            }
        }
        self.teardown().await;
        Ok(())
    }

    /// Send a request and wait for its response.
    ///
    /// `timeout` defaults to the configured request timeout. The wait lasts
    /// `timeout` plus [`TIMEOUT_LENIENCY`]. A response with a bad service
    /// result is returned as `ChannelError::Status`.
    pub async fn send_request(
        &self,
        request: ServiceMessage,
        timeout: Option<Duration>,
    ) -> Result<ServiceMessage, ChannelError> {
        self.send_request_with(request, timeout, Ok).await
    }

    /// Like [`send_request`](Self::send_request), passing the response
    /// through `handler`.
    pub async fn send_request_with<T, F>(
        &self,
        request: ServiceMessage,
        timeout: Option<Duration>,
        handler: F,
    ) -> Result<T, ChannelError>
    where
        F: FnOnce(ServiceMessage) -> Result<T, ChannelError> + Send,
        T: Send,
    {
        if !matches!(request, ServiceMessage::Request(_)) {
            return Err(ChannelError::UnexpectedService(request.name()));
        }
        let timeout = timeout.unwrap_or(self.config.request_timeout);

        let (request_id, slot) = self.transmit(request, None, timeout, None).await?;
        let Some(slot) = slot else {
            return Err(ChannelError::UnexpectedService("Request"));
        };
        let response = self.wait_response(request_id, slot, timeout).await?;
        handler(response)
    }

    /// Send a typed request and decode the typed response.
    pub async fn call<Req, Resp>(
        &self,
        request: &Req,
        timeout: Option<Duration>,
    ) -> Result<(ResponseHeader, Resp), ChannelError>
    where
        Req: ServiceRequest + Sync,
        Resp: ServiceResponse,
    {
        let mut body = BytesMut::new();
        request.encode_body(&mut body);
        let message = ServiceMessage::Request(GenericRequest {
            type_id: Req::type_id(),
            request_header: RequestHeader::default(),
            body: body.to_vec(),
        });

        self.send_request_with(message, timeout, |response| match response {
            ServiceMessage::Response(response) => {
                let expected = ExpandedNodeId::ns0(Resp::TYPE_ID);
                if response.type_id != expected {
                    return Err(CodecError::UnexpectedTypeId {
                        expected: expected.to_string(),
                        actual: response.type_id.to_string(),
                    }
                    .into());
                }
                let decoded = Resp::decode_body(&mut Reader::new(&response.body))?;
                Ok((response.response_header, decoded))
            }
            other => Err(ChannelError::UnexpectedService(other.name())),
        })
        .await
    }

    /// Answer the request received under `request_id`.
    pub async fn send_response(
        &self,
        request_id: u32,
        response: ServiceMessage,
    ) -> Result<(), ChannelError> {
        if response.is_request() {
            return Err(ChannelError::UnexpectedService(response.name()));
        }
        self.transmit(response, Some(request_id), self.config.request_timeout, None)
            .await?;
        Ok(())
    }

    /// Frame and write one message.
    ///
    /// Counters advance and the response slot is registered under the send
    /// lock, before the first byte is written, so a fast response always
    /// finds its waiter.
    pub(super) async fn transmit(
        &self,
        mut message: ServiceMessage,
        reply_to: Option<u32>,
        timeout: Duration,
        open_nonce: Option<Vec<u8>>,
    ) -> Result<(u32, Option<ResponseSlot>), ChannelError> {
        let message_type = message.message_type();
        let expects_response = message.is_request() && message_type != MessageType::Close;

        let mut sender = self.sender.lock().await;
        self.check_send_state(message_type)?;

        let request_id = match reply_to {
            Some(id) => id,
            None => sender.request_id.next(),
        };
        if let Some(header) = message.request_header_mut() {
            header.request_handle = sender.request_handle.next();
            header.timestamp = Utc::now();
            header.timeout_hint = u32::try_from(timeout.as_millis()).unwrap_or(u32::MAX);
        }
        let frames = self.build_frames(&mut sender.sequence, message_type, request_id, &message)?;

        let slot = if expects_response {
            Some(self.pending.register(request_id)?)
        } else {
            None
        };
        if let Some(nonce) = open_nonce {
            *self.pending_open.lock() = Some(PendingOpen { request_id, nonce });
        }

        for frame in &frames {
            if let Err(e) = self.transport.write(frame).await {
                drop(sender);
                if slot.is_some() {
                    self.pending.cancel(request_id);
                }
                error!(request_id, error = %e, "Transport write failed");
                self.teardown().await;
                return Err(e.into());
            }
        }

        debug!(
            request_id,
            message = message.name(),
            chunks = frames.len(),
            "Sent message"
        );
        Ok((request_id, slot))
    }

    fn check_send_state(&self, message_type: MessageType) -> Result<(), ChannelError> {
        match (self.state.get(), message_type) {
            (ChannelState::Closed, _) => Err(ChannelError::EndOfStream),
            (state @ ChannelState::Created, MessageType::Message | MessageType::Close) => {
                Err(ChannelError::InvalidState {
                    operation: "send",
                    state,
                })
            }
            _ => Ok(()),
        }
    }

    fn outgoing_security(
        &self,
        message_type: MessageType,
    ) -> Result<(SecurityHeader, Arc<SecurityAlgorithm>, MessageSecurityMode), ChannelError> {
        let security = self.security.read();
        let unavailable = |operation| ChannelError::InvalidState {
            operation,
            state: self.state.get(),
        };

        if message_type.is_asymmetric() {
            let algorithm = security.asymmetric.clone().ok_or_else(|| unavailable("open"))?;
            let secured = !self.config.is_policy_none();
            let header = AsymmetricSecurityHeader {
                security_policy_uri: self.config.security_policy_uri.clone(),
                sender_certificate: secured
                    .then(|| self.config.certificate.clone())
                    .flatten(),
                receiver_thumbprint: secured
                    .then(|| {
                        security
                            .remote_certificate
                            .as_deref()
                            .map(|cert| thumbprint(cert).to_vec())
                    })
                    .flatten(),
            };
            Ok((SecurityHeader::Asymmetric(header), algorithm, security.mode))
        } else {
            let keys = security.current.as_ref().ok_or_else(|| unavailable("send"))?;
            let header = SymmetricSecurityHeader {
                token_id: keys.token_id,
            };
            Ok((
                SecurityHeader::Symmetric(header),
                Arc::clone(&keys.algorithm),
                security.mode,
            ))
        }
    }

    fn build_frames(
        &self,
        sequence: &mut SequenceCounter,
        message_type: MessageType,
        request_id: u32,
        message: &ServiceMessage,
    ) -> Result<Vec<BytesMut>, ChannelError> {
        let (security_header, algorithm, mode) = self.outgoing_security(message_type)?;
        let protection = Protection::for_frame(message_type, self.config.is_policy_none(), mode);
        let header_length = HEADER_LENGTH + security_header.encoded_len();
        let body = message.to_bytes();

        let limits = self.transport.limits();
        let max_message = limits.max_message_size as usize;
        if max_message > 0 && body.len() > max_message {
            return Err(ChannelError::MessageTooLarge {
                size: body.len(),
                limit: max_message,
            });
        }

        let max_body = max_chunk_body(
            limits.send_buffer_size as usize,
            header_length,
            &algorithm,
            protection,
        );
        let pieces: Vec<&[u8]> = match max_body {
            Some(max) if max == 0 || (body.len() > max && message_type.is_asymmetric()) => {
                return Err(ChannelError::MessageTooLarge {
                    size: body.len(),
                    limit: max,
                });
            }
            Some(max) => body.chunks(max).collect(),
            None => vec![&body[..]],
        };
        let max_chunks = limits.max_chunk_count as usize;
        if max_chunks > 0 && pieces.len() > max_chunks {
            return Err(ChannelError::MessageTooLarge {
                size: body.len(),
                limit: max_body.unwrap_or(0).saturating_mul(max_chunks),
            });
        }

        let secure_channel_id = self.secure_channel_id();
        let last = pieces.len().saturating_sub(1);
        pieces
            .iter()
            .enumerate()
            .map(|(index, piece)| {
                let chunk_type = if index == last {
                    ChunkType::Final
                } else {
                    ChunkType::Intermediate
                };
                let mut buf = BytesMut::with_capacity(
                    header_length + SEQUENCE_HEADER_LENGTH + piece.len() + 64,
                );
                Header::new(message_type, chunk_type, secure_channel_id).encode(&mut buf);
                security_header.encode(&mut buf);
                SequenceHeader {
                    sequence_number: sequence.next(),
                    request_id,
                }
                .encode(&mut buf);
                buf.put_slice(piece);
                framing::sign_and_encrypt(buf, header_length, &algorithm, protection)
            })
            .collect()
    }

    async fn wait_response(
        &self,
        request_id: u32,
        mut slot: ResponseSlot,
        timeout: Duration,
    ) -> Result<ServiceMessage, ChannelError> {
        match tokio::time::timeout(timeout + TIMEOUT_LENIENCY, &mut slot).await {
            Ok(Ok(delivery)) => delivery,
            Ok(Err(_)) => Err(ChannelError::EndOfStream),
            Err(_) => {
                if self.pending.cancel(request_id) {
                    warn!(request_id, ?timeout, "Request timed out");
                    Err(ChannelError::Timeout {
                        request_id,
                        timeout,
                    })
                } else {
                    // Delivered between the deadline and the cancel.
                    slot.try_recv().unwrap_or(Err(ChannelError::EndOfStream))
                }
            }
        }
    }
}

/// Largest message body that fits into one chunk, `None` when the buffer
/// size is unlimited.
fn max_chunk_body(
    send_buffer_size: usize,
    header_length: usize,
    algorithm: &SecurityAlgorithm,
    protection: Protection,
) -> Option<usize> {
    if send_buffer_size == 0 {
        return None;
    }
    let available = send_buffer_size.saturating_sub(header_length);
    let signature = if protection.sign {
        algorithm.signature_length()
    } else {
        0
    };
    let room = if protection.encrypt {
        let cipher_block = algorithm.block_size();
        let padding_size = if cipher_block > EXTRA_PADDING_THRESHOLD {
            2
        } else {
            1
        };
        ((available / cipher_block) * algorithm.plaintext_block_size())
            .saturating_sub(signature + padding_size)
    } else {
        available.saturating_sub(signature)
    };
    Some(room.saturating_sub(SEQUENCE_HEADER_LENGTH))
}
