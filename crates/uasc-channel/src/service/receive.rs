//! Receive path: frame decoding, chunk reassembly, dispatch and the
//! receive loop task.

use super::framing::{self, Protection};
use super::{SecureChannel, TokenKeys};
use crate::codec::uacp::PROTOCOL_VERSION;
use crate::codec::{
    AsymmetricSecurityHeader, BinaryDecode, ChannelSecurityToken, ChunkType, MessageAbort,
    MessageType, OpenSecureChannelRequest, OpenSecureChannelResponse, RawChunk, Reader,
    ResponseHeader, SecurityHeader, SecurityTokenRequestType, SequenceHeader, ServiceMessage,
};
use crate::domain::{
    ChannelError, ChannelState, CodecError, Delivery, MessageSecurityMode, Role, StatusCode,
    TransportError,
};
use chrono::Utc;
use rand::Rng;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};
use uasc_crypto::{thumbprint, SecurityAlgorithm};

/// A message or error no waiting sender claimed.
///
/// Carries inbound requests in the server role, responses that arrived
/// after their sender gave up, and per-chunk errors without a waiter.
#[derive(Debug)]
pub struct InboundMessage {
    /// Request id of the frame, 0 when unknown
    pub request_id: u32,
    /// Decoded message or the error it produced
    pub result: Result<ServiceMessage, ChannelError>,
}

/// A verified and decrypted chunk.
struct Chunk {
    chunk_type: ChunkType,
    request_id: u32,
    sequence_number: u32,
    body: Vec<u8>,
}

enum ReadOutcome {
    Chunk(Chunk),
    /// The frame failed without ending the channel.
    Failed {
        request_id: u32,
        error: ChannelError,
    },
}

/// Request id from an unencrypted sequence header.
fn peek_request_id(secured_body: &[u8], protection: Protection) -> u32 {
    if protection.encrypt {
        return 0;
    }
    secured_body
        .get(4..8)
        .map_or(0, |b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
}

impl SecureChannel {
    /// Process frames until one yields something no sender is waiting for.
    ///
    /// Responses are handed to their waiters along the way. Returns
    /// `Err` only when the channel has ended; the error is
    /// `ChannelError::EndOfStream` for an orderly close. Before returning
    /// the error the channel is closed and every pending request fails
    /// with `ChannelError::EndOfStream`.
    ///
    /// Only one task may call this at a time; [`spawn_receive_loop`]
    /// does so in the background.
    ///
    /// [`spawn_receive_loop`]: Self::spawn_receive_loop
    pub async fn receive(&self) -> Result<InboundMessage, ChannelError> {
        loop {
            if self.state.is(ChannelState::Closed) {
                return Err(ChannelError::EndOfStream);
            }
            let outcome = match self.read_chunk().await {
                Ok(outcome) => outcome,
                Err(error) => {
                    self.teardown().await;
                    return Err(error);
                }
            };
            let inbound = match outcome {
                ReadOutcome::Chunk(chunk) => self.process_chunk(chunk).await,
                ReadOutcome::Failed { request_id, error } => {
                    warn!(request_id, error = %error, "Dropping frame");
                    self.deliver(request_id, Err(error))
                }
            };
            if let Some(inbound) = inbound {
                return Ok(inbound);
            }
        }
    }

    async fn read_chunk(&self) -> Result<ReadOutcome, ChannelError> {
        let frame = match self.transport.receive().await {
            Ok(frame) => frame,
            Err(TransportError::ConnectionClosed) => return Err(ChannelError::EndOfStream),
            Err(e) => return Err(e.into()),
        };
        let raw = RawChunk::parse(&frame)?;
        let header = raw.header;
        trace!(
            message_type = %header.message_type,
            chunk_type = ?header.chunk_type,
            size = header.message_size,
            "Received frame"
        );

        let policy_none = self.config.is_policy_none();
        let (algorithm, protection, fallback_id) = match &raw.security_header {
            SecurityHeader::Asymmetric(security_header) => {
                let fallback_id = self.pending_open_id();
                match self.incoming_asymmetric(security_header) {
                    Ok(algorithm) => {
                        let protection = Protection::for_frame(
                            MessageType::Open,
                            policy_none,
                            MessageSecurityMode::None,
                        );
                        (algorithm, protection, fallback_id)
                    }
                    Err(error) => {
                        return Ok(ReadOutcome::Failed {
                            request_id: fallback_id,
                            error,
                        })
                    }
                }
            }
            SecurityHeader::Symmetric(security_header) => {
                if header.message_type == MessageType::Close {
                    info!(
                        secure_channel_id = header.secure_channel_id,
                        "Peer closed the secure channel"
                    );
                    self.state.close();
                    return Err(ChannelError::EndOfStream);
                }

                let (keys, mode) = {
                    let security = self.security.read();
                    (security.keys_for(security_header.token_id), security.mode)
                };
                let protection = Protection::for_frame(header.message_type, policy_none, mode);
                let fallback_id = peek_request_id(raw.body(), protection);

                let own_id = self.secure_channel_id();
                if own_id != 0 && header.secure_channel_id != own_id {
                    return Ok(ReadOutcome::Failed {
                        request_id: fallback_id,
                        error: ChannelError::status(StatusCode::BAD_SECURE_CHANNEL_ID_INVALID),
                    });
                }
                let Some(algorithm) = keys else {
                    return Ok(ReadOutcome::Failed {
                        request_id: fallback_id,
                        error: ChannelError::status(StatusCode::BAD_SECURE_CHANNEL_TOKEN_UNKNOWN),
                    });
                };
                (algorithm, protection, fallback_id)
            }
        };

        let plain =
            match framing::verify_and_decrypt(&frame, raw.header_length, &algorithm, protection) {
                Ok(plain) => plain,
                Err(error) => {
                    return Ok(ReadOutcome::Failed {
                        request_id: fallback_id,
                        error,
                    })
                }
            };
        let mut reader = Reader::new(&plain);
        let sequence = SequenceHeader::decode(&mut reader)?;

        if header.message_type.is_asymmetric() && header.secure_channel_id != 0 {
            let _ = self.secure_channel_id.compare_exchange(
                0,
                header.secure_channel_id,
                Ordering::AcqRel,
                Ordering::Acquire,
            );
        }

        trace!(
            request_id = sequence.request_id,
            sequence_number = sequence.sequence_number,
            len = reader.remaining(),
            "Decoded chunk"
        );
        Ok(ReadOutcome::Chunk(Chunk {
            chunk_type: header.chunk_type,
            request_id: sequence.request_id,
            sequence_number: sequence.sequence_number,
            body: reader.rest().to_vec(),
        }))
    }

    fn pending_open_id(&self) -> u32 {
        self.pending_open
            .lock()
            .as_ref()
            .map_or(0, |open| open.request_id)
    }

    /// Bundle for an incoming `OPN` frame, rebuilt whenever the sender
    /// certificate changes.
    fn incoming_asymmetric(
        &self,
        security_header: &AsymmetricSecurityHeader,
    ) -> Result<Arc<SecurityAlgorithm>, ChannelError> {
        if security_header.security_policy_uri != self.config.security_policy_uri {
            debug!(
                policy = %security_header.security_policy_uri,
                "Security policy does not match the channel"
            );
            return Err(ChannelError::status(
                StatusCode::BAD_SECURITY_POLICY_REJECTED,
            ));
        }
        if self.config.is_policy_none() {
            return self
                .security
                .read()
                .asymmetric
                .clone()
                .ok_or(ChannelError::SecurityChecksFailed);
        }

        let certificate = security_header
            .sender_certificate
            .as_deref()
            .ok_or(CodecError::MissingField("sender certificate"))?;
        if let (Some(received), Some(own)) = (
            security_header.receiver_thumbprint.as_deref(),
            self.config.certificate.as_deref(),
        ) {
            if received != thumbprint(own).as_slice() {
                debug!("Receiver thumbprint does not match the local certificate");
                return Err(ChannelError::SecurityChecksFailed);
            }
        }

        {
            let security = self.security.read();
            if security.remote_certificate.as_deref() == Some(certificate) {
                if let Some(algorithm) = &security.asymmetric {
                    return Ok(Arc::clone(algorithm));
                }
            }
        }
        if self.config.role == Role::Client && self.config.remote_certificate.is_some() {
            debug!("Server presented a certificate other than the configured one");
            return Err(ChannelError::SecurityChecksFailed);
        }

        let algorithm = Arc::new(self.build_asymmetric(Some(certificate))?);
        let mut security = self.security.write();
        security.remote_certificate = Some(certificate.to_vec());
        security.asymmetric = Some(Arc::clone(&algorithm));
        debug!("Asymmetric bundle rebuilt from sender certificate");
        Ok(algorithm)
    }

    async fn process_chunk(&self, chunk: Chunk) -> Option<InboundMessage> {
        let Chunk {
            chunk_type,
            request_id,
            sequence_number,
            body,
        } = chunk;

        match chunk_type {
            ChunkType::Abort => {
                let dropped = self.chunks.lock().discard(request_id);
                let error = match MessageAbort::decode(&mut Reader::new(&body)) {
                    Ok(abort) => {
                        warn!(
                            request_id,
                            code = %abort.error,
                            reason = ?abort.reason,
                            dropped,
                            "Peer aborted message"
                        );
                        ChannelError::Status {
                            code: abort.error,
                            reason: abort.reason,
                        }
                    }
                    Err(e) => e.into(),
                };
                self.deliver(request_id, Err(error))
            }
            ChunkType::Intermediate => {
                let appended = self
                    .chunks
                    .lock()
                    .append(request_id, sequence_number, body);
                match appended {
                    Ok(()) => None,
                    Err(error) => self.deliver(request_id, Err(error)),
                }
            }
            ChunkType::Final => {
                let message = self
                    .chunks
                    .lock()
                    .finish(request_id, sequence_number, body);
                let limit = self.transport.limits().max_message_size as usize;
                if limit > 0 && message.len() > limit {
                    let error = ChannelError::MessageTooLarge {
                        size: message.len(),
                        limit,
                    };
                    return self.deliver(request_id, Err(error));
                }
                match ServiceMessage::decode(&message, self.config.role) {
                    Ok(message) => self.dispatch(request_id, message).await,
                    Err(e) => self.deliver(request_id, Err(e.into())),
                }
            }
        }
    }

    async fn dispatch(&self, request_id: u32, message: ServiceMessage) -> Option<InboundMessage> {
        debug!(request_id, message = message.name(), "Received message");

        if let ServiceMessage::OpenRequest(request) = &message {
            let outcome = self.handle_open_request(request_id, request).await;
            if let Err(error) = &outcome {
                warn!(request_id, error = %error, "Rejected OpenSecureChannelRequest");
            }
            return Some(InboundMessage {
                request_id,
                result: outcome.map(|()| message),
            });
        }
        if let ServiceMessage::OpenResponse(response) = &message {
            let result = self.install_token(request_id, response).map(|()| message);
            return self.deliver(request_id, result);
        }
        if message.is_request() {
            return Some(InboundMessage {
                request_id,
                result: Ok(message),
            });
        }

        let result = match message.response_header() {
            Some(header) if header.service_result.is_bad() => {
                Err(ChannelError::status(header.service_result))
            }
            _ => Ok(message),
        };
        self.deliver(request_id, result)
    }

    /// Hand `result` to the waiter for `request_id`, or return it as
    /// unsolicited.
    fn deliver(
        &self,
        request_id: u32,
        result: Delivery<ServiceMessage>,
    ) -> Option<InboundMessage> {
        if request_id == 0 {
            return Some(InboundMessage { request_id, result });
        }
        let result = self.pending.complete(request_id, result)?;
        match &result {
            Ok(message) => warn!(
                request_id,
                message = message.name(),
                "No waiter for response"
            ),
            Err(error) => debug!(request_id, error = %error, "No waiter for error"),
        }
        Some(InboundMessage { request_id, result })
    }

    /// Client side: derive and install the keys granted by an Open response.
    fn install_token(
        &self,
        request_id: u32,
        response: &OpenSecureChannelResponse,
    ) -> Result<(), ChannelError> {
        let local_nonce = {
            let mut pending_open = self.pending_open.lock();
            match pending_open.take() {
                Some(open) if open.request_id == request_id => open.nonce,
                other => {
                    *pending_open = other;
                    return Err(ChannelError::UnexpectedService("OpenSecureChannelResponse"));
                }
            }
        };

        let service_result = response.response_header.service_result;
        if service_result.is_bad() {
            return Err(ChannelError::status(service_result));
        }
        let server_nonce = response.server_nonce.as_deref().unwrap_or_default();
        if server_nonce.len() != self.provider.nonce_length() {
            return Err(ChannelError::status(StatusCode::BAD_NONCE_INVALID));
        }
        let algorithm = self.provider.symmetric(&local_nonce, server_nonce)?;

        let token = &response.security_token;
        let own_id = match self.secure_channel_id.compare_exchange(
            0,
            token.channel_id,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => token.channel_id,
            Err(current) => current,
        };
        if own_id != token.channel_id {
            return Err(ChannelError::status(
                StatusCode::BAD_SECURE_CHANNEL_ID_INVALID,
            ));
        }

        self.security.write().install(
            TokenKeys {
                token_id: token.token_id,
                algorithm: Arc::new(algorithm),
            },
            token.revised_lifetime,
        );
        if !self.state.open() {
            return Err(ChannelError::EndOfStream);
        }
        debug!(
            secure_channel_id = own_id,
            token_id = token.token_id,
            revised_lifetime = token.revised_lifetime,
            "Installed security token"
        );
        Ok(())
    }

    /// Server side: answer an Open or Renew request and install the keys.
    async fn handle_open_request(
        &self,
        request_id: u32,
        request: &OpenSecureChannelRequest,
    ) -> Result<(), ChannelError> {
        if self.config.role != Role::Server {
            return Err(ChannelError::UnexpectedService("OpenSecureChannelRequest"));
        }
        let policy_none = self.config.is_policy_none();
        let request_handle = request.request_header.request_handle;
        let client_nonce = request.client_nonce.clone().unwrap_or_default();

        let rejection = if !policy_none && request.security_mode == MessageSecurityMode::None {
            Some(StatusCode::BAD_SECURITY_MODE_REJECTED)
        } else if request.request_type == SecurityTokenRequestType::Renew
            && !self.state.is(ChannelState::Open)
        {
            Some(StatusCode::BAD_INVALID_STATE)
        } else if client_nonce.len() != self.provider.nonce_length() {
            Some(StatusCode::BAD_NONCE_INVALID)
        } else {
            None
        };
        if let Some(code) = rejection {
            self.reject_open(request_id, request_handle, code).await;
            return Err(ChannelError::status(code));
        }

        let server_nonce = self.new_nonce();
        let algorithm = match self.provider.symmetric(&server_nonce, &client_nonce) {
            Ok(algorithm) => algorithm,
            Err(e) => {
                self.reject_open(request_id, request_handle, StatusCode::BAD_SECURITY_CHECKS_FAILED)
                    .await;
                return Err(e.into());
            }
        };

        let secure_channel_id = match self.secure_channel_id() {
            0 => {
                let id = rand::thread_rng().gen_range(1..=u32::MAX);
                self.secure_channel_id.store(id, Ordering::Release);
                id
            }
            id => id,
        };
        let token_id = match self.token_id().unwrap_or(0).wrapping_add(1) {
            0 => 1,
            id => id,
        };
        let revised_lifetime = match request.requested_lifetime {
            0 => self.config.lifetime_ms(),
            requested => requested.min(self.config.lifetime_ms()),
        };
        let mode = if policy_none {
            MessageSecurityMode::None
        } else {
            request.security_mode
        };

        let response = ServiceMessage::OpenResponse(OpenSecureChannelResponse {
            response_header: ResponseHeader::new(request_handle, StatusCode::GOOD),
            server_protocol_version: PROTOCOL_VERSION,
            security_token: ChannelSecurityToken {
                channel_id: secure_channel_id,
                token_id,
                created_at: Utc::now(),
                revised_lifetime,
            },
            server_nonce: (!server_nonce.is_empty()).then_some(server_nonce),
        });
        self.transmit(response, Some(request_id), self.config.request_timeout, None)
            .await?;

        {
            let mut security = self.security.write();
            security.mode = mode;
            security.install(
                TokenKeys {
                    token_id,
                    algorithm: Arc::new(algorithm),
                },
                revised_lifetime,
            );
        }
        if !self.state.open() {
            return Err(ChannelError::EndOfStream);
        }
        info!(
            secure_channel_id,
            token_id,
            %mode,
            request_type = ?request.request_type,
            "Issued security token"
        );
        Ok(())
    }

    async fn reject_open(&self, request_id: u32, request_handle: u32, code: StatusCode) {
        let response = ServiceMessage::OpenResponse(OpenSecureChannelResponse {
            response_header: ResponseHeader::new(request_handle, code),
            server_protocol_version: PROTOCOL_VERSION,
            security_token: ChannelSecurityToken {
                channel_id: self.secure_channel_id(),
                token_id: 0,
                created_at: Utc::now(),
                revised_lifetime: 0,
            },
            server_nonce: None,
        });
        if let Err(e) = self
            .transmit(response, Some(request_id), self.config.request_timeout, None)
            .await
        {
            warn!(request_id, error = %e, "Failed to send Open rejection");
        }
    }

    /// Spawn the task that reads the transport.
    ///
    /// Unclaimed traffic is forwarded to the returned handle. Inbound
    /// requests wait for room on the stream; anything else is dropped
    /// with a warning while the stream is full, so responses keep
    /// reaching their waiters. When the channel ends the loop forwards
    /// the final error and exits. Dropping the handle stops the loop.
    pub fn spawn_receive_loop(self: &Arc<Self>) -> ReceiveLoop {
        let (unsolicited_tx, unsolicited) = mpsc::channel(self.config.unsolicited_capacity);
        let (shutdown, shutdown_rx) = oneshot::channel();
        let handle = tokio::spawn(Arc::clone(self).run_receive_loop(unsolicited_tx, shutdown_rx));
        ReceiveLoop {
            unsolicited,
            shutdown: Some(shutdown),
            handle: Some(handle),
        }
    }

    async fn run_receive_loop(
        self: Arc<Self>,
        unsolicited: mpsc::Sender<InboundMessage>,
        mut shutdown: oneshot::Receiver<()>,
    ) {
        debug!("Receive loop started");
        loop {
            let outcome = tokio::select! {
                _ = &mut shutdown => break,
                outcome = self.receive() => outcome,
            };

            match outcome {
                Ok(inbound) if matches!(&inbound.result, Ok(m) if m.is_request()) => {
                    tokio::select! {
                        _ = &mut shutdown => break,
                        sent = unsolicited.send(inbound) => {
                            if sent.is_err() {
                                debug!("Unsolicited stream receiver dropped");
                            }
                        }
                    }
                }
                Ok(inbound) => match unsolicited.try_send(inbound) {
                    Ok(()) => {}
                    Err(TrySendError::Full(dropped)) => {
                        warn!(
                            request_id = dropped.request_id,
                            "Unsolicited stream full, dropping message"
                        );
                    }
                    Err(TrySendError::Closed(_)) => {
                        debug!("Unsolicited stream receiver dropped");
                    }
                },
                Err(error) => {
                    // `receive` has already torn the channel down.
                    if error == ChannelError::EndOfStream {
                        info!("Receive loop reached end of stream");
                    } else {
                        error!(error = %error, "Receive loop failed");
                    }
                    if unsolicited
                        .try_send(InboundMessage {
                            request_id: 0,
                            result: Err(error),
                        })
                        .is_err()
                    {
                        debug!("Final receive loop error not forwarded");
                    }
                    return;
                }
            }
        }

        info!("Receive loop cancelled");
        self.teardown().await;
    }
}

/// Handle to a running receive loop.
pub struct ReceiveLoop {
    unsolicited: mpsc::Receiver<InboundMessage>,
    shutdown: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl ReceiveLoop {
    /// Next unclaimed message. `None` once the loop has exited and the
    /// stream is drained.
    pub async fn recv(&mut self) -> Option<InboundMessage> {
        self.unsolicited.recv().await
    }

    /// Whether the loop task has exited.
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Stop the loop and wait for it. The channel ends Closed and every
    /// pending request fails with `ChannelError::EndOfStream`.
    pub async fn shutdown(mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            if shutdown.send(()).is_err() {
                debug!("Receive loop already exited");
            }
        }
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                warn!(error = %e, "Receive loop task failed");
            }
        }
    }
}

impl std::fmt::Debug for ReceiveLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReceiveLoop")
            .field("finished", &self.is_finished())
            .finish()
    }
}
