//! Service messages exchanged over a secure channel.
//!
//! The channel itself only understands the open and close services; every
//! other service travels as an opaque body behind its request or response
//! header.

use crate::codec::binary::{put_byte_string, BinaryDecode, BinaryEncode, Reader};
use crate::codec::header::MessageType;
use crate::codec::types::{ExpandedNodeId, RequestHeader, ResponseHeader};
use crate::domain::{CodecError, MessageSecurityMode, Role};
use bytes::{BufMut, BytesMut};
use chrono::{DateTime, Utc};

/// Binary encoding ids of the services the channel handles itself.
pub mod type_ids {
    /// `OpenSecureChannelRequest_Encoding_DefaultBinary`
    pub const OPEN_SECURE_CHANNEL_REQUEST: u32 = 446;
    /// `OpenSecureChannelResponse_Encoding_DefaultBinary`
    pub const OPEN_SECURE_CHANNEL_RESPONSE: u32 = 449;
    /// `CloseSecureChannelRequest_Encoding_DefaultBinary`
    pub const CLOSE_SECURE_CHANNEL_REQUEST: u32 = 452;
    /// `CloseSecureChannelResponse_Encoding_DefaultBinary`
    pub const CLOSE_SECURE_CHANNEL_RESPONSE: u32 = 455;
    /// `ServiceFault_Encoding_DefaultBinary`
    pub const SERVICE_FAULT: u32 = 397;
}

/// Whether an open request issues a new token or renews the current one.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum SecurityTokenRequestType {
    /// First open
    Issue = 0,
    /// Renewal of an open channel
    Renew = 1,
}

impl SecurityTokenRequestType {
    fn from_u32(value: u32) -> Result<Self, CodecError> {
        match value {
            0 => Ok(Self::Issue),
            1 => Ok(Self::Renew),
            value => Err(CodecError::InvalidEnumValue {
                field: "SecurityTokenRequestType",
                value,
            }),
        }
    }
}

/// Token granted by an open response.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChannelSecurityToken {
    /// Secure channel id
    pub channel_id: u32,
    /// Token id used in symmetric security headers
    pub token_id: u32,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Lifetime granted by the server in milliseconds
    pub revised_lifetime: u32,
}

impl BinaryEncode for ChannelSecurityToken {
    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u32_le(self.channel_id);
        buf.put_u32_le(self.token_id);
        self.created_at.encode(buf);
        buf.put_u32_le(self.revised_lifetime);
    }
}

impl BinaryDecode for ChannelSecurityToken {
    fn decode(reader: &mut Reader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            channel_id: reader.read_u32()?,
            token_id: reader.read_u32()?,
            created_at: DateTime::decode(reader)?,
            revised_lifetime: reader.read_u32()?,
        })
    }
}

/// `OpenSecureChannelRequest`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OpenSecureChannelRequest {
    /// Request header
    pub request_header: RequestHeader,
    /// Protocol version of the client
    pub client_protocol_version: u32,
    /// Issue or renew
    pub request_type: SecurityTokenRequestType,
    /// Requested security mode
    pub security_mode: MessageSecurityMode,
    /// Client nonce
    pub client_nonce: Option<Vec<u8>>,
    /// Requested token lifetime in milliseconds
    pub requested_lifetime: u32,
}

impl BinaryEncode for OpenSecureChannelRequest {
    fn encode(&self, buf: &mut BytesMut) {
        self.request_header.encode(buf);
        buf.put_u32_le(self.client_protocol_version);
        buf.put_u32_le(self.request_type as u32);
        buf.put_u32_le(self.security_mode.as_u32());
        put_byte_string(buf, self.client_nonce.as_deref());
        buf.put_u32_le(self.requested_lifetime);
    }
}

impl BinaryDecode for OpenSecureChannelRequest {
    fn decode(reader: &mut Reader<'_>) -> Result<Self, CodecError> {
        let request_header = RequestHeader::decode(reader)?;
        let client_protocol_version = reader.read_u32()?;
        let request_type = SecurityTokenRequestType::from_u32(reader.read_u32()?)?;
        let mode = reader.read_u32()?;
        let security_mode =
            MessageSecurityMode::from_u32(mode).ok_or(CodecError::InvalidEnumValue {
                field: "MessageSecurityMode",
                value: mode,
            })?;
        Ok(Self {
            request_header,
            client_protocol_version,
            request_type,
            security_mode,
            client_nonce: reader.read_byte_string()?,
            requested_lifetime: reader.read_u32()?,
        })
    }
}

/// `OpenSecureChannelResponse`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OpenSecureChannelResponse {
    /// Response header
    pub response_header: ResponseHeader,
    /// Protocol version of the server
    pub server_protocol_version: u32,
    /// Granted token
    pub security_token: ChannelSecurityToken,
    /// Server nonce
    pub server_nonce: Option<Vec<u8>>,
}

impl BinaryEncode for OpenSecureChannelResponse {
    fn encode(&self, buf: &mut BytesMut) {
        self.response_header.encode(buf);
        buf.put_u32_le(self.server_protocol_version);
        self.security_token.encode(buf);
        put_byte_string(buf, self.server_nonce.as_deref());
    }
}

impl BinaryDecode for OpenSecureChannelResponse {
    fn decode(reader: &mut Reader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            response_header: ResponseHeader::decode(reader)?,
            server_protocol_version: reader.read_u32()?,
            security_token: ChannelSecurityToken::decode(reader)?,
            server_nonce: reader.read_byte_string()?,
        })
    }
}

/// `CloseSecureChannelRequest`
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CloseSecureChannelRequest {
    /// Request header
    pub request_header: RequestHeader,
}

/// `CloseSecureChannelResponse`
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CloseSecureChannelResponse {
    /// Response header
    pub response_header: ResponseHeader,
}

/// A request the channel forwards without interpreting its body.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GenericRequest {
    /// Binary encoding id
    pub type_id: ExpandedNodeId,
    /// Request header
    pub request_header: RequestHeader,
    /// Encoded fields after the header
    pub body: Vec<u8>,
}

/// A response the channel forwards without interpreting its body.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GenericResponse {
    /// Binary encoding id
    pub type_id: ExpandedNodeId,
    /// Response header
    pub response_header: ResponseHeader,
    /// Encoded fields after the header
    pub body: Vec<u8>,
}

/// Any service message carried by the channel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ServiceMessage {
    /// Open or renew request
    OpenRequest(OpenSecureChannelRequest),
    /// Open or renew response
    OpenResponse(OpenSecureChannelResponse),
    /// Close request
    CloseRequest(CloseSecureChannelRequest),
    /// Close response
    CloseResponse(CloseSecureChannelResponse),
    /// Any other request
    Request(GenericRequest),
    /// Any other response, including service faults
    Response(GenericResponse),
}

impl ServiceMessage {
    /// Binary encoding id written ahead of the body.
    pub fn type_id(&self) -> ExpandedNodeId {
        match self {
            Self::OpenRequest(_) => ExpandedNodeId::ns0(type_ids::OPEN_SECURE_CHANNEL_REQUEST),
            Self::OpenResponse(_) => ExpandedNodeId::ns0(type_ids::OPEN_SECURE_CHANNEL_RESPONSE),
            Self::CloseRequest(_) => ExpandedNodeId::ns0(type_ids::CLOSE_SECURE_CHANNEL_REQUEST),
            Self::CloseResponse(_) => ExpandedNodeId::ns0(type_ids::CLOSE_SECURE_CHANNEL_RESPONSE),
            Self::Request(r) => r.type_id.clone(),
            Self::Response(r) => r.type_id.clone(),
        }
    }

    /// Frame type that carries this message.
    pub fn message_type(&self) -> MessageType {
        match self {
            Self::OpenRequest(_) | Self::OpenResponse(_) => MessageType::Open,
            Self::CloseRequest(_) | Self::CloseResponse(_) => MessageType::Close,
            Self::Request(_) | Self::Response(_) => MessageType::Message,
        }
    }

    /// Short name for logs and errors.
    pub fn name(&self) -> &'static str {
        match self {
            Self::OpenRequest(_) => "OpenSecureChannelRequest",
            Self::OpenResponse(_) => "OpenSecureChannelResponse",
            Self::CloseRequest(_) => "CloseSecureChannelRequest",
            Self::CloseResponse(_) => "CloseSecureChannelResponse",
            Self::Request(_) => "Request",
            Self::Response(_) => "Response",
        }
    }

    /// Whether this is a request.
    pub fn is_request(&self) -> bool {
        matches!(
            self,
            Self::OpenRequest(_) | Self::CloseRequest(_) | Self::Request(_)
        )
    }

    /// Request header, for requests.
    pub fn request_header(&self) -> Option<&RequestHeader> {
        match self {
            Self::OpenRequest(r) => Some(&r.request_header),
            Self::CloseRequest(r) => Some(&r.request_header),
            Self::Request(r) => Some(&r.request_header),
            _ => None,
        }
    }

    /// Mutable request header, for requests.
    pub fn request_header_mut(&mut self) -> Option<&mut RequestHeader> {
        match self {
            Self::OpenRequest(r) => Some(&mut r.request_header),
            Self::CloseRequest(r) => Some(&mut r.request_header),
            Self::Request(r) => Some(&mut r.request_header),
            _ => None,
        }
    }

    /// Response header, for responses.
    pub fn response_header(&self) -> Option<&ResponseHeader> {
        match self {
            Self::OpenResponse(r) => Some(&r.response_header),
            Self::CloseResponse(r) => Some(&r.response_header),
            Self::Response(r) => Some(&r.response_header),
            _ => None,
        }
    }

    /// Decode a reassembled body. Unknown type ids become generic requests
    /// on the server side and generic responses on the client side.
    pub fn decode(bytes: &[u8], role: Role) -> Result<Self, CodecError> {
        let mut reader = Reader::new(bytes);
        let type_id = ExpandedNodeId::decode(&mut reader)?;
        let known = if type_id.server_index == 0 && type_id.namespace_uri.is_none() {
            type_id.node_id.as_ns0_numeric()
        } else {
            None
        };

        let message = match known {
            Some(type_ids::OPEN_SECURE_CHANNEL_REQUEST) => {
                Self::OpenRequest(OpenSecureChannelRequest::decode(&mut reader)?)
            }
            Some(type_ids::OPEN_SECURE_CHANNEL_RESPONSE) => {
                Self::OpenResponse(OpenSecureChannelResponse::decode(&mut reader)?)
            }
            Some(type_ids::CLOSE_SECURE_CHANNEL_REQUEST) => {
                Self::CloseRequest(CloseSecureChannelRequest {
                    request_header: RequestHeader::decode(&mut reader)?,
                })
            }
            Some(type_ids::CLOSE_SECURE_CHANNEL_RESPONSE) => {
                Self::CloseResponse(CloseSecureChannelResponse {
                    response_header: ResponseHeader::decode(&mut reader)?,
                })
            }
            _ => match role {
                Role::Server => Self::Request(GenericRequest {
                    type_id,
                    request_header: RequestHeader::decode(&mut reader)?,
                    body: reader.rest().to_vec(),
                }),
                Role::Client => Self::Response(GenericResponse {
                    type_id,
                    response_header: ResponseHeader::decode(&mut reader)?,
                    body: reader.rest().to_vec(),
                }),
            },
        };
        Ok(message)
    }
}

impl BinaryEncode for ServiceMessage {
    fn encode(&self, buf: &mut BytesMut) {
        self.type_id().encode(buf);
        match self {
            Self::OpenRequest(r) => r.encode(buf),
            Self::OpenResponse(r) => r.encode(buf),
            Self::CloseRequest(r) => r.request_header.encode(buf),
            Self::CloseResponse(r) => r.response_header.encode(buf),
            Self::Request(r) => {
                r.request_header.encode(buf);
                buf.put_slice(&r.body);
            }
            Self::Response(r) => {
                r.response_header.encode(buf);
                buf.put_slice(&r.body);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::types::NodeId;
    use crate::domain::StatusCode;

    fn open_request() -> OpenSecureChannelRequest {
        OpenSecureChannelRequest {
            request_header: RequestHeader {
                // Whole 100ns ticks, so the timestamp survives the wire.
                timestamp: DateTime::from_timestamp(1_700_000_000, 123_456_700).unwrap(),
                request_handle: 1,
                timeout_hint: 10_000,
                ..Default::default()
            },
            client_protocol_version: 0,
            request_type: SecurityTokenRequestType::Issue,
            security_mode: MessageSecurityMode::SignAndEncrypt,
            client_nonce: Some(vec![7; 32]),
            requested_lifetime: 3_600_000,
        }
    }

    #[test]
    fn test_open_request_wire_prefix() {
        let message = ServiceMessage::OpenRequest(open_request());
        let bytes = message.to_bytes();

        // Four-byte node id for 446.
        assert_eq!(&bytes[..4], &[0x01, 0x00, 0xBE, 0x01]);
        assert_eq!(ServiceMessage::decode(&bytes, Role::Server).unwrap(), message);
    }

    #[test]
    fn test_open_response_decodes_on_either_side() {
        let message = ServiceMessage::OpenResponse(OpenSecureChannelResponse {
            response_header: ResponseHeader::new(1, StatusCode::GOOD),
            server_protocol_version: 0,
            security_token: ChannelSecurityToken {
                channel_id: 5,
                token_id: 1,
                created_at: Utc::now(),
                revised_lifetime: 600_000,
            },
            server_nonce: None,
        });
        let bytes = message.to_bytes();

        let ServiceMessage::OpenResponse(decoded) =
            ServiceMessage::decode(&bytes, Role::Client).unwrap()
        else {
            panic!("expected open response");
        };
        assert_eq!(decoded.security_token.channel_id, 5);
        assert_eq!(decoded.server_nonce, None);
    }

    #[test]
    fn test_unknown_type_id_follows_role() {
        let request = ServiceMessage::Request(GenericRequest {
            type_id: ExpandedNodeId::ns0(631),
            request_header: RequestHeader::default(),
            body: vec![1, 2, 3, 4],
        });
        let bytes = request.to_bytes();

        let ServiceMessage::Request(decoded) = ServiceMessage::decode(&bytes, Role::Server).unwrap()
        else {
            panic!("expected request");
        };
        assert_eq!(decoded.type_id.node_id, NodeId::numeric(0, 631));
        assert_eq!(decoded.body, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_invalid_security_mode_rejected() {
        let mut request = open_request();
        request.security_mode = MessageSecurityMode::None;
        let mut bytes = ServiceMessage::OpenRequest(request).to_bytes();
        // Mode follows type id(4), header(29), version(4), request type(4).
        bytes[41..45].copy_from_slice(&0u32.to_le_bytes());

        assert_eq!(
            ServiceMessage::decode(&bytes, Role::Server).unwrap_err(),
            CodecError::InvalidEnumValue {
                field: "MessageSecurityMode",
                value: 0
            }
        );
    }

    #[test]
    fn test_close_travels_in_clo_frames() {
        let close = ServiceMessage::CloseRequest(CloseSecureChannelRequest::default());
        assert_eq!(close.message_type(), MessageType::Close);
        assert!(close.is_request());
        assert!(close.response_header().is_none());
    }
}
