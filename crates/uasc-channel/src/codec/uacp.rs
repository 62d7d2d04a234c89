//! Connection protocol messages exchanged before the secure channel opens.

use crate::codec::binary::{put_string, BinaryDecode, BinaryEncode, Reader};
use crate::domain::{CodecError, StatusCode};
use bytes::{BufMut, BytesMut};

/// Length of the connection protocol header.
pub const UACP_HEADER_LENGTH: usize = 8;
/// Protocol version spoken by this crate.
pub const PROTOCOL_VERSION: u32 = 0;

/// Connection protocol frame type.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UacpMessageType {
    /// `HEL`
    Hello,
    /// `ACK`
    Acknowledge,
    /// `ERR`
    Error,
    /// `RHE`
    ReverseHello,
}

impl UacpMessageType {
    /// Three-byte tag.
    pub fn tag(&self) -> &'static [u8; 3] {
        match self {
            Self::Hello => b"HEL",
            Self::Acknowledge => b"ACK",
            Self::Error => b"ERR",
            Self::ReverseHello => b"RHE",
        }
    }

    /// Parse a tag, `None` for secure channel frame types.
    pub fn from_tag(tag: &[u8]) -> Option<Self> {
        match tag {
            b"HEL" => Some(Self::Hello),
            b"ACK" => Some(Self::Acknowledge),
            b"ERR" => Some(Self::Error),
            b"RHE" => Some(Self::ReverseHello),
            _ => None,
        }
    }
}

/// Wrap an encoded body into a final connection protocol frame.
pub fn frame(message_type: UacpMessageType, body: &impl BinaryEncode) -> BytesMut {
    let mut buf = BytesMut::with_capacity(64);
    buf.put_slice(message_type.tag());
    buf.put_u8(b'F');
    buf.put_u32_le(0);
    body.encode(&mut buf);
    let size = buf.len() as u32;
    buf[4..8].copy_from_slice(&size.to_le_bytes());
    buf
}

/// `HEL`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Hello {
    /// Client protocol version
    pub protocol_version: u32,
    /// Largest chunk the client accepts
    pub receive_buffer_size: u32,
    /// Largest chunk the client sends
    pub send_buffer_size: u32,
    /// Largest message the client accepts, 0 for no limit
    pub max_message_size: u32,
    /// Most chunks per message the client accepts, 0 for no limit
    pub max_chunk_count: u32,
    /// Endpoint the client connects to
    pub endpoint_url: String,
}

impl BinaryEncode for Hello {
    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u32_le(self.protocol_version);
        buf.put_u32_le(self.receive_buffer_size);
        buf.put_u32_le(self.send_buffer_size);
        buf.put_u32_le(self.max_message_size);
        buf.put_u32_le(self.max_chunk_count);
        put_string(buf, Some(&self.endpoint_url));
    }
}

impl BinaryDecode for Hello {
    fn decode(reader: &mut Reader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            protocol_version: reader.read_u32()?,
            receive_buffer_size: reader.read_u32()?,
            send_buffer_size: reader.read_u32()?,
            max_message_size: reader.read_u32()?,
            max_chunk_count: reader.read_u32()?,
            endpoint_url: reader.read_string()?.unwrap_or_default(),
        })
    }
}

/// `ACK`
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Acknowledge {
    /// Server protocol version
    pub protocol_version: u32,
    /// Largest chunk the server accepts
    pub receive_buffer_size: u32,
    /// Largest chunk the server sends
    pub send_buffer_size: u32,
    /// Largest message the server accepts, 0 for no limit
    pub max_message_size: u32,
    /// Most chunks per message the server accepts, 0 for no limit
    pub max_chunk_count: u32,
}

impl BinaryEncode for Acknowledge {
    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u32_le(self.protocol_version);
        buf.put_u32_le(self.receive_buffer_size);
        buf.put_u32_le(self.send_buffer_size);
        buf.put_u32_le(self.max_message_size);
        buf.put_u32_le(self.max_chunk_count);
    }
}

impl BinaryDecode for Acknowledge {
    fn decode(reader: &mut Reader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            protocol_version: reader.read_u32()?,
            receive_buffer_size: reader.read_u32()?,
            send_buffer_size: reader.read_u32()?,
            max_message_size: reader.read_u32()?,
            max_chunk_count: reader.read_u32()?,
        })
    }
}

/// `ERR`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ErrorMessage {
    /// Error code
    pub error: StatusCode,
    /// Reason text
    pub reason: String,
}

impl BinaryEncode for ErrorMessage {
    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u32_le(self.error.0);
        put_string(buf, Some(&self.reason));
    }
}

impl BinaryDecode for ErrorMessage {
    fn decode(reader: &mut Reader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            error: StatusCode(reader.read_u32()?),
            reason: reader.read_string()?.unwrap_or_default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hello_frame() {
        let hello = Hello {
            protocol_version: PROTOCOL_VERSION,
            receive_buffer_size: 0xFFFF,
            send_buffer_size: 0xFFFF,
            max_message_size: 0,
            max_chunk_count: 0,
            endpoint_url: "opc.tcp://localhost:4840".into(),
        };
        let buf = frame(UacpMessageType::Hello, &hello);

        assert_eq!(&buf[..4], b"HELF");
        assert_eq!(u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]) as usize, buf.len());
        assert_eq!(Hello::from_bytes(&buf[UACP_HEADER_LENGTH..]).unwrap(), hello);
    }

    #[test]
    fn test_error_message() {
        let err = ErrorMessage {
            error: StatusCode::BAD_TCP_MESSAGE_TOO_LARGE,
            reason: "too large".into(),
        };
        let buf = frame(UacpMessageType::Error, &err);

        assert_eq!(UacpMessageType::from_tag(&buf[..3]), Some(UacpMessageType::Error));
        assert_eq!(ErrorMessage::from_bytes(&buf[UACP_HEADER_LENGTH..]).unwrap(), err);
    }

    #[test]
    fn test_secure_channel_tags_are_not_uacp() {
        assert_eq!(UacpMessageType::from_tag(b"MSG"), None);
    }
}
