//! Frame headers: message header, security headers, sequence header and the
//! abort body.

use crate::codec::binary::{byte_string_len, put_byte_string, put_string, BinaryDecode, BinaryEncode, Reader};
use crate::domain::{CodecError, StatusCode};
use bytes::{BufMut, BytesMut};
use std::fmt;

/// Length of the fixed message header.
pub const HEADER_LENGTH: usize = 12;
/// Length of the sequence header.
pub const SEQUENCE_HEADER_LENGTH: usize = 8;
/// Offset of the message size field.
pub const MESSAGE_SIZE_OFFSET: usize = 4;

/// Secure conversation message type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MessageType {
    /// `OPN`: OpenSecureChannel request or response
    Open,
    /// `MSG`: any other service
    Message,
    /// `CLO`: CloseSecureChannel request
    Close,
}

impl MessageType {
    /// Three-letter wire tag.
    pub fn tag(&self) -> &'static [u8; 3] {
        match self {
            Self::Open => b"OPN",
            Self::Message => b"MSG",
            Self::Close => b"CLO",
        }
    }

    /// Parse a wire tag.
    pub fn from_tag(tag: [u8; 3]) -> Result<Self, CodecError> {
        match &tag {
            b"OPN" => Ok(Self::Open),
            b"MSG" => Ok(Self::Message),
            b"CLO" => Ok(Self::Close),
            _ => Err(CodecError::InvalidMessageType(tag)),
        }
    }

    /// Whether frames of this type carry the asymmetric security header.
    pub fn is_asymmetric(&self) -> bool {
        matches!(self, Self::Open)
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Open => "OPN",
            Self::Message => "MSG",
            Self::Close => "CLO",
        })
    }
}

/// Position of a chunk within its message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ChunkType {
    /// `C`: more chunks follow
    Intermediate,
    /// `F`: last chunk
    Final,
    /// `A`: the sender abandoned the message
    Abort,
}

impl ChunkType {
    /// Wire byte.
    pub fn as_u8(&self) -> u8 {
        match self {
            Self::Intermediate => b'C',
            Self::Final => b'F',
            Self::Abort => b'A',
        }
    }

    /// Parse a wire byte.
    pub fn from_u8(value: u8) -> Result<Self, CodecError> {
        match value {
            b'C' => Ok(Self::Intermediate),
            b'F' => Ok(Self::Final),
            b'A' => Ok(Self::Abort),
            other => Err(CodecError::InvalidChunkType(other)),
        }
    }
}

/// Fixed 12-byte message header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Header {
    /// Message type
    pub message_type: MessageType,
    /// Chunk type
    pub chunk_type: ChunkType,
    /// Total frame length including this header
    pub message_size: u32,
    /// Secure channel id
    pub secure_channel_id: u32,
}

impl Header {
    /// Header with a size to be patched later.
    pub fn new(message_type: MessageType, chunk_type: ChunkType, secure_channel_id: u32) -> Self {
        Self {
            message_type,
            chunk_type,
            message_size: 0,
            secure_channel_id,
        }
    }
}

impl BinaryEncode for Header {
    fn encode(&self, buf: &mut BytesMut) {
        buf.put_slice(self.message_type.tag());
        buf.put_u8(self.chunk_type.as_u8());
        buf.put_u32_le(self.message_size);
        buf.put_u32_le(self.secure_channel_id);
    }
}

impl BinaryDecode for Header {
    fn decode(reader: &mut Reader<'_>) -> Result<Self, CodecError> {
        let message_type = MessageType::from_tag(reader.read_array()?)?;
        let chunk_type = ChunkType::from_u8(reader.read_u8()?)?;
        Ok(Self {
            message_type,
            chunk_type,
            message_size: reader.read_u32()?,
            secure_channel_id: reader.read_u32()?,
        })
    }
}

/// Security header of `OPN` frames.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AsymmetricSecurityHeader {
    /// Security policy URI
    pub security_policy_uri: String,
    /// DER certificate of the sender
    pub sender_certificate: Option<Vec<u8>>,
    /// SHA-1 thumbprint of the receiver's certificate
    pub receiver_thumbprint: Option<Vec<u8>>,
}

impl AsymmetricSecurityHeader {
    /// Encoded length.
    pub fn encoded_len(&self) -> usize {
        byte_string_len(Some(self.security_policy_uri.as_bytes()))
            + byte_string_len(self.sender_certificate.as_deref())
            + byte_string_len(self.receiver_thumbprint.as_deref())
    }
}

impl BinaryEncode for AsymmetricSecurityHeader {
    fn encode(&self, buf: &mut BytesMut) {
        put_string(buf, Some(&self.security_policy_uri));
        put_byte_string(buf, self.sender_certificate.as_deref());
        put_byte_string(buf, self.receiver_thumbprint.as_deref());
    }
}

impl BinaryDecode for AsymmetricSecurityHeader {
    fn decode(reader: &mut Reader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            security_policy_uri: reader.read_string()?.unwrap_or_default(),
            sender_certificate: reader.read_byte_string()?,
            receiver_thumbprint: reader.read_byte_string()?,
        })
    }
}

/// Security header of `MSG` and `CLO` frames.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SymmetricSecurityHeader {
    /// Security token the frame is secured with
    pub token_id: u32,
}

/// Either security header.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SecurityHeader {
    /// `OPN`
    Asymmetric(AsymmetricSecurityHeader),
    /// `MSG` / `CLO`
    Symmetric(SymmetricSecurityHeader),
}

impl SecurityHeader {
    /// Encoded length.
    pub fn encoded_len(&self) -> usize {
        match self {
            Self::Asymmetric(h) => h.encoded_len(),
            Self::Symmetric(_) => 4,
        }
    }

    /// Decode the header matching `message_type`.
    pub fn decode_for(message_type: MessageType, reader: &mut Reader<'_>) -> Result<Self, CodecError> {
        if message_type.is_asymmetric() {
            Ok(Self::Asymmetric(AsymmetricSecurityHeader::decode(reader)?))
        } else {
            Ok(Self::Symmetric(SymmetricSecurityHeader {
                token_id: reader.read_u32()?,
            }))
        }
    }
}

impl BinaryEncode for SecurityHeader {
    fn encode(&self, buf: &mut BytesMut) {
        match self {
            Self::Asymmetric(h) => h.encode(buf),
            Self::Symmetric(h) => buf.put_u32_le(h.token_id),
        }
    }
}

/// Sequence header at the start of the secured body.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SequenceHeader {
    /// Per-chunk sequence number
    pub sequence_number: u32,
    /// Correlates all chunks of a request and its response
    pub request_id: u32,
}

impl BinaryEncode for SequenceHeader {
    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u32_le(self.sequence_number);
        buf.put_u32_le(self.request_id);
    }
}

impl BinaryDecode for SequenceHeader {
    fn decode(reader: &mut Reader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            sequence_number: reader.read_u32()?,
            request_id: reader.read_u32()?,
        })
    }
}

/// Body of an abort chunk.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MessageAbort {
    /// Reason code
    pub error: StatusCode,
    /// Reason text
    pub reason: Option<String>,
}

impl BinaryEncode for MessageAbort {
    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u32_le(self.error.0);
        put_string(buf, self.reason.as_deref());
    }
}

impl BinaryDecode for MessageAbort {
    fn decode(reader: &mut Reader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            error: StatusCode(reader.read_u32()?),
            reason: reader.read_string()?,
        })
    }
}

/// A received frame split at the security header. The body is still
/// secured.
#[derive(Clone, Debug)]
pub struct RawChunk<'a> {
    /// Message header
    pub header: Header,
    /// Security header
    pub security_header: SecurityHeader,
    /// Length of message header plus security header
    pub header_length: usize,
    /// The complete frame
    pub frame: &'a [u8],
}

impl<'a> RawChunk<'a> {
    /// Split `frame` into headers and secured body.
    ///
    /// # Errors
    ///
    /// Fails if the headers are malformed or the size field disagrees with
    /// the frame length.
    pub fn parse(frame: &'a [u8]) -> Result<Self, CodecError> {
        let mut reader = Reader::new(frame);
        let header = Header::decode(&mut reader)?;
        if header.message_size as usize != frame.len() {
            return Err(CodecError::SizeMismatch {
                declared: header.message_size,
                actual: frame.len(),
            });
        }
        let security_header = SecurityHeader::decode_for(header.message_type, &mut reader)?;
        let header_length = frame.len() - reader.remaining();

        Ok(Self {
            header,
            security_header,
            header_length,
            frame,
        })
    }

    /// Bytes after the security header.
    pub fn body(&self) -> &'a [u8] {
        &self.frame[self.header_length..]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_layout() {
        let header = Header {
            message_type: MessageType::Message,
            chunk_type: ChunkType::Final,
            message_size: 0x0102_0304,
            secure_channel_id: 7,
        };
        let buf = header.to_bytes();

        assert_eq!(&buf[..], b"MSGF\x04\x03\x02\x01\x07\x00\x00\x00");
        assert_eq!(Header::from_bytes(&buf).unwrap(), header);
    }

    #[test]
    fn test_unknown_message_type() {
        assert_eq!(
            Header::from_bytes(b"HELF\x0c\x00\x00\x00\x00\x00\x00\x00").unwrap_err(),
            CodecError::InvalidMessageType(*b"HEL")
        );
    }

    #[test]
    fn test_unknown_chunk_type() {
        assert_eq!(
            Header::from_bytes(b"MSGX\x0c\x00\x00\x00\x00\x00\x00\x00").unwrap_err(),
            CodecError::InvalidChunkType(b'X')
        );
    }

    #[test]
    fn test_asymmetric_header_length() {
        let header = AsymmetricSecurityHeader {
            security_policy_uri: "uri".into(),
            sender_certificate: Some(vec![1, 2]),
            receiver_thumbprint: None,
        };
        assert_eq!(header.encoded_len(), header.to_bytes().len());
        assert_eq!(header.encoded_len(), 4 + 3 + 4 + 2 + 4);
    }

    #[test]
    fn test_raw_chunk_parse() {
        let mut buf = BytesMut::new();
        Header {
            message_type: MessageType::Close,
            chunk_type: ChunkType::Final,
            message_size: 24,
            secure_channel_id: 3,
        }
        .encode(&mut buf);
        SecurityHeader::Symmetric(SymmetricSecurityHeader { token_id: 9 }).encode(&mut buf);
        SequenceHeader {
            sequence_number: 1,
            request_id: 2,
        }
        .encode(&mut buf);

        let chunk = RawChunk::parse(&buf).unwrap();
        assert_eq!(chunk.header_length, 16);
        assert_eq!(
            chunk.security_header,
            SecurityHeader::Symmetric(SymmetricSecurityHeader { token_id: 9 })
        );
        assert_eq!(chunk.body().len(), SEQUENCE_HEADER_LENGTH);
    }

    #[test]
    fn test_raw_chunk_size_mismatch() {
        let mut buf = Header {
            message_type: MessageType::Message,
            chunk_type: ChunkType::Final,
            message_size: 99,
            secure_channel_id: 0,
        }
        .to_bytes();
        buf.put_u32_le(0);

        assert_eq!(
            RawChunk::parse(&buf).unwrap_err(),
            CodecError::SizeMismatch {
                declared: 99,
                actual: 16
            }
        );
    }

    #[test]
    fn test_abort_body() {
        let abort = MessageAbort {
            error: StatusCode::BAD_TCP_MESSAGE_TOO_LARGE,
            reason: Some("too big".into()),
        };
        assert_eq!(MessageAbort::from_bytes(&abort.to_bytes()).unwrap(), abort);
    }
}
