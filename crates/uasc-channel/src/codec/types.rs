//! Built-in types carried in service bodies: node ids, date-times,
//! extension objects, diagnostics and the request and response headers.

use crate::codec::binary::{put_byte_string, put_string, BinaryDecode, BinaryEncode, Reader};
use crate::domain::{CodecError, StatusCode};
use bytes::{BufMut, BytesMut};
use chrono::{DateTime, Utc};
use std::fmt;

/// 100ns ticks between 1601-01-01 and 1970-01-01.
const UNIX_EPOCH_TICKS: i64 = 116_444_736_000_000_000;
const TICKS_PER_SECOND: i64 = 10_000_000;
const MAX_DIAGNOSTIC_DEPTH: usize = 100;

/// Identifier part of a node id.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Identifier {
    /// Numeric identifier
    Numeric(u32),
    /// String identifier
    String(String),
    /// GUID in wire byte order
    Guid([u8; 16]),
    /// Opaque byte string identifier
    Opaque(Vec<u8>),
}

/// A namespace-qualified node identifier.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct NodeId {
    /// Namespace index
    pub namespace: u16,
    /// Identifier
    pub identifier: Identifier,
}

impl NodeId {
    /// Numeric node id.
    pub const fn numeric(namespace: u16, id: u32) -> Self {
        Self {
            namespace,
            identifier: Identifier::Numeric(id),
        }
    }

    /// `ns=0;i=0`, used as "no authentication token".
    pub const fn null() -> Self {
        Self::numeric(0, 0)
    }

    /// Numeric id in namespace 0, if this is one.
    pub fn as_ns0_numeric(&self) -> Option<u32> {
        match (&self.identifier, self.namespace) {
            (Identifier::Numeric(id), 0) => Some(*id),
            _ => None,
        }
    }

    fn decode_with_mask(reader: &mut Reader<'_>, encoding: u8) -> Result<Self, CodecError> {
        let node = match encoding & 0x3F {
            0x00 => Self::numeric(0, u32::from(reader.read_u8()?)),
            0x01 => {
                let namespace = u16::from(reader.read_u8()?);
                Self::numeric(namespace, u32::from(reader.read_u16()?))
            }
            0x02 => {
                let namespace = reader.read_u16()?;
                Self::numeric(namespace, reader.read_u32()?)
            }
            0x03 => Self {
                namespace: reader.read_u16()?,
                identifier: Identifier::String(reader.read_string()?.unwrap_or_default()),
            },
            0x04 => Self {
                namespace: reader.read_u16()?,
                identifier: Identifier::Guid(reader.read_array()?),
            },
            0x05 => Self {
                namespace: reader.read_u16()?,
                identifier: Identifier::Opaque(reader.read_byte_string()?.unwrap_or_default()),
            },
            _ => return Err(CodecError::InvalidNodeIdEncoding(encoding)),
        };
        Ok(node)
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::null()
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ns={};", self.namespace)?;
        match &self.identifier {
            Identifier::Numeric(id) => write!(f, "i={id}"),
            Identifier::String(s) => write!(f, "s={s}"),
            Identifier::Guid(g) => write!(f, "g={}", hex::encode(g)),
            Identifier::Opaque(b) => write!(f, "b={}", hex::encode(b)),
        }
    }
}

impl BinaryEncode for NodeId {
    fn encode(&self, buf: &mut BytesMut) {
        match &self.identifier {
            Identifier::Numeric(id) if self.namespace == 0 && *id <= 0xFF => {
                buf.put_u8(0x00);
                buf.put_u8(*id as u8);
            }
            Identifier::Numeric(id) if self.namespace <= 0xFF && *id <= 0xFFFF => {
                buf.put_u8(0x01);
                buf.put_u8(self.namespace as u8);
                buf.put_u16_le(*id as u16);
            }
            Identifier::Numeric(id) => {
                buf.put_u8(0x02);
                buf.put_u16_le(self.namespace);
                buf.put_u32_le(*id);
            }
            Identifier::String(s) => {
                buf.put_u8(0x03);
                buf.put_u16_le(self.namespace);
                put_string(buf, Some(s));
            }
            Identifier::Guid(g) => {
                buf.put_u8(0x04);
                buf.put_u16_le(self.namespace);
                buf.put_slice(g);
            }
            Identifier::Opaque(b) => {
                buf.put_u8(0x05);
                buf.put_u16_le(self.namespace);
                put_byte_string(buf, Some(b));
            }
        }
    }
}

impl BinaryDecode for NodeId {
    fn decode(reader: &mut Reader<'_>) -> Result<Self, CodecError> {
        let encoding = reader.read_u8()?;
        if encoding & 0xC0 != 0 {
            return Err(CodecError::InvalidNodeIdEncoding(encoding));
        }
        Self::decode_with_mask(reader, encoding)
    }
}

/// Node id with optional namespace URI and server index, used as type id.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct ExpandedNodeId {
    /// Node id
    pub node_id: NodeId,
    /// Namespace URI overriding the index
    pub namespace_uri: Option<String>,
    /// Server index, 0 for the local server
    pub server_index: u32,
}

impl ExpandedNodeId {
    /// Numeric id in namespace 0.
    pub const fn ns0(id: u32) -> Self {
        Self {
            node_id: NodeId::numeric(0, id),
            namespace_uri: None,
            server_index: 0,
        }
    }
}

impl From<NodeId> for ExpandedNodeId {
    fn from(node_id: NodeId) -> Self {
        Self {
            node_id,
            namespace_uri: None,
            server_index: 0,
        }
    }
}

impl fmt::Display for ExpandedNodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.server_index != 0 {
            write!(f, "svr={};", self.server_index)?;
        }
        if let Some(uri) = &self.namespace_uri {
            write!(f, "nsu={uri};")?;
        }
        self.node_id.fmt(f)
    }
}

impl BinaryEncode for ExpandedNodeId {
    fn encode(&self, buf: &mut BytesMut) {
        let start = buf.len();
        self.node_id.encode(buf);
        if self.namespace_uri.is_some() {
            buf[start] |= 0x80;
            put_string(buf, self.namespace_uri.as_deref());
        }
        if self.server_index != 0 {
            buf[start] |= 0x40;
            buf.put_u32_le(self.server_index);
        }
    }
}

impl BinaryDecode for ExpandedNodeId {
    fn decode(reader: &mut Reader<'_>) -> Result<Self, CodecError> {
        let encoding = reader.read_u8()?;
        let node_id = NodeId::decode_with_mask(reader, encoding)?;
        let namespace_uri = if encoding & 0x80 != 0 {
            reader.read_string()?
        } else {
            None
        };
        let server_index = if encoding & 0x40 != 0 {
            reader.read_u32()?
        } else {
            0
        };
        Ok(Self {
            node_id,
            namespace_uri,
            server_index,
        })
    }
}

impl BinaryEncode for DateTime<Utc> {
    fn encode(&self, buf: &mut BytesMut) {
        let ticks = self
            .timestamp()
            .saturating_mul(TICKS_PER_SECOND)
            .saturating_add(i64::from(self.timestamp_subsec_nanos() / 100))
            .saturating_add(UNIX_EPOCH_TICKS);
        buf.put_i64_le(ticks.max(0));
    }
}

impl BinaryDecode for DateTime<Utc> {
    fn decode(reader: &mut Reader<'_>) -> Result<Self, CodecError> {
        let ticks = reader.read_i64()?.max(0) - UNIX_EPOCH_TICKS;
        let secs = ticks.div_euclid(TICKS_PER_SECOND);
        let nanos = (ticks.rem_euclid(TICKS_PER_SECOND) * 100) as u32;
        Ok(DateTime::from_timestamp(secs, nanos).unwrap_or(DateTime::<Utc>::MIN_UTC))
    }
}

/// Extension object; only the encoded form is kept.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExtensionObject {
    /// Encoding type id
    pub type_id: NodeId,
    /// Encoded body, `None` for an empty object
    pub body: Option<Vec<u8>>,
}

impl BinaryEncode for ExtensionObject {
    fn encode(&self, buf: &mut BytesMut) {
        self.type_id.encode(buf);
        match &self.body {
            Some(body) => {
                buf.put_u8(0x01);
                put_byte_string(buf, Some(body));
            }
            None => buf.put_u8(0x00),
        }
    }
}

impl BinaryDecode for ExtensionObject {
    fn decode(reader: &mut Reader<'_>) -> Result<Self, CodecError> {
        let type_id = NodeId::decode(reader)?;
        let body = match reader.read_u8()? {
            0x00 => None,
            0x01 | 0x02 => reader.read_byte_string()?,
            other => {
                return Err(CodecError::InvalidEnumValue {
                    field: "ExtensionObject encoding",
                    value: u32::from(other),
                })
            }
        };
        Ok(Self { type_id, body })
    }
}

/// Service diagnostics.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DiagnosticInfo {
    /// Index into the string table
    pub symbolic_id: Option<i32>,
    /// Index into the string table
    pub namespace_uri: Option<i32>,
    /// Index into the string table
    pub locale: Option<i32>,
    /// Index into the string table
    pub localized_text: Option<i32>,
    /// Free text
    pub additional_info: Option<String>,
    /// Status of an inner operation
    pub inner_status_code: Option<StatusCode>,
    /// Diagnostics of an inner operation
    pub inner_diagnostic_info: Option<Box<DiagnosticInfo>>,
}

impl DiagnosticInfo {
    fn mask(&self) -> u8 {
        let mut mask = 0;
        if self.symbolic_id.is_some() {
            mask |= 0x01;
        }
        if self.namespace_uri.is_some() {
            mask |= 0x02;
        }
        if self.localized_text.is_some() {
            mask |= 0x04;
        }
        if self.locale.is_some() {
            mask |= 0x08;
        }
        if self.additional_info.is_some() {
            mask |= 0x10;
        }
        if self.inner_status_code.is_some() {
            mask |= 0x20;
        }
        if self.inner_diagnostic_info.is_some() {
            mask |= 0x40;
        }
        mask
    }

    fn decode_nested(reader: &mut Reader<'_>, depth: usize) -> Result<Self, CodecError> {
        if depth > MAX_DIAGNOSTIC_DEPTH {
            return Err(CodecError::NestingTooDeep(MAX_DIAGNOSTIC_DEPTH));
        }
        let mask = reader.read_u8()?;
        let mut info = Self::default();
        if mask & 0x01 != 0 {
            info.symbolic_id = Some(reader.read_i32()?);
        }
        if mask & 0x02 != 0 {
            info.namespace_uri = Some(reader.read_i32()?);
        }
        if mask & 0x08 != 0 {
            info.locale = Some(reader.read_i32()?);
        }
        if mask & 0x04 != 0 {
            info.localized_text = Some(reader.read_i32()?);
        }
        if mask & 0x10 != 0 {
            info.additional_info = reader.read_string()?;
        }
        if mask & 0x20 != 0 {
            info.inner_status_code = Some(StatusCode(reader.read_u32()?));
        }
        if mask & 0x40 != 0 {
            info.inner_diagnostic_info = Some(Box::new(Self::decode_nested(reader, depth + 1)?));
        }
        Ok(info)
    }
}

impl BinaryEncode for DiagnosticInfo {
    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(self.mask());
        for value in [self.symbolic_id, self.namespace_uri, self.locale, self.localized_text]
            .into_iter()
            .flatten()
        {
            buf.put_i32_le(value);
        }
        if let Some(info) = &self.additional_info {
            put_string(buf, Some(info));
        }
        if let Some(code) = self.inner_status_code {
            buf.put_u32_le(code.0);
        }
        if let Some(inner) = &self.inner_diagnostic_info {
            inner.encode(buf);
        }
    }
}

impl BinaryDecode for DiagnosticInfo {
    fn decode(reader: &mut Reader<'_>) -> Result<Self, CodecError> {
        Self::decode_nested(reader, 0)
    }
}

/// Common header of every service request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestHeader {
    /// Session authentication token
    pub authentication_token: NodeId,
    /// Time the request was sent
    pub timestamp: DateTime<Utc>,
    /// Client-assigned handle echoed in the response
    pub request_handle: u32,
    /// Requested diagnostics bit mask
    pub return_diagnostics: u32,
    /// Audit log entry id
    pub audit_entry_id: Option<String>,
    /// Timeout the server should apply, in milliseconds
    pub timeout_hint: u32,
    /// Reserved
    pub additional_header: ExtensionObject,
}

impl Default for RequestHeader {
    fn default() -> Self {
        Self {
            authentication_token: NodeId::null(),
            timestamp: Utc::now(),
            request_handle: 0,
            return_diagnostics: 0,
            audit_entry_id: None,
            timeout_hint: 0,
            additional_header: ExtensionObject::default(),
        }
    }
}

impl BinaryEncode for RequestHeader {
    fn encode(&self, buf: &mut BytesMut) {
        self.authentication_token.encode(buf);
        self.timestamp.encode(buf);
        buf.put_u32_le(self.request_handle);
        buf.put_u32_le(self.return_diagnostics);
        put_string(buf, self.audit_entry_id.as_deref());
        buf.put_u32_le(self.timeout_hint);
        self.additional_header.encode(buf);
    }
}

impl BinaryDecode for RequestHeader {
    fn decode(reader: &mut Reader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            authentication_token: NodeId::decode(reader)?,
            timestamp: DateTime::decode(reader)?,
            request_handle: reader.read_u32()?,
            return_diagnostics: reader.read_u32()?,
            audit_entry_id: reader.read_string()?,
            timeout_hint: reader.read_u32()?,
            additional_header: ExtensionObject::decode(reader)?,
        })
    }
}

/// Common header of every service response.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResponseHeader {
    /// Time the response was sent
    pub timestamp: DateTime<Utc>,
    /// Handle from the request
    pub request_handle: u32,
    /// Overall result of the service call
    pub service_result: StatusCode,
    /// Service-level diagnostics
    pub service_diagnostics: DiagnosticInfo,
    /// Strings referenced by diagnostics
    pub string_table: Vec<String>,
    /// Reserved
    pub additional_header: ExtensionObject,
}

impl ResponseHeader {
    /// Header answering `request_handle` with `service_result`.
    pub fn new(request_handle: u32, service_result: StatusCode) -> Self {
        Self {
            timestamp: Utc::now(),
            request_handle,
            service_result,
            service_diagnostics: DiagnosticInfo::default(),
            string_table: Vec::new(),
            additional_header: ExtensionObject::default(),
        }
    }
}

impl Default for ResponseHeader {
    fn default() -> Self {
        Self::new(0, StatusCode::GOOD)
    }
}

impl BinaryEncode for ResponseHeader {
    fn encode(&self, buf: &mut BytesMut) {
        self.timestamp.encode(buf);
        buf.put_u32_le(self.request_handle);
        buf.put_u32_le(self.service_result.0);
        self.service_diagnostics.encode(buf);
        buf.put_i32_le(i32::try_from(self.string_table.len()).unwrap_or(i32::MAX));
        for s in &self.string_table {
            put_string(buf, Some(s));
        }
        self.additional_header.encode(buf);
    }
}

impl BinaryDecode for ResponseHeader {
    fn decode(reader: &mut Reader<'_>) -> Result<Self, CodecError> {
        let timestamp = DateTime::decode(reader)?;
        let request_handle = reader.read_u32()?;
        let service_result = StatusCode(reader.read_u32()?);
        let service_diagnostics = DiagnosticInfo::decode(reader)?;
        let count = reader.read_array_length()?.unwrap_or(0);
        let mut string_table = Vec::with_capacity(count);
        for _ in 0..count {
            string_table.push(reader.read_string()?.unwrap_or_default());
        }
        Ok(Self {
            timestamp,
            request_handle,
            service_result,
            service_diagnostics,
            string_table,
            additional_header: ExtensionObject::decode(reader)?,
        })
    }
}
