//! Typed service bodies on top of the generic request and response.

use crate::codec::{ExpandedNodeId, Reader};
use crate::domain::CodecError;
use bytes::BytesMut;

/// A service request with a known binary encoding id.
pub trait ServiceRequest: Send {
    /// Namespace 0 binary encoding id.
    const TYPE_ID: u32;

    /// Encode the fields that follow the request header.
    fn encode_body(&self, buf: &mut BytesMut);

    /// Full type id.
    fn type_id() -> ExpandedNodeId {
        ExpandedNodeId::ns0(Self::TYPE_ID)
    }
}

/// A service response with a known binary encoding id.
pub trait ServiceResponse: Sized + Send {
    /// Namespace 0 binary encoding id.
    const TYPE_ID: u32;

    /// Decode the fields that follow the response header.
    fn decode_body(reader: &mut Reader<'_>) -> Result<Self, CodecError>;
}
