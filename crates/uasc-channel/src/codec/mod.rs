//! Binary encoding of frames, headers and service messages.

pub mod binary;
pub mod header;
pub mod service;
pub mod types;
pub mod uacp;

pub use binary::{BinaryDecode, BinaryEncode, Reader};
pub use header::{
    AsymmetricSecurityHeader, ChunkType, Header, MessageAbort, MessageType, RawChunk,
    SecurityHeader, SequenceHeader, SymmetricSecurityHeader, HEADER_LENGTH,
    SEQUENCE_HEADER_LENGTH,
};
pub use service::{
    type_ids, ChannelSecurityToken, CloseSecureChannelRequest, CloseSecureChannelResponse,
    GenericRequest, GenericResponse, OpenSecureChannelRequest, OpenSecureChannelResponse,
    SecurityTokenRequestType, ServiceMessage,
};
pub use types::{
    DiagnosticInfo, ExpandedNodeId, ExtensionObject, Identifier, NodeId, RequestHeader,
    ResponseHeader,
};
