//! Ports: the traits the channel engine depends on or exposes.

pub mod service;
pub mod transport;

pub use service::{ServiceRequest, ServiceResponse};
pub use transport::{Transport, TransportLimits};
