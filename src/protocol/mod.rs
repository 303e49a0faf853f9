//! # Protocol entities
//!
//! A thin layer over [`amq_protocol`]: method type tags used to match
//! replies against pending waits, the [`Frameset`] unit that travels between
//! callers and the transport, and the bridge into the codec's frame
//! generator.
//!
//! The core treats method payloads as opaque values of
//! [`AMQPClass`](amq_protocol::protocol::AMQPClass); only the
//! [`MethodType`] tag participates in dispatch decisions.

mod codec;
mod frameset;
mod method;

pub use frameset::Frameset;
pub use method::MethodType;

pub(crate) use codec::{encode_frame, protocol_header};
