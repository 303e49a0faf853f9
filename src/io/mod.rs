//! # Transport boundary
//!
//! The connection core does not own sockets. Concrete transports (TCP, TLS,
//! or the scripted [`mock`] used in tests) implement [`Transport`] and are
//! handed a [`FrameProducer`] on connect: the inbound half they drive with
//! every fully decoded frame. The codec guarantees whole frames, so the core
//! never sees partial input.
//!
//! The producer runs dispatch on whatever context the transport invokes it
//! from; that context is treated as concurrent with every caller thread.

use std::sync::Weak;

use amq_protocol::protocol::AMQPClass;
use amq_protocol::types::ChannelId;

use crate::core::error::Result;

#[cfg(any(test, feature = "test_utils"))]
pub mod mock;

/// A bidirectional byte link to a broker.
///
/// Errors returned from [`connect`](Transport::connect) are fatal to the
/// connection and are never retried. Errors returned from
/// [`write`](Transport::write) fail the operation that issued the frame and
/// become the connection's last error.
pub trait Transport: Send {
    /// Establishes the link and hands over the inbound half.
    ///
    /// The transport must invoke [`FrameProducer::produce`] once per decoded
    /// inbound frame for as long as the link is up.
    fn connect(&mut self, producer: FrameProducer) -> Result<()>;

    /// Writes already-encoded bytes to the link.
    fn write(&mut self, bytes: &[u8]) -> Result<()>;

    /// Whether the link is currently established.
    ///
    /// Observes teardown after a close or failure.
    fn is_connected(&self) -> bool;

    /// Tears the link down. Must be idempotent.
    fn disconnect(&mut self);
}

/// Receiving end of a connection, implemented by its internals.
pub(crate) trait FrameSink: Send + Sync {
    fn deliver(&self, channel: ChannelId, method: AMQPClass);
}

/// Inbound half of a connection, handed to the [`Transport`] on connect.
///
/// Cloning is cheap. The producer holds a weak reference to the connection:
/// frames delivered after the connection is gone are silently dropped, so a
/// lingering transport reader cannot keep a closed connection alive.
#[derive(Clone, Debug)]
pub struct FrameProducer {
    sink: Weak<dyn FrameSink>,
}

impl FrameProducer {
    pub(crate) fn new(sink: Weak<dyn FrameSink>) -> Self {
        Self { sink }
    }

    /// Delivers one decoded inbound frame on the caller's context.
    pub fn produce(&self, channel: ChannelId, method: AMQPClass) {
        if let Some(sink) = self.sink.upgrade() {
            sink.deliver(channel, method);
        } else {
            log::trace!("dropping inbound frame on channel {channel}: connection is gone");
        }
    }
}
