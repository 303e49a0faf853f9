//! # Errors
//!
//! All fallible operations in this crate return [`Result`]. Errors fall into
//! two scopes:
//!
//! * *Operation-scoped* errors ([`Error::Io`] on a write, [`Error::Timeout`],
//!   [`Error::ChannelsExhausted`], [`Error::WaitInProgress`]) fail the call
//!   that caused them and are additionally recorded as the connection's last
//!   error.
//! * *Connection-scoped* errors ([`Error::Io`] on connect,
//!   [`Error::ServerClosed`], [`Error::Closed`]) are broadcast to every
//!   outstanding reply wait and to the connection delegate.
//!
//! Errors are cheap to clone so a single failure can be fanned out to many
//! waiting callers; I/O sources are therefore wrapped in [`Arc`].

use std::sync::Arc;

use amq_protocol::types::ChannelId;

use crate::protocol::MethodType;

/// Common result type returned by fallible operations of this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// All errors reported by this crate.
#[derive(Clone, Debug, thiserror::Error)]
pub enum Error {
    /// Transport-level I/O failure.
    ///
    /// On connect this is fatal to the connection; on write it fails the
    /// operation that issued the frame.
    #[error("{0}")]
    Io(Arc<std::io::Error>),

    /// A frame could not be serialized.
    #[error("failed to encode frame: {0}")]
    Codec(String),

    /// The transport is not connected.
    #[error("transport is not connected")]
    NotConnected,

    /// The expected reply did not arrive within the wait timeout.
    #[error("Timed out waiting for {expected}")]
    Timeout {
        /// Method type the wait was registered for.
        expected: MethodType,
    },

    /// A synchronous wait is already registered on the channel.
    ///
    /// Each channel admits at most one outstanding wait; a second caller must
    /// not be parked behind the first.
    #[error("a reply wait is already in progress on channel {channel}")]
    WaitInProgress {
        /// Channel carrying the conflicting wait.
        channel: ChannelId,
    },

    /// Every channel number up to the negotiated `channel-max` is allocated.
    #[error("channel numbers exhausted: channel-max is {max}")]
    ChannelsExhausted {
        /// Negotiated `channel-max`.
        max: u16,
    },

    /// The broker closed the connection.
    #[error("server closed connection: {code} {text}")]
    ServerClosed {
        /// AMQP reply code.
        code: u16,
        /// Broker-supplied reply text.
        text: String,
    },

    /// The connection is closed and can no longer carry traffic.
    #[error("connection is closed")]
    Closed,
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(Arc::new(err))
    }
}

///////////////////////////////////////////////////////////////////////////////
//                                  Tests                                    //
///////////////////////////////////////////////////////////////////////////////
