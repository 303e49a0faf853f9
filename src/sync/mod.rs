//! # Synchronous connection API
//!
//! A [`Connection`] is built from a [`Transport`](crate::io::Transport) via
//! [`Connection::builder`] and opened with the non-blocking
//! [`Connection::start`], which drives the protocol handshake on a dedicated
//! thread. Once open, any number of threads may call
//! [`Connection::send_frameset`] or [`Connection::create_channel`]
//! concurrently; each call blocks its own thread until the awaited reply
//! arrives on its channel, a connection-level failure occurs, or the
//! configured sync timeout elapses.
//!
//! Inbound frames are dispatched from the transport's context: channel-0
//! close traffic feeds the lifecycle state machine, everything else wakes
//! the matching pending wait. Frames nobody claims are logged and handed to
//! the unclaimed-frame hook for a higher layer to pick up.
//!
//! Connection-level failures additionally reach the
//! [`ConnectionDelegate`] on its own delivery thread, decoupled from
//! whichever context produced the error.

mod connection;
mod delegate;
mod handshake;
mod registry;
mod state;

pub use connection::{Connection, ConnectionBuilder, UnclaimedFrameHandler};
pub use delegate::ConnectionDelegate;
pub use state::ConnectionState;
