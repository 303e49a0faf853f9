//! # Amqlink
//!
//! A synchronous connection core for AMQP 0.9.1 brokers such as
//! [RabbitMQ](https://www.rabbitmq.com). Amqlink owns a single link to a
//! broker, drives the opening and closing handshakes, multiplexes logical
//! channels over the link, and lets any number of threads send a protocol
//! method and block until the specific reply that completes it arrives on
//! their channel.
//!
//! Amqlink is deliberately small. It builds on
//! [`amq_protocol`](https://crates.io/crates/amq-protocol) for the byte-level
//! codec and leaves concrete sockets behind the [`Transport`](io::Transport)
//! trait, so the core stays testable without a broker. Higher-level
//! channel/queue/exchange APIs belong to the layer above; frames such a layer
//! cares about are exposed through the unclaimed-frame hook.
//!
//! # Usage
//!
//! ```rust
//! # #[cfg(feature = "test_utils")] {
//! use amqlink::io::mock::ControlledTransport;
//! use amqlink::prelude::*;
//!
//! let transport = ControlledTransport::new();
//! let broker = transport.handle();
//!
//! let connection = Connection::builder()
//!     .user("guest")
//!     .password("guest")
//!     .virtual_host("/")
//!     .build(transport);
//!
//! connection.start().unwrap();
//! broker.handshake();
//! # }
//! ```
//!
//! Once the handshake has completed, [`Connection::create_channel`] opens a
//! channel and [`Connection::send_frameset`] performs a synchronous
//! round-trip on it. Connection-level failures reach a
//! [`ConnectionDelegate`](sync::ConnectionDelegate) on its own thread.
//!
//! [`Connection::create_channel`]: sync::Connection::create_channel
//! [`Connection::send_frameset`]: sync::Connection::send_frameset

#![warn(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

pub mod consts;
pub mod core;
pub mod io;
pub mod prelude;
pub mod protocol;
pub mod sync;

#[doc(inline = true)]
pub extern crate amq_protocol;
