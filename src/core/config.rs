//! # Connection configuration
//!
//! [`ConnectionConfig`] bundles the credentials and tuning a connection is
//! constructed with. Configurations are dormant values: they can be cloned
//! and inspected freely, while connections own runtime state that cannot.
//!
//! Tuning values are *requests*. During the opening handshake the broker
//! announces its own limits in `connection.tune` and the effective values are
//! produced by [`Tuning::negotiate`].

use std::fmt::{Debug, Formatter};
use std::time::Duration;

use amq_protocol::types::{AMQPValue, FieldTable, LongString, ShortString};

use crate::consts::{
    DEFAULT_CHANNEL_MAX, DEFAULT_FRAME_MAX, DEFAULT_HEARTBEAT, DEFAULT_SYNC_TIMEOUT, DEFAULT_VHOST,
};

/// Credentials and limits requested for a broker connection.
///
/// Built through [`ConnectionBuilder`](crate::sync::ConnectionBuilder).
#[derive(Clone)]
pub struct ConnectionConfig {
    pub(crate) user: String,
    pub(crate) password: String,
    pub(crate) virtual_host: String,
    pub(crate) tuning: Tuning,
    pub(crate) sync_timeout: Duration,
}

impl ConnectionConfig {
    /// User name presented during authentication.
    pub fn user(&self) -> &str {
        &self.user
    }

    /// Virtual host requested in `connection.open`.
    pub fn virtual_host(&self) -> &str {
        &self.virtual_host
    }

    /// Tuning values requested from the broker.
    pub fn tuning(&self) -> Tuning {
        self.tuning
    }

    /// Timeout applied to every synchronous reply wait.
    ///
    /// A zero timeout makes a wait fail immediately unless its reply has
    /// already been delivered.
    pub fn sync_timeout(&self) -> Duration {
        self.sync_timeout
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            user: "guest".into(),
            password: "guest".into(),
            virtual_host: DEFAULT_VHOST.into(),
            tuning: Tuning::default(),
            sync_timeout: DEFAULT_SYNC_TIMEOUT,
        }
    }
}

impl Debug for ConnectionConfig {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("user", &self.user)
            .field("password", &"******")
            .field("virtual_host", &self.virtual_host)
            .field("tuning", &self.tuning)
            .field("sync_timeout", &self.sync_timeout)
            .finish()
    }
}

/// Connection limits exchanged during `connection.tune` negotiation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Tuning {
    /// Highest channel number; `0` means no limit.
    pub channel_max: u16,
    /// Largest frame size in bytes; `0` means no limit.
    pub frame_max: u32,
    /// Heartbeat interval in seconds; `0` disables heartbeats.
    pub heartbeat: u16,
}

impl Default for Tuning {
    fn default() -> Self {
        Self {
            channel_max: DEFAULT_CHANNEL_MAX,
            frame_max: DEFAULT_FRAME_MAX,
            heartbeat: DEFAULT_HEARTBEAT,
        }
    }
}

impl Tuning {
    /// Clamps the requested values against the broker's announced `server`
    /// limits.
    ///
    /// For `channel-max` and `frame-max` zero means "no limit", so the
    /// result is the smaller of the two non-zero values. Heartbeats are
    /// disabled as soon as either side asks for zero.
    pub fn negotiate(&self, server: &Tuning) -> Tuning {
        fn limit<T: Ord + Default + Copy>(client: T, server: T) -> T {
            match (client == T::default(), server == T::default()) {
                (true, _) => server,
                (_, true) => client,
                _ => client.min(server),
            }
        }

        Tuning {
            channel_max: limit(self.channel_max, server.channel_max),
            frame_max: limit(self.frame_max, server.frame_max),
            heartbeat: if self.heartbeat == 0 || server.heartbeat == 0 {
                0
            } else {
                self.heartbeat.min(server.heartbeat)
            },
        }
    }
}

/// PLAIN SASL response for `connection.start-ok`.
pub(crate) fn sasl_plain_response(user: &str, password: &str) -> LongString {
    LongString::from(format!("\0{user}\0{password}"))
}

/// Client properties advertised in `connection.start-ok`.
pub(crate) fn client_properties() -> FieldTable {
    let mut properties = FieldTable::default();
    properties.insert(
        ShortString::from("product"),
        AMQPValue::LongString(LongString::from(env!("CARGO_PKG_NAME"))),
    );
    properties.insert(
        ShortString::from("version"),
        AMQPValue::LongString(LongString::from(env!("CARGO_PKG_VERSION"))),
    );
    properties.insert(
        ShortString::from("platform"),
        AMQPValue::LongString(LongString::from("Rust")),
    );
    properties
}

///////////////////////////////////////////////////////////////////////////////
//                                  Tests                                    //
///////////////////////////////////////////////////////////////////////////////
