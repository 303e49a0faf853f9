//! # Common constants

use std::time::Duration;

use amq_protocol::types::ChannelId;

/// Channel reserved for connection-level traffic.
pub const CONTROL_CHANNEL: ChannelId = 0;

/// Lowest channel number handed out to callers.
pub const FIRST_CHANNEL: ChannelId = 1;

/// Default requested `channel-max` (the RabbitMQ server default).
pub const DEFAULT_CHANNEL_MAX: u16 = 2047;

/// Default requested `frame-max` in bytes.
pub const DEFAULT_FRAME_MAX: u32 = 131_072;

/// Default requested heartbeat interval in seconds.
pub const DEFAULT_HEARTBEAT: u16 = 60;

/// Default virtual host.
pub const DEFAULT_VHOST: &str = "/";

/// Default timeout for synchronous reply waits.
pub const DEFAULT_SYNC_TIMEOUT: Duration = Duration::from_secs(10);

/// SASL mechanism offered in `connection.start-ok`.
pub const SASL_MECHANISM: &str = "PLAIN";

/// Locale requested in `connection.start-ok`.
pub const DEFAULT_LOCALE: &str = "en_US";

/// Reply code carried by a client-initiated `connection.close`.
pub const CLOSE_REPLY_CODE: u16 = 200;

/// Reply text carried by a client-initiated `connection.close`.
pub const CLOSE_REPLY_TEXT: &str = "Goodbye";
