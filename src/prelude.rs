//! # Basic imports

pub use crate::core::config::{ConnectionConfig, Tuning};
pub use crate::core::error::{Error, Result};
pub use crate::io::{FrameProducer, Transport};
pub use crate::protocol::{Frameset, MethodType};
pub use crate::sync::{Connection, ConnectionBuilder, ConnectionDelegate, ConnectionState};
