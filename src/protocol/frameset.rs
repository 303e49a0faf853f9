use amq_protocol::frame::AMQPFrame;
use amq_protocol::protocol::AMQPClass;
use amq_protocol::types::ChannelId;

use crate::protocol::MethodType;

/// One protocol method travelling on one channel.
///
/// Framesets are produced by callers on the way out and handed back to
/// waiting callers on the way in. Channel `0` is reserved for
/// connection-level traffic.
#[derive(Clone, Debug, PartialEq)]
pub struct Frameset {
    channel_id: ChannelId,
    method: AMQPClass,
}

impl Frameset {
    /// Creates a frameset carrying `method` on `channel_id`.
    pub fn new(channel_id: ChannelId, method: AMQPClass) -> Self {
        Self { channel_id, method }
    }

    /// Channel the method travels on.
    pub fn channel_id(&self) -> ChannelId {
        self.channel_id
    }

    /// The method payload.
    pub fn method(&self) -> &AMQPClass {
        &self.method
    }

    /// Consumes the frameset, returning the method payload.
    pub fn into_method(self) -> AMQPClass {
        self.method
    }

    /// Type tag of the payload, when it belongs to a waitable class.
    pub fn method_type(&self) -> Option<MethodType> {
        MethodType::of(&self.method)
    }

    /// Wire frame for this frameset.
    pub(crate) fn to_frame(&self) -> AMQPFrame {
        AMQPFrame::Method(self.channel_id, self.method.clone())
    }
}

///////////////////////////////////////////////////////////////////////////////
//                                  Tests                                    //
///////////////////////////////////////////////////////////////////////////////
