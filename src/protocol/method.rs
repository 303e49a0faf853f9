use std::fmt;

use amq_protocol::protocol::{channel, connection, AMQPClass};

/// Type tag of an AMQP method, used to match replies against pending waits.
///
/// The tag set is closed: it covers the `connection` and `channel` classes,
/// the only classes whose methods this core sends or awaits itself. A wait is
/// satisfied by the first frame on its channel whose method carries the
/// expected tag; payload contents never influence matching.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub enum MethodType {
    /// `connection.start`
    ConnectionStart,
    /// `connection.start-ok`
    ConnectionStartOk,
    /// `connection.secure`
    ConnectionSecure,
    /// `connection.secure-ok`
    ConnectionSecureOk,
    /// `connection.tune`
    ConnectionTune,
    /// `connection.tune-ok`
    ConnectionTuneOk,
    /// `connection.open`
    ConnectionOpen,
    /// `connection.open-ok`
    ConnectionOpenOk,
    /// `connection.close`
    ConnectionClose,
    /// `connection.close-ok`
    ConnectionCloseOk,
    /// `connection.blocked`
    ConnectionBlocked,
    /// `connection.unblocked`
    ConnectionUnblocked,
    /// `channel.open`
    ChannelOpen,
    /// `channel.open-ok`
    ChannelOpenOk,
    /// `channel.flow`
    ChannelFlow,
    /// `channel.flow-ok`
    ChannelFlowOk,
    /// `channel.close`
    ChannelClose,
    /// `channel.close-ok`
    ChannelCloseOk,
}

impl MethodType {
    /// Tag of `method`, if it belongs to a class this core can wait on.
    pub fn of(method: &AMQPClass) -> Option<Self> {
        use channel::AMQPMethod as Chan;
        use connection::AMQPMethod as Conn;

        Some(match method {
            AMQPClass::Connection(method) => match method {
                Conn::Start(_) => Self::ConnectionStart,
                Conn::StartOk(_) => Self::ConnectionStartOk,
                Conn::Secure(_) => Self::ConnectionSecure,
                Conn::SecureOk(_) => Self::ConnectionSecureOk,
                Conn::Tune(_) => Self::ConnectionTune,
                Conn::TuneOk(_) => Self::ConnectionTuneOk,
                Conn::Open(_) => Self::ConnectionOpen,
                Conn::OpenOk(_) => Self::ConnectionOpenOk,
                Conn::Close(_) => Self::ConnectionClose,
                Conn::CloseOk(_) => Self::ConnectionCloseOk,
                Conn::Blocked(_) => Self::ConnectionBlocked,
                Conn::Unblocked(_) => Self::ConnectionUnblocked,
                _ => return None,
            },
            AMQPClass::Channel(method) => match method {
                Chan::Open(_) => Self::ChannelOpen,
                Chan::OpenOk(_) => Self::ChannelOpenOk,
                Chan::Flow(_) => Self::ChannelFlow,
                Chan::FlowOk(_) => Self::ChannelFlowOk,
                Chan::Close(_) => Self::ChannelClose,
                Chan::CloseOk(_) => Self::ChannelCloseOk,
            },
            _ => return None,
        })
    }

    /// Method name as rendered in wait timeout errors.
    pub fn name(&self) -> &'static str {
        match self {
            Self::ConnectionStart => "ConnectionStart",
            Self::ConnectionStartOk => "ConnectionStartOk",
            Self::ConnectionSecure => "ConnectionSecure",
            Self::ConnectionSecureOk => "ConnectionSecureOk",
            Self::ConnectionTune => "ConnectionTune",
            Self::ConnectionTuneOk => "ConnectionTuneOk",
            Self::ConnectionOpen => "ConnectionOpen",
            Self::ConnectionOpenOk => "ConnectionOpenOk",
            Self::ConnectionClose => "ConnectionClose",
            Self::ConnectionCloseOk => "ConnectionCloseOk",
            Self::ConnectionBlocked => "ConnectionBlocked",
            Self::ConnectionUnblocked => "ConnectionUnblocked",
            Self::ChannelOpen => "ChannelOpen",
            Self::ChannelOpenOk => "ChannelOpenOk",
            Self::ChannelFlow => "ChannelFlow",
            Self::ChannelFlowOk => "ChannelFlowOk",
            Self::ChannelClose => "ChannelClose",
            Self::ChannelCloseOk => "ChannelCloseOk",
        }
    }
}

impl fmt::Display for MethodType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

///////////////////////////////////////////////////////////////////////////////
//                                  Tests                                    //
///////////////////////////////////////////////////////////////////////////////
