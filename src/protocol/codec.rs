//! Bridge into the codec's frame generator.

use amq_protocol::frame::{gen_frame, AMQPFrame, ProtocolVersion, WriteContext};

use crate::core::error::{Error, Result};

/// Serializes one wire frame into a fresh buffer.
pub(crate) fn encode_frame(frame: &AMQPFrame) -> Result<Vec<u8>> {
    match gen_frame(frame)(WriteContext::from(Vec::new())) {
        Ok(ctx) => Ok(ctx.write),
        Err(err) => Err(Error::Codec(format!("{err:?}"))),
    }
}

/// Bytes of the AMQP 0.9.1 protocol header, the first write on every
/// connection.
pub(crate) fn protocol_header() -> Result<Vec<u8>> {
    encode_frame(&AMQPFrame::ProtocolHeader(ProtocolVersion::amqp_0_9_1()))
}

///////////////////////////////////////////////////////////////////////////////
//                                  Tests                                    //
///////////////////////////////////////////////////////////////////////////////
