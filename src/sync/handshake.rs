//! # Opening handshake
//!
//! Runs on the dedicated thread spawned by
//! [`Connection::start`](crate::sync::Connection::start) and walks the fixed
//! sequence: protocol header, `start`/`start-ok`, `tune`/`tune-ok` plus
//! `open`, and finally `open-ok`.
//!
//! Every broker reply is awaited as a pending wait on channel 0 under the
//! configured sync timeout, and each wait is registered *before* the frame
//! that provokes the reply is written, so a broker answering on the same
//! thread as the write can never outrun the waiter.

use std::sync::Arc;

use amq_protocol::protocol::connection::{AMQPMethod, Open, StartOk, TuneOk};
use amq_protocol::protocol::AMQPClass;
use amq_protocol::types::ShortString;

use crate::consts::{CONTROL_CHANNEL, DEFAULT_LOCALE, SASL_MECHANISM};
use crate::core::config::{client_properties, sasl_plain_response, Tuning};
use crate::core::error::Result;
use crate::protocol::MethodType;
use crate::sync::connection::Inner;
use crate::sync::state::ConnectionState;

/// Drives the connection from idle to open.
///
/// On error the caller is responsible for failing the connection; every
/// outstanding wait registered here is cleared by that failure path.
pub(crate) fn run(inner: &Arc<Inner>) -> Result<()> {
    inner.connect_transport()?;

    let start_wait = inner
        .registry()
        .register(CONTROL_CHANNEL, MethodType::ConnectionStart)?;
    inner.write_protocol_header()?;
    inner.advance(ConnectionState::HeaderSent);

    let start = start_wait.wait(inner.sync_timeout())?;
    inner.advance(ConnectionState::Negotiating);
    log::trace!("[{}] broker greeted with {:?}", inner.info(), start.method());

    let config = inner.config();
    let tune_wait = inner
        .registry()
        .register(CONTROL_CHANNEL, MethodType::ConnectionTune)?;
    inner.write_method(
        CONTROL_CHANNEL,
        AMQPClass::Connection(AMQPMethod::StartOk(StartOk {
            client_properties: client_properties(),
            mechanism: ShortString::from(SASL_MECHANISM),
            response: sasl_plain_response(&config.user, &config.password),
            locale: ShortString::from(DEFAULT_LOCALE),
        })),
    )?;

    let tune = tune_wait.wait(inner.sync_timeout())?;
    let server = match tune.into_method() {
        AMQPClass::Connection(AMQPMethod::Tune(tune)) => Tuning {
            channel_max: tune.channel_max,
            frame_max: tune.frame_max,
            heartbeat: tune.heartbeat,
        },
        _ => unreachable!("registry matched connection.tune"),
    };
    let negotiated = config.tuning.negotiate(&server);
    inner.apply_tuning(negotiated);
    log::debug!(
        "[{}] tuned: channel-max {}, frame-max {}, heartbeat {}s",
        inner.info(),
        negotiated.channel_max,
        negotiated.frame_max,
        negotiated.heartbeat,
    );

    let open_ok_wait = inner
        .registry()
        .register(CONTROL_CHANNEL, MethodType::ConnectionOpenOk)?;
    inner.write_method(
        CONTROL_CHANNEL,
        AMQPClass::Connection(AMQPMethod::TuneOk(TuneOk {
            channel_max: negotiated.channel_max,
            frame_max: negotiated.frame_max,
            heartbeat: negotiated.heartbeat,
        })),
    )?;
    inner.write_method(
        CONTROL_CHANNEL,
        AMQPClass::Connection(AMQPMethod::Open(Open {
            virtual_host: ShortString::from(config.virtual_host.as_str()),
        })),
    )?;

    open_ok_wait.wait(inner.sync_timeout())?;
    inner.advance(ConnectionState::Open);
    log::info!("[{}] connection open", inner.info());
    Ok(())
}
