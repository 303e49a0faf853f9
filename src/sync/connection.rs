//! # Connection façade
//!
//! [`Connection`] is the public face of the core: it owns the transport, the
//! pending-wait registry, the lifecycle state and the delegate, and routes
//! every error to the right audience. All methods take `&self`; the
//! connection is designed to be shared across threads behind an [`Arc`] or by
//! reference.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use amq_protocol::protocol::connection::{AMQPMethod as ConnectionMethod, Close, CloseOk};
use amq_protocol::protocol::{channel, AMQPClass};
use amq_protocol::types::{ChannelId, ShortString};

use crate::consts::{CLOSE_REPLY_CODE, CLOSE_REPLY_TEXT, CONTROL_CHANNEL, FIRST_CHANNEL};
use crate::core::config::{ConnectionConfig, Tuning};
use crate::core::error::{Error, Result};
use crate::io::{FrameProducer, FrameSink, Transport};
use crate::protocol::{encode_frame, protocol_header, Frameset, MethodType};
use crate::sync::delegate::{ConnectionDelegate, DelegateHandle};
use crate::sync::handshake;
use crate::sync::registry::{DispatchOutcome, WaitRegistry};
use crate::sync::state::ConnectionState;

/// Handler invoked for inbound frames no pending wait claims.
///
/// Higher layers (channel consumers, content delivery) hook in here; the
/// core itself only logs such frames.
pub type UnclaimedFrameHandler = Box<dyn Fn(&Frameset) + Send + Sync + 'static>;

/// Builder for a [`Connection`].
///
/// All settings have defaults (`guest`/`guest` on `/`, RabbitMQ-style
/// tuning, a ten second sync timeout, no delegate).
#[derive(Default)]
pub struct ConnectionBuilder {
    config: ConnectionConfig,
    delegate: Option<Box<dyn ConnectionDelegate>>,
    unclaimed: Option<UnclaimedFrameHandler>,
}

impl ConnectionBuilder {
    /// Creates a builder populated with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// User name for PLAIN authentication.
    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.config.user = user.into();
        self
    }

    /// Password for PLAIN authentication.
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.config.password = password.into();
        self
    }

    /// Virtual host requested in `connection.open`.
    pub fn virtual_host(mut self, virtual_host: impl Into<String>) -> Self {
        self.config.virtual_host = virtual_host.into();
        self
    }

    /// Requested `channel-max`; `0` means no limit.
    pub fn channel_max(mut self, channel_max: u16) -> Self {
        self.config.tuning.channel_max = channel_max;
        self
    }

    /// Requested `frame-max` in bytes; `0` means no limit.
    pub fn frame_max(mut self, frame_max: u32) -> Self {
        self.config.tuning.frame_max = frame_max;
        self
    }

    /// Requested heartbeat interval in seconds; `0` disables heartbeats.
    pub fn heartbeat(mut self, heartbeat: u16) -> Self {
        self.config.tuning.heartbeat = heartbeat;
        self
    }

    /// Timeout applied to every synchronous reply wait; may be zero.
    pub fn sync_timeout(mut self, sync_timeout: Duration) -> Self {
        self.config.sync_timeout = sync_timeout;
        self
    }

    /// Delegate notified of connection errors on its own thread.
    pub fn delegate(mut self, delegate: impl ConnectionDelegate) -> Self {
        self.delegate = Some(Box::new(delegate));
        self
    }

    /// Hook observing frames that no pending wait claims.
    pub fn unclaimed_frames(
        mut self,
        handler: impl Fn(&Frameset) + Send + Sync + 'static,
    ) -> Self {
        self.unclaimed = Some(Box::new(handler));
        self
    }

    /// Builds the connection around `transport`.
    ///
    /// The transport stays disconnected until [`Connection::start`].
    pub fn build<T: Transport + 'static>(self, transport: T) -> Connection {
        let info = format!("{}@{}", self.config.user, self.config.virtual_host);
        let inner = Arc::new(Inner {
            info,
            transport: Mutex::new(Box::new(transport)),
            registry: WaitRegistry::new(),
            state: Mutex::new(ConnectionState::Idle),
            tuning: Mutex::new(self.config.tuning),
            next_channel: Mutex::new(u32::from(FIRST_CHANNEL)),
            last_error: Mutex::new(None),
            delegate: DelegateHandle::spawn(self.delegate),
            unclaimed: self.unclaimed,
            config: self.config,
        });

        Connection {
            inner,
            started: AtomicBool::new(false),
        }
    }
}

/// A single client connection to an AMQP 0.9.1 broker.
///
/// Dropping the connection tears the transport down and fails every
/// outstanding wait with [`Error::Closed`].
pub struct Connection {
    inner: Arc<Inner>,
    started: AtomicBool,
}

impl Connection {
    /// Starts building a connection.
    pub fn builder() -> ConnectionBuilder {
        ConnectionBuilder::new()
    }

    /// Connects the transport and drives the opening handshake on a
    /// background thread.
    ///
    /// Non-blocking and idempotent: repeated calls are no-ops. Failures
    /// surface through the delegate and through subsequent calls failing;
    /// the returned error only covers the inability to spawn the handshake
    /// thread itself.
    pub fn start(&self) -> Result<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let inner = Arc::clone(&self.inner);
        thread::Builder::new()
            .name("amqlink-handshake".into())
            .spawn(move || {
                if let Err(err) = handshake::run(&inner) {
                    log::debug!("[{}] handshake failed: {err}", inner.info);
                    inner.fail(err);
                }
            })
            .map_err(Error::from)?;
        Ok(())
    }

    /// Opens the next unused channel and returns its number.
    ///
    /// Sends `channel.open` and blocks until the matching `channel.open-ok`
    /// arrives, a connection failure occurs, or the sync timeout elapses.
    /// Channel numbers are allocated sequentially from 1; concurrent callers
    /// never receive the same number.
    pub fn create_channel(&self) -> Result<ChannelId> {
        let id = self.inner.allocate_channel()?;
        self.send_frameset(
            Frameset::new(
                id,
                AMQPClass::Channel(channel::AMQPMethod::Open(channel::Open {})),
            ),
            MethodType::ChannelOpenOk,
        )?;
        Ok(id)
    }

    /// Writes `frameset` and blocks until a `wait_on` reply arrives on the
    /// same channel, a connection failure occurs, or the sync timeout
    /// elapses.
    ///
    /// A write failure fails the call immediately; no wait is registered.
    /// Waits on distinct channels proceed independently, so any number of
    /// threads can be parked here at once.
    pub fn send_frameset(&self, frameset: Frameset, wait_on: MethodType) -> Result<Frameset> {
        self.inner.send_and_wait(frameset, wait_on)
    }

    /// Initiates a client close.
    ///
    /// Sends `connection.close` on channel 0 and returns without waiting for
    /// the broker's `close-ok`; completion is observable through
    /// [`state`](Connection::state) reaching
    /// [`Closed`](ConnectionState::Closed) and through
    /// [`is_connected`](Connection::is_connected) turning false. Closing a
    /// connection that never opened tears it down immediately.
    pub fn close(&self) -> Result<()> {
        self.inner.close()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        *self.inner.state.lock().unwrap()
    }

    /// `true` once the opening handshake has completed and no close or
    /// failure has begun.
    pub fn is_open(&self) -> bool {
        self.state().is_open()
    }

    /// Whether the transport link is up.
    pub fn is_connected(&self) -> bool {
        self.inner.transport.lock().unwrap().is_connected()
    }

    /// Most recent connection-level error, if any.
    pub fn last_error(&self) -> Option<Error> {
        self.inner.last_error.lock().unwrap().clone()
    }

    /// Negotiated `channel-max`.
    pub fn channel_max(&self) -> u16 {
        self.inner.tuning.lock().unwrap().channel_max
    }

    /// Negotiated `frame-max` in bytes.
    pub fn frame_max(&self) -> u32 {
        self.inner.tuning.lock().unwrap().frame_max
    }

    /// Negotiated heartbeat interval in seconds.
    pub fn heartbeat(&self) -> u16 {
        self.inner.tuning.lock().unwrap().heartbeat
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.inner.teardown(ConnectionState::Closed, None);
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("info", &self.inner.info)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// Shared internals of a [`Connection`].
///
/// Also the [`FrameSink`] the transport delivers into.
pub(crate) struct Inner {
    info: String,
    config: ConnectionConfig,
    transport: Mutex<Box<dyn Transport>>,
    registry: WaitRegistry,
    state: Mutex<ConnectionState>,
    tuning: Mutex<Tuning>,
    // u32 so the allocator can run off the end of the u16 range and stay
    // saturated instead of wrapping back to low channel numbers.
    next_channel: Mutex<u32>,
    last_error: Mutex<Option<Error>>,
    delegate: DelegateHandle,
    unclaimed: Option<UnclaimedFrameHandler>,
}

impl Inner {
    pub(crate) fn registry(&self) -> &WaitRegistry {
        &self.registry
    }

    pub(crate) fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    pub(crate) fn sync_timeout(&self) -> Duration {
        self.config.sync_timeout
    }

    pub(crate) fn info(&self) -> &str {
        &self.info
    }

    /// Connects the transport and hands it the inbound frame producer.
    pub(crate) fn connect_transport(self: &Arc<Self>) -> Result<()> {
        let sink: Arc<dyn FrameSink> = Arc::clone(self) as Arc<dyn FrameSink>;
        let producer = FrameProducer::new(Arc::downgrade(&sink));

        // The transport lock serializes against teardown: a close that won
        // the race leaves the terminal state for us to observe, one that
        // loses it will disconnect whatever we establish here.
        let mut transport = self.transport.lock().unwrap();
        if let Some(err) = self.terminal_error() {
            return Err(err);
        }
        transport.connect(producer)
    }

    pub(crate) fn write_protocol_header(&self) -> Result<()> {
        let bytes = protocol_header()?;
        self.write_bytes(&bytes)
    }

    pub(crate) fn write_method(&self, channel: ChannelId, method: AMQPClass) -> Result<()> {
        self.write_frameset(&Frameset::new(channel, method))
    }

    fn write_frameset(&self, frameset: &Frameset) -> Result<()> {
        log::trace!(
            "[{}] sending {:?} on channel {}",
            self.info,
            frameset.method(),
            frameset.channel_id()
        );
        let bytes = encode_frame(&frameset.to_frame())?;
        self.write_bytes(&bytes)
    }

    fn write_bytes(&self, bytes: &[u8]) -> Result<()> {
        self.transport.lock().unwrap().write(bytes)
    }

    /// Advances the lifecycle state unless a close or failure already made
    /// it terminal.
    pub(crate) fn advance(&self, next: ConnectionState) {
        let mut state = self.state.lock().unwrap();
        if state.is_terminal() {
            return;
        }
        log::trace!("[{}] {:?} -> {next:?}", self.info, *state);
        *state = next;
    }

    pub(crate) fn apply_tuning(&self, negotiated: Tuning) {
        *self.tuning.lock().unwrap() = negotiated;
    }

    fn allocate_channel(&self) -> Result<ChannelId> {
        let channel_max = self.tuning.lock().unwrap().channel_max;
        let max = if channel_max == 0 {
            ChannelId::MAX
        } else {
            channel_max
        };

        let mut next = self.next_channel.lock().unwrap();
        if *next > u32::from(max) {
            return Err(Error::ChannelsExhausted { max });
        }
        let id = *next as ChannelId;
        *next += 1;
        Ok(id)
    }

    fn send_and_wait(&self, frameset: Frameset, wait_on: MethodType) -> Result<Frameset> {
        if let Some(err) = self.terminal_error() {
            return Err(err);
        }

        let channel = frameset.channel_id();
        if let Err(err) = self.write_frameset(&frameset) {
            self.record(&err);
            return Err(err);
        }

        let token = match self.registry.register(channel, wait_on) {
            Ok(token) => token,
            Err(err) => {
                self.record(&err);
                return Err(err);
            }
        };

        match token.wait(self.config.sync_timeout) {
            Ok(reply) => Ok(reply),
            Err(err @ Error::Timeout { .. }) => {
                self.record(&err);
                Err(err)
            }
            // Broadcast failures were already recorded by their producer.
            Err(err) => Err(err),
        }
    }

    /// Last error when the connection is already terminal.
    fn terminal_error(&self) -> Option<Error> {
        if !self.state.lock().unwrap().is_terminal() {
            return None;
        }
        Some(
            self.last_error
                .lock()
                .unwrap()
                .clone()
                .unwrap_or(Error::Closed),
        )
    }

    /// Records an operation-scoped error: last-error slot plus delegate.
    fn record(&self, error: &Error) {
        *self.last_error.lock().unwrap() = Some(error.clone());
        self.delegate.notify(error);
    }

    /// Fails the connection: terminal state, teardown, broadcast.
    pub(crate) fn fail(&self, error: Error) {
        self.teardown(ConnectionState::Failed, Some(error));
    }

    fn close(&self) -> Result<()> {
        {
            let mut state = self.state.lock().unwrap();
            match *state {
                ConnectionState::Open => *state = ConnectionState::Closing,
                ConnectionState::Closing | ConnectionState::Closed | ConnectionState::Failed => {
                    return Ok(());
                }
                // Nothing negotiated yet; just drop the link.
                _ => {
                    drop(state);
                    self.teardown(ConnectionState::Closed, None);
                    return Ok(());
                }
            }
        }

        log::debug!("[{}] closing connection", self.info);
        let close = AMQPClass::Connection(ConnectionMethod::Close(Close {
            reply_code: CLOSE_REPLY_CODE,
            reply_text: ShortString::from(CLOSE_REPLY_TEXT),
            class_id: 0,
            method_id: 0,
        }));
        if let Err(err) = self.write_method(CONTROL_CHANNEL, close) {
            self.fail(err.clone());
            return Err(err);
        }
        Ok(())
    }

    /// Moves to a terminal state exactly once, tears the transport down and
    /// fails every outstanding wait. When the teardown is itself a failure,
    /// the error is recorded and the delegate notified.
    fn teardown(&self, target: ConnectionState, error: Option<Error>) {
        {
            let mut state = self.state.lock().unwrap();
            if state.is_terminal() {
                return;
            }
            log::debug!("[{}] {:?} -> {target:?}", self.info, *state);
            *state = target;
        }

        if let Some(error) = &error {
            *self.last_error.lock().unwrap() = Some(error.clone());
        }

        self.transport.lock().unwrap().disconnect();
        self.registry
            .fail_all(error.as_ref().unwrap_or(&Error::Closed));

        if let Some(error) = &error {
            self.delegate.notify(error);
        }
    }

    /// Handles channel-0 close traffic ahead of the registry.
    ///
    /// Returns `true` when the method was consumed by the state machine.
    fn handle_control(&self, method: &AMQPClass) -> bool {
        match method {
            AMQPClass::Connection(ConnectionMethod::Close(close)) => {
                log::warn!(
                    "[{}] server closed connection: {} {}",
                    self.info,
                    close.reply_code,
                    close.reply_text.as_str()
                );
                let close_ok = AMQPClass::Connection(ConnectionMethod::CloseOk(CloseOk {}));
                if let Err(err) = self.write_method(CONTROL_CHANNEL, close_ok) {
                    log::trace!("[{}] could not acknowledge server close: {err}", self.info);
                }
                self.teardown(
                    ConnectionState::Closed,
                    Some(Error::ServerClosed {
                        code: close.reply_code,
                        text: close.reply_text.as_str().to_string(),
                    }),
                );
                true
            }
            AMQPClass::Connection(ConnectionMethod::CloseOk(_)) => {
                if *self.state.lock().unwrap() != ConnectionState::Closing {
                    return false;
                }
                log::debug!("[{}] connection closed", self.info);
                self.teardown(ConnectionState::Closed, None);
                true
            }
            _ => false,
        }
    }
}

impl FrameSink for Inner {
    fn deliver(&self, channel: ChannelId, method: AMQPClass) {
        log::trace!("[{}] received {method:?} on channel {channel}", self.info);

        if channel == CONTROL_CHANNEL && self.handle_control(&method) {
            return;
        }

        match self.registry.complete(Frameset::new(channel, method)) {
            DispatchOutcome::Delivered => {}
            DispatchOutcome::NoWait(frameset) => {
                log::warn!(
                    "[{}] unclaimed frame on channel {}: {:?}",
                    self.info,
                    frameset.channel_id(),
                    frameset.method()
                );
                if let Some(handler) = &self.unclaimed {
                    handler(&frameset);
                }
            }
            DispatchOutcome::Mismatch { expected, frameset } => {
                log::warn!(
                    "[{}] channel {} waits for {expected}, got {:?}",
                    self.info,
                    frameset.channel_id(),
                    frameset.method()
                );
                if let Some(handler) = &self.unclaimed {
                    handler(&frameset);
                }
            }
        }
    }
}

///////////////////////////////////////////////////////////////////////////////
//                                  Tests                                    //
///////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::mock::{
        channel_open_ok, connection_close, connection_close_ok, connection_open_ok,
        connection_start, connection_tune, ControlledHandle, ControlledTransport,
    };
    use crate::protocol::protocol_header;
    use amq_protocol::protocol::connection;
    use amq_protocol::types::LongString;
    use std::sync::Mutex as StdMutex;
    use std::sync::Once;
    use std::time::Instant;

    const DEADLINE: Duration = Duration::from_secs(2);
    const LOG_LEVEL: log::LevelFilter = log::LevelFilter::Debug;

    static INIT: Once = Once::new();

    fn initialize() {
        INIT.call_once(|| {
            env_logger::builder()
                // Suppress everything below `warn` for third-party modules
                .filter_level(log::LevelFilter::Warn)
                // Allow everything above `LOG_LEVEL` from current package
                .filter_module(env!("CARGO_PKG_NAME"), LOG_LEVEL)
                .init();
        });
    }

    /// An arbitrary outbound method; waits treat payloads as opaque.
    fn outbound_probe() -> AMQPClass {
        AMQPClass::Connection(connection::AMQPMethod::StartOk(connection::StartOk {
            client_properties: Default::default(),
            mechanism: ShortString::from("PLAIN"),
            response: LongString::from("\0foo\0bar"),
            locale: ShortString::from("en_US"),
        }))
    }

    /// Polls `cond` until it holds or a couple of seconds pass.
    fn eventually(cond: impl Fn() -> bool) -> bool {
        let started = Instant::now();
        while !cond() {
            if started.elapsed() > DEADLINE {
                return false;
            }
            thread::sleep(Duration::from_millis(1));
        }
        true
    }

    #[derive(Clone, Default)]
    struct DelegateSpy {
        seen: Arc<StdMutex<Vec<String>>>,
    }

    impl DelegateSpy {
        fn messages(&self) -> Vec<String> {
            self.seen.lock().unwrap().clone()
        }

        fn saw(&self, message: &str) -> bool {
            self.messages().iter().any(|seen| seen == message)
        }
    }

    impl ConnectionDelegate for DelegateSpy {
        fn on_connection_error(&mut self, error: &Error) {
            self.seen.lock().unwrap().push(error.to_string());
        }
    }

    fn started_connection(sync_timeout: Duration) -> (Connection, ControlledHandle, DelegateSpy) {
        initialize();
        let transport = ControlledTransport::new();
        let broker = transport.handle();
        let spy = DelegateSpy::default();
        let conn = Connection::builder()
            .user("foo")
            .password("bar")
            .virtual_host("baz")
            .sync_timeout(sync_timeout)
            .delegate(spy.clone())
            .build(transport);
        conn.start().unwrap();
        (conn, broker, spy)
    }

    fn open_connection() -> (Connection, ControlledHandle, DelegateSpy) {
        let (conn, broker, spy) = started_connection(Duration::from_secs(1));
        broker.handshake();
        assert!(eventually(|| conn.is_open()));
        (conn, broker, spy)
    }

    fn encoded(channel: ChannelId, method: AMQPClass) -> Vec<u8> {
        encode_frame(&Frameset::new(channel, method).to_frame()).unwrap()
    }

    #[test]
    fn connect_error_reaches_the_delegate_and_nothing_is_written() {
        initialize();
        let transport = ControlledTransport::new();
        let broker = transport.handle();
        broker.stub_connect_error("bad connection");
        let spy = DelegateSpy::default();
        let conn = Connection::builder()
            .sync_timeout(Duration::from_secs(1))
            .delegate(spy.clone())
            .build(transport);
        conn.start().unwrap();

        assert!(eventually(|| spy.saw("bad connection")));
        assert_eq!(broker.written_count(), 0);
        assert_eq!(conn.state(), ConnectionState::Failed);
        assert_eq!(conn.last_error().unwrap().to_string(), "bad connection");
    }

    #[test]
    fn write_error_during_handshake_reaches_the_delegate() {
        initialize();
        let transport = ControlledTransport::new();
        let broker = transport.handle();
        broker.stub_write_error("bad write");
        let spy = DelegateSpy::default();
        let conn = Connection::builder()
            .sync_timeout(Duration::from_secs(1))
            .delegate(spy.clone())
            .build(transport);
        conn.start().unwrap();

        assert!(eventually(|| spy.saw("bad write")));
        assert_eq!(broker.written_count(), 0);
        assert_eq!(conn.state(), ConnectionState::Failed);
        assert!(!conn.is_connected());
    }

    #[test]
    fn handshake_walks_header_start_tune_open() {
        let (conn, broker, _spy) = started_connection(Duration::from_secs(1));

        assert!(broker.wait_for_writes(1, DEADLINE));
        assert_eq!(broker.written()[0], protocol_header().unwrap());
        assert!(!conn.is_open());

        broker.server_sends(CONTROL_CHANNEL, connection_start());
        assert!(broker.wait_for_writes(2, DEADLINE));
        let start_ok = encoded(
            CONTROL_CHANNEL,
            AMQPClass::Connection(connection::AMQPMethod::StartOk(connection::StartOk {
                client_properties: crate::core::config::client_properties(),
                mechanism: ShortString::from("PLAIN"),
                response: crate::core::config::sasl_plain_response("foo", "bar"),
                locale: ShortString::from("en_US"),
            })),
        );
        assert_eq!(broker.written()[1], start_ok);

        broker.server_sends(CONTROL_CHANNEL, connection_tune(1000, 262_144, 30));
        assert!(broker.wait_for_writes(4, DEADLINE));
        // Requested 2047/131072/60 clamps against the broker's 1000/262144/30.
        let tune_ok = encoded(
            CONTROL_CHANNEL,
            AMQPClass::Connection(connection::AMQPMethod::TuneOk(connection::TuneOk {
                channel_max: 1000,
                frame_max: 131_072,
                heartbeat: 30,
            })),
        );
        let open = encoded(
            CONTROL_CHANNEL,
            AMQPClass::Connection(connection::AMQPMethod::Open(connection::Open {
                virtual_host: ShortString::from("baz"),
            })),
        );
        assert_eq!(broker.written()[2], tune_ok);
        assert_eq!(broker.written()[3], open);
        assert!(!conn.is_open());

        broker.server_sends(CONTROL_CHANNEL, connection_open_ok());
        assert!(eventually(|| conn.is_open()));
        assert_eq!(conn.channel_max(), 1000);
        assert_eq!(conn.frame_max(), 131_072);
        assert_eq!(conn.heartbeat(), 30);
    }

    #[test]
    fn missing_open_ok_leaves_the_connection_non_open() {
        let (conn, broker, spy) = started_connection(Duration::from_millis(150));

        assert!(broker.wait_for_writes(1, DEADLINE));
        broker.server_sends(CONTROL_CHANNEL, connection_start());
        assert!(broker.wait_for_writes(2, DEADLINE));
        broker.server_sends(CONTROL_CHANNEL, connection_tune(0, 0, 0));
        assert!(broker.wait_for_writes(4, DEADLINE));

        // Open-Ok never arrives.
        assert!(eventually(|| spy.saw("Timed out waiting for ConnectionOpenOk")));
        assert!(!conn.is_open());
        assert_eq!(conn.state(), ConnectionState::Failed);
    }

    #[test]
    fn handshake_timeout_names_the_first_missing_method() {
        let (conn, _broker, spy) = started_connection(Duration::ZERO);

        assert!(eventually(|| spy.saw("Timed out waiting for ConnectionStart")));
        assert_eq!(conn.state(), ConnectionState::Failed);
    }

    #[test]
    fn client_close_sends_goodbye_and_completes_on_close_ok() {
        let (conn, broker, spy) = open_connection();
        let writes_before = broker.written_count();

        conn.close().unwrap();

        assert!(broker.wait_for_writes(writes_before + 1, DEADLINE));
        let close = encoded(
            CONTROL_CHANNEL,
            AMQPClass::Connection(connection::AMQPMethod::Close(connection::Close {
                reply_code: 200,
                reply_text: ShortString::from("Goodbye"),
                class_id: 0,
                method_id: 0,
            })),
        );
        assert_eq!(broker.written()[writes_before], close);

        // Still connected until the broker acknowledges.
        assert!(conn.is_connected());
        assert_eq!(conn.state(), ConnectionState::Closing);

        broker.server_sends(CONTROL_CHANNEL, connection_close_ok());
        assert!(eventually(|| !conn.is_connected()));
        assert_eq!(conn.state(), ConnectionState::Closed);
        // A clean close is not an error.
        assert!(spy.messages().is_empty());
    }

    #[test]
    fn server_close_is_acknowledged_and_disconnects() {
        let (conn, broker, spy) = open_connection();
        let writes_before = broker.written_count();

        broker.server_sends(CONTROL_CHANNEL, connection_close(320, "CONNECTION_FORCED"));

        assert!(eventually(|| !conn.is_connected()));
        assert_eq!(conn.state(), ConnectionState::Closed);
        assert_eq!(
            broker.written()[writes_before],
            encoded(CONTROL_CHANNEL, connection_close_ok())
        );
        assert!(eventually(
            || spy.saw("server closed connection: 320 CONNECTION_FORCED")
        ));
        assert!(matches!(
            conn.last_error(),
            Some(Error::ServerClosed { code: 320, .. })
        ));

        // Connection-scoped failures reach the delegate exactly once.
        thread::sleep(Duration::from_millis(20));
        assert_eq!(spy.messages().len(), 1);
    }

    #[test]
    fn server_close_during_negotiation_fails_the_handshake() {
        let (conn, broker, spy) = started_connection(Duration::from_secs(1));

        assert!(broker.wait_for_writes(1, DEADLINE));
        broker.server_sends(CONTROL_CHANNEL, connection_close(530, "NOT_ALLOWED"));

        assert!(eventually(|| spy.saw("server closed connection: 530 NOT_ALLOWED")));
        assert!(!conn.is_open());
        assert!(!conn.is_connected());
    }

    #[test]
    fn create_channel_opens_sequential_channels() {
        let (conn, broker, _spy) = open_connection();
        let conn = Arc::new(conn);

        for expected in [FIRST_CHANNEL, FIRST_CHANNEL + 1] {
            let writes_before = broker.written_count();
            let worker = {
                let conn = Arc::clone(&conn);
                thread::spawn(move || conn.create_channel())
            };

            assert!(broker.wait_for_writes(writes_before + 1, DEADLINE));
            assert_eq!(
                broker.written()[writes_before],
                encoded(
                    expected,
                    AMQPClass::Channel(channel::AMQPMethod::Open(channel::Open {}))
                )
            );
            assert!(eventually(|| conn.inner.registry.is_waiting(expected)));
            broker.server_sends(expected, channel_open_ok());
            assert_eq!(worker.join().unwrap().unwrap(), expected);
        }
    }

    #[test]
    fn concurrent_create_channel_calls_get_distinct_numbers() {
        let (conn, broker, _spy) = open_connection();
        let conn = Arc::new(conn);

        let workers: Vec<_> = (0..2)
            .map(|_| {
                let conn = Arc::clone(&conn);
                thread::spawn(move || conn.create_channel())
            })
            .collect();

        assert!(eventually(|| {
            conn.inner.registry.is_waiting(FIRST_CHANNEL)
                && conn.inner.registry.is_waiting(FIRST_CHANNEL + 1)
        }));
        broker.server_sends(FIRST_CHANNEL, channel_open_ok());
        broker.server_sends(FIRST_CHANNEL + 1, channel_open_ok());

        let mut ids: Vec<ChannelId> = workers
            .into_iter()
            .map(|worker| worker.join().unwrap().unwrap())
            .collect();
        ids.sort_unstable();
        assert_eq!(ids, vec![FIRST_CHANNEL, FIRST_CHANNEL + 1]);
    }

    #[test]
    fn create_channel_propagates_a_write_error() {
        let (conn, broker, spy) = open_connection();
        broker.stub_write_error("stubbed message");

        let err = conn.create_channel().unwrap_err();
        assert_eq!(err.to_string(), "stubbed message");
        assert!(!conn.inner.registry.is_waiting(FIRST_CHANNEL));
        assert!(eventually(|| spy.saw("stubbed message")));
    }

    #[test]
    fn channel_numbers_exhaust_at_the_negotiated_maximum() {
        initialize();
        let transport = ControlledTransport::new();
        let broker = transport.handle();
        let conn = Connection::builder()
            .channel_max(1)
            .sync_timeout(Duration::from_secs(1))
            .build(transport);
        conn.start().unwrap();
        broker.handshake();
        assert!(eventually(|| conn.is_open()));
        assert_eq!(conn.channel_max(), 1);

        let conn = Arc::new(conn);
        let worker = {
            let conn = Arc::clone(&conn);
            thread::spawn(move || conn.create_channel())
        };
        assert!(eventually(|| conn.inner.registry.is_waiting(FIRST_CHANNEL)));
        broker.server_sends(FIRST_CHANNEL, channel_open_ok());
        assert_eq!(worker.join().unwrap().unwrap(), FIRST_CHANNEL);

        let err = conn.create_channel().unwrap_err();
        assert!(matches!(err, Error::ChannelsExhausted { max: 1 }));
    }

    #[test]
    fn concurrent_waits_resolve_independently_and_out_of_order() {
        let (conn, broker, _spy) = open_connection();
        let conn = Arc::new(conn);

        let first = {
            let conn = Arc::clone(&conn);
            thread::spawn(move || {
                conn.send_frameset(
                    Frameset::new(
                        42,
                        AMQPClass::Connection(connection::AMQPMethod::Open(connection::Open {
                            virtual_host: ShortString::from("baz"),
                        })),
                    ),
                    MethodType::ConnectionOpenOk,
                )
            })
        };
        let second = {
            let conn = Arc::clone(&conn);
            thread::spawn(move || {
                conn.send_frameset(
                    Frameset::new(56, outbound_probe()),
                    MethodType::ConnectionTune,
                )
            })
        };

        assert!(eventually(|| {
            conn.inner.registry.is_waiting(42) && conn.inner.registry.is_waiting(56)
        }));

        // Replies land in the reverse order of submission, interleaved
        // across channels.
        broker.server_sends(56, connection_tune(0, 0, 0));
        broker.server_sends(42, connection_open_ok());

        let first = first.join().unwrap().unwrap();
        assert_eq!(first.channel_id(), 42);
        assert_eq!(first.method_type(), Some(MethodType::ConnectionOpenOk));

        let second = second.join().unwrap().unwrap();
        assert_eq!(second.channel_id(), 56);
        assert_eq!(second.method_type(), Some(MethodType::ConnectionTune));
    }

    #[test]
    fn send_frameset_times_out_naming_the_awaited_method() {
        let (conn, broker, _spy) = started_connection(Duration::from_millis(100));
        broker.handshake();
        assert!(eventually(|| conn.is_open()));

        let err = conn
            .send_frameset(
                Frameset::new(42, outbound_probe()),
                MethodType::ConnectionTune,
            )
            .unwrap_err();
        assert_eq!(err.to_string(), "Timed out waiting for ConnectionTune");
        assert_eq!(
            conn.last_error().unwrap().to_string(),
            "Timed out waiting for ConnectionTune"
        );
    }

    #[test]
    fn send_frameset_write_failure_registers_no_wait() {
        let (conn, broker, spy) = open_connection();
        broker.stub_write_error("please fail");

        let err = conn
            .send_frameset(
                Frameset::new(42, outbound_probe()),
                MethodType::ConnectionTune,
            )
            .unwrap_err();

        assert_eq!(err.to_string(), "please fail");
        assert!(!conn.inner.registry.is_waiting(42));
        assert!(eventually(|| spy.saw("please fail")));
        assert_eq!(conn.last_error().unwrap().to_string(), "please fail");
    }

    #[test]
    fn unclaimed_and_mismatched_frames_reach_the_hook() {
        initialize();
        let transport = ControlledTransport::new();
        let broker = transport.handle();
        let unclaimed: Arc<StdMutex<Vec<(ChannelId, Option<MethodType>)>>> = Arc::default();
        let conn = {
            let unclaimed = Arc::clone(&unclaimed);
            Connection::builder()
                .sync_timeout(Duration::from_secs(1))
                .unclaimed_frames(move |frameset: &Frameset| {
                    unclaimed
                        .lock()
                        .unwrap()
                        .push((frameset.channel_id(), frameset.method_type()));
                })
                .build(transport)
        };
        conn.start().unwrap();
        broker.handshake();
        assert!(eventually(|| conn.is_open()));

        // No wait on channel 7 at all.
        broker.server_sends(7, connection_tune(0, 0, 0));
        assert_eq!(
            unclaimed.lock().unwrap().as_slice(),
            &[(7, Some(MethodType::ConnectionTune))]
        );

        // Wait on channel 9 expects Open-Ok; a Tune must not complete it.
        let conn = Arc::new(conn);
        let worker = {
            let conn = Arc::clone(&conn);
            thread::spawn(move || {
                conn.send_frameset(
                    Frameset::new(9, outbound_probe()),
                    MethodType::ConnectionOpenOk,
                )
            })
        };
        assert!(eventually(|| conn.inner.registry.is_waiting(9)));

        broker.server_sends(9, connection_tune(0, 0, 0));
        assert!(conn.inner.registry.is_waiting(9));
        assert_eq!(unclaimed.lock().unwrap().len(), 2);

        broker.server_sends(9, connection_open_ok());
        assert!(worker.join().unwrap().is_ok());
    }

    #[test]
    fn close_before_open_tears_down_and_fails_the_handshake_wait() {
        let (conn, broker, _spy) = started_connection(Duration::from_secs(5));
        assert!(broker.wait_for_writes(1, DEADLINE));

        conn.close().unwrap();

        assert!(!conn.is_connected());
        assert_eq!(conn.state(), ConnectionState::Closed);
        assert!(eventually(|| !conn.inner.registry.is_waiting(CONTROL_CHANNEL)));
    }

    #[test]
    fn start_is_idempotent() {
        let (conn, broker, _spy) = started_connection(Duration::from_secs(1));
        assert!(broker.wait_for_writes(1, DEADLINE));

        conn.start().unwrap();
        thread::sleep(Duration::from_millis(20));
        assert_eq!(broker.written_count(), 1);
    }

    #[test]
    fn calls_after_a_failure_return_the_recorded_error() {
        initialize();
        let transport = ControlledTransport::new();
        let broker = transport.handle();
        broker.stub_connect_error("bad connection");
        let conn = Connection::builder()
            .sync_timeout(Duration::from_secs(1))
            .build(transport);
        conn.start().unwrap();
        assert!(eventually(|| conn.state() == ConnectionState::Failed));

        let err = conn.create_channel().unwrap_err();
        assert_eq!(err.to_string(), "bad connection");
    }
}
