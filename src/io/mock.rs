//! # Scripted in-memory transport
//!
//! [`ControlledTransport`] stands in for a broker link in tests: it records
//! every written byte sequence, lets the test inject inbound frames as if the
//! broker had sent them, and can be stubbed to fail `connect` or `write`.
//! A [`ControlledHandle`] obtained *before* the transport is handed to a
//! connection keeps the test side of the conversation.
//!
//! Broker-side method fixtures for the opening handshake live at the bottom
//! of this module.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use amq_protocol::protocol::{connection, AMQPClass};
use amq_protocol::types::{ChannelId, FieldTable, LongString, ShortString};

use crate::consts::{CONTROL_CHANNEL, DEFAULT_LOCALE, SASL_MECHANISM};
use crate::core::error::{Error, Result};
use crate::io::{FrameProducer, Transport};

/// How long [`ControlledHandle::handshake`] waits for each client reply.
const STEP_DEADLINE: Duration = Duration::from_secs(2);

/// How often write polling re-checks the captured output.
const POLL_INTERVAL: Duration = Duration::from_millis(1);

#[derive(Debug, Default)]
struct ControlledState {
    connected: AtomicBool,
    producer: Mutex<Option<FrameProducer>>,
    written: Mutex<Vec<Vec<u8>>>,
    connect_error: Mutex<Option<String>>,
    write_error: Mutex<Option<String>>,
}

/// Transport driven entirely by the test.
#[derive(Debug, Default)]
pub struct ControlledTransport {
    state: Arc<ControlledState>,
}

impl ControlledTransport {
    /// Creates a disconnected controlled transport.
    pub fn new() -> Self {
        Self::default()
    }

    /// Test-side handle onto this transport.
    ///
    /// Obtain it before moving the transport into a connection.
    pub fn handle(&self) -> ControlledHandle {
        ControlledHandle {
            state: Arc::clone(&self.state),
        }
    }
}

impl Transport for ControlledTransport {
    fn connect(&mut self, producer: FrameProducer) -> Result<()> {
        if let Some(message) = self.state.connect_error.lock().unwrap().take() {
            return Err(Error::from(std::io::Error::other(message)));
        }
        *self.state.producer.lock().unwrap() = Some(producer);
        self.state.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn write(&mut self, bytes: &[u8]) -> Result<()> {
        if !self.is_connected() {
            return Err(Error::NotConnected);
        }
        if let Some(message) = self.state.write_error.lock().unwrap().clone() {
            return Err(Error::from(std::io::Error::other(message)));
        }
        self.state.written.lock().unwrap().push(bytes.to_vec());
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.state.connected.load(Ordering::SeqCst)
    }

    fn disconnect(&mut self) {
        self.state.connected.store(false, Ordering::SeqCst);
    }
}

/// Test-side view of a [`ControlledTransport`].
#[derive(Clone, Debug)]
pub struct ControlledHandle {
    state: Arc<ControlledState>,
}

impl ControlledHandle {
    /// Makes the next `connect` call fail with `message`.
    pub fn stub_connect_error(&self, message: &str) {
        *self.state.connect_error.lock().unwrap() = Some(message.into());
    }

    /// Makes every subsequent `write` call fail with `message`.
    pub fn stub_write_error(&self, message: &str) {
        *self.state.write_error.lock().unwrap() = Some(message.into());
    }

    /// Whether the transport currently reports an established link.
    pub fn is_connected(&self) -> bool {
        self.state.connected.load(Ordering::SeqCst)
    }

    /// Snapshot of every byte sequence written so far, in order.
    pub fn written(&self) -> Vec<Vec<u8>> {
        self.state.written.lock().unwrap().clone()
    }

    /// Number of writes captured so far.
    pub fn written_count(&self) -> usize {
        self.state.written.lock().unwrap().len()
    }

    /// Injects one inbound frame, as if decoded off the wire.
    ///
    /// Dispatch runs synchronously on the calling thread, which plays the
    /// role of the transport's reader context.
    ///
    /// # Panics
    ///
    /// Panics if the transport was never connected.
    pub fn server_sends(&self, channel: ChannelId, method: AMQPClass) {
        let producer = self
            .state
            .producer
            .lock()
            .unwrap()
            .clone()
            .expect("transport is not connected");
        producer.produce(channel, method);
    }

    /// Blocks until at least `count` writes were captured or `deadline`
    /// passes; returns whether the count was reached.
    pub fn wait_for_writes(&self, count: usize, deadline: Duration) -> bool {
        let started = Instant::now();
        while self.written_count() < count {
            if started.elapsed() > deadline {
                return false;
            }
            thread::sleep(POLL_INTERVAL);
        }
        true
    }

    /// Replays the broker side of a successful opening handshake.
    ///
    /// Waits for the client's protocol header, then walks the
    /// Start / Tune / Open-Ok sequence, pacing each broker frame behind the
    /// client reply that provokes it.
    ///
    /// # Panics
    ///
    /// Panics if the client does not produce the expected writes within a
    /// couple of seconds.
    pub fn handshake(&self) {
        assert!(
            self.wait_for_writes(1, STEP_DEADLINE),
            "client never sent the protocol header"
        );
        self.server_sends(CONTROL_CHANNEL, connection_start());

        assert!(
            self.wait_for_writes(2, STEP_DEADLINE),
            "client never replied with start-ok"
        );
        self.server_sends(CONTROL_CHANNEL, connection_tune(2047, 131_072, 60));

        assert!(
            self.wait_for_writes(4, STEP_DEADLINE),
            "client never replied with tune-ok and open"
        );
        self.server_sends(CONTROL_CHANNEL, connection_open_ok());
    }
}

/// Broker-side `connection.start` fixture.
pub fn connection_start() -> AMQPClass {
    AMQPClass::Connection(connection::AMQPMethod::Start(connection::Start {
        version_major: 0,
        version_minor: 9,
        server_properties: FieldTable::default(),
        mechanisms: LongString::from(SASL_MECHANISM),
        locales: LongString::from(DEFAULT_LOCALE),
    }))
}

/// Broker-side `connection.tune` fixture.
pub fn connection_tune(channel_max: u16, frame_max: u32, heartbeat: u16) -> AMQPClass {
    AMQPClass::Connection(connection::AMQPMethod::Tune(connection::Tune {
        channel_max,
        frame_max,
        heartbeat,
    }))
}

/// Broker-side `connection.open-ok` fixture.
pub fn connection_open_ok() -> AMQPClass {
    AMQPClass::Connection(connection::AMQPMethod::OpenOk(connection::OpenOk {}))
}

/// Broker-side `connection.close` fixture.
pub fn connection_close(code: u16, text: &str) -> AMQPClass {
    AMQPClass::Connection(connection::AMQPMethod::Close(connection::Close {
        reply_code: code,
        reply_text: ShortString::from(text),
        class_id: 0,
        method_id: 0,
    }))
}

/// Broker-side `connection.close-ok` fixture.
pub fn connection_close_ok() -> AMQPClass {
    AMQPClass::Connection(connection::AMQPMethod::CloseOk(connection::CloseOk {}))
}

/// Broker-side `channel.open-ok` fixture.
pub fn channel_open_ok() -> AMQPClass {
    use amq_protocol::protocol::channel;
    AMQPClass::Channel(channel::AMQPMethod::OpenOk(channel::OpenOk {}))
}

///////////////////////////////////////////////////////////////////////////////
//                                  Tests                                    //
///////////////////////////////////////////////////////////////////////////////
