//! # Connection error delegate
//!
//! Some failures have no synchronous caller to report to: a broker closing
//! the connection between calls, or a handshake that dies on its background
//! thread. The delegate is the channel for those, and it additionally
//! observes every error a caller received directly.
//!
//! Delivery always happens on a dedicated thread owned by the connection,
//! never on the thread that produced the error, so a delegate is free to
//! call back into the connection without deadlocking the dispatch path.

use std::thread;

use crossbeam_channel::{unbounded, Sender};

use crate::core::error::Error;

/// Observer for connection-level failures.
pub trait ConnectionDelegate: Send + 'static {
    /// Called once per observed failure with a human-readable error.
    ///
    /// Connection-scoped failures (connect errors, server-initiated close,
    /// handshake breakdown) are reported at most once each.
    fn on_connection_error(&mut self, error: &Error);
}

impl<F: FnMut(&Error) + Send + 'static> ConnectionDelegate for F {
    fn on_connection_error(&mut self, error: &Error) {
        self(error)
    }
}

/// Owns the delegate delivery thread.
///
/// Dropping the handle closes the queue, lets the thread drain what is
/// already enqueued and joins it.
#[derive(Debug)]
pub(crate) struct DelegateHandle {
    tx: Option<Sender<Error>>,
    worker: Option<thread::JoinHandle<()>>,
}

impl DelegateHandle {
    /// Spawns the delivery thread, or a no-op handle when no delegate is
    /// configured.
    pub(crate) fn spawn(delegate: Option<Box<dyn ConnectionDelegate>>) -> Self {
        let Some(mut delegate) = delegate else {
            return Self {
                tx: None,
                worker: None,
            };
        };

        let (tx, rx) = unbounded::<Error>();
        let worker = thread::Builder::new()
            .name("amqlink-delegate".into())
            .spawn(move || {
                for error in rx {
                    delegate.on_connection_error(&error);
                }
            });

        match worker {
            Ok(worker) => Self {
                tx: Some(tx),
                worker: Some(worker),
            },
            Err(err) => {
                log::error!("failed to spawn delegate thread: {err}");
                Self {
                    tx: None,
                    worker: None,
                }
            }
        }
    }

    /// Queues `error` for delivery.
    pub(crate) fn notify(&self, error: &Error) {
        if let Some(tx) = &self.tx {
            if tx.send(error.clone()).is_err() {
                log::trace!("delegate thread is gone, dropping error notification");
            }
        }
    }
}

impl Drop for DelegateHandle {
    fn drop(&mut self) {
        self.tx.take();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

///////////////////////////////////////////////////////////////////////////////
//                                  Tests                                    //
///////////////////////////////////////////////////////////////////////////////
