//! # Pending reply waits
//!
//! The registry maps each channel to at most one outstanding synchronous
//! wait. Registration and blocking are split: the state machine registers a
//! wait *before* writing the frame that provokes the broker's reply, so a
//! fast broker can never outrun the waiter, while callers of
//! `send_frameset` register after their write per the operation's contract.
//!
//! Exactly one outcome wins every wait: a matching frame, a broadcast
//! connection failure, or the timeout. The winner removes the slot under the
//! registry lock before delivering, so a late duplicate event can never
//! double-deliver, and a timed-out waiter that lost a photo-finish race picks
//! up the outcome that beat it instead of reporting a timeout.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use amq_protocol::types::ChannelId;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};

use crate::core::error::{Error, Result};
use crate::core::utils::UniqueId;
use crate::protocol::{Frameset, MethodType};

/// Registry of pending synchronous waits, keyed by channel.
///
/// Cloning is cheap; clones share the same slot map.
#[derive(Clone, Debug, Default)]
pub(crate) struct WaitRegistry {
    slots: Arc<Mutex<HashMap<ChannelId, WaitSlot>>>,
}

#[derive(Debug)]
struct WaitSlot {
    id: UniqueId,
    expected: MethodType,
    tx: Sender<Result<Frameset>>,
}

/// A claim on a channel's single wait slot.
///
/// Consumed by [`WaitToken::wait`]; a token that is dropped instead leaves
/// its slot behind until a frame, a failure, or a later conflict clears it.
#[derive(Debug)]
pub(crate) struct WaitToken {
    registry: WaitRegistry,
    channel: ChannelId,
    expected: MethodType,
    id: UniqueId,
    rx: Receiver<Result<Frameset>>,
}

/// What dispatch did with an inbound frame.
#[derive(Debug)]
pub(crate) enum DispatchOutcome {
    /// A waiter matched and was woken.
    Delivered,
    /// No wait is registered on the frame's channel.
    NoWait(Frameset),
    /// The channel's waiter expects a different method type.
    Mismatch {
        /// What the waiter is waiting for.
        expected: MethodType,
        /// The frame that did not match.
        frameset: Frameset,
    },
}

impl WaitRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Registers a wait for `expected` on `channel` without blocking.
    ///
    /// Fails with [`Error::WaitInProgress`] if the channel already carries a
    /// wait.
    pub(crate) fn register(&self, channel: ChannelId, expected: MethodType) -> Result<WaitToken> {
        let mut slots = self.slots.lock().unwrap();
        if slots.contains_key(&channel) {
            return Err(Error::WaitInProgress { channel });
        }

        let (tx, rx) = bounded(1);
        let id = UniqueId::new();
        slots.insert(channel, WaitSlot { id, expected, tx });

        Ok(WaitToken {
            registry: self.clone(),
            channel,
            expected,
            id,
            rx,
        })
    }

    /// Hands `frameset` to the waiter registered on its channel, if the
    /// method type matches.
    pub(crate) fn complete(&self, frameset: Frameset) -> DispatchOutcome {
        let slot = {
            let mut slots = self.slots.lock().unwrap();
            let expected = match slots.get(&frameset.channel_id()) {
                None => return DispatchOutcome::NoWait(frameset),
                Some(slot) => slot.expected,
            };
            if frameset.method_type() != Some(expected) {
                return DispatchOutcome::Mismatch { expected, frameset };
            }
            slots.remove(&frameset.channel_id())
        };

        if let Some(slot) = slot {
            // Fails only if the waiter vanished without waiting; the outcome
            // is dropped either way.
            let _ = slot.tx.send(Ok(frameset));
        }
        DispatchOutcome::Delivered
    }

    /// Fails every outstanding wait with a clone of `error`.
    pub(crate) fn fail_all(&self, error: &Error) {
        let drained: Vec<WaitSlot> = {
            let mut slots = self.slots.lock().unwrap();
            slots.drain().map(|(_, slot)| slot).collect()
        };
        for slot in drained {
            let _ = slot.tx.send(Err(error.clone()));
        }
    }

    /// `true` if a wait is currently registered on `channel`.
    pub(crate) fn is_waiting(&self, channel: ChannelId) -> bool {
        self.slots.lock().unwrap().contains_key(&channel)
    }

    /// Removes the wait identified by `id`, returning whether it was still
    /// registered. A successor wait on the same channel is left untouched.
    fn abandon(&self, channel: ChannelId, id: UniqueId) -> bool {
        let mut slots = self.slots.lock().unwrap();
        match slots.get(&channel) {
            Some(slot) if slot.id == id => {
                slots.remove(&channel);
                true
            }
            _ => false,
        }
    }
}

impl WaitToken {
    /// Blocks until the wait is satisfied, failed, or `timeout` elapses.
    ///
    /// A zero timeout fails immediately unless the outcome has already been
    /// delivered.
    pub(crate) fn wait(self, timeout: Duration) -> Result<Frameset> {
        match self.rx.recv_timeout(timeout) {
            Ok(outcome) => outcome,
            Err(RecvTimeoutError::Timeout) => {
                if self.registry.abandon(self.channel, self.id) {
                    return Err(Error::Timeout {
                        expected: self.expected,
                    });
                }
                // Lost the photo finish: a completer removed the slot right
                // at the deadline, so its outcome is already in flight.
                match self.rx.recv() {
                    Ok(outcome) => outcome,
                    Err(_) => Err(Error::Closed),
                }
            }
            Err(RecvTimeoutError::Disconnected) => Err(Error::Closed),
        }
    }

    /// Method type this wait was registered for.
    #[cfg(test)]
    pub(crate) fn expected(&self) -> MethodType {
        self.expected
    }
}

///////////////////////////////////////////////////////////////////////////////
//                                  Tests                                    //
///////////////////////////////////////////////////////////////////////////////
