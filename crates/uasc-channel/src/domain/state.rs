//! Channel lifecycle state.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU8, Ordering};

/// Lifecycle of a secure channel. Transitions only move forward.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ChannelState {
    /// Constructed; only the Open handshake may be sent
    Created = 0,
    /// Symmetric keys installed; regular traffic allowed
    Open = 1,
    /// Terminal
    Closed = 2,
}

impl ChannelState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Created,
            1 => Self::Open,
            _ => Self::Closed,
        }
    }
}

/// Lock-free state cell shared by senders and the receive loop.
#[derive(Debug)]
pub struct StateCell(AtomicU8);

impl StateCell {
    /// A cell in `Created`.
    pub fn new() -> Self {
        Self(AtomicU8::new(ChannelState::Created as u8))
    }

    /// Current state.
    pub fn get(&self) -> ChannelState {
        ChannelState::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Move to `Open`. Fails once the channel is closed.
    pub fn open(&self) -> bool {
        self.0
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (current != ChannelState::Closed as u8).then_some(ChannelState::Open as u8)
            })
            .is_ok()
    }

    /// Move to `Closed`, returning the previous state.
    pub fn close(&self) -> ChannelState {
        ChannelState::from_u8(self.0.swap(ChannelState::Closed as u8, Ordering::AcqRel))
    }

    /// Shorthand for `get() == state`.
    pub fn is(&self, state: ChannelState) -> bool {
        self.get() == state
    }
}

impl Default for StateCell {
    fn default() -> Self {
        Self::new()
    }
}
