//! Conversational status derived from transport and playback activity.
//!
//! The status lives in a single atomic cell shared by every async task.
//! Callbacks read it fresh at the moment of use instead of capturing a
//! value at registration time, so concurrent handlers never act on a stale
//! snapshot.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

/// What the conversation is doing right now. Single source of truth.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConversationStatus {
    /// No session, or the session closed cleanly.
    Idle = 0,
    /// Connect requested; transport not yet open.
    Connecting = 1,
    /// Open and waiting for (or receiving) user speech.
    Listening = 2,
    /// The engine has heard the user but no agent audio is playing yet.
    Thinking = 3,
    /// Agent audio is genuinely in flight through the playback scheduler.
    Speaking = 4,
    /// Transport error or abnormal close; the session is dead.
    Error = 5,
}

impl ConversationStatus {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Connecting,
            2 => Self::Listening,
            3 => Self::Thinking,
            4 => Self::Speaking,
            5 => Self::Error,
            _ => Self::Idle,
        }
    }
}

/// Shared status cell. Clones are handles onto the same cell.
#[derive(Clone, Default)]
pub struct StatusCell {
    inner: Arc<AtomicU8>,
}

impl StatusCell {
    /// New cell starting at [`ConversationStatus::Idle`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Read the current status, fresh.
    pub fn get(&self) -> ConversationStatus {
        ConversationStatus::from_u8(self.inner.load(Ordering::Acquire))
    }

    /// Set the status unconditionally. Returns true when it changed.
    pub fn set(&self, status: ConversationStatus) -> bool {
        self.inner.swap(status as u8, Ordering::AcqRel) != status as u8
    }

    /// Set `to` only when the current status is `from`. Returns true on
    /// transition.
    pub fn transition(&self, from: ConversationStatus, to: ConversationStatus) -> bool {
        self.inner
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}
