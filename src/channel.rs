//! # Activity Channels
//!
//! Shared supervisor state: one [`Channel`] per activity class. Each channel
//! is a single-slot notification between producers (the Event Simulator
//! task and the timer interrupts) and exactly one consumer task.
//!
//! ## Per-channel state machine
//!
//! ```text
//!            raise() / latch()
//!   ┌──────┐ ─────────────────► ┌─────────┐
//!   │ Idle │                    │ Pending │ ──┐ raise() again:
//!   └──────┘ ◄───────────────── └─────────┘ ◄─┘ coalesced, not queued
//!              acknowledge()
//!                (owner only)
//! ```
//!
//! All flags are atomics. The owner acknowledges with a single swap, so a
//! raise can never fall between its read and its clear. A raise that lands
//! on a detection still pending is absorbed and counted in `coalesced`.

use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

/// The two independent activity classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelId {
    /// Ordinary user activity, watched by the Monitor task.
    User,
    /// Suspicious activity, watched by the Alert task.
    Suspicious,
}

impl ChannelId {
    /// The opposite channel.
    pub const fn other(self) -> Self {
        match self {
            ChannelId::User => ChannelId::Suspicious,
            ChannelId::Suspicious => ChannelId::User,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            ChannelId::User => "user",
            ChannelId::Suspicious => "suspicious",
        }
    }
}

/// Point-in-time copy of a channel, for diagnostics and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelSnapshot {
    pub activity: bool,
    pub detection: bool,
    pub count: u32,
    pub coalesced: u32,
}

/// One activity channel.
pub struct Channel {
    /// An event of this class is active in the current simulator cycle.
    activity: AtomicBool,
    /// An event was observed and the owner has not acknowledged it yet.
    detection: AtomicBool,
    /// Events classified into this channel since boot.
    count: AtomicU32,
    /// Raises absorbed by an already-pending detection.
    coalesced: AtomicU32,
}

impl Channel {
    pub const fn new() -> Self {
        Self {
            activity: AtomicBool::new(false),
            detection: AtomicBool::new(false),
            count: AtomicU32::new(0),
            coalesced: AtomicU32::new(0),
        }
    }

    /// Clear both flags and both counters.
    pub fn reset(&self) {
        self.activity.store(false, Ordering::Relaxed);
        self.detection.store(false, Ordering::Relaxed);
        self.count.store(0, Ordering::Relaxed);
        self.coalesced.store(0, Ordering::Relaxed);
    }

    /// Drop the activity signal at the start of a simulator cycle.
    #[inline]
    pub fn clear_activity(&self) {
        self.activity.store(false, Ordering::Release);
    }

    /// Publish a newly classified event. Returns the updated count.
    pub fn record_event(&self) -> u32 {
        let count = self.count.fetch_add(1, Ordering::Relaxed).wrapping_add(1);
        self.activity.store(true, Ordering::Release);
        count
    }

    /// Raise the detection flag. Returns `false` when a detection was
    /// already pending and this one was absorbed.
    pub fn raise(&self) -> bool {
        let was_pending = self.detection.swap(true, Ordering::AcqRel);
        if was_pending {
            self.coalesced.fetch_add(1, Ordering::Relaxed);
        }
        !was_pending
    }

    /// Interrupt-side sampling: raise a detection if this channel is active.
    /// Never clears a pending detection. Returns `true` if the flag went
    /// from clear to set.
    pub fn latch(&self) -> bool {
        if self.activity.load(Ordering::Acquire) {
            self.raise()
        } else {
            false
        }
    }

    /// Owner-side read-and-clear of the detection flag. Returns whether a
    /// detection was pending.
    #[inline]
    pub fn acknowledge(&self) -> bool {
        self.detection.swap(false, Ordering::AcqRel)
    }

    #[inline]
    pub fn is_active(&self) -> bool {
        self.activity.load(Ordering::Acquire)
    }

    #[inline]
    pub fn is_pending(&self) -> bool {
        self.detection.load(Ordering::Acquire)
    }

    #[inline]
    pub fn count(&self) -> u32 {
        self.count.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> ChannelSnapshot {
        ChannelSnapshot {
            activity: self.activity.load(Ordering::Acquire),
            detection: self.detection.load(Ordering::Acquire),
            count: self.count.load(Ordering::Relaxed),
            coalesced: self.coalesced.load(Ordering::Relaxed),
        }
    }
}

impl Default for Channel {
    fn default() -> Self {
        Self::new()
    }
}

/// The supervisor's complete shared state: both channels.
pub struct ActivityState {
    pub user: Channel,
    pub suspicious: Channel,
}

impl ActivityState {
    pub const fn new() -> Self {
        Self {
            user: Channel::new(),
            suspicious: Channel::new(),
        }
    }

    #[inline]
    pub fn channel(&self, id: ChannelId) -> &Channel {
        match id {
            ChannelId::User => &self.user,
            ChannelId::Suspicious => &self.suspicious,
        }
    }

    pub fn reset(&self) {
        self.user.reset();
        self.suspicious.reset();
    }
}

impl Default for ActivityState {
    fn default() -> Self {
        Self::new()
    }
}

/// The one instance shared by the timer interrupts and the supervisor tasks.
pub static ACTIVITY: ActivityState = ActivityState::new();
