//! # Task Control Block
//!
//! Defines the task model for WardOS. A task is a never-returning entry
//! function with a name, a fixed priority and a stack carved from the
//! kernel's stack pool. Tasks suspend only by sleeping; there is no other
//! blocking primitive.

use crate::config::{MAX_TASK_NAME_LEN, STACK_FILL_PATTERN, STACK_GUARD_WORDS};

// ---------------------------------------------------------------------------
// Task state machine
// ---------------------------------------------------------------------------

/// Execution state of a task in the scheduler's state machine.
///
/// ```text
///   ┌──────────┐     schedule()      ┌─────────┐
///   │  Ready   │ ──────────────────► │ Running │
///   └──────────┘                     └─────────┘
///        ▲  ▲         preempt / yield     │
///        │  └─────────────────────────────┤
///        │                                │ sleep()
///        │         wake tick reached      ▼
///        │                          ┌──────────┐
///        └───────────────────────── │ Blocked  │
///                                   └──────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Task is ready to run and waiting for the CPU.
    Ready,
    /// Task is currently executing on the CPU.
    Running,
    /// Task is sleeping until `wake_tick`.
    Blocked,
    /// Slot is unallocated.
    Suspended,
}

/// A stack overflow caught on a context switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackOverflow {
    pub task: usize,
    pub name: &'static str,
}

/// Cut a task name down to `MAX_TASK_NAME_LEN` bytes on a char boundary.
pub fn truncate_name(name: &'static str) -> &'static str {
    if name.len() <= MAX_TASK_NAME_LEN {
        return name;
    }
    let mut end = MAX_TASK_NAME_LEN;
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    &name[..end]
}

// ---------------------------------------------------------------------------
// Task Control Block
// ---------------------------------------------------------------------------

/// Task Control Block (TCB). TCBs live in a fixed array inside the
/// scheduler; stacks live in the scheduler's stack pool.
///
/// ## Stack Layout
///
/// ```text
///  stack_base + stack_words  ─► top (initial frame just below)
///        ...                      (grows down)
///  stack_base + GUARD        ─► lowest usable word
///  stack_base                ─► guard words, must keep the fill pattern
/// ```
pub struct TaskControlBlock {
    /// Index in the scheduler's task array.
    pub id: usize,

    pub name: &'static str,

    pub state: TaskState,

    /// Fixed priority, higher runs first.
    pub priority: u8,

    /// Saved stack pointer (PSP). Updated on context switch.
    pub stack_pointer: *mut u32,

    /// Lowest word of this task's stack.
    pub stack_base: *mut u32,

    /// Stack size in words.
    pub stack_words: usize,

    /// Tick at which a Blocked task becomes Ready again.
    pub wake_tick: u64,

    /// Whether this task is allocated (true) or a free slot (false).
    pub active: bool,
}

// Safety: the raw pointers only ever point into the kernel's stack pool,
// and TCBs are only touched inside critical sections or from PendSV.
unsafe impl Send for TaskControlBlock {}
unsafe impl Sync for TaskControlBlock {}

impl TaskControlBlock {
    /// An unallocated slot. Used to initialize the static array.
    pub const EMPTY: Self = Self {
        id: 0,
        name: "",
        state: TaskState::Suspended,
        priority: 0,
        stack_pointer: core::ptr::null_mut(),
        stack_base: core::ptr::null_mut(),
        stack_words: 0,
        wake_tick: 0,
        active: false,
    };

    /// Initialize a TCB for a new task over an already-filled stack.
    ///
    /// The initial exception frame must be separately written by the
    /// scheduler.
    pub fn init(&mut self, id: usize, name: &'static str, priority: u8, stack_base: *mut u32, stack_words: usize) {
        self.id = id;
        self.name = truncate_name(name);
        self.state = TaskState::Ready;
        self.priority = priority;
        self.stack_base = stack_base;
        self.stack_words = stack_words;
        self.stack_pointer = core::ptr::null_mut();
        self.wake_tick = 0;
        self.active = true;
    }

    /// Check if this task can be picked by the scheduler.
    #[inline]
    pub fn is_runnable(&self) -> bool {
        self.active && matches!(self.state, TaskState::Ready | TaskState::Running)
    }

    /// Put the task to sleep until `wake_tick`.
    pub fn block_until(&mut self, wake_tick: u64) {
        self.state = TaskState::Blocked;
        self.wake_tick = wake_tick;
    }

    /// Move a Blocked task whose wake tick has passed to Ready. Returns
    /// `true` if the task woke.
    pub fn wake_if_due(&mut self, now: u64) -> bool {
        if self.active && self.state == TaskState::Blocked && now >= self.wake_tick {
            self.state = TaskState::Ready;
            true
        } else {
            false
        }
    }

    /// Whether the task has run past the bottom of its stack: either the
    /// saved stack pointer reached the guard words, or a guard word lost
    /// the fill pattern.
    pub fn stack_overflowed(&self) -> bool {
        if !self.active || self.stack_base.is_null() {
            return false;
        }
        let guard_end = self.stack_base as usize + STACK_GUARD_WORDS * 4;
        if !self.stack_pointer.is_null() && (self.stack_pointer as usize) < guard_end {
            return true;
        }
        (0..STACK_GUARD_WORDS)
            .any(|i| unsafe { core::ptr::read_volatile(self.stack_base.add(i)) } != STACK_FILL_PATTERN)
    }

    /// Words at the bottom of the stack that still hold the fill pattern,
    /// i.e. the least free stack seen so far.
    pub fn stack_high_water(&self) -> usize {
        if self.stack_base.is_null() {
            return 0;
        }
        (0..self.stack_words)
            .take_while(|&i| unsafe { core::ptr::read_volatile(self.stack_base.add(i)) } == STACK_FILL_PATTERN)
            .count()
    }
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------
