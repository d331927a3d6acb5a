//! # Scheduler
//!
//! Core scheduling logic for WardOS: preemptive, fixed-priority, tick
//! driven. Higher numbers run first; tasks of equal priority share the CPU
//! round-robin, one tick at a time.
//!
//! ## Scheduling Algorithm
//!
//! At each SysTick interrupt:
//! 1. **Advance time**: increment the tick counter
//! 2. **Wake sleepers**: Blocked tasks whose wake tick has passed become Ready
//! 3. **Decide**: if a Ready task has at least the running task's priority,
//!    request a reschedule (strictly higher preempts, equal rotates)
//!
//! On each PendSV the outgoing task's stack is checked for overflow before
//! the next task is selected.

use crate::config::{MAX_TASKS, MIN_STACK_SIZE, STACK_FILL_PATTERN, STACK_POOL_BYTES};
use crate::kernel::KernelError;
use crate::task::{StackOverflow, TaskControlBlock, TaskState};

const STACK_POOL_WORDS: usize = STACK_POOL_BYTES / 4;

/// Words in the initial context frame (8 software + 8 hardware).
const INITIAL_FRAME_WORDS: usize = 16;

// ---------------------------------------------------------------------------
// Stack pool
// ---------------------------------------------------------------------------

/// Bump allocator for task stacks. Stacks are never freed.
#[repr(C, align(8))]
pub struct StackPool {
    words: [u32; STACK_POOL_WORDS],
    used: usize,
}

impl StackPool {
    pub const fn new() -> Self {
        Self { words: [0; STACK_POOL_WORDS], used: 0 }
    }

    /// Carve a stack of at least `bytes` bytes, rounded up to 8-byte
    /// granularity, and fill it with `STACK_FILL_PATTERN`.
    ///
    /// Returns the lowest word and the length in words.
    pub fn allocate(&mut self, bytes: usize) -> Result<(*mut u32, usize), KernelError> {
        if bytes < MIN_STACK_SIZE {
            return Err(KernelError::StackTooSmall);
        }
        let words = bytes.div_ceil(8) * 2;
        if words > STACK_POOL_WORDS - self.used {
            return Err(KernelError::StackPoolExhausted);
        }

        let stack = &mut self.words[self.used..self.used + words];
        stack.fill(STACK_FILL_PATTERN);
        let base = stack.as_mut_ptr();
        self.used += words;
        Ok((base, words))
    }
}

// ---------------------------------------------------------------------------
// Scheduler struct
// ---------------------------------------------------------------------------

/// The central scheduler state. Stored as a global `static mut` in
/// `kernel.rs`.
///
/// ## Design Notes
///
/// - All tasks are stored inline in a fixed-size array (no heap)
/// - `current_task` tracks the index of the currently running task
/// - The idle task (created by `kernel::init`) keeps the ready set non-empty
pub struct Scheduler {
    /// Fixed-size array of TCBs.
    pub tasks: [TaskControlBlock; MAX_TASKS],

    /// Index of the currently running task.
    pub current_task: usize,

    /// Number of allocated tasks (including the idle task).
    pub task_count: usize,

    /// Monotonic tick counter.
    pub tick_count: u64,

    /// Flag set by `tick()` when a reschedule is needed.
    pub needs_reschedule: bool,

    /// Set by [`Scheduler::launch`]. Until then there is no task context
    /// to switch away from.
    pub started: bool,

    stacks: StackPool,
}

/// Where the first task starts: its initial PSP and the branch target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FirstTask {
    pub stack_pointer: *const u32,
    /// Entry address with the Thumb bit set, for a `bx`.
    pub entry: u32,
}

impl Scheduler {
    pub const fn new() -> Self {
        Self {
            tasks: [TaskControlBlock::EMPTY; MAX_TASKS],
            current_task: 0,
            task_count: 0,
            tick_count: 0,
            needs_reschedule: false,
            started: false,
            stacks: StackPool::new(),
        }
    }

    /// Register a new task with the scheduler.
    ///
    /// # Returns
    /// - `Ok(task_id)`: the index of the newly created task
    /// - `Err(KernelError::TaskTableFull)`: `MAX_TASKS` reached
    /// - `Err(KernelError::StackTooSmall | StackPoolExhausted)`: no stack
    pub fn create_task(
        &mut self,
        entry: extern "C" fn() -> !,
        name: &'static str,
        stack_size: usize,
        priority: u8,
    ) -> Result<usize, KernelError> {
        if self.task_count >= MAX_TASKS {
            return Err(KernelError::TaskTableFull);
        }
        let (base, words) = self.stacks.allocate(stack_size)?;

        let id = self.task_count;
        self.tasks[id].init(id, name, priority, base, words);

        // Initialize the stack frame for context switching
        init_task_stack(&mut self.tasks[id], entry as usize as u32);

        self.task_count += 1;
        Ok(id)
    }

    /// Called from the SysTick handler every tick.
    pub fn tick(&mut self) {
        self.tick_count += 1;
        let now = self.tick_count;

        for task in self.tasks[..self.task_count].iter_mut() {
            task.wake_if_due(now);
        }

        if self.should_switch(true) {
            self.needs_reschedule = true;
        }
    }

    /// Whether the running task should give up the CPU. With `rotate`,
    /// an equal-priority Ready peer also counts.
    fn should_switch(&self, rotate: bool) -> bool {
        let current = self.current_task;
        if current >= self.task_count || !self.tasks[current].is_runnable() {
            return self.task_count > 0;
        }
        let running = self.tasks[current].priority;
        self.tasks[..self.task_count]
            .iter()
            .enumerate()
            .filter(|&(i, t)| i != current && t.is_runnable())
            .any(|(_, t)| t.priority > running || (rotate && t.priority == running))
    }

    /// Whether a Ready task outranks the running one. Used to decide if an
    /// interrupt should end with a context switch. Always false before
    /// [`Scheduler::launch`].
    pub fn higher_priority_ready(&self) -> bool {
        self.started && self.should_switch(false)
    }

    /// Pick the first task and mark the scheduler started.
    ///
    /// The stacked PC in the initial frame has bit 0 clear, as an exception
    /// return requires. The first task is entered with a plain `bx`
    /// instead, which takes the Thumb state from bit 0 of the target.
    pub fn launch(&mut self) -> FirstTask {
        let first = self.schedule();
        self.started = true;
        let sp = self.tasks[first].stack_pointer;
        // Safety: `sp` points at the 16-word frame written by init_task_stack
        // or saved by a context switch, both inside the task's stack.
        let pc = unsafe { sp.add(INITIAL_FRAME_WORDS - 2).read() };
        FirstTask { stack_pointer: sp as *const u32, entry: pc | 1 }
    }

    /// Select the next task to run.
    ///
    /// Picks the highest-priority runnable task. Among equals, the search
    /// starts just after the current task, so peers take turns and the
    /// current task is picked again only when it has no Ready peer.
    ///
    /// If no task is runnable, returns 0 (the idle task).
    pub fn schedule(&mut self) -> usize {
        let prev = self.current_task;
        if prev < self.task_count && self.tasks[prev].state == TaskState::Running {
            self.tasks[prev].state = TaskState::Ready;
        }

        let mut best: Option<usize> = None;
        for offset in 1..=self.task_count {
            let i = (prev + offset) % self.task_count;
            if !self.tasks[i].is_runnable() {
                continue;
            }
            if best.map_or(true, |b| self.tasks[i].priority > self.tasks[b].priority) {
                best = Some(i);
            }
        }

        let next = best.unwrap_or(0);
        if next < self.task_count {
            self.tasks[next].state = TaskState::Running;
        }

        self.current_task = next;
        self.needs_reschedule = false;
        next
    }

    /// Put the current task to sleep for `ticks` ticks. Zero ticks is a
    /// plain yield.
    pub fn block_current(&mut self, ticks: u32) {
        if ticks == 0 {
            self.yield_current();
            return;
        }
        let current = self.current_task;
        if current < self.task_count && self.tasks[current].active {
            let wake = self.tick_count + ticks as u64;
            self.tasks[current].block_until(wake);
            self.needs_reschedule = true;
        }
    }

    /// Record a voluntary yield from the current task.
    pub fn yield_current(&mut self) {
        let current = self.current_task;
        if current < self.task_count && self.tasks[current].active {
            self.tasks[current].state = TaskState::Ready;
            self.needs_reschedule = true;
        }
    }

    /// Store the current task's saved stack pointer. Called from PendSV.
    pub fn save_current(&mut self, psp: *mut u32) {
        let current = self.current_task;
        if current < self.task_count {
            self.tasks[current].stack_pointer = psp;
        }
    }

    /// Check the current task's stack. Called from PendSV after the
    /// outgoing context is saved.
    pub fn check_current_stack(&self) -> Result<(), StackOverflow> {
        let tcb = self.current_tcb();
        if tcb.stack_overflowed() {
            Err(StackOverflow { task: tcb.id, name: tcb.name })
        } else {
            Ok(())
        }
    }

    /// Get a reference to the current task's TCB.
    pub fn current_tcb(&self) -> &TaskControlBlock {
        &self.tasks[self.current_task]
    }

}

// ---------------------------------------------------------------------------
// Stack initialization helper
// ---------------------------------------------------------------------------

/// Initialize a task's stack frame for first-time context switch.
///
/// The hardware pushes an exception frame on interrupt entry. We
/// pre-populate this frame on the task's stack so that the first PendSV
/// "return" starts executing the task function.
///
/// ## Stack Layout (top = high address, growing down)
///
/// ```text
/// [Hardware stacked frame]
///   xPSR  (Thumb bit set)
///   PC    (task entry point)
///   LR    (task_exit)
///   R12, R3, R2, R1, R0 (0)
/// [Software saved context]
///   R11 .. R4 (0)              <- stack_pointer after init
/// ```
fn init_task_stack(tcb: &mut TaskControlBlock, entry: u32) {
    let stack_top = tcb.stack_base as usize + tcb.stack_words * 4;
    // Align to 8 bytes (AAPCS requirement)
    let aligned_top = stack_top & !0x07;

    let frame_ptr = (aligned_top - INITIAL_FRAME_WORDS * 4) as *mut u32;

    unsafe {
        // Software-saved registers (R4–R11)
        for i in 0..8 {
            frame_ptr.add(i).write(0);
        }

        // Hardware-stacked frame (R0–R3, R12, LR, PC, xPSR)
        for i in 8..13 {
            frame_ptr.add(i).write(0);
        }
        frame_ptr.add(13).write(task_exit as usize as u32); // LR
        frame_ptr.add(14).write(entry & !1); // PC, Thumb bit lives in xPSR
        frame_ptr.add(15).write(0x0100_0000); // xPSR, Thumb bit set
    }

    tcb.stack_pointer = frame_ptr;
}

/// Landing pad for a task that returns. Entry functions are `fn() -> !`, so
/// reaching this is a kernel bug; halt rather than run off into the stack.
extern "C" fn task_exit() -> ! {
    crate::fault::halt()
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------
