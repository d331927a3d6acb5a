//! # Kernel
//!
//! Top-level kernel initialization and public API for WardOS.
//!
//! The kernel owns the global scheduler instance, provides task creation
//! and sleeping, and launches the first task. All public functions use
//! critical sections to stay interrupt safe.
//!
//! ## Startup Sequence
//!
//! ```text
//! reset handler (cortex-m-rt)
//!   └─► main()
//!         ├─► kernel::init()        ← Scheduler + idle task
//!         ├─► kernel::create_task() ← Register tasks (×N)
//!         └─► kernel::start()       ← Launch scheduler (no return)
//!               ├─► Configure SysTick
//!               ├─► Set PendSV/SysTick priorities
//!               └─► Start first task via arch::start_first_task()
//! ```

use core::fmt;

use crate::arch::cortex_m7;
use crate::config::{IDLE_PRIORITY, IDLE_STACK_SIZE};
use crate::fault::RunningTask;
use crate::scheduler::Scheduler;
use crate::sync;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Why a task could not be created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelError {
    /// `MAX_TASKS` tasks already exist.
    TaskTableFull,
    /// Not enough room left in the stack pool.
    StackPoolExhausted,
    /// Requested stack is below `MIN_STACK_SIZE`.
    StackTooSmall,
}

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KernelError::TaskTableFull => f.write_str("task table full"),
            KernelError::StackPoolExhausted => f.write_str("stack pool exhausted"),
            KernelError::StackTooSmall => f.write_str("stack too small"),
        }
    }
}

// ---------------------------------------------------------------------------
// Global scheduler instance
// ---------------------------------------------------------------------------

/// Global scheduler instance.
///
/// # Safety
/// Accessed through [`scheduler`]. Thread-mode access happens inside
/// critical sections; SysTick and PendSV run at the same lowest priority
/// and so never preempt each other.
static mut SCHEDULER: Scheduler = Scheduler::new();

/// Raw pointer to the global scheduler for the arch layer, which cannot
/// easily hold references.
#[inline]
pub fn scheduler() -> *mut Scheduler {
    #[allow(unused_unsafe)]
    unsafe {
        core::ptr::addr_of_mut!(SCHEDULER)
    }
}

// ---------------------------------------------------------------------------
// Kernel API
// ---------------------------------------------------------------------------

/// Initialize the kernel and create the idle task.
///
/// Must be called exactly once, from `main`, before any other kernel
/// function.
pub fn init() -> Result<(), KernelError> {
    sync::critical_section(|_cs| unsafe {
        let scheduler = &mut *scheduler();
        *scheduler = Scheduler::new();
        scheduler.create_task(idle_task, "IDLE", IDLE_STACK_SIZE, IDLE_PRIORITY)
    })?;
    Ok(())
}

/// Create a new task and register it with the scheduler.
///
/// # Parameters
/// - `entry`: task entry function, `extern "C" fn() -> !`
/// - `name`: kept for diagnostics, truncated to `MAX_TASK_NAME_LEN`
/// - `stack_size`: in bytes, rounded up to 8
/// - `priority`: fixed, higher runs first
pub fn create_task(
    entry: extern "C" fn() -> !,
    name: &'static str,
    stack_size: usize,
    priority: u8,
) -> Result<usize, KernelError> {
    sync::critical_section(|_cs| unsafe { (*scheduler()).create_task(entry, name, stack_size, priority) })
}

/// Start the scheduler. **Does not return.**
///
/// Configures SysTick, sets the kernel exception priorities and launches
/// the highest-priority task. Interrupts stay masked from here (boot masks
/// them earlier, before arming the timers) until the first task is running.
pub fn start(mut core_peripherals: cortex_m::Peripherals) -> ! {
    cortex_m::interrupt::disable();

    cortex_m7::configure_systick(&mut core_peripherals.SYST);
    cortex_m7::set_interrupt_priorities();

    let first = unsafe { (*scheduler()).launch() };

    unsafe { cortex_m7::start_first_task(first.stack_pointer, first.entry) }
}

/// Block the calling task for `ticks` scheduler ticks. Zero yields.
pub fn sleep(ticks: u32) {
    sync::critical_section(|_cs| unsafe {
        (*scheduler()).block_current(ticks);
    });
    cortex_m7::trigger_pendsv();
}

/// Called at the end of an interrupt handler. Pends a context switch if
/// the handler made a task Ready that outranks the interrupted one. Does
/// nothing until [`start`] has launched the first task.
pub fn yield_from_isr(woken: bool) {
    if !woken {
        return;
    }
    let switch = sync::critical_section(|_cs| unsafe { (*scheduler()).higher_priority_ready() });
    if switch {
        cortex_m7::trigger_pendsv();
    }
}

/// The task the scheduler last switched to, for fault reports. `None`
/// before [`start`].
///
/// Reads the scheduler without a critical section: only meant for fault
/// handlers, which run with interrupts off and never return.
pub fn running_task() -> Option<RunningTask> {
    let scheduler = unsafe { &*scheduler() };
    scheduler.started.then(|| RunningTask::of(scheduler.current_tcb()))
}

/// Runs when nothing else is Ready.
extern "C" fn idle_task() -> ! {
    loop {
        cortex_m::asm::wfi();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(std::format!("{}", KernelError::TaskTableFull), "task table full");
        assert_eq!(std::format!("{}", KernelError::StackPoolExhausted), "stack pool exhausted");
        assert_eq!(std::format!("{}", KernelError::StackTooSmall), "stack too small");
    }
}
