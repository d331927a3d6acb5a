//! # Synchronization Primitives
//!
//! Interrupt-safe critical sections for the single-core Cortex-M7. Kernel
//! state and console output are only touched inside one, so tasks, SysTick
//! and the timer interrupts never observe each other half-way.

use cortex_m::interrupt;

/// Execute a closure with interrupts disabled, restoring the previous
/// state on exit.
///
/// ```ignore
/// sync::critical_section(|_cs| {
///     // touch shared state
/// });
/// ```
///
/// Keep the closure short: it delays every interrupt, the timers included.
#[inline]
pub fn critical_section<F, R>(f: F) -> R
where
    F: FnOnce(&interrupt::CriticalSection) -> R,
{
    interrupt::free(f)
}
