//! # Cortex-M7 Port Layer
//!
//! Hardware-specific code for the ARM Cortex-M7 (ARMv7-M, Thumb-2).
//! Implements context switching via PendSV, SysTick timer configuration,
//! and NVIC access for the timer interrupts.
//!
//! ## Context Switch Mechanism
//!
//! The core uses a split-stack model:
//! - **MSP** (Main Stack Pointer): used by the kernel and interrupt handlers
//! - **PSP** (Process Stack Pointer): used by tasks in Thread mode
//!
//! On exception entry, the hardware stacks R0–R3, R12, LR, PC and xPSR
//! onto the process stack. The PendSV handler saves and restores R4–R11,
//! which completes the context. The image is built soft-float, so no FPU
//! state is ever stacked.
//!
//! ## Interrupt Priorities
//!
//! - SysTick, PendSV: `KERNEL_INTERRUPT_PRIORITY` (lowest)
//! - Timer IRQs: `MAX_SYSCALL_INTERRUPT_PRIORITY`, above the kernel, so a
//!   timer can preempt a tick but never the other way round

use cortex_m::interrupt::InterruptNumber;
use cortex_m::peripheral::syst::SystClkSource;
use cortex_m::peripheral::NVIC;

use crate::config::{CPU_CLOCK_HZ, KERNEL_INTERRUPT_PRIORITY, TICK_HZ};

// ---------------------------------------------------------------------------
// External interrupts
// ---------------------------------------------------------------------------

/// A device interrupt line, numbered from 0 at vector 16.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Irq(pub u16);

// Safety: every `Irq` the firmware builds comes from `TIMER_UNITS`, whose
// lines all exist in the vector table in `main.rs`.
unsafe impl InterruptNumber for Irq {
    #[inline]
    fn number(self) -> u16 {
        self.0
    }
}

/// The two NVIC operations the timer layer needs.
pub trait InterruptController {
    /// Set the raw 8-bit priority of `irq` (only the top `NVIC_PRIO_BITS`
    /// are implemented).
    fn set_priority(&mut self, irq: Irq, priority: u8);
    fn enable_irq(&mut self, irq: Irq);
}

impl InterruptController for NVIC {
    fn set_priority(&mut self, irq: Irq, priority: u8) {
        // Safety: timer IRQs sit above the kernel priority and never share
        // data with a lower-priority critical section that relies on
        // BASEPRI.
        unsafe { NVIC::set_priority(self, irq, priority) }
    }

    fn enable_irq(&mut self, irq: Irq) {
        // Safety: handlers for every timer line are installed.
        unsafe { NVIC::unmask(irq) }
    }
}

// ---------------------------------------------------------------------------
// SysTick configuration
// ---------------------------------------------------------------------------

/// Configure SysTick to fire at `TICK_HZ` from the core clock. Each tick
/// enters `SysTick`, which advances the scheduler.
pub fn configure_systick(syst: &mut cortex_m::peripheral::SYST) {
    let reload = CPU_CLOCK_HZ / TICK_HZ - 1;
    syst.set_reload(reload);
    syst.clear_current();
    syst.set_clock_source(SystClkSource::Core);
    syst.enable_counter();
    syst.enable_interrupt();
}

// ---------------------------------------------------------------------------
// PendSV trigger
// ---------------------------------------------------------------------------

/// Pend a PendSV exception to perform a context switch once no other
/// handler is active.
///
/// Sets the PENDSVSET bit in the Interrupt Control and State Register.
#[inline]
pub fn trigger_pendsv() {
    // ICSR address: 0xE000_ED04, PENDSVSET = bit 28
    const ICSR: *mut u32 = 0xE000_ED04 as *mut u32;
    unsafe {
        core::ptr::write_volatile(ICSR, 1 << 28);
    }
}

// ---------------------------------------------------------------------------
// Interrupt priority configuration
// ---------------------------------------------------------------------------

/// Put PendSV and SysTick at `KERNEL_INTERRUPT_PRIORITY`.
pub fn set_interrupt_priorities() {
    unsafe {
        // System Handler Priority Register 3 (SHPR3): 0xE000_ED20
        // Bits [23:16] = PendSV priority
        // Bits [31:24] = SysTick priority
        let shpr3: *mut u32 = 0xE000_ED20 as *mut u32;
        let prio = KERNEL_INTERRUPT_PRIORITY as u32;
        let val = core::ptr::read_volatile(shpr3) & 0x0000_FFFF;
        core::ptr::write_volatile(shpr3, val | (prio << 16) | (prio << 24));
    }
}

// ---------------------------------------------------------------------------
// First task launch
// ---------------------------------------------------------------------------

/// Switch Thread mode to the PSP and branch into the first task.
///
/// Called once from `kernel::start()` with interrupts disabled; they are
/// re-enabled immediately before the branch. `entry` must have bit 0 set
/// (see `Scheduler::launch`); the stacked PC does not.
///
/// # Safety
/// Must only be called once, with a stack prepared by the scheduler.
#[cfg(all(target_arch = "arm", target_os = "none"))]
pub unsafe fn start_first_task(psp: *const u32, entry: u32) -> ! {
    core::arch::asm!(
        // Skip the software-saved R4-R11 (8 x 4 = 32 bytes)
        "adds r0, #32",
        "msr psp, r0",

        // CONTROL.SPSEL = 1: Thread mode now runs on the PSP
        "movs r0, #2",
        "msr control, r0",
        "isb",

        // Unwind the hardware frame by hand; this is not a real exception return
        "pop {{r0-r3, r12}}",
        "pop {{r4}}",          // LR (task_exit)
        "pop {{r5}}",          // PC, bit 0 clear; branch via r8 instead
        "pop {{r6}}",          // xPSR, discarded

        "mov lr, r4",
        "orr r8, r8, #1",
        "cpsie i",
        "bx r8",

        in("r0") psp,
        in("r8") entry,
        options(noreturn)
    );
}

#[cfg(not(all(target_arch = "arm", target_os = "none")))]
pub unsafe fn start_first_task(_psp: *const u32, _entry: u32) -> ! {
    unreachable!("task launch needs a Cortex-M target")
}

// ---------------------------------------------------------------------------
// PendSV handler (context switch)
// ---------------------------------------------------------------------------

// PendSV: save R4-R11 of the outgoing task on its PSP, hand the PSP to the
// scheduler, get the next task's PSP back, restore its R4-R11 and return
// to Thread mode on the PSP (EXC_RETURN 0xFFFFFFFD).
#[cfg(all(target_arch = "arm", target_os = "none"))]
core::arch::global_asm!(
    ".section .text.PendSV,\"ax\",%progbits",
    ".global PendSV",
    ".type PendSV,%function",
    ".thumb_func",
    "PendSV:",
    "    cpsid i",
    "    mrs r0, psp",
    "    stmdb r0!, {{r4-r11}}",
    "    bl wardos_save_context",
    "    bl wardos_switch_context",
    "    ldmia r0!, {{r4-r11}}",
    "    msr psp, r0",
    "    cpsie i",
    "    ldr r0, =0xFFFFFFFD",
    "    bx r0",
    "    .ltorg",
    ".size PendSV, . - PendSV",
);

/// Store the outgoing task's stack pointer. Called from PendSV.
///
/// # Safety
/// Called from assembly with interrupts disabled.
#[cfg(all(target_arch = "arm", target_os = "none"))]
#[no_mangle]
unsafe extern "C" fn wardos_save_context(psp: *mut u32) {
    let scheduler = &mut *crate::kernel::scheduler();
    scheduler.save_current(psp);
}

/// Check the outgoing task's stack, pick the next task and return its
/// stack pointer. Called from PendSV.
///
/// # Safety
/// Called from assembly with interrupts disabled.
#[cfg(all(target_arch = "arm", target_os = "none"))]
#[no_mangle]
unsafe extern "C" fn wardos_switch_context() -> *mut u32 {
    let scheduler = &mut *crate::kernel::scheduler();
    if let Err(overflow) = scheduler.check_current_stack() {
        crate::fault::stack_overflow_hook(overflow.name);
    }
    let next = scheduler.schedule();
    scheduler.tasks[next].stack_pointer
}

// ---------------------------------------------------------------------------
// SysTick handler
// ---------------------------------------------------------------------------

/// Scheduler tick. Advances time, wakes sleepers, and pends PendSV when a
/// switch is due.
#[cfg(all(target_arch = "arm", target_os = "none"))]
#[no_mangle]
pub unsafe extern "C" fn SysTick() {
    crate::sync::critical_section(|_cs| {
        let scheduler = &mut *crate::kernel::scheduler();
        scheduler.tick();
        if scheduler.needs_reschedule {
            trigger_pendsv();
        }
    });
}
