//! # WardOS Configuration
//!
//! Compile-time constants for the kernel, the hardware timers, the MPU
//! region table and the supervisor tasks. Nothing here can be changed at
//! runtime; rebuilding the image is the only reconfiguration path.

use crate::channel::ChannelId;
use crate::mpu::{AccessPolicy, MemoryType, ProtectionRegion};
use crate::timer::TimerUnit;

// ---------------------------------------------------------------------------
// Clocks
// ---------------------------------------------------------------------------

/// Core clock in Hz. The hardware timers count this clock directly.
pub const CPU_CLOCK_HZ: u32 = 240_000_000;

/// SysTick frequency in Hz. One tick is one millisecond.
pub const TICK_HZ: u32 = 1000;

/// Convert milliseconds to scheduler ticks.
pub const fn ms_to_ticks(ms: u32) -> u32 {
    ((ms as u64 * TICK_HZ as u64) / 1000) as u32
}

// ---------------------------------------------------------------------------
// Kernel
// ---------------------------------------------------------------------------

/// Maximum number of tasks, idle task included.
pub const MAX_TASKS: usize = 8;

/// Bytes of RAM shared by all task stacks. Stacks are carved out of this
/// pool at task creation and never returned.
pub const STACK_POOL_BYTES: usize = 8 * 1024;

/// Smallest stack `create_task` accepts: the 64-byte initial frame plus the
/// guard words plus some room to actually run.
pub const MIN_STACK_SIZE: usize = 256;

/// Stack for each supervisor task. Log formatting needs a line buffer on
/// the stack, hence the headroom.
pub const TASK_STACK_SIZE: usize = 2048;

/// Stack for the idle task, which only ever executes `wfi`.
pub const IDLE_STACK_SIZE: usize = 512;

/// Number of words at the bottom of each stack that must keep the fill
/// pattern. A disturbed guard word means the task overflowed.
pub const STACK_GUARD_WORDS: usize = 4;

/// Fill pattern written over a fresh stack.
pub const STACK_FILL_PATTERN: u32 = 0xA5A5_A5A5;

/// Longest task name kept by the kernel; longer names are truncated.
pub const MAX_TASK_NAME_LEN: usize = 12;

// ---------------------------------------------------------------------------
// Interrupt priorities
// ---------------------------------------------------------------------------

/// Implemented NVIC priority bits on the S32K3 Cortex-M7.
pub const NVIC_PRIO_BITS: u8 = 4;

/// Priority of SysTick and PendSV (lowest).
pub const KERNEL_INTERRUPT_PRIORITY: u8 = 0xFF;

/// Highest (numerically lowest) priority from which an ISR may still call
/// `kernel::yield_from_isr`. The hardware timers run at exactly this level.
pub const MAX_SYSCALL_INTERRUPT_PRIORITY: u8 = 5 << (8 - NVIC_PRIO_BITS);

// ---------------------------------------------------------------------------
// Supervisor tasks
// ---------------------------------------------------------------------------

pub const IDLE_PRIORITY: u8 = 0;
pub const MONITOR_TASK_PRIORITY: u8 = IDLE_PRIORITY + 2;
pub const ALERT_TASK_PRIORITY: u8 = IDLE_PRIORITY + 3;
pub const EVENT_TASK_PRIORITY: u8 = IDLE_PRIORITY + 4;

/// Delay before the Monitor and Alert tasks first poll, so the Event
/// Simulator gets its first cycle in.
pub const POLL_START_DELAY_TICKS: u32 = ms_to_ticks(500);

pub const MONITOR_PERIOD_TICKS: u32 = ms_to_ticks(1000);
pub const ALERT_PERIOD_TICKS: u32 = ms_to_ticks(1000);
pub const EVENT_PERIOD_TICKS: u32 = ms_to_ticks(5000);

/// Initial seed of the event generator. Fixed so every run produces the
/// same classification sequence.
pub const PRNG_SEED: u32 = 14536;

// ---------------------------------------------------------------------------
// Console
// ---------------------------------------------------------------------------

/// UART0 base address.
pub const UART0_BASE: usize = 0x4006_A000;

/// UART0 baud divisor (relative to the peripheral clock).
pub const UART0_BAUD_DIVISOR: u32 = 16;

// ---------------------------------------------------------------------------
// Hardware timers
// ---------------------------------------------------------------------------

/// Every hardware timer the supervisor arms, indexed by timer id.
pub const TIMER_UNITS: [TimerUnit; 3] = [
    TimerUnit::new(0, 0x4003_7000, 8, 2, Some(ChannelId::User)),
    TimerUnit::new(1, 0x4003_8000, 9, 2, Some(ChannelId::Suspicious)),
    // Spare: armed and cleared, but feeds no channel.
    TimerUnit::new(2, 0x4003_9000, 10, 2, None),
];

// ---------------------------------------------------------------------------
// Memory protection
// ---------------------------------------------------------------------------

/// The MPU region table, applied once at boot by `mpu::configure`.
pub const PROTECTION_REGIONS: [ProtectionRegion; 3] = [
    // Program flash: executable, unprivileged code may only read.
    ProtectionRegion::new(
        0,
        0x0000_0000,
        16 * 1024 * 1024,
        AccessPolicy::PrivilegedRwUnprivilegedRo,
        true,
        MemoryType::NormalWriteThrough,
    ),
    // SRAM: data only.
    ProtectionRegion::new(
        1,
        0x2040_0000,
        4 * 1024 * 1024,
        AccessPolicy::PrivilegedRwUnprivilegedRo,
        false,
        MemoryType::NormalWriteBack,
    ),
    // Memory-mapped peripherals: privileged access only, never executable.
    ProtectionRegion::new(
        2,
        0x4000_0000,
        512 * 1024 * 1024,
        AccessPolicy::PrivilegedRwOnly,
        false,
        MemoryType::Device,
    ),
];
