//! # Hardware Timers
//!
//! Periodic countdown timers (CMSDK APB timer blocks) driving the activity
//! latches. Each [`TimerUnit`] in `config::TIMER_UNITS` is armed once at
//! startup by [`initialize_timers`] and then free-runs; its interrupt
//! handler only clears its own pending bit and samples one channel.
//!
//! ## Register block
//!
//! ```text
//! +0x00 CTRL    [3] IRQ enable  [0] enable
//! +0x04 VALUE   current count
//! +0x08 RELOAD  value loaded on underflow
//! +0x0C INTCLR  write 1 to clear the pending interrupt
//! ```
//!
//! The reload value is `CPU_CLOCK_HZ / frequency` in integer arithmetic.
//! Any remainder is dropped, so a frequency that does not divide the clock
//! drifts slightly over long runs. That is accepted as-is.

use crate::arch::cortex_m7::{InterruptController, Irq};
use crate::channel::{ActivityState, ChannelId, ACTIVITY};
use crate::config::{CPU_CLOCK_HZ, MAX_SYSCALL_INTERRUPT_PRIORITY, TIMER_UNITS};
use crate::kernel;

pub const CTRL_ENABLE: u32 = 1 << 0;
pub const CTRL_IRQ_ENABLE: u32 = 1 << 3;
pub const INTCLR_CLEAR: u32 = 1 << 0;

/// Register offsets within a timer block. VALUE is never read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(usize)]
pub enum TimerReg {
    Ctrl = 0x00,
    Reload = 0x08,
    IntClr = 0x0C,
}

/// Ticks per period for a timer clocked at `clock_hz` firing at
/// `frequency_hz`. Rounds down.
#[inline]
pub const fn reload_value(clock_hz: u32, frequency_hz: u32) -> u32 {
    clock_hz / frequency_hz
}

/// Static description of one hardware timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerUnit {
    pub id: u8,
    /// Base address of the register block.
    pub base: usize,
    /// NVIC interrupt number.
    pub irq: u16,
    pub frequency_hz: u32,
    /// Channel this timer's interrupt samples, if any.
    pub channel: Option<ChannelId>,
}

impl TimerUnit {
    /// # Panics
    /// In const context: a zero frequency, or one above the core clock.
    pub const fn new(id: u8, base: usize, irq: u16, frequency_hz: u32, channel: Option<ChannelId>) -> Self {
        if frequency_hz == 0 || frequency_hz > CPU_CLOCK_HZ {
            panic!("timer frequency must be between 1 Hz and the core clock");
        }
        Self { id, base, irq, frequency_hz, channel }
    }

    #[inline]
    pub const fn reload_value(&self) -> u32 {
        reload_value(CPU_CLOCK_HZ, self.frequency_hz)
    }

    #[inline]
    pub const fn irq(&self) -> Irq {
        Irq(self.irq)
    }
}

/// Decoded CTRL register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerStatus {
    pub enabled: bool,
    pub interrupt_enabled: bool,
}

impl TimerStatus {
    pub const fn from_ctrl(ctrl: u32) -> Self {
        Self {
            enabled: ctrl & CTRL_ENABLE != 0,
            interrupt_enabled: ctrl & CTRL_IRQ_ENABLE != 0,
        }
    }
}

/// Register access for timer blocks.
pub trait TimerRegisters {
    fn read(&self, unit: &TimerUnit, reg: TimerReg) -> u32;
    fn write(&mut self, unit: &TimerUnit, reg: TimerReg, value: u32);

    fn status(&self, unit: &TimerUnit) -> TimerStatus {
        TimerStatus::from_ctrl(self.read(unit, TimerReg::Ctrl))
    }
}

/// Memory-mapped CMSDK timer blocks at the addresses in each unit.
pub struct CmsdkTimers;

impl TimerRegisters for CmsdkTimers {
    fn read(&self, unit: &TimerUnit, reg: TimerReg) -> u32 {
        unsafe { core::ptr::read_volatile((unit.base + reg as usize) as *const u32) }
    }

    fn write(&mut self, unit: &TimerUnit, reg: TimerReg, value: u32) {
        unsafe { core::ptr::write_volatile((unit.base + reg as usize) as *mut u32, value) }
    }
}

// ---------------------------------------------------------------------------
// Setup
// ---------------------------------------------------------------------------

/// Arm every timer in `units`.
///
/// Per unit: clear any stale pending interrupt, load the reload value,
/// start counting with the interrupt enabled, then register the IRQ at
/// `MAX_SYSCALL_INTERRUPT_PRIORITY` and unmask it.
pub fn initialize_timers<T, C>(timers: &mut T, nvic: &mut C, units: &[TimerUnit], verbose: bool)
where
    T: TimerRegisters,
    C: InterruptController,
{
    if verbose {
        log::info!("------------------- Initialization of Hardware Timers --------------------\n");
    }

    for unit in units {
        if verbose {
            log::info!("Initialising Timer {}", unit.id);
        }

        timers.write(unit, TimerReg::IntClr, INTCLR_CLEAR);
        timers.write(unit, TimerReg::Reload, unit.reload_value());
        timers.write(unit, TimerReg::Ctrl, CTRL_IRQ_ENABLE | CTRL_ENABLE);

        nvic.set_priority(unit.irq(), MAX_SYSCALL_INTERRUPT_PRIORITY);
        nvic.enable_irq(unit.irq());

        if verbose {
            log::info!("Timer {} initialised", unit.id);
        }
    }

    if verbose {
        log::info!("\n--------------------------------------------------------------------------\n");
    }
}

// ---------------------------------------------------------------------------
// Interrupt service
// ---------------------------------------------------------------------------

/// Body of a timer interrupt. Clears the unit's pending bit first, then
/// samples its channel. Returns `true` if a detection was newly raised.
///
/// Bounded and non-blocking: one register write, at most one log line, one
/// atomic update.
pub fn service_interrupt<T: TimerRegisters>(timers: &mut T, unit: &TimerUnit, state: &ActivityState) -> bool {
    // Must come first; a still-pending interrupt re-enters on return.
    timers.write(unit, TimerReg::IntClr, INTCLR_CLEAR);

    match unit.channel {
        Some(id) => {
            log::info!("Timer {} Interrupt: looking for {} activities...", unit.id, id.name());
            state.channel(id).latch()
        }
        None => false,
    }
}

/// Entry point from the vector table for timer `id`.
pub fn on_interrupt(id: usize) {
    let Some(unit) = TIMER_UNITS.get(id) else {
        return;
    };
    let raised = service_interrupt(&mut CmsdkTimers, unit, &ACTIVITY);
    kernel::yield_from_isr(raised);
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::vec::Vec;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Op {
        Write(u8, TimerReg, u32),
        Priority(u16, u8),
        Enable(u16),
    }

    #[derive(Default)]
    struct Recorder {
        ops: Vec<Op>,
        ctrl: [u32; 4],
    }

    impl TimerRegisters for Recorder {
        fn read(&self, unit: &TimerUnit, reg: TimerReg) -> u32 {
            match reg {
                TimerReg::Ctrl => self.ctrl[unit.id as usize],
                _ => 0,
            }
        }

        fn write(&mut self, unit: &TimerUnit, reg: TimerReg, value: u32) {
            if reg == TimerReg::Ctrl {
                self.ctrl[unit.id as usize] = value;
            }
            self.ops.push(Op::Write(unit.id, reg, value));
        }
    }

    impl InterruptController for Recorder {
        fn set_priority(&mut self, irq: Irq, priority: u8) {
            self.ops.push(Op::Priority(irq.0, priority));
        }

        fn enable_irq(&mut self, irq: Irq) {
            self.ops.push(Op::Enable(irq.0));
        }
    }

    #[test]
    fn test_reload_value_rounds_down() {
        assert_eq!(reload_value(240_000_000, 2), 120_000_000);
        assert_eq!(reload_value(240_000_000, 7), 34_285_714);
        assert_eq!(reload_value(10, 3), 3);
        assert_eq!(TIMER_UNITS[0].reload_value(), 120_000_000);
    }

    #[test]
    fn test_initialize_order_per_unit() {
        let mut timers = Recorder::default();
        let mut nvic = Recorder::default();
        initialize_timers(&mut timers, &mut nvic, &TIMER_UNITS, false);

        let expected_writes: Vec<Op> = TIMER_UNITS
            .iter()
            .flat_map(|u| {
                [
                    Op::Write(u.id, TimerReg::IntClr, INTCLR_CLEAR),
                    Op::Write(u.id, TimerReg::Reload, 120_000_000),
                    Op::Write(u.id, TimerReg::Ctrl, CTRL_IRQ_ENABLE | CTRL_ENABLE),
                ]
            })
            .collect();
        assert_eq!(timers.ops, expected_writes);

        let expected_nvic: Vec<Op> = TIMER_UNITS
            .iter()
            .flat_map(|u| [Op::Priority(u.irq, MAX_SYSCALL_INTERRUPT_PRIORITY), Op::Enable(u.irq)])
            .collect();
        assert_eq!(nvic.ops, expected_nvic);

        for unit in TIMER_UNITS.iter() {
            assert_eq!(
                timers.status(unit),
                TimerStatus { enabled: true, interrupt_enabled: true }
            );
        }
    }

    #[test]
    fn test_timer_irqs_and_priority() {
        let irqs: Vec<u16> = TIMER_UNITS.iter().map(|u| u.irq).collect();
        assert_eq!(irqs, [8, 9, 10]);
        assert_eq!(MAX_SYSCALL_INTERRUPT_PRIORITY, 0x50);
    }

    #[test]
    fn test_isr_clears_pending_bit_first() {
        let state = ActivityState::new();
        let mut timers = Recorder::default();
        state.user.record_event();

        assert!(service_interrupt(&mut timers, &TIMER_UNITS[0], &state));
        assert_eq!(timers.ops, [Op::Write(0, TimerReg::IntClr, INTCLR_CLEAR)]);
        assert!(state.user.is_pending());
        assert!(!state.suspicious.is_pending());
    }

    #[test]
    fn test_isr_latches_only_its_channel() {
        let state = ActivityState::new();
        let mut timers = Recorder::default();
        state.suspicious.record_event();

        // Timer 0 samples the user channel, which is idle.
        assert!(!service_interrupt(&mut timers, &TIMER_UNITS[0], &state));
        assert!(!state.user.is_pending());

        assert!(service_interrupt(&mut timers, &TIMER_UNITS[1], &state));
        assert!(state.suspicious.is_pending());

        // A second firing before the owner polls coalesces.
        assert!(!service_interrupt(&mut timers, &TIMER_UNITS[1], &state));
        assert_eq!(state.suspicious.snapshot().coalesced, 1);
    }

    #[test]
    fn test_spare_timer_only_clears() {
        let state = ActivityState::new();
        let mut timers = Recorder::default();
        state.user.record_event();
        state.suspicious.record_event();

        assert!(!service_interrupt(&mut timers, &TIMER_UNITS[2], &state));
        assert_eq!(timers.ops, [Op::Write(2, TimerReg::IntClr, INTCLR_CLEAR)]);
        assert!(!state.user.is_pending());
        assert!(!state.suspicious.is_pending());
    }
}
