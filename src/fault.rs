//! # Fault Reporting
//!
//! Last words of the firmware. Every path here ends in [`halt`]: interrupts
//! off, spin forever. Output bypasses the `log` facade and goes straight to
//! the console, since the logger itself may be what broke.
//!
//! - Stack overflow (found by the scheduler on a context switch): one line
//!   naming the task, written once.
//! - HardFault / MemManage: the running task and its stack high-water
//!   mark, stacked registers, the configurable fault status register
//!   decoded, and the faulting address when valid.
//!   MemManage gets its frame from a small assembly trampoline in the
//!   binary, since cortex-m-rt only passes a frame to HardFault.

use core::fmt::Write;
use core::sync::atomic::{compiler_fence, AtomicBool, Ordering};

use bitflags::bitflags;
use heapless::String;

use crate::kernel;
use crate::task::TaskControlBlock;
use crate::uart::{ByteSink, Uart};

bitflags! {
    /// Configurable Fault Status Register (MMFSR | BFSR << 8 | UFSR << 16).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Cfsr: u32 {
        // MMFSR
        const IACCVIOL = 1 << 0;
        const DACCVIOL = 1 << 1;
        const MUNSTKERR = 1 << 3;
        const MSTKERR = 1 << 4;
        const MLSPERR = 1 << 5;
        const MMARVALID = 1 << 7;

        // BFSR
        const IBUSERR = 1 << 8;
        const PRECISERR = 1 << 9;
        const IMPRECISERR = 1 << 10;
        const UNSTKERR = 1 << 11;
        const STKERR = 1 << 12;
        const LSPERR = 1 << 13;
        const BFARVALID = 1 << 15;

        // UFSR
        const UNDEFINSTR = 1 << 16;
        const INVSTATE = 1 << 17;
        const INVPC = 1 << 18;
        const NOCP = 1 << 19;
        const UNALIGNED = 1 << 24;
        const DIVBYZERO = 1 << 25;
    }
}

/// Disable interrupts and spin forever.
pub fn halt() -> ! {
    cortex_m::interrupt::disable();
    loop {
        compiler_fence(Ordering::SeqCst);
    }
}

// ---------------------------------------------------------------------------
// Stack overflow
// ---------------------------------------------------------------------------

/// Ensures the overflow report goes out at most once, even if the failing
/// context switch is re-entered.
pub struct OverflowLatch(AtomicBool);

impl OverflowLatch {
    pub const fn new() -> Self {
        Self(AtomicBool::new(false))
    }

    /// Write `Stack overflow in task: <name>` as a single line. Returns
    /// `false` if a report was already written.
    pub fn report<S: ByteSink>(&self, sink: &mut S, task_name: &str) -> bool {
        if self.0.swap(true, Ordering::AcqRel) {
            return false;
        }
        let mut line: String<64> = String::new();
        let _ = write!(line, "Stack overflow in task: {}\n", task_name);
        sink.write_str(&line);
        true
    }
}

impl Default for OverflowLatch {
    fn default() -> Self {
        Self::new()
    }
}

static OVERFLOW: OverflowLatch = OverflowLatch::new();

/// Called by the context switch when the outgoing task overran its stack.
pub fn stack_overflow_hook(task_name: &str) -> ! {
    cortex_m::interrupt::disable();
    OVERFLOW.report(&mut Uart::console(), task_name);
    halt()
}

// ---------------------------------------------------------------------------
// Processor faults
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    HardFault,
    MemoryManagement,
}

impl FaultKind {
    pub const fn name(self) -> &'static str {
        match self {
            FaultKind::HardFault => "HardFault",
            FaultKind::MemoryManagement => "MemManage fault",
        }
    }
}

/// Registers the core stacks on exception entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StackedRegisters {
    pub r0: u32,
    pub r1: u32,
    pub r2: u32,
    pub r3: u32,
    pub r12: u32,
    pub lr: u32,
    pub pc: u32,
    pub xpsr: u32,
}

impl From<&cortex_m_rt::ExceptionFrame> for StackedRegisters {
    fn from(ef: &cortex_m_rt::ExceptionFrame) -> Self {
        Self {
            r0: ef.r0(),
            r1: ef.r1(),
            r2: ef.r2(),
            r3: ef.r3(),
            r12: ef.r12(),
            lr: ef.lr(),
            pc: ef.pc(),
            xpsr: ef.xpsr(),
        }
    }
}

impl StackedRegisters {
    /// Decode the eight words the core pushes on exception entry, lowest
    /// address first.
    pub const fn from_words(w: [u32; 8]) -> Self {
        Self { r0: w[0], r1: w[1], r2: w[2], r3: w[3], r12: w[4], lr: w[5], pc: w[6], xpsr: w[7] }
    }

    /// Registers worth reporting for a fault. A stacking error means the
    /// core never wrote the frame, so `read_frame` is not called.
    pub fn from_fault_frame(status: &FaultStatus, read_frame: impl FnOnce() -> [u32; 8]) -> Option<Self> {
        if status.cfsr.intersects(Cfsr::MSTKERR | Cfsr::STKERR) {
            None
        } else {
            Some(Self::from_words(read_frame()))
        }
    }
}

/// The task that was running when a fault hit, and how close it came to
/// the bottom of its stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunningTask {
    pub name: &'static str,
    /// Words at the bottom of the stack never written (high-water mark).
    pub stack_free_words: usize,
    pub stack_words: usize,
}

impl RunningTask {
    pub fn of(tcb: &TaskControlBlock) -> Self {
        Self { name: tcb.name, stack_free_words: tcb.stack_high_water(), stack_words: tcb.stack_words }
    }
}

/// Fault status as read from the System Control Block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FaultStatus {
    pub cfsr: Cfsr,
    pub mmfar: u32,
    pub bfar: u32,
}

impl FaultStatus {
    pub fn read() -> Self {
        // Safety: shared reference to the always-present SCB; only reads.
        let scb = unsafe { &*cortex_m::peripheral::SCB::PTR };
        Self {
            cfsr: Cfsr::from_bits_truncate(scb.cfsr.read()),
            mmfar: scb.mmfar.read(),
            bfar: scb.bfar.read(),
        }
    }

    /// The most specific cause, plus the faulting address if the hardware
    /// captured one.
    pub fn cause(&self) -> (&'static str, Option<u32>) {
        let c = self.cfsr;
        let mm_addr = c.contains(Cfsr::MMARVALID).then_some(self.mmfar);
        let bus_addr = c.contains(Cfsr::BFARVALID).then_some(self.bfar);

        if c.contains(Cfsr::MSTKERR) {
            ("stacking error, stack pointer outside permitted memory", None)
        } else if c.contains(Cfsr::MUNSTKERR) {
            ("unstacking error on exception return", None)
        } else if c.contains(Cfsr::IACCVIOL) {
            ("instruction fetch from non-executable memory", None)
        } else if c.contains(Cfsr::DACCVIOL) {
            ("data access violation", mm_addr)
        } else if c.contains(Cfsr::MLSPERR) {
            ("lazy FP state preservation violation", None)
        } else if c.contains(Cfsr::PRECISERR) {
            ("precise bus error", bus_addr)
        } else if c.contains(Cfsr::IMPRECISERR) {
            ("imprecise bus error", None)
        } else if c.intersects(Cfsr::STKERR | Cfsr::UNSTKERR | Cfsr::LSPERR) {
            ("bus error during exception stacking", None)
        } else if c.contains(Cfsr::IBUSERR) {
            ("instruction bus error", None)
        } else if c.contains(Cfsr::UNDEFINSTR) {
            ("undefined instruction", None)
        } else if c.contains(Cfsr::INVSTATE) {
            ("invalid execution state", None)
        } else if c.contains(Cfsr::INVPC) {
            ("invalid exception return", None)
        } else if c.contains(Cfsr::NOCP) {
            ("coprocessor access", None)
        } else if c.contains(Cfsr::DIVBYZERO) {
            ("divide by zero", None)
        } else if c.contains(Cfsr::UNALIGNED) {
            ("unaligned access", None)
        } else {
            ("escalated or unknown fault", None)
        }
    }
}

type DumpLine = String<96>;

/// Write a fault report. One `write_str` per line.
pub fn dump<S: ByteSink>(
    sink: &mut S,
    kind: FaultKind,
    task: Option<&RunningTask>,
    regs: Option<&StackedRegisters>,
    status: &FaultStatus,
) {
    let mut line = DumpLine::new();
    let _ = write!(line, "\n*** {} ***\n", kind.name());
    sink.write_str(&line);

    if let Some(t) = task {
        line.clear();
        let _ = write!(
            line,
            "task: {} stack free {}/{} words\n",
            t.name, t.stack_free_words, t.stack_words
        );
        sink.write_str(&line);
    }

    if let Some(r) = regs {
        line.clear();
        let _ = write!(
            line,
            "r0={:#010x} r1={:#010x} r2={:#010x} r3={:#010x}\n",
            r.r0, r.r1, r.r2, r.r3
        );
        sink.write_str(&line);

        line.clear();
        let _ = write!(
            line,
            "r12={:#010x} lr={:#010x} pc={:#010x} xpsr={:#010x}\n",
            r.r12, r.lr, r.pc, r.xpsr
        );
        sink.write_str(&line);
    }

    line.clear();
    let _ = write!(
        line,
        "CFSR={:#010x} MMFAR={:#010x} BFAR={:#010x}\n",
        status.cfsr.bits(),
        status.mmfar,
        status.bfar
    );
    sink.write_str(&line);

    line.clear();
    let (cause, address) = status.cause();
    let _ = match address {
        Some(addr) => write!(line, "cause: {} at {:#010x}\n", cause, addr),
        None => write!(line, "cause: {}\n", cause),
    };
    sink.write_str(&line);
}

/// Report a processor fault on the console and halt.
pub fn report_and_halt(kind: FaultKind, regs: Option<&StackedRegisters>) -> ! {
    cortex_m::interrupt::disable();
    let task = kernel::running_task();
    dump(&mut Uart::console(), kind, task.as_ref(), regs, &FaultStatus::read());
    halt()
}

/// Report a MemManage fault whose exception frame starts at `frame`.
///
/// # Safety
/// `frame` must point at the eight words the core stacked on entry, unless
/// CFSR reports a stacking error, in which case it is not read.
pub unsafe fn report_memmanage_and_halt(frame: *const u32) -> ! {
    cortex_m::interrupt::disable();
    let status = FaultStatus::read();
    let regs = StackedRegisters::from_fault_frame(&status, || frame.cast::<[u32; 8]>().read_volatile());
    let task = kernel::running_task();
    dump(&mut Uart::console(), FaultKind::MemoryManagement, task.as_ref(), regs.as_ref(), &status);
    halt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::vec::Vec;

    fn text(sink: &[u8]) -> &str {
        core::str::from_utf8(sink).unwrap()
    }

    #[test]
    fn test_overflow_reported_once_as_one_line() {
        struct CountingSink {
            bytes: Vec<u8>,
            writes: usize,
        }
        impl ByteSink for CountingSink {
            fn write_bytes(&mut self, bytes: &[u8]) {
                self.bytes.extend_from_slice(bytes);
                self.writes += 1;
            }
        }

        let latch = OverflowLatch::new();
        let mut sink = CountingSink { bytes: Vec::new(), writes: 0 };

        assert!(latch.report(&mut sink, "AlertTask"));
        assert!(!latch.report(&mut sink, "AlertTask"));
        assert!(!latch.report(&mut sink, "EventTask"));

        assert_eq!(sink.writes, 1);
        assert_eq!(text(&sink.bytes), "Stack overflow in task: AlertTask\n");
    }

    #[test]
    fn test_data_access_violation_with_address() {
        let status = FaultStatus {
            cfsr: Cfsr::DACCVIOL | Cfsr::MMARVALID,
            mmfar: 0x4000_1000,
            bfar: 0,
        };
        assert_eq!(status.cause(), ("data access violation", Some(0x4000_1000)));

        let stale = FaultStatus { cfsr: Cfsr::DACCVIOL, mmfar: 0x4000_1000, bfar: 0 };
        assert_eq!(stale.cause().1, None);
    }

    #[test]
    fn test_stacking_error_wins() {
        let status = FaultStatus {
            cfsr: Cfsr::MSTKERR | Cfsr::DACCVIOL | Cfsr::MMARVALID,
            mmfar: 0x2040_0000,
            bfar: 0,
        };
        assert!(status.cause().0.starts_with("stacking error"));
        assert_eq!(status.cause().1, None);
    }

    #[test]
    fn test_cfsr_truncates_reserved_bits() {
        let cfsr = Cfsr::from_bits_truncate(0xFFFF_FFFF);
        assert!(cfsr.contains(Cfsr::IACCVIOL | Cfsr::DIVBYZERO));
        assert_eq!(cfsr.bits() & (1 << 2), 0);
    }

    #[test]
    fn test_dump_layout() {
        let regs = StackedRegisters { pc: 0x0000_0420, lr: 0xFFFF_FFFD, xpsr: 0x0100_0000, ..Default::default() };
        let status = FaultStatus { cfsr: Cfsr::IACCVIOL, mmfar: 0, bfar: 0 };
        let mut sink = Vec::new();
        dump(&mut sink, FaultKind::MemoryManagement, None, Some(&regs), &status);

        let out = text(&sink);
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines[1], "*** MemManage fault ***");
        assert_eq!(lines[3], "r12=0x00000000 lr=0xfffffffd pc=0x00000420 xpsr=0x01000000");
        assert_eq!(lines[4], "CFSR=0x00000001 MMFAR=0x00000000 BFAR=0x00000000");
        assert_eq!(lines[5], "cause: instruction fetch from non-executable memory");
        assert!(out.ends_with('\n'));
    }

    #[test]
    fn test_running_task_high_water() {
        let mut stack = [crate::config::STACK_FILL_PATTERN; 64];
        let mut tcb = TaskControlBlock::EMPTY;
        tcb.init(2, "AlertTask", 3, stack.as_mut_ptr(), stack.len());
        unsafe { stack.as_mut_ptr().add(48).write(0) };

        let task = RunningTask::of(&tcb);
        assert_eq!(task, RunningTask { name: "AlertTask", stack_free_words: 48, stack_words: 64 });
    }

    #[test]
    fn test_frame_words_in_stacking_order() {
        let regs = StackedRegisters::from_words([1, 2, 3, 4, 12, 0x0800_0101, 0x0800_0240, 0x0100_0000]);
        assert_eq!((regs.r0, regs.r1, regs.r2, regs.r3), (1, 2, 3, 4));
        assert_eq!(regs.r12, 12);
        assert_eq!(regs.lr, 0x0800_0101);
        assert_eq!(regs.pc, 0x0800_0240);
        assert_eq!(regs.xpsr, 0x0100_0000);
    }

    #[test]
    fn test_no_registers_after_stacking_error() {
        let bad = FaultStatus { cfsr: Cfsr::MSTKERR, mmfar: 0, bfar: 0 };
        let regs = StackedRegisters::from_fault_frame(&bad, || panic!("frame read after stacking error"));
        assert_eq!(regs, None);

        let ok = FaultStatus { cfsr: Cfsr::DACCVIOL | Cfsr::MMARVALID, mmfar: 0x2040_0010, bfar: 0 };
        let regs = StackedRegisters::from_fault_frame(&ok, || [0xAAAA_AAAA; 8]);
        assert_eq!(regs.map(|r| r.pc), Some(0xAAAA_AAAA));
    }

    #[test]
    fn test_memmanage_dump_with_registers() {
        let status = FaultStatus { cfsr: Cfsr::DACCVIOL | Cfsr::MMARVALID, mmfar: 0x0000_1000, bfar: 0 };
        let words = [0x10, 0x11, 0x12, 0x13, 0x1C, 0x0000_0511, 0x0000_0532, 0x0100_0000];
        let regs = StackedRegisters::from_fault_frame(&status, || words);
        let task = RunningTask { name: "EventTask", stack_free_words: 380, stack_words: 512 };
        let mut sink = Vec::new();
        dump(&mut sink, FaultKind::MemoryManagement, Some(&task), regs.as_ref(), &status);

        let out = text(&sink);
        assert_eq!(
            out.lines().collect::<Vec<_>>(),
            [
                "",
                "*** MemManage fault ***",
                "task: EventTask stack free 380/512 words",
                "r0=0x00000010 r1=0x00000011 r2=0x00000012 r3=0x00000013",
                "r12=0x0000001c lr=0x00000511 pc=0x00000532 xpsr=0x01000000",
                "CFSR=0x00000082 MMFAR=0x00001000 BFAR=0x00000000",
                "cause: data access violation at 0x00001000",
            ]
        );
    }
}
