//! # WardOS Firmware
//!
//! Boot sequence for the secure timeout supervisor:
//!
//! 1. Claim the core peripherals and confirm we boot privileged
//! 2. Program the MPU regions, then enable MemManage faults
//! 3. Bring up the UART console and the `log` backend
//! 4. Initialize the kernel (idle task)
//! 5. Mask interrupts, then start the supervisor: channels, hardware
//!    timers, three tasks
//! 6. Hand over to the scheduler (never returns); interrupts come back on
//!    as the first task is entered
//!
//! Device interrupts 8..10 (the CMSDK timers) are wired here; the rest of
//! the device vector table is reserved.

#![no_std]
#![no_main]

use cortex_m_rt::{entry, exception, ExceptionFrame};
use log::LevelFilter;
use panic_halt as _;

use wardos::config::PROTECTION_REGIONS;
use wardos::fault::{self, FaultKind, StackedRegisters};
use wardos::mpu::{self, CortexMpu};
use wardos::privilege::Privileged;
use wardos::{kernel, logger, supervisor, timer, uart};

/// SHCSR.MEMFAULTENA
const SHCSR_MEMFAULTENA: u32 = 1 << 16;

#[entry]
fn main() -> ! {
    let Some(mut cp) = cortex_m::Peripherals::take() else {
        fault::halt()
    };
    // MPU and NVIC programming below needs a privileged thread.
    let Some(_privileged) = Privileged::current() else {
        fault::halt()
    };

    mpu::configure(&mut CortexMpu::new(&mut cp.MPU), &PROTECTION_REGIONS);
    // Safety: the handler is installed below; enabling it only changes how
    // MPU violations are reported.
    unsafe { cp.SCB.shcsr.modify(|r| r | SHCSR_MEMFAULTENA) };

    uart::init();
    logger::init(LevelFilter::Info);

    if !mpu::is_enabled(&CortexMpu::new(&mut cp.MPU)) {
        log::warn!("running without memory protection");
    }

    log::info!("\n=========================== Starting the Main ============================\n");

    if let Err(err) = kernel::init() {
        log::error!("kernel init failed: {}", err);
        fault::halt();
    }

    // Timer IRQs are unmasked in the NVIC below; keep them pending until
    // the first task runs and PendSV has a PSP to save to.
    cortex_m::interrupt::disable();
    supervisor::start(true, &mut cp.NVIC);

    log::info!("Ready to run the scheduler...");
    kernel::start(cp)
}

// ---------------------------------------------------------------------------
// Device interrupts
// ---------------------------------------------------------------------------

mod vectors {
    pub union Vector {
        handler: unsafe extern "C" fn(),
        reserved: usize,
    }

    extern "C" {
        fn TIMER0();
        fn TIMER1();
        fn TIMER2();
    }

    #[link_section = ".vector_table.interrupts"]
    #[no_mangle]
    pub static __INTERRUPTS: [Vector; 11] = [
        Vector { reserved: 0 },
        Vector { reserved: 0 },
        Vector { reserved: 0 },
        Vector { reserved: 0 },
        Vector { reserved: 0 },
        Vector { reserved: 0 },
        Vector { reserved: 0 },
        Vector { reserved: 0 },
        Vector { handler: TIMER0 },
        Vector { handler: TIMER1 },
        Vector { handler: TIMER2 },
    ];
}

#[allow(non_snake_case)]
#[no_mangle]
extern "C" fn TIMER0() {
    timer::on_interrupt(0);
}

#[allow(non_snake_case)]
#[no_mangle]
extern "C" fn TIMER1() {
    timer::on_interrupt(1);
}

#[allow(non_snake_case)]
#[no_mangle]
extern "C" fn TIMER2() {
    timer::on_interrupt(2);
}

// ---------------------------------------------------------------------------
// Faults
// ---------------------------------------------------------------------------

#[exception]
unsafe fn HardFault(ef: &ExceptionFrame) -> ! {
    fault::report_and_halt(FaultKind::HardFault, Some(&StackedRegisters::from(ef)))
}

// MemManage: hand the active stack pointer (EXC_RETURN bit 2 picks PSP for
// a task, MSP otherwise) to `wardos_memmanage`. Overrides the default
// handler that cortex-m-rt PROVIDEs for this vector.
core::arch::global_asm!(
    ".section .text.MemoryManagement,\"ax\",%progbits",
    ".global MemoryManagement",
    ".type MemoryManagement,%function",
    ".thumb_func",
    "MemoryManagement:",
    "    tst lr, #4",
    "    ite eq",
    "    mrseq r0, msp",
    "    mrsne r0, psp",
    "    b wardos_memmanage",
    ".size MemoryManagement, . - MemoryManagement",
);

#[no_mangle]
unsafe extern "C" fn wardos_memmanage(frame: *const u32) -> ! {
    fault::report_memmanage_and_halt(frame)
}
