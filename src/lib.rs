//! # WardOS: Secure Timeout Supervisor
//!
//! A small supervisory firmware for ARM Cortex-M7 microcontrollers. Periodic
//! hardware-timer interrupts and three cooperating tasks classify simulated
//! activity as either normal user activity or a suspicious security event,
//! while the MPU splits memory into a privileged supervisor view and a
//! read-only view for everything else.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────┐
//! │            Supervisor Tasks (supervisor.rs)             │
//! │     MonitorTask · AlertTask · EventTask (prng.rs)       │
//! ├──────────────────────────┬─────────────────────────────┤
//! │  Activity Channels       │  Hardware Timers            │
//! │  channel.rs              │  timer.rs                   │
//! │  ─ record_event()        │  ─ initialize_timers()      │
//! │  ─ latch() ◄─────────────┼─ service_interrupt()        │
//! │  ─ acknowledge()         │                             │
//! ├──────────────────────────┴─────────────────────────────┤
//! │                 Kernel API (kernel.rs)                  │
//! │        init() · create_task() · start() · sleep()       │
//! ├──────────────┬────────────────────┬───────────────────┤
//! │  Scheduler   │  Task Model        │  Sync Primitives  │
//! │  scheduler.rs│  task.rs           │  sync.rs          │
//! ├──────────────┴────────────────────┴───────────────────┤
//! │  Arch Port (arch/cortex_m7.rs) · MPU (mpu.rs)           │
//! │  Privilege (privilege.rs) · Faults (fault.rs)           │
//! ├────────────────────────────────────────────────────────┤
//! │  Console: uart.rs + logger.rs (`log` backend)           │
//! └────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Memory Model
//!
//! - **No heap**: all state is statically allocated
//! - **Fixed-size TCB array**: `[TaskControlBlock; MAX_TASKS]`
//! - **Stack pool**: task stacks carved from one aligned static buffer
//! - **Atomics** for the channel flags shared with interrupt handlers
//! - **Critical sections** (`cortex_m::interrupt::free()`) for kernel state
//!
//! ## Testing
//!
//! The library builds with `std` under `cargo test`; all register access
//! goes through small traits that the tests mock.

#![cfg_attr(not(test), no_std)]

pub mod arch;
pub mod channel;
pub mod config;
pub mod fault;
pub mod kernel;
pub mod logger;
pub mod mpu;
pub mod privilege;
pub mod prng;
pub mod scheduler;
pub mod supervisor;
pub mod sync;
pub mod task;
pub mod timer;
pub mod uart;
