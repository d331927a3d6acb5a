//! # Architecture Abstraction Layer
//!
//! Hardware boundary for the kernel and the timer layer. Only the
//! Cortex-M7 port exists.

pub mod cortex_m7;
