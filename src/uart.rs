//! # UART Console
//!
//! Byte-sink output on UART0. Transmission is fire-and-forget: bytes go
//! straight into the data register with no status polling and no
//! backpressure, matching what the board model expects.

use core::fmt;

use crate::config::{UART0_BASE, UART0_BAUD_DIVISOR};

const DATA: usize = 0x00;
const CTRL: usize = 0x08;
const BAUDDIV: usize = 0x10;

/// CTRL bit enabling the transmitter.
const CTRL_TX_ENABLE: u32 = 1 << 0;

/// Anything text can be written to.
pub trait ByteSink {
    fn write_bytes(&mut self, bytes: &[u8]);

    #[inline]
    fn write_str(&mut self, text: &str) {
        self.write_bytes(text.as_bytes());
    }
}

/// A memory-mapped UART transmitter.
pub struct Uart {
    base: usize,
}

impl Uart {
    /// # Safety
    /// `base` must be the address of a UART register block.
    pub const unsafe fn new(base: usize) -> Self {
        Self { base }
    }

    /// The console UART.
    #[inline]
    pub fn console() -> Self {
        // Safety: UART0_BASE is the board's UART0.
        unsafe { Self::new(UART0_BASE) }
    }

    /// Program the baud divisor and enable the transmitter.
    pub fn init(&mut self) {
        self.write_reg(BAUDDIV, UART0_BAUD_DIVISOR);
        self.write_reg(CTRL, CTRL_TX_ENABLE);
    }

    #[inline]
    fn write_reg(&mut self, offset: usize, value: u32) {
        unsafe { core::ptr::write_volatile((self.base + offset) as *mut u32, value) }
    }
}

impl ByteSink for Uart {
    fn write_bytes(&mut self, bytes: &[u8]) {
        for &b in bytes {
            self.write_reg(DATA, b as u32);
        }
    }
}

impl fmt::Write for Uart {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        ByteSink::write_str(self, s);
        Ok(())
    }
}

/// Bring up the console and print the banner.
pub fn init() {
    let mut uart = Uart::console();
    uart.init();
    uart.write_str("UART initialized!\n\n");
}

#[cfg(test)]
impl ByteSink for std::vec::Vec<u8> {
    fn write_bytes(&mut self, bytes: &[u8]) {
        self.extend_from_slice(bytes);
    }
}
