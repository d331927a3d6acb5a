//! # Console Logger
//!
//! `log` backend for the UART console. The supervisor's status lines are
//! the product output, so info records go out verbatim; warnings and errors
//! get a level prefix.
//!
//! Each record is rendered into a fixed-size line buffer first and then
//! written in one go inside a critical section, so a timer interrupt can
//! never split a task's line.

use core::fmt::{self, Write};

use heapless::String;
use log::{Level, LevelFilter, Log, Metadata, Record};

use crate::sync;
use crate::uart::{ByteSink, Uart};

/// Longest line the console emits, newline included.
pub const LINE_CAPACITY: usize = 160;

pub type Line = String<LINE_CAPACITY>;

/// Render one record as a newline-terminated line. Over-long records are
/// truncated; the newline is always kept.
pub fn format_line(level: Level, args: fmt::Arguments<'_>) -> Line {
    let mut line = Line::new();
    let prefix = match level {
        Level::Error => "[ERROR] ",
        Level::Warn => "[WARN] ",
        _ => "",
    };
    let mut body = Truncating(&mut line);
    let _ = body.write_str(prefix);
    let _ = body.write_fmt(args);
    let _ = line.push('\n');
    line
}

/// Fills a line up to one byte short of capacity and drops the rest.
struct Truncating<'a>(&'a mut Line);

impl Write for Truncating<'_> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for c in s.chars() {
            if self.0.len() + c.len_utf8() >= LINE_CAPACITY {
                return Err(fmt::Error);
            }
            let _ = self.0.push(c);
        }
        Ok(())
    }
}

pub struct UartLogger {
    level: LevelFilter,
}

impl UartLogger {
    pub const fn new(level: LevelFilter) -> Self {
        Self { level }
    }
}

impl Log for UartLogger {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record<'_>) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let line = format_line(record.level(), *record.args());
        sync::critical_section(|_cs| ByteSink::write_str(&mut Uart::console(), &line));
    }

    fn flush(&self) {}
}

static LOGGER: UartLogger = UartLogger::new(LevelFilter::Trace);

/// Install the UART logger. Later calls are ignored.
pub fn init(level: LevelFilter) {
    if log::set_logger(&LOGGER).is_ok() {
        log::set_max_level(level);
    }
}
