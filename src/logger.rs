// `log` backend on the first serial port.

use core::fmt::Write;

use lazy_static::lazy_static;
use log::{LevelFilter, Log, Metadata, Record, SetLoggerError};
use uart_16550::SerialPort;

use crate::sync::KernelMutex;

const COM1: u16 = 0x3F8;

lazy_static! {
    static ref SERIAL1: KernelMutex<SerialPort> = {
        let mut port = unsafe { SerialPort::new(COM1) };
        port.init();
        KernelMutex::new(port)
    };
}

struct SerialLogger;

static LOGGER: SerialLogger = SerialLogger;

impl Log for SerialLogger {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record<'_>) {
        if !self.enabled(record.metadata()) {
            return;
        }

        // nothing sensible to do if the port itself fails
        let _ = writeln!(
            SERIAL1.lock(),
            "[{:>5}] {}: {}",
            record.level(),
            record.target(),
            record.args()
        );
    }

    fn flush(&self) {}
}

/// Routes `log` output to COM1. Call once, early in boot.
pub fn init(level: LevelFilter) -> Result<(), SetLoggerError> {
    log::set_logger(&LOGGER)?;
    log::set_max_level(level);
    Ok(())
}
