//! A `log::Log` implementor writing to the serial diagnostic sink.
//!
//! Installed once, before memory management, so every later subsystem can
//! log through `log::{info, warn, error, debug, trace}` for the rest of the
//! kernel's lifetime. There is no level filtering beyond the static max
//! level compiled in via [`log::set_max_level`]; a real deployment would add
//! a runtime-configurable filter, but this kernel has no configuration
//! surface (see `SPEC_FULL.md`).

use log::{Level, Log, Metadata, Record};

struct SerialLogger;

impl Log for SerialLogger {
    fn enabled(&self, _metadata: &Metadata) -> bool {
        true
    }

    fn log(&self, record: &Record) {
        let level = match record.level() {
            Level::Error => "ERROR",
            Level::Warn => "WARN",
            Level::Info => "INFO",
            Level::Debug => "DEBUG",
            Level::Trace => "TRACE",
        };
        crate::serial_println!("[{level}] {}", record.args());
    }

    fn flush(&self) {}
}

static LOGGER: SerialLogger = SerialLogger;

pub fn init() {
    log::set_logger(&LOGGER).expect("logger already initialized");
    log::set_max_level(log::LevelFilter::Trace);
}
