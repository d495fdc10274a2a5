//! Kernel logger.
//!
//! Backend for the `log` facade writing to the architecture's debug
//! console. The maximum level is fixed at build time from the `LOG`
//! environment variable and defaults to `INFO`.

use core::fmt::Write;

use log::{Level, LevelFilter, Log, Metadata, Record, SetLoggerError};

use crate::arch::DebugWriter;

struct KernelLogger;

impl Log for KernelLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let color = match record.level() {
            Level::Error => 31, // Red
            Level::Warn => 93,  // Yellow
            Level::Info => 34,  // Blue
            Level::Debug => 32, // Green
            Level::Trace => 90, // Grey
        };
        let mut writer = DebugWriter::new();
        let _ = writeln!(
            writer,
            "\u{1B}[{}m[{:>5}] {}\u{1B}[0m",
            color,
            record.level(),
            record.args(),
        );
    }

    fn flush(&self) {}
}

static LOGGER: KernelLogger = KernelLogger;

/// Level selected by the `LOG` variable at build time
pub fn configured_level() -> LevelFilter {
    parse_level(option_env!("LOG"))
}

fn parse_level(value: Option<&str>) -> LevelFilter {
    match value {
        Some("OFF") => LevelFilter::Off,
        Some("ERROR") => LevelFilter::Error,
        Some("WARN") => LevelFilter::Warn,
        Some("DEBUG") => LevelFilter::Debug,
        Some("TRACE") => LevelFilter::Trace,
        _ => LevelFilter::Info,
    }
}

/// Install the kernel logger; fails if another logger is already set
pub fn init() -> Result<(), SetLoggerError> {
    log::set_logger(&LOGGER)?;
    log::set_max_level(configured_level());
    Ok(())
}
