// src/utils/logger.rs

use log::{Level, LevelFilter, Metadata, Record, SetLoggerError};
use std::io::Write;

static LOGGER: StderrLogger = StderrLogger;

struct StderrLogger;

/// Installs the stderr logger. Fails if a logger is already set.
pub fn init(level: LevelFilter) -> Result<(), SetLoggerError> {
  log::set_logger(&LOGGER).map(|()| log::set_max_level(level))
}

impl log::Log for StderrLogger {
  fn enabled(&self, metadata: &Metadata) -> bool {
    metadata.level() <= log::max_level()
  }

  fn log(&self, record: &Record) {
    if !self.enabled(record.metadata()) {
      return;
    }
    let icon = match record.level() {
      Level::Error => "🔴",
      Level::Warn => "🟠",
      Level::Info => "🔵",
      Level::Debug => "⚪",
      Level::Trace => "▫️",
    };

    // Format: "🟠  [grammar] line 12: ..."
    let stderr = std::io::stderr();
    let mut out = stderr.lock();
    let _ = writeln!(out, "{}  {}", icon, record.args());
  }

  fn flush(&self) {
    let _ = std::io::stderr().flush();
  }
}
