//! A minimal stderr logger for the `log` records of the endpoints.
use std::sync::atomic::{AtomicBool, Ordering};

static LOGGER_INSTALLED: AtomicBool = AtomicBool::new(false);

struct Logger;

impl log::Log for Logger {
    fn enabled(&self, _metadata: &log::Metadata<'_>) -> bool {
        true
    }

    fn log(&self, record: &log::Record<'_>) {
        eprintln!("[{}] ({}) {}", record.level(), record.target(), record.args())
    }

    fn flush(&self) {}
}

/// Install the logger at `level`, once.
pub fn install(level: log::LevelFilter) {
    if !LOGGER_INSTALLED.swap(true, Ordering::Relaxed) {
        if log::set_logger(&Logger).is_err() {
            return;
        }
    }
    log::set_max_level(level);
}
