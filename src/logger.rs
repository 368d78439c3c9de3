// Small leveled logger writing to stderr. Debug output is gated by an atomic
// level so worker threads can log without locking.

use std::sync::atomic::{AtomicU8, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

const INFO_LEVEL: u8 = 0;
const DEBUG_LEVEL: u8 = 1;

static LOG_LEVEL: AtomicU8 = AtomicU8::new(INFO_LEVEL);

// Set the global log level based on a debug flag.
pub fn set_debug(enabled: bool) {
    let level = if enabled { DEBUG_LEVEL } else { INFO_LEVEL };
    LOG_LEVEL.store(level, Ordering::Relaxed);
}

// Returns true if debug logging is enabled.
pub fn is_debug() -> bool {
    LOG_LEVEL.load(Ordering::Relaxed) >= DEBUG_LEVEL
}

pub fn info(msg: &str) {
    log_line("INFO", msg);
}

pub fn warn(msg: &str) {
    log_line("WARN", msg);
}

// Print a DEBUG-level message if enabled.
pub fn debug(msg: &str) {
    if is_debug() {
        log_line("DEBUG", msg);
    }
}

pub fn error(msg: &str) {
    log_line("ERROR", msg);
}

// Format log lines with an epoch timestamp and short label.
fn log_line(level: &str, msg: &str) {
    let ts = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    eprintln!("[{}] {} {}", level, ts, msg);
}
