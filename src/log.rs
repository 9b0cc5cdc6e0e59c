/// Structured logging module for the MelloOS lock validator
/// Provides logging with format: [subsys][LEVEL] message
/// Supports log levels: ERROR, WARN, INFO, DEBUG, TRACE
use core::fmt;
use core::sync::atomic::{AtomicU8, Ordering};
use spin::Mutex;

/// Log levels for validator logging
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum LogLevel {
    /// Proven bugs and conditions that turn validation off
    Error = 0,
    /// Warning conditions that should be addressed
    Warn = 1,
    /// Informational messages about important events
    Info = 2,
    /// Detailed debugging information
    Debug = 3,
    /// Very verbose tracing information
    Trace = 4,
}

impl LogLevel {
    /// Get the string representation of the log level
    pub const fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Error => "ERROR",
            LogLevel::Warn => "WARN",
            LogLevel::Info => "INFO",
            LogLevel::Debug => "DEBUG",
            LogLevel::Trace => "TRACE",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Global log level filter
/// Only messages at or below this level will be logged
static LOG_LEVEL: AtomicU8 = AtomicU8::new(LogLevel::Info as u8);

/// Set the global log level
pub fn set_log_level(level: LogLevel) {
    LOG_LEVEL.store(level as u8, Ordering::Relaxed);
}

/// Get the current global log level
pub fn get_log_level() -> LogLevel {
    match LOG_LEVEL.load(Ordering::Relaxed) {
        0 => LogLevel::Error,
        1 => LogLevel::Warn,
        2 => LogLevel::Info,
        3 => LogLevel::Debug,
        4 => LogLevel::Trace,
        _ => LogLevel::Info,
    }
}

/// Check if a log level should be logged
#[inline]
pub fn should_log(level: LogLevel) -> bool {
    level <= get_log_level()
}

/// Log buffer for dmesg-style readback
/// Uses a fixed-size circular buffer to store log messages
const LOG_BUFFER_SIZE: usize = 65536; // 64KB buffer
const MAX_LOG_ENTRIES: usize = 1000;

/// Longest single record; longer records are truncated
const MAX_RECORD_LEN: usize = 512;

struct LogBuffer {
    buffer: [u8; LOG_BUFFER_SIZE],
    write_pos: usize,
    entries: usize,
}

impl LogBuffer {
    const fn new() -> Self {
        Self {
            buffer: [0; LOG_BUFFER_SIZE],
            write_pos: 0,
            entries: 0,
        }
    }

    fn add_message(&mut self, message: &str) {
        let bytes = message.as_bytes();
        let len = bytes.len();

        if len >= LOG_BUFFER_SIZE {
            return;
        }

        // If we would overflow, wrap around
        if self.write_pos + len + 1 > LOG_BUFFER_SIZE {
            self.write_pos = 0;
            self.entries = 0; // Reset on wrap
        }

        self.buffer[self.write_pos..self.write_pos + len].copy_from_slice(bytes);
        self.buffer[self.write_pos + len] = b'\n';
        self.write_pos += len + 1;

        if self.entries < MAX_LOG_ENTRIES {
            self.entries += 1;
        }
    }

    fn read_all(&self) -> &[u8] {
        &self.buffer[..self.write_pos]
    }
}

static LOG_BUFFER: Mutex<LogBuffer> = Mutex::new(LogBuffer::new());

/// Add a log entry to the log buffer
fn add_to_log_buffer(message: &str) {
    let mut buffer = LOG_BUFFER.lock();
    buffer.add_message(message);
}

/// Read the log buffer into a provided buffer
/// Returns the number of bytes copied
pub fn read_log_buffer(dest: &mut [u8]) -> usize {
    let buffer = LOG_BUFFER.lock();
    let data = buffer.read_all();
    let to_copy = core::cmp::min(data.len(), dest.len());
    dest[..to_copy].copy_from_slice(&data[..to_copy]);
    to_copy
}

/// Fixed-size formatting buffer for one log record
struct RecordBuffer {
    buffer: [u8; MAX_RECORD_LEN],
    pos: usize,
}

impl RecordBuffer {
    const fn new() -> Self {
        Self {
            buffer: [0u8; MAX_RECORD_LEN],
            pos: 0,
        }
    }

    fn as_str(&self) -> &str {
        // Truncation may split a multi-byte character; keep the valid prefix.
        match core::str::from_utf8(&self.buffer[..self.pos]) {
            Ok(s) => s,
            Err(e) => core::str::from_utf8(&self.buffer[..e.valid_up_to()]).unwrap_or(""),
        }
    }

    fn clear(&mut self) {
        self.pos = 0;
    }
}

impl fmt::Write for RecordBuffer {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let bytes = s.as_bytes();
        let remaining = self.buffer.len() - self.pos;
        let to_write = core::cmp::min(bytes.len(), remaining);
        self.buffer[self.pos..self.pos + to_write].copy_from_slice(&bytes[..to_write]);
        self.pos += to_write;
        Ok(())
    }
}

/// Internal logging function
/// Format: [subsys][LEVEL] message
#[doc(hidden)]
pub fn _log(level: LogLevel, subsys: &str, args: fmt::Arguments) {
    if !should_log(level) {
        return;
    }

    use core::fmt::Write;
    let mut record = RecordBuffer::new();
    let _ = write!(record, "[{}][{}] {}", subsys, level.as_str(), args);

    let message = record.as_str();
    crate::console_println!("{}", message);
    add_to_log_buffer(message);
}

/// Line-oriented writer that emits one log record per line
///
/// Multi-line reports are streamed through this so every line carries the
/// subsystem tag and level. Partial lines are flushed on drop.
pub struct LogWriter<'a> {
    level: LogLevel,
    subsys: &'a str,
    line: RecordBuffer,
}

impl<'a> LogWriter<'a> {
    /// Create a writer logging at `level` under `subsys`
    pub const fn new(level: LogLevel, subsys: &'a str) -> Self {
        Self {
            level,
            subsys,
            line: RecordBuffer::new(),
        }
    }

    fn flush_line(&mut self) {
        _log(self.level, self.subsys, format_args!("{}", self.line.as_str()));
        self.line.clear();
    }
}

impl fmt::Write for LogWriter<'_> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let mut rest = s;
        while let Some(nl) = rest.find('\n') {
            self.line.write_str(&rest[..nl])?;
            self.flush_line();
            rest = &rest[nl + 1..];
        }
        self.line.write_str(rest)
    }
}

impl Drop for LogWriter<'_> {
    fn drop(&mut self) {
        if self.line.pos > 0 {
            self.flush_line();
        }
    }
}

/// Log an error message
/// Format: [subsys][ERROR] message
#[macro_export]
macro_rules! log_error {
    ($subsys:expr, $($arg:tt)*) => {
        $crate::log::_log(
            $crate::log::LogLevel::Error,
            $subsys,
            format_args!($($arg)*)
        )
    };
}

/// Log a warning message
/// Format: [subsys][WARN] message
#[macro_export]
macro_rules! log_warn {
    ($subsys:expr, $($arg:tt)*) => {
        $crate::log::_log(
            $crate::log::LogLevel::Warn,
            $subsys,
            format_args!($($arg)*)
        )
    };
}

/// Log an informational message
/// Format: [subsys][INFO] message
#[macro_export]
macro_rules! log_info {
    ($subsys:expr, $($arg:tt)*) => {
        $crate::log::_log(
            $crate::log::LogLevel::Info,
            $subsys,
            format_args!($($arg)*)
        )
    };
}

/// Log a debug message
/// Format: [subsys][DEBUG] message
#[macro_export]
macro_rules! log_debug {
    ($subsys:expr, $($arg:tt)*) => {
        $crate::log::_log(
            $crate::log::LogLevel::Debug,
            $subsys,
            format_args!($($arg)*)
        )
    };
}

/// Log a trace message
/// Format: [subsys][TRACE] message
#[macro_export]
macro_rules! log_trace {
    ($subsys:expr, $($arg:tt)*) => {
        $crate::log::_log(
            $crate::log::LogLevel::Trace,
            $subsys,
            format_args!($($arg)*)
        )
    };
}
