//! Structured logging with an explicit sink.
//!
//! Every component that logs receives a [`Logger`] handle at construction
//! instead of reaching for process-wide state. The handle is cheap to clone
//! and routes each event to one sink: stdout, a file written by a background
//! thread, or an in-memory buffer used by tests.
//!
//! Two renderings are supported:
//!
//! - **Pretty**: the box-drawing layout used on an interactive terminal
//!   (`┣ message`, `┃   detail`, `┣[WARNING] ...`).
//! - **Json**: one object per line, `{"message": ..., "timestamp": ...}` for
//!   regular events and `{"error": ..., "timestamp": ...}` for warnings and
//!   errors, suitable for journald or a log shipper.
//!
//! ## Logging Conventions
//!
//! - **`log_block_start!`**: begins a new conceptual block (relay added,
//!   schedules recomputed). Prepends an empty pipe for spacing.
//! - **`log_decorated!`**: a line belonging to the current block, or a
//!   single-line status message (state transitions).
//! - **`log_indented!`**: nested detail under a block (one line per schedule).
//! - **`log_info!`, `log_warning!`, `log_error!`, `log_debug!`**: semantic
//!   levels with a `[LEVEL]` prefix. Debug lines are dropped unless the logger
//!   was created with debug enabled.
//!
//! Lifecycle is `init → use → flush`: create the logger once in `main`, clone it
//! into each relay, and drop the [`LoggerGuard`] (or call [`Logger::flush`])
//! before exiting.

use anyhow::Context;
use serde_json::json;
use std::io::Write;
use std::path::Path;
use std::sync::mpsc::{Sender, channel};
use std::sync::{Arc, Mutex};

/// Output rendering of log events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

/// Kind of log line, which decides its decoration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Block,
    Decorated,
    Indented,
    Info,
    Warning,
    Error,
    Debug,
}

impl Level {
    fn is_error(self) -> bool {
        matches!(self, Level::Warning | Level::Error)
    }

    fn label(self) -> Option<&'static str> {
        match self {
            Level::Info => Some("info"),
            Level::Warning => Some("warning"),
            Level::Error => Some("error"),
            Level::Debug => Some("debug"),
            _ => None,
        }
    }
}

enum LogMessage {
    Formatted(String),
    Flush(Sender<()>),
    Shutdown,
}

enum Sink {
    Stdout,
    Channel(Mutex<Sender<LogMessage>>),
    Memory(Mutex<Vec<String>>),
    Discard,
}

struct LoggerInner {
    format: LogFormat,
    debug: bool,
    sink: Sink,
}

/// Cloneable handle to a log sink.
#[derive(Clone)]
pub struct Logger {
    inner: Arc<LoggerInner>,
}

impl std::fmt::Debug for Logger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Logger")
            .field("format", &self.inner.format)
            .field("debug", &self.inner.debug)
            .finish()
    }
}

impl Logger {
    fn with_sink(sink: Sink, format: LogFormat, debug: bool) -> Self {
        Self {
            inner: Arc::new(LoggerInner {
                format,
                debug,
                sink,
            }),
        }
    }

    /// Log to standard output.
    pub fn stdout(format: LogFormat, debug: bool) -> Self {
        Self::with_sink(Sink::Stdout, format, debug)
    }

    /// Log to a file through a dedicated writer thread.
    ///
    /// The returned guard flushes and joins the writer when dropped.
    pub fn to_file(
        path: &Path,
        format: LogFormat,
        debug: bool,
    ) -> anyhow::Result<(Self, LoggerGuard)> {
        let mut file = std::fs::File::create(path)
            .with_context(|| format!("Failed to create log file {}", path.display()))?;
        let (tx, rx) = channel();

        let handle = std::thread::spawn(move || {
            loop {
                match rx.recv() {
                    Ok(LogMessage::Formatted(text)) => {
                        file.write_all(text.as_bytes())?;
                    }
                    Ok(LogMessage::Flush(ack)) => {
                        file.flush()?;
                        let _ = ack.send(());
                    }
                    Ok(LogMessage::Shutdown) | Err(_) => {
                        file.flush()?;
                        break;
                    }
                }
            }
            Ok::<(), anyhow::Error>(())
        });

        let logger = Self::with_sink(Sink::Channel(Mutex::new(tx.clone())), format, debug);
        Ok((
            logger,
            LoggerGuard {
                tx,
                handle: Some(handle),
            },
        ))
    }

    /// Capture rendered lines in memory (tests and diagnostics).
    pub fn memory(format: LogFormat) -> Self {
        Self::with_sink(Sink::Memory(Mutex::new(Vec::new())), format, true)
    }

    /// A logger that drops everything.
    pub fn disabled() -> Self {
        Self::with_sink(Sink::Discard, LogFormat::Pretty, false)
    }

    pub fn is_debug(&self) -> bool {
        self.inner.debug
    }

    pub fn format(&self) -> LogFormat {
        self.inner.format
    }

    /// Lines captured by a memory logger, with colour codes removed.
    pub fn captured(&self) -> Vec<String> {
        match &self.inner.sink {
            Sink::Memory(lines) => lines.lock().map(|l| l.clone()).unwrap_or_default(),
            _ => Vec::new(),
        }
    }

    /// Emit one event. Used by the logging macros.
    pub fn emit(&self, level: Level, message: &str) {
        if level == Level::Debug && !self.inner.debug {
            return;
        }
        let text = match self.inner.format {
            LogFormat::Pretty => render_pretty(level, message),
            LogFormat::Json => render_json(level, message),
        };
        self.write(text);
    }

    /// Block until everything emitted so far has reached its destination.
    pub fn flush(&self) {
        match &self.inner.sink {
            Sink::Stdout => {
                let _ = std::io::stdout().flush();
            }
            Sink::Channel(tx) => {
                let (ack_tx, ack_rx) = channel();
                let sent = tx
                    .lock()
                    .map(|tx| tx.send(LogMessage::Flush(ack_tx)).is_ok())
                    .unwrap_or(false);
                if sent {
                    let _ = ack_rx.recv();
                }
            }
            Sink::Memory(_) | Sink::Discard => {}
        }
    }

    fn write(&self, text: String) {
        match &self.inner.sink {
            Sink::Stdout => {
                let mut out = std::io::stdout().lock();
                let _ = out.write_all(text.as_bytes());
                let _ = out.flush();
            }
            Sink::Channel(tx) => {
                if let Ok(tx) = tx.lock() {
                    let _ = tx.send(LogMessage::Formatted(strip_ansi_codes(&text)));
                }
            }
            Sink::Memory(lines) => {
                if let Ok(mut lines) = lines.lock() {
                    lines.extend(strip_ansi_codes(&text).lines().map(str::to_string));
                }
            }
            Sink::Discard => {}
        }
    }
}

/// Guard for file logging that ensures clean shutdown.
pub struct LoggerGuard {
    tx: Sender<LogMessage>,
    handle: Option<std::thread::JoinHandle<anyhow::Result<()>>>,
}

impl Drop for LoggerGuard {
    fn drop(&mut self) {
        let _ = self.tx.send(LogMessage::Shutdown);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn render_pretty(level: Level, message: &str) -> String {
    match level {
        Level::Block => format!("┃\n┣ {message}\n"),
        Level::Decorated => format!("┣ {message}\n"),
        Level::Indented => format!("┃   {message}\n"),
        Level::Info => format!("┣[\x1b[32mINFO\x1b[0m] {message}\n"),
        Level::Warning => format!("┣[\x1b[33mWARNING\x1b[0m] {message}\n"),
        Level::Error => format!("┣[\x1b[31mERROR\x1b[0m] {message}\n"),
        Level::Debug => format!("┣[\x1b[32mDEBUG\x1b[0m] {message}\n"),
    }
}

fn render_json(level: Level, message: &str) -> String {
    let timestamp = chrono::Local::now().to_rfc3339();
    let key = if level.is_error() { "error" } else { "message" };
    let mut event = serde_json::Map::new();
    event.insert(key.to_string(), json!(message));
    event.insert("timestamp".to_string(), json!(timestamp));
    if let Some(label) = level.label() {
        event.insert("level".to_string(), json!(label));
    }
    format!("{}\n", serde_json::Value::Object(event))
}

// Helper function to strip ANSI color codes from text
fn strip_ansi_codes(text: &str) -> String {
    let mut result = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '\x1b' && chars.peek() == Some(&'[') {
            chars.next();
            // Skip until we find 'm'
            for ch in chars.by_ref() {
                if ch == 'm' {
                    break;
                }
            }
        } else {
            result.push(ch);
        }
    }

    result
}

// # Logging Macros

/// Log a block start message, initiating a new conceptual block of information.
#[macro_export]
macro_rules! log_block_start {
    ($log:expr, $($arg:tt)+) => {
        $log.emit($crate::logger::Level::Block, &format!($($arg)+))
    };
}

/// Log a decorated message, typically as part of an existing block.
#[macro_export]
macro_rules! log_decorated {
    ($log:expr, $($arg:tt)+) => {
        $log.emit($crate::logger::Level::Decorated, &format!($($arg)+))
    };
}

/// Log an indented message for sub-items or details within a block.
#[macro_export]
macro_rules! log_indented {
    ($log:expr, $($arg:tt)+) => {
        $log.emit($crate::logger::Level::Indented, &format!($($arg)+))
    };
}

/// Log an informational message.
#[macro_export]
macro_rules! log_info {
    ($log:expr, $($arg:tt)+) => {
        $log.emit($crate::logger::Level::Info, &format!($($arg)+))
    };
}

/// Log a warning message.
#[macro_export]
macro_rules! log_warning {
    ($log:expr, $($arg:tt)+) => {
        $log.emit($crate::logger::Level::Warning, &format!($($arg)+))
    };
}

/// Log an error message.
#[macro_export]
macro_rules! log_error {
    ($log:expr, $($arg:tt)+) => {
        $log.emit($crate::logger::Level::Error, &format!($($arg)+))
    };
}

/// Log a debug message. The message is only formatted when debug is enabled.
#[macro_export]
macro_rules! log_debug {
    ($log:expr, $($arg:tt)+) => {{
        let log = &$log;
        if log.is_debug() {
            log.emit($crate::logger::Level::Debug, &format!($($arg)+));
        }
    }};
}
