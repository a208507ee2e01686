//! Build log messages and the [`Logger`] seam.
//!
//! Log messages produced by a command must survive a process boundary, so
//! they are plain serde values rather than `tracing` events. A [`Logger`]
//! decides where they go: [`TracingLogger`] re-emits them through `tracing`,
//! [`MemoryLogger`] keeps them for inspection.

use std::fmt;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

/// Severity of a [`LogMessage`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum LogLevel {
    Debug,
    Verbose,
    Info,
    Warning,
    Error,
    Fatal,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Debug => "debug",
            Self::Verbose => "verbose",
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Fatal => "fatal",
        };
        f.write_str(name)
    }
}

/// A single build log entry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogMessage {
    pub level: LogLevel,
    /// Module that emitted the message, usually the command title.
    pub module: Option<String>,
    pub text: String,
}

impl LogMessage {
    pub fn new(level: LogLevel, text: impl Into<String>) -> Self {
        Self {
            level,
            module: None,
            text: text.into(),
        }
    }

    pub fn with_module(mut self, module: impl Into<String>) -> Self {
        self.module = Some(module.into());
        self
    }
}

impl fmt::Display for LogMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.module {
            Some(module) => write!(f, "[{}] {}: {}", self.level, module, self.text),
            None => write!(f, "[{}] {}", self.level, self.text),
        }
    }
}

/// Sink for build log messages.
pub trait Logger: Send + Sync {
    fn log(&self, message: LogMessage);

    fn debug(&self, text: &str) {
        self.log(LogMessage::new(LogLevel::Debug, text));
    }

    fn verbose(&self, text: &str) {
        self.log(LogMessage::new(LogLevel::Verbose, text));
    }

    fn info(&self, text: &str) {
        self.log(LogMessage::new(LogLevel::Info, text));
    }

    fn warning(&self, text: &str) {
        self.log(LogMessage::new(LogLevel::Warning, text));
    }

    fn error(&self, text: &str) {
        self.log(LogMessage::new(LogLevel::Error, text));
    }
}

/// Logger that re-emits every message as a `tracing` event.
#[derive(Clone, Debug, Default)]
pub struct TracingLogger {
    module: Option<String>,
}

impl TracingLogger {
    pub fn new() -> Self {
        Self::default()
    }

    /// A logger that stamps messages without a module with `module`.
    pub fn for_module(module: impl Into<String>) -> Self {
        Self {
            module: Some(module.into()),
        }
    }
}

impl Logger for TracingLogger {
    fn log(&self, message: LogMessage) {
        let module = message
            .module
            .as_deref()
            .or(self.module.as_deref())
            .unwrap_or("-");
        match message.level {
            LogLevel::Debug => tracing::trace!(module, "{}", message.text),
            LogLevel::Verbose => tracing::debug!(module, "{}", message.text),
            LogLevel::Info => tracing::info!(module, "{}", message.text),
            LogLevel::Warning => tracing::warn!(module, "{}", message.text),
            LogLevel::Error | LogLevel::Fatal => tracing::error!(module, "{}", message.text),
        }
    }
}

/// Logger that keeps every message in memory.
#[derive(Debug, Default)]
pub struct MemoryLogger {
    messages: Mutex<Vec<LogMessage>>,
}

impl MemoryLogger {
    pub fn new() -> Self {
        Self::default()
    }

    /// All messages logged so far, in emission order.
    pub fn messages(&self) -> Vec<LogMessage> {
        self.messages.lock().expect("lock poisoned").clone()
    }

    /// Messages at or above `level`.
    pub fn messages_at_least(&self, level: LogLevel) -> Vec<LogMessage> {
        self.messages
            .lock()
            .expect("lock poisoned")
            .iter()
            .filter(|m| m.level >= level)
            .cloned()
            .collect()
    }

    pub fn has_errors(&self) -> bool {
        !self.messages_at_least(LogLevel::Error).is_empty()
    }
}

impl Logger for MemoryLogger {
    fn log(&self, message: LogMessage) {
        self.messages.lock().expect("lock poisoned").push(message);
    }
}
