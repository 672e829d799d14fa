//! Link logger
//!
//! Protocol clients talk to the event log through a single contract,
//! `Log(tag, message)`. `LinkLogger` adds the per-client name and the
//! logging level gate; the sink decides where lines end up. The default
//! sink forwards to `tracing`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::bytes::hex_dump;

/// Event log tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogTag {
    Connect,
    Disconnect,
    Send,
    Receive,
    Note,
    Exception,
}

impl LogTag {
    /// Numeric tag index handed to index-based sinks
    pub fn index(self) -> usize {
        match self {
            LogTag::Connect => 0,
            LogTag::Disconnect => 1,
            LogTag::Send => 2,
            LogTag::Receive => 3,
            LogTag::Note => 4,
            LogTag::Exception => 5,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LogTag::Connect => "CONNECT",
            LogTag::Disconnect => "DISCONNECT",
            LogTag::Send => "TX",
            LogTag::Receive => "RX",
            LogTag::Note => "NOTE",
            LogTag::Exception => "EXCEPTION",
        }
    }

    fn is_payload(self) -> bool {
        matches!(self, LogTag::Send | LogTag::Receive)
    }
}

impl fmt::Display for LogTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Logging level of a client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    /// Nothing is logged
    None,
    /// Connection events, notes and exceptions; no raw payloads
    #[default]
    EventsOnly,
    /// Everything including hex dumps of every frame
    All,
}

/// Event log sink
pub trait LogSink: Send + Sync {
    fn log(&self, tag: LogTag, message: &str);
}

/// Sink forwarding to `tracing`
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn log(&self, tag: LogTag, message: &str) {
        match tag {
            LogTag::Connect | LogTag::Disconnect | LogTag::Note => {
                tracing::info!("[{}] {}", tag, message)
            },
            LogTag::Send | LogTag::Receive => tracing::debug!("[{}] {}", tag, message),
            LogTag::Exception => tracing::warn!("[{}] {}", tag, message),
        }
    }
}

/// Lightweight logger bound to one client
#[derive(Clone)]
pub struct LinkLogger {
    name: Arc<str>,
    level: LogLevel,
    sink: Arc<dyn LogSink>,
}

impl fmt::Debug for LinkLogger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LinkLogger")
            .field("name", &self.name)
            .field("level", &self.level)
            .finish()
    }
}

impl LinkLogger {
    /// Create a logger writing to `tracing`
    pub fn new(name: impl Into<Arc<str>>, level: LogLevel) -> Self {
        Self::with_sink(name, level, Arc::new(TracingSink))
    }

    pub fn with_sink(name: impl Into<Arc<str>>, level: LogLevel, sink: Arc<dyn LogSink>) -> Self {
        Self {
            name: name.into(),
            level,
            sink,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn level(&self) -> LogLevel {
        self.level
    }

    /// Whether a line with this tag passes the level gate
    pub fn enabled(&self, tag: LogTag) -> bool {
        match self.level {
            LogLevel::None => false,
            LogLevel::EventsOnly => !tag.is_payload(),
            LogLevel::All => true,
        }
    }

    /// `Log(tag, message)`
    pub fn log(&self, tag: LogTag, message: &str) {
        if self.enabled(tag) {
            self.sink.log(tag, &format!("{} {}", self.name, message));
        }
    }

    pub fn connect(&self, target: &str, details: &str) {
        self.log(LogTag::Connect, &format!("{} - {}", target, details));
    }

    pub fn disconnect(&self, reason: &str) {
        self.log(LogTag::Disconnect, reason);
    }

    pub fn note(&self, message: &str) {
        self.log(LogTag::Note, message);
    }

    /// Log an error with the operation that produced it
    pub fn exception(&self, operation: &str, err: &dyn fmt::Display) {
        self.log(LogTag::Exception, &format!("{}: {}", operation, err));
    }

    /// Log a raw frame; only formats the dump when `LogLevel::All`
    pub fn frame(&self, tag: LogTag, data: &[u8]) {
        if self.enabled(tag) {
            self.log(tag, &format!("{}B [{}]", data.len(), hex_dump(data)));
        }
    }
}
