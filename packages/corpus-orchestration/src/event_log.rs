//! Event log
//!
//! Append-only, timestamped record of a run. Entries are mirrored to
//! `tracing` as they are recorded and kept in memory until the run ends,
//! when [`EventLog::write_to`] dumps them in one go.

use crate::error::{OrchestratorError, Result};
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::Path;

const TIMESTAMP_FORMAT: &str = "[%d-%b-%Y (%H:%M:%S)]";

/// Verbosity tier: 0 = nothing, 1 = event log, 2 = event log + CSV ledgers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum LogLevel {
    Off,
    Events,
    Ledgers,
}

impl LogLevel {
    pub fn from_level(level: i64) -> Result<Self> {
        match level {
            0 => Ok(LogLevel::Off),
            1 => Ok(LogLevel::Events),
            2 => Ok(LogLevel::Ledgers),
            other => Err(OrchestratorError::InvalidLogLevel(other)),
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            LogLevel::Off => 0,
            LogLevel::Events => 1,
            LogLevel::Ledgers => 2,
        }
    }

    pub fn events_enabled(self) -> bool {
        self >= LogLevel::Events
    }

    pub fn ledgers_enabled(self) -> bool {
        self >= LogLevel::Ledgers
    }
}

impl Default for LogLevel {
    fn default() -> Self {
        LogLevel::Events
    }
}

impl TryFrom<u8> for LogLevel {
    type Error = OrchestratorError;

    fn try_from(value: u8) -> Result<Self> {
        Self::from_level(i64::from(value))
    }
}

impl From<LogLevel> for u8 {
    fn from(level: LogLevel) -> u8 {
        level.as_u8()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventLogEntry {
    pub timestamp: DateTime<Local>,
    pub message: String,
}

impl EventLogEntry {
    pub fn render(&self) -> String {
        format!("{} {}", self.timestamp.format(TIMESTAMP_FORMAT), self.message)
    }
}

#[derive(Debug, Clone)]
pub struct EventLog {
    level: LogLevel,
    entries: Vec<EventLogEntry>,
}

impl EventLog {
    pub fn new(level: LogLevel) -> Self {
        Self {
            level,
            entries: Vec::new(),
        }
    }

    pub fn level(&self) -> LogLevel {
        self.level
    }

    pub fn record(&mut self, message: impl Into<String>) {
        if !self.level.events_enabled() {
            return;
        }
        let message = message.into();
        tracing::debug!(target: "corpus_orchestration::events", "{}", message);
        self.entries.push(EventLogEntry {
            timestamp: Local::now(),
            message,
        });
    }

    pub fn separator(&mut self) {
        self.record("------------------------------------");
    }

    pub fn entries(&self) -> &[EventLogEntry] {
        &self.entries
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        for entry in &self.entries {
            out.push_str(&entry.render());
            out.push('\n');
        }
        out
    }

    pub fn write_to(&self, path: &Path) -> Result<()> {
        let mut file = std::fs::File::create(path)?;
        file.write_all(self.render().as_bytes())?;
        file.flush()?;
        Ok(())
    }
}
