//! Run report
//!
//! Human-readable summary plus the end-of-run file outputs: event log, the two
//! CSV ledgers and (at the most detailed level) a JSON dump of the report.

use crate::aggregate::{GlobalStats, RepoStats};
use crate::error::Result;
use crate::event_log::{EventLog, LogLevel};
use crate::job::TerminalStatus;
use crate::ledger::Ledgers;
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub pipeline: String,
    pub stage_names: Vec<String>,
    pub statuses: Vec<TerminalStatus>,
    pub global: GlobalStats,
    pub repositories: Vec<RepoStats>,
    pub elapsed: Duration,
}

impl RunReport {
    pub fn files_processed(&self) -> usize {
        self.global.files()
    }

    pub fn summary_lines(&self) -> Vec<String> {
        let mut lines = vec![
            format!("-------- {} report: --------", capitalize(&self.pipeline)),
            format!("Number of repositories processed: {}", self.global.repositories),
            format!("Number of files processed: {}", self.files_processed()),
        ];
        for status in &self.statuses {
            lines.push(format!(
                "Files with status {}: {}",
                status,
                self.global.counts.get(*status)
            ));
        }
        for (stage, passed) in self.stage_names.iter().zip(&self.global.stage_passes) {
            lines.push(format!("Files that passed stage {}: {}", stage, passed));
        }
        lines.push(format!("Number of artifacts produced: {}", self.global.artifacts));
        lines.push(format!(
            "Total time elapsed during {}: {:.2} seconds.",
            self.pipeline,
            self.elapsed.as_secs_f64()
        ));
        lines.push("------------------------------------".to_string());
        lines
    }
}

impl std::fmt::Display for RunReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for line in self.summary_lines() {
            writeln!(f, "{}", line)?;
        }
        Ok(())
    }
}

pub(crate) fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Writes the end-of-run files into `out_dir`, gated by the log level.
pub struct ReportWriter {
    out_dir: PathBuf,
    level: LogLevel,
    log_name: String,
    ledger_prefix: String,
}

impl ReportWriter {
    /// `log_name` is the event log stem (e.g. `extraction`), `ledger_prefix`
    /// the CSV stem (e.g. `extr`).
    pub fn new(
        out_dir: impl Into<PathBuf>,
        level: LogLevel,
        log_name: impl Into<String>,
        ledger_prefix: impl Into<String>,
    ) -> Self {
        Self {
            out_dir: out_dir.into(),
            level,
            log_name: log_name.into(),
            ledger_prefix: ledger_prefix.into(),
        }
    }

    pub fn event_log_path(&self) -> PathBuf {
        self.out_dir.join(format!("{}.log", self.log_name))
    }

    pub fn file_ledger_path(&self) -> PathBuf {
        self.out_dir.join(format!("{}_file_log.csv", self.ledger_prefix))
    }

    pub fn repo_ledger_path(&self) -> PathBuf {
        self.out_dir.join(format!("{}_repo_log.csv", self.ledger_prefix))
    }

    pub fn json_report_path(&self) -> PathBuf {
        self.out_dir.join(format!("{}_report.json", self.log_name))
    }

    /// Returns the paths written, in order.
    pub fn write(&self, report: &RunReport, events: &EventLog, ledgers: &Ledgers) -> Result<Vec<PathBuf>> {
        let mut written = Vec::new();

        if self.level.events_enabled() {
            crate::mirror::ensure_dir(&self.out_dir)?;
            let path = self.event_log_path();
            events.write_to(&path)?;
            written.push(path);
        }

        if self.level.ledgers_enabled() {
            let file_ledger = self.file_ledger_path();
            let repo_ledger = self.repo_ledger_path();
            ledgers.write_files(&file_ledger, &repo_ledger)?;
            written.push(file_ledger);
            written.push(repo_ledger);

            let json = self.json_report_path();
            std::fs::write(&json, serde_json::to_string_pretty(report)?)?;
            written.push(json);
        }

        Ok(written)
    }
}
