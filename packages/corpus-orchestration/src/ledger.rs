//! CSV ledgers
//!
//! Two append-only tables kept in memory for the whole run: one row per
//! processed file and one row per drained repository. Both are written once,
//! in arrival order, when the run is finalized.

use crate::aggregate::StatusCounts;
use crate::error::Result;
use crate::event_log::LogLevel;
use crate::job::TerminalStatus;
use serde::Serialize;
use std::io;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileLedgerRow {
    pub file: String,
    pub repo: String,
    pub status: TerminalStatus,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoLedgerRow {
    pub repo: String,
    pub counts: StatusCounts,
    pub artifacts: usize,
}

#[derive(Debug, Clone)]
pub struct Ledgers {
    enabled: bool,
    statuses: Vec<TerminalStatus>,
    files: Vec<FileLedgerRow>,
    repos: Vec<RepoLedgerRow>,
}

impl Ledgers {
    /// `statuses` fixes the per-status columns of the repository ledger.
    pub fn new(level: LogLevel, statuses: &[TerminalStatus]) -> Self {
        Self {
            enabled: level.ledgers_enabled(),
            statuses: statuses.to_vec(),
            files: Vec::new(),
            repos: Vec::new(),
        }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn record_file(&mut self, row: FileLedgerRow) {
        if self.enabled {
            self.files.push(row);
        }
    }

    pub fn record_repo(&mut self, row: RepoLedgerRow) {
        if self.enabled {
            self.repos.push(row);
        }
    }

    pub fn file_rows(&self) -> &[FileLedgerRow] {
        &self.files
    }

    pub fn repo_rows(&self) -> &[RepoLedgerRow] {
        &self.repos
    }

    pub fn write_file_ledger<W: io::Write>(&self, writer: W) -> Result<()> {
        let mut csv = csv::Writer::from_writer(writer);
        csv.write_record(["file", "repo", "status"])?;
        for row in &self.files {
            csv.write_record([row.file.as_str(), row.repo.as_str(), row.status.as_str()])?;
        }
        csv.flush()?;
        Ok(())
    }

    pub fn write_repo_ledger<W: io::Write>(&self, writer: W) -> Result<()> {
        let mut csv = csv::Writer::from_writer(writer);

        let mut header = vec!["repo".to_string()];
        header.extend(self.statuses.iter().map(|s| s.as_str().to_string()));
        header.push("artifacts".to_string());
        csv.write_record(&header)?;

        for row in &self.repos {
            let mut record = vec![row.repo.clone()];
            record.extend(self.statuses.iter().map(|s| row.counts.get(*s).to_string()));
            record.push(row.artifacts.to_string());
            csv.write_record(&record)?;
        }
        csv.flush()?;
        Ok(())
    }

    pub fn write_files(&self, file_ledger: &Path, repo_ledger: &Path) -> Result<()> {
        self.write_file_ledger(std::fs::File::create(file_ledger)?)?;
        self.write_repo_ledger(std::fs::File::create(repo_ledger)?)?;
        Ok(())
    }
}
