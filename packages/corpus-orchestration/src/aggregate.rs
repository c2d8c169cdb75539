//! Result aggregation
//!
//! The [`Aggregator`] is the single owner of every counter and ledger. It is
//! fed one [`FileResult`] at a time by the orchestrator's receive loop, so no
//! locking is involved.

use crate::event_log::LogLevel;
use crate::job::{FileResult, TerminalStatus};
use crate::ledger::{FileLedgerRow, Ledgers, RepoLedgerRow};
use crate::report::RunReport;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Fixed-width per-status counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub succeeded: usize,
    pub stage_1_failed: usize,
    pub timeout: usize,
    pub intermediate_failed: usize,
    pub internal_error: usize,
}

impl StatusCounts {
    pub fn bump(&mut self, status: TerminalStatus) {
        *self.slot(status) += 1;
    }

    pub fn get(&self, status: TerminalStatus) -> usize {
        match status {
            TerminalStatus::Succeeded => self.succeeded,
            TerminalStatus::Stage1Failed => self.stage_1_failed,
            TerminalStatus::Timeout => self.timeout,
            TerminalStatus::IntermediateFailed => self.intermediate_failed,
            TerminalStatus::InternalError => self.internal_error,
        }
    }

    fn slot(&mut self, status: TerminalStatus) -> &mut usize {
        match status {
            TerminalStatus::Succeeded => &mut self.succeeded,
            TerminalStatus::Stage1Failed => &mut self.stage_1_failed,
            TerminalStatus::Timeout => &mut self.timeout,
            TerminalStatus::IntermediateFailed => &mut self.intermediate_failed,
            TerminalStatus::InternalError => &mut self.internal_error,
        }
    }

    pub fn total(&self) -> usize {
        TerminalStatus::ALL.iter().map(|s| self.get(*s)).sum()
    }

    pub fn merge(&mut self, other: &StatusCounts) {
        for status in TerminalStatus::ALL {
            *self.slot(status) += other.get(status);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoStats {
    pub repo_id: String,
    pub counts: StatusCounts,
    /// How many files passed each stage, in pipeline order
    pub stage_passes: Vec<usize>,
    pub artifacts: usize,
}

impl RepoStats {
    pub fn new(repo_id: impl Into<String>, stage_count: usize) -> Self {
        Self {
            repo_id: repo_id.into(),
            counts: StatusCounts::default(),
            stage_passes: vec![0; stage_count],
            artifacts: 0,
        }
    }

    fn absorb(&mut self, result: &FileResult) {
        self.counts.bump(result.status);
        for (slot, stage) in self.stage_passes.iter_mut().zip(&result.stages) {
            if stage.succeeded {
                *slot += 1;
            }
        }
        if result.is_success() {
            self.artifacts += result.artifacts;
        }
    }

    pub fn files(&self) -> usize {
        self.counts.total()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalStats {
    pub repositories: usize,
    pub counts: StatusCounts,
    pub stage_passes: Vec<usize>,
    pub artifacts: usize,
}

impl GlobalStats {
    pub fn new(stage_count: usize) -> Self {
        Self {
            repositories: 0,
            counts: StatusCounts::default(),
            stage_passes: vec![0; stage_count],
            artifacts: 0,
        }
    }

    pub fn files(&self) -> usize {
        self.counts.total()
    }
}

pub struct Aggregator {
    pipeline: String,
    stage_names: Vec<String>,
    statuses: Vec<TerminalStatus>,
    corpus_root: PathBuf,
    repos: Vec<RepoStats>,
    global: GlobalStats,
    ledgers: Ledgers,
}

impl Aggregator {
    pub fn new(
        pipeline: impl Into<String>,
        stage_names: &[&str],
        statuses: &[TerminalStatus],
        corpus_root: impl Into<PathBuf>,
        level: LogLevel,
    ) -> Self {
        Self {
            pipeline: pipeline.into(),
            stage_names: stage_names.iter().map(|s| s.to_string()).collect(),
            statuses: statuses.to_vec(),
            corpus_root: corpus_root.into(),
            repos: Vec::new(),
            global: GlobalStats::new(stage_names.len()),
            ledgers: Ledgers::new(level, statuses),
        }
    }

    pub fn begin_repository(&mut self, repo_id: &str) {
        self.repos.push(RepoStats::new(repo_id, self.stage_names.len()));
    }

    fn repo_mut(&mut self, repo_id: &str) -> &mut RepoStats {
        match self.repos.iter().rposition(|r| r.repo_id == repo_id) {
            Some(idx) => &mut self.repos[idx],
            None => {
                self.repos.push(RepoStats::new(repo_id, self.stage_names.len()));
                let last = self.repos.len() - 1;
                &mut self.repos[last]
            }
        }
    }

    /// Fold one completed job into its repository, the global totals and the file ledger.
    pub fn on_result(&mut self, repo_id: &str, result: &FileResult) {
        self.repo_mut(repo_id).absorb(result);

        self.global.counts.bump(result.status);
        for (slot, stage) in self.global.stage_passes.iter_mut().zip(&result.stages) {
            if stage.succeeded {
                *slot += 1;
            }
        }
        if result.is_success() {
            self.global.artifacts += result.artifacts;
        }

        let file = result.relative_path(&self.corpus_root).display().to_string();
        self.ledgers.record_file(FileLedgerRow {
            file,
            repo: repo_id.to_string(),
            status: result.status,
        });
    }

    /// Close a drained repository: count it and append its ledger row.
    pub fn finish_repository(&mut self, repo_id: &str) -> RepoStats {
        let stats = self.repo_mut(repo_id).clone();
        self.global.repositories += 1;
        self.ledgers.record_repo(RepoLedgerRow {
            repo: stats.repo_id.clone(),
            counts: stats.counts,
            artifacts: stats.artifacts,
        });
        stats
    }

    pub fn global(&self) -> &GlobalStats {
        &self.global
    }

    pub fn repositories(&self) -> &[RepoStats] {
        &self.repos
    }

    pub fn ledgers(&self) -> &Ledgers {
        &self.ledgers
    }

    pub fn finalize(self, elapsed: Duration) -> (RunReport, Ledgers) {
        let report = RunReport {
            pipeline: self.pipeline,
            stage_names: self.stage_names,
            statuses: self.statuses,
            global: self.global,
            repositories: self.repos,
            elapsed,
        };
        (report, self.ledgers)
    }
}
