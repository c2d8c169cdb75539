/*
 * Corpus Orchestration - batch pipelines over C source corpora
 *
 * Runs an external-tool pipeline over every C file of every repository in a
 * corpus, with a bounded worker pool per repository.
 *
 * Architecture:
 * - Stage runner (subprocess + timeout)
 * - File pipelines (pluggable: extraction, reconstruction)
 * - Output mirror (corpus-relative destination layout)
 * - Single-owner aggregation (per-repo + global counters, CSV ledgers)
 * - Event log and end-of-run report
 */

// Public modules
pub mod aggregate;
pub mod config;
pub mod error;
pub mod event_log;
pub mod job;
pub mod ledger;
pub mod mirror;
pub mod orchestrator;
pub mod pipeline;
pub mod report;
pub mod runner;
pub mod stages;

// Re-exports
pub use aggregate::{Aggregator, GlobalStats, RepoStats, StatusCounts};
pub use config::{PipelineConfig, RunConfig, ValidatedConfig};
pub use error::{OrchestratorError, Result};
pub use event_log::{EventLog, EventLogEntry, LogLevel};
pub use job::{FileResult, Job, StageOutcome, TerminalStatus};
pub use ledger::{FileLedgerRow, Ledgers, RepoLedgerRow};
pub use mirror::OutputMirror;
pub use orchestrator::{CorpusOrchestrator, RunOutcome};
pub use pipeline::{process_job, FilePipeline, JobEnv, PipelineContext, PipelineRun, StageTrack};
pub use report::{ReportWriter, RunReport};
pub use runner::{StageRun, StageRunner, StageSpec};
pub use stages::{ExtractionPipeline, ReconstructionPipeline};
