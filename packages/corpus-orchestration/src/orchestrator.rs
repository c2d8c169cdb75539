use crate::aggregate::{Aggregator, RepoStats};
use crate::config::ValidatedConfig;
use crate::error::{OrchestratorError, Result};
use crate::event_log::EventLog;
use crate::job::{FileResult, Job, TerminalStatus};
use crate::ledger::Ledgers;
use crate::mirror::OutputMirror;
use crate::pipeline::{process_job, FilePipeline, JobEnv};
use crate::report::{capitalize, ReportWriter, RunReport};
use crate::runner::StageRunner;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::{JoinError, JoinHandle};
use tracing::{error, info, warn};
use uuid::Uuid;
use walkdir::WalkDir;

/// Everything a finished run leaves behind
pub struct RunOutcome {
    pub report: RunReport,
    pub events: EventLog,
    pub ledgers: Ledgers,
}

impl RunOutcome {
    /// Write the event log / ledgers / JSON report as the log level allows.
    pub fn write_reports(&self, writer: &ReportWriter) -> Result<Vec<PathBuf>> {
        writer.write(&self.report, &self.events, &self.ledgers)
    }
}

/// Corpus orchestrator
///
/// Repositories are processed one after another; the files of one repository
/// run concurrently on a pool bounded by `workers`. Workers send their
/// [`FileResult`]s over a channel and this struct, as the only receiver, is
/// the only place counters and ledgers are mutated.
pub struct CorpusOrchestrator {
    corpus_root: PathBuf,
    source_extension: String,
    workers: usize,
    env: JobEnv,
    events: EventLog,
    aggregator: Aggregator,
    started: Instant,
    jobs_dispatched: usize,
}

impl CorpusOrchestrator {
    pub fn new(config: &ValidatedConfig) -> Self {
        let pipeline = config.pipeline.clone();
        let env = JobEnv {
            pipeline: pipeline.clone(),
            runner: Arc::new(StageRunner::new(config.inherit_tool_output)),
            mirror: Arc::new(OutputMirror::new(
                &config.corpus_root,
                &config.destination_root,
            )),
            scratch_root: config.scratch_dir.clone(),
        };

        let mut events = EventLog::new(config.log_level);
        let title = capitalize(pipeline.name());
        events.record(format!("---------- {} Settings ----------", title));
        events.record(format!("Folder to process: {}", config.corpus_root.display()));
        for line in pipeline.describe() {
            events.record(line);
        }
        events.record(format!(
            "Destination directory: {}",
            config.destination_root.display()
        ));
        events.record(format!("Workers: {}", config.workers));
        events.record("-----------------------------------------");

        let aggregator = Aggregator::new(
            pipeline.name(),
            pipeline.stage_names(),
            pipeline.statuses(),
            &config.corpus_root,
            config.log_level,
        );

        Self {
            corpus_root: config.corpus_root.clone(),
            source_extension: config.source_extension.clone(),
            workers: config.workers,
            env,
            events,
            aggregator,
            started: Instant::now(),
            jobs_dispatched: 0,
        }
    }

    pub fn pipeline(&self) -> &Arc<dyn FilePipeline> {
        &self.env.pipeline
    }

    pub fn events(&self) -> &EventLog {
        &self.events
    }

    pub fn aggregator(&self) -> &Aggregator {
        &self.aggregator
    }

    pub fn jobs_dispatched(&self) -> usize {
        self.jobs_dispatched
    }

    /// Process every repository directly under the corpus root, in
    /// directory-listing order.
    pub async fn run_corpus(&mut self) -> Result<()> {
        self.started = Instant::now();

        let repos = self.discover_repositories()?;
        let names: Vec<&str> = repos.iter().map(|(name, _)| name.as_str()).collect();
        self.events
            .record(format!("Repo folders to be processed: {:?}", names));
        self.events.separator();
        info!("Found {} repositories under {}", repos.len(), self.corpus_root.display());

        for (repo_id, repo_path) in &repos {
            self.run_repository(repo_id, repo_path).await;
        }

        Ok(())
    }

    /// Immediate subdirectories of the corpus root. Other entries are skipped.
    pub fn discover_repositories(&mut self) -> Result<Vec<(String, PathBuf)>> {
        let entries = std::fs::read_dir(&self.corpus_root).map_err(|e| {
            OrchestratorError::config(format!(
                "cannot list corpus root {}: {}",
                self.corpus_root.display(),
                e
            ))
        })?;

        let mut repos = Vec::new();
        for entry in entries {
            let entry = entry?;
            let path = entry.path();
            let name = entry.file_name().to_string_lossy().into_owned();
            if path.is_dir() {
                repos.push((name, path));
            } else {
                warn!("Skipping non-directory corpus entry: {}", path.display());
                self.events
                    .record(format!("Skipping non-directory entry: {}", name));
            }
        }
        Ok(repos)
    }

    /// Source files under `repo_path`, walked top-down on the blocking pool.
    pub async fn discover_sources(&self, repo_path: &Path) -> Vec<PathBuf> {
        let root = repo_path.to_path_buf();
        let extension = self.source_extension.clone();
        match tokio::task::spawn_blocking(move || walk_sources(&root, &extension)).await {
            Ok(sources) => sources,
            Err(e) => {
                error!("Source discovery in {} failed: {}", repo_path.display(), e);
                Vec::new()
            }
        }
    }

    /// Dispatch every source file of one repository and wait for the pool to drain.
    pub async fn run_repository(&mut self, repo_id: &str, repo_path: &Path) -> RepoStats {
        let verb = self.env.pipeline.name();
        self.events
            .record(format!("Beginning {} of repository: {}", verb, repo_id));
        self.aggregator.begin_repository(repo_id);

        let sources = self.discover_sources(repo_path).await;
        info!("Repository {}: {} source file(s)", repo_id, sources.len());

        let semaphore = Arc::new(Semaphore::new(self.workers));
        let (tx, mut rx) = mpsc::unbounded_channel::<FileResult>();
        let mut handles: Vec<(Job, JoinHandle<()>)> = Vec::with_capacity(sources.len());

        for source in sources {
            let job = Job::new(repo_id, source);
            self.events
                .record(format!("{{{}}} Processing file: {}", repo_id, job.file_name()));
            self.jobs_dispatched += 1;

            let env = self.env.clone();
            let semaphore = semaphore.clone();
            let tx = tx.clone();
            let worker_job = job.clone();
            let handle = tokio::spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return;
                };
                let result = process_job(env, worker_job).await;
                let _ = tx.send(result);
            });
            handles.push((job, handle));
        }
        drop(tx);

        let mut delivered: HashSet<Uuid> = HashSet::with_capacity(handles.len());
        while let Some(result) = rx.recv().await {
            delivered.insert(result.job_id);
            self.on_result(repo_id, result);
        }

        for (job, handle) in handles {
            if let Err(join_err) = handle.await {
                self.on_worker_error(&job, &join_err);
                if !delivered.contains(&job.id) {
                    let result = FileResult::internal_error(
                        &job,
                        self.env.pipeline.stage_names(),
                        format!("worker failed: {}", join_err),
                    );
                    self.on_result(repo_id, result);
                }
            }
        }

        let stats = self.aggregator.finish_repository(repo_id);
        self.events
            .record(format!("Finished {} of repository: {}", verb, repo_id));
        self.events.separator();
        info!(
            "Repository {} done: {} file(s), {} succeeded",
            repo_id,
            stats.files(),
            stats.counts.succeeded
        );
        stats
    }

    fn on_result(&mut self, repo_id: &str, result: FileResult) {
        if result.status == TerminalStatus::InternalError {
            self.events.record(format!(
                "{{{}}} Internal error on {}: {}",
                repo_id,
                result.source_path.display(),
                result.error.as_deref().unwrap_or("unknown")
            ));
        }
        self.aggregator.on_result(repo_id, &result);
    }

    /// Worker-level failures that escaped job-level capture.
    fn on_worker_error(&mut self, job: &Job, err: &JoinError) {
        error!(
            "Worker for {} (repo {}, job {}) failed: {:?}",
            job.source_path.display(),
            job.repo_id,
            job.id,
            err
        );
        self.events.record(format!(
            "{{{}}} Worker error on {}: {}",
            job.repo_id,
            job.file_name(),
            err
        ));
    }

    /// Close the run: record the summary in the event log and hand back
    /// the report, the log and the ledgers.
    pub fn finalize(mut self) -> RunOutcome {
        let elapsed = self.started.elapsed();
        let (report, ledgers) = self.aggregator.finalize(elapsed);

        self.events.record(format!(
            "Finished {} process!",
            self.env.pipeline.name()
        ));
        for line in report.summary_lines() {
            self.events.record(line);
        }

        RunOutcome {
            report,
            events: self.events,
            ledgers,
        }
    }

    /// Run the whole corpus and finalize.
    pub async fn run(mut self) -> Result<RunOutcome> {
        self.run_corpus().await?;
        Ok(self.finalize())
    }
}

fn walk_sources(repo_path: &Path, extension: &str) -> Vec<PathBuf> {
    let mut sources = Vec::new();
    for entry in WalkDir::new(repo_path) {
        match entry {
            Ok(entry) => {
                if entry.file_type().is_file()
                    && entry.path().extension().map_or(false, |ext| ext == extension)
                {
                    sources.push(entry.into_path());
                }
            }
            Err(e) => warn!("Skipping unreadable entry in {}: {}", repo_path.display(), e),
        }
    }
    sources
}
