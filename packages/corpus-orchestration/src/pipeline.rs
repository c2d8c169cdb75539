use crate::error::{OrchestratorError, Result};
use crate::job::{FileResult, Job, StageOutcome, TerminalStatus};
use crate::mirror::OutputMirror;
use crate::runner::{StageRun, StageRunner, StageSpec};
use async_trait::async_trait;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::error;

/// Per-job execution context handed to a pipeline
pub struct PipelineContext<'a> {
    /// Private scratch directory, removed when the job ends
    pub workdir: &'a Path,
    pub runner: &'a StageRunner,
}

/// What a pipeline reports back for one file
#[derive(Debug, Clone)]
pub struct PipelineRun {
    pub stages: Vec<StageOutcome>,
    /// Final artifacts, inside the scratch directory
    pub artifacts: Vec<PathBuf>,
}

/// File pipeline trait (pluggable pipelines)
#[async_trait]
pub trait FilePipeline: Send + Sync {
    /// Pipeline name, used for report and log file names
    fn name(&self) -> &'static str;

    /// Prefix for the CSV ledger files
    fn ledger_prefix(&self) -> &'static str;

    /// Ordered stage names
    fn stage_names(&self) -> &'static [&'static str];

    /// Terminal statuses this pipeline can produce
    fn statuses(&self) -> &'static [TerminalStatus];

    /// Lines describing the pipeline's tool setup for the event log
    fn describe(&self) -> Vec<String> {
        Vec::new()
    }

    /// Run every stage for one job, stopping at the first failure
    async fn execute(&self, job: &Job, ctx: &PipelineContext<'_>) -> Result<PipelineRun>;
}

/// Records stage outcomes in pipeline order and pads unreached stages.
pub struct StageTrack {
    names: &'static [&'static str],
    outcomes: Vec<StageOutcome>,
}

impl StageTrack {
    pub fn new(names: &'static [&'static str]) -> Self {
        Self {
            names,
            outcomes: Vec::with_capacity(names.len()),
        }
    }

    /// Spec for the next stage, named after it.
    pub fn next_spec(&self, program: impl Into<PathBuf>, working_dir: impl Into<PathBuf>) -> Result<StageSpec> {
        let name = self.names.get(self.outcomes.len()).ok_or_else(|| {
            OrchestratorError::internal(format!(
                "pipeline ran more than its {} stages",
                self.names.len()
            ))
        })?;
        Ok(StageSpec::new(*name, program, working_dir))
    }

    /// Record the next stage's run; returns whether the pipeline may continue.
    pub fn record(&mut self, run: &StageRun) -> Result<bool> {
        let name = self.names.get(self.outcomes.len()).ok_or_else(|| {
            OrchestratorError::internal(format!(
                "pipeline recorded more than its {} stages",
                self.names.len()
            ))
        })?;
        let outcome = StageOutcome::from_run(*name, run);
        let proceed = outcome.succeeded;
        self.outcomes.push(outcome);
        Ok(proceed)
    }

    pub fn finish(mut self, artifacts: Vec<PathBuf>) -> PipelineRun {
        for name in &self.names[self.outcomes.len()..] {
            self.outcomes.push(StageOutcome::skipped(*name));
        }
        PipelineRun {
            stages: self.outcomes,
            artifacts,
        }
    }
}

/// Everything a worker needs to process jobs of one run
#[derive(Clone)]
pub struct JobEnv {
    pub pipeline: Arc<dyn FilePipeline>,
    pub runner: Arc<StageRunner>,
    pub mirror: Arc<OutputMirror>,
    pub scratch_root: PathBuf,
}

/// Process one job into exactly one [`FileResult`].
///
/// Errors and panics raised while orchestrating the job are logged and turned
/// into an `internal_error` result; they never reach the caller.
pub async fn process_job(env: JobEnv, job: Job) -> FileResult {
    let stage_names = env.pipeline.stage_names();

    match AssertUnwindSafe(run_in_scratch(&env, &job)).catch_unwind().await {
        Ok(Ok(result)) => result,
        Ok(Err(e)) => {
            error!(
                "Internal error processing {} (repo {}, job {}): {}",
                job.source_path.display(),
                job.repo_id,
                job.id,
                e
            );
            FileResult::internal_error(&job, stage_names, e.to_string())
        }
        Err(panic) => {
            let message = panic_message(panic.as_ref());
            error!(
                "Panic processing {} (repo {}, job {}): {}",
                job.source_path.display(),
                job.repo_id,
                job.id,
                message
            );
            FileResult::internal_error(&job, stage_names, format!("panic: {}", message))
        }
    }
}

async fn run_in_scratch(env: &JobEnv, job: &Job) -> Result<FileResult> {
    let scratch = tempfile::Builder::new()
        .prefix("corpus-job-")
        .tempdir_in(&env.scratch_root)?;

    let ctx = PipelineContext {
        workdir: scratch.path(),
        runner: &env.runner,
    };
    let run = env.pipeline.execute(job, &ctx).await?;

    if run.stages.len() != env.pipeline.stage_names().len() {
        return Err(OrchestratorError::internal(format!(
            "pipeline {} reported {} stage outcomes, expected {}",
            env.pipeline.name(),
            run.stages.len(),
            env.pipeline.stage_names().len()
        )));
    }

    let result = FileResult::from_stages(job, run.stages, run.artifacts.len());
    if result.is_success() {
        let mirror = env.mirror.clone();
        let published_job = job.clone();
        let artifacts = run.artifacts;
        tokio::task::spawn_blocking(move || mirror.publish(&published_job, &artifacts))
            .await
            .map_err(OrchestratorError::internal)??;
    }

    // scratch dropped here: directory removed before the result leaves the worker
    drop(scratch);
    Ok(result)
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
