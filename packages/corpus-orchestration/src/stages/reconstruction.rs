use crate::error::{OrchestratorError, Result};
use crate::job::{Job, TerminalStatus};
use crate::pipeline::{FilePipeline, PipelineContext, PipelineRun, StageTrack};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;

/// File the constraint generator writes into its working directory
pub const CONSTRAINT_FILE: &str = "a.cstr";

pub const DEFAULT_SOLVER_TIMEOUT: Duration = Duration::from_secs(5);

pub const DEFAULT_SOLVER_COMMAND: [&str; 4] = ["stack", "exec", "psychecsolver-exe", "--"];

const STAGES: [&str; 3] = ["generate-constraints", "solve-constraints", "verify-compile"];

const STATUSES: [TerminalStatus; 5] = [
    TerminalStatus::Succeeded,
    TerminalStatus::Stage1Failed,
    TerminalStatus::Timeout,
    TerminalStatus::IntermediateFailed,
    TerminalStatus::InternalError,
];

/// Type reconstruction (three stages)
///
/// 1. generate typing constraints for the file,
/// 2. solve them into declarations (bounded by a timeout),
/// 3. append the original source to the declarations and check that the
///    result compiles.
///
/// The artifact is the single reconstructed file.
pub struct ReconstructionPipeline {
    generator: PathBuf,
    /// Solver program followed by its fixed leading arguments
    solver_command: Vec<String>,
    solver_dir: PathBuf,
    compiler: PathBuf,
    solver_timeout: Duration,
}

impl ReconstructionPipeline {
    pub fn new(
        generator: impl Into<PathBuf>,
        solver_command: Vec<String>,
        solver_dir: impl Into<PathBuf>,
        compiler: impl Into<PathBuf>,
    ) -> Self {
        Self {
            generator: generator.into(),
            solver_command,
            solver_dir: solver_dir.into(),
            compiler: compiler.into(),
            solver_timeout: DEFAULT_SOLVER_TIMEOUT,
        }
    }

    pub fn with_solver_timeout(mut self, timeout: Duration) -> Self {
        self.solver_timeout = timeout;
        self
    }
}

#[async_trait]
impl FilePipeline for ReconstructionPipeline {
    fn name(&self) -> &'static str {
        "reconstruction"
    }

    fn ledger_prefix(&self) -> &'static str {
        "recon"
    }

    fn stage_names(&self) -> &'static [&'static str] {
        &STAGES
    }

    fn statuses(&self) -> &'static [TerminalStatus] {
        &STATUSES
    }

    fn describe(&self) -> Vec<String> {
        vec![
            format!("PsycheC constraint generator: {}", self.generator.display()),
            format!(
                "PsycheC solver: {} (in {}, timeout {:?})",
                self.solver_command.join(" "),
                self.solver_dir.display(),
                self.solver_timeout
            ),
            format!("Verification compiler: {}", self.compiler.display()),
        ]
    }

    async fn execute(&self, job: &Job, ctx: &PipelineContext<'_>) -> Result<PipelineRun> {
        let mut track = StageTrack::new(&STAGES);

        let generate = track
            .next_spec(&self.generator, ctx.workdir)?
            .arg(&job.source_path);
        if !track.record(&ctx.runner.run(&generate).await)? {
            return Ok(track.finish(Vec::new()));
        }

        let constraints = ctx.workdir.join(CONSTRAINT_FILE);
        let file_name = job.source_path.file_name().ok_or_else(|| {
            OrchestratorError::internal(format!("no file name in {}", job.source_path.display()))
        })?;
        let output = ctx.workdir.join(file_name);

        let (solver, solver_args) = self
            .solver_command
            .split_first()
            .ok_or_else(|| OrchestratorError::config("empty solver command"))?;
        let solve = track
            .next_spec(solver, &self.solver_dir)?
            .args(solver_args)
            .arg("-i")
            .arg(&constraints)
            .arg("-o")
            .arg(&output)
            .timeout(self.solver_timeout);
        if !track.record(&ctx.runner.run(&solve).await)? {
            return Ok(track.finish(Vec::new()));
        }

        append_source(&job.source_path, &output).await?;

        let compile = track
            .next_spec(&self.compiler, ctx.workdir)?
            .args(["-c", "-fsyntax-only"])
            .arg(&output);
        if !track.record(&ctx.runner.run(&compile).await)? {
            return Ok(track.finish(Vec::new()));
        }

        Ok(track.finish(vec![output]))
    }
}

/// Append the original source after the solver's generated declarations.
async fn append_source(source: &Path, output: &Path) -> Result<()> {
    let original = tokio::fs::read(source).await?;
    let mut out = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(output)
        .await?;
    out.write_all(&original).await?;
    out.flush().await?;
    Ok(())
}
