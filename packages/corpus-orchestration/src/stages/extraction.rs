use crate::error::Result;
use crate::job::{Job, TerminalStatus};
use crate::pipeline::{FilePipeline, PipelineContext, PipelineRun, StageTrack};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::debug;

pub const DEFAULT_PLUGIN_NAME: &str = "extract-funcs";

const STAGES: [&str; 1] = ["extract"];

const STATUSES: [TerminalStatus; 3] = [
    TerminalStatus::Succeeded,
    TerminalStatus::Stage1Failed,
    TerminalStatus::InternalError,
];

/// Function extraction (single stage)
///
/// Runs clang with the function-extractor plugin loaded in syntax-only mode.
/// The plugin writes one file per function definition into the working
/// directory; all of them are the job's artifacts.
pub struct ExtractionPipeline {
    clang: PathBuf,
    plugin: PathBuf,
    plugin_name: String,
}

impl ExtractionPipeline {
    pub fn new(clang: impl Into<PathBuf>, plugin: impl Into<PathBuf>) -> Self {
        Self {
            clang: clang.into(),
            plugin: plugin.into(),
            plugin_name: DEFAULT_PLUGIN_NAME.to_string(),
        }
    }

    pub fn with_plugin_name(mut self, name: impl Into<String>) -> Self {
        self.plugin_name = name.into();
        self
    }
}

#[async_trait]
impl FilePipeline for ExtractionPipeline {
    fn name(&self) -> &'static str {
        "extraction"
    }

    fn ledger_prefix(&self) -> &'static str {
        "extr"
    }

    fn stage_names(&self) -> &'static [&'static str] {
        &STAGES
    }

    fn statuses(&self) -> &'static [TerminalStatus] {
        &STATUSES
    }

    fn describe(&self) -> Vec<String> {
        vec![
            format!("Path to Clang: {}", self.clang.display()),
            format!("Path to FunctionExtractor library: {}", self.plugin.display()),
        ]
    }

    async fn execute(&self, job: &Job, ctx: &PipelineContext<'_>) -> Result<PipelineRun> {
        let mut track = StageTrack::new(&STAGES);

        let spec = track
            .next_spec(&self.clang, ctx.workdir)?
            .arg(&job.source_path)
            .args(["-Xclang", "-load", "-Xclang"])
            .arg(&self.plugin)
            .args(["-Xclang", "-add-plugin", "-Xclang"])
            .arg(&self.plugin_name)
            .arg("-fsyntax-only");

        let run = ctx.runner.run(&spec).await;
        if !track.record(&run)? {
            return Ok(track.finish(Vec::new()));
        }

        let artifacts = produced_files(ctx.workdir).await?;
        debug!(
            "{}: extracted {} function(s)",
            job.source_path.display(),
            artifacts.len()
        );
        Ok(track.finish(artifacts))
    }
}

/// Regular files left in `dir`, sorted by name.
async fn produced_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_type().await?.is_file() {
            files.push(entry.path());
        }
    }
    files.sort();
    Ok(files)
}
