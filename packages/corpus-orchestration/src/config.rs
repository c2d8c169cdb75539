//! Run configuration
//!
//! [`RunConfig`] is the user-facing surface (CLI flags or a YAML file).
//! [`RunConfig::validate`] turns it into a [`ValidatedConfig`] with absolute
//! paths and located tools; every failure there is a fatal configuration
//! error raised before any job runs.

use crate::error::{OrchestratorError, Result};
use crate::event_log::LogLevel;
use crate::pipeline::FilePipeline;
use crate::stages::extraction::DEFAULT_PLUGIN_NAME;
use crate::stages::reconstruction::{DEFAULT_SOLVER_COMMAND, DEFAULT_SOLVER_TIMEOUT};
use crate::stages::{ExtractionPipeline, ReconstructionPipeline};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

fn default_workers() -> usize {
    num_cpus::get()
}

fn default_extension() -> String {
    "c".to_string()
}

fn default_report_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_solver_timeout_secs() -> u64 {
    DEFAULT_SOLVER_TIMEOUT.as_secs()
}

/// Tools for the selected pipeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PipelineConfig {
    Extraction {
        /// clang binary compatible with the extractor plugin
        clang: PathBuf,
        /// extractor plugin shared library
        plugin: PathBuf,
        #[serde(default)]
        plugin_name: Option<String>,
    },
    Reconstruction {
        /// compiler used to verify the reconstructed file
        compiler: PathBuf,
        /// directory holding `psychecgen` and the `solver/` project
        psychec_dir: PathBuf,
        #[serde(default)]
        solver_command: Option<Vec<String>>,
        #[serde(default = "default_solver_timeout_secs")]
        solver_timeout_secs: u64,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunConfig {
    pub corpus_root: PathBuf,
    pub destination_root: PathBuf,
    #[serde(default)]
    pub log_level: LogLevel,
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_extension")]
    pub source_extension: String,
    /// Parent of the per-job scratch directories (system temp dir if unset)
    #[serde(default)]
    pub scratch_dir: Option<PathBuf>,
    /// Where the event log, ledgers and JSON report are written
    #[serde(default = "default_report_dir")]
    pub report_dir: PathBuf,
    /// Create the destination root if it does not exist
    #[serde(default)]
    pub create_destination: bool,
    /// Forward tool stdout/stderr instead of discarding it
    #[serde(default)]
    pub inherit_tool_output: bool,
    pub pipeline: PipelineConfig,
}

impl RunConfig {
    pub fn new(
        corpus_root: impl Into<PathBuf>,
        destination_root: impl Into<PathBuf>,
        pipeline: PipelineConfig,
    ) -> Self {
        Self {
            corpus_root: corpus_root.into(),
            destination_root: destination_root.into(),
            log_level: LogLevel::default(),
            workers: default_workers(),
            source_extension: default_extension(),
            scratch_dir: None,
            report_dir: default_report_dir(),
            create_destination: false,
            inherit_tool_output: false,
            pipeline,
        }
    }

    pub fn log_level(mut self, level: LogLevel) -> Self {
        self.log_level = level;
        self
    }

    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn source_extension(mut self, ext: impl Into<String>) -> Self {
        self.source_extension = ext.into();
        self
    }

    pub fn scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scratch_dir = Some(dir.into());
        self
    }

    pub fn report_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.report_dir = dir.into();
        self
    }

    pub fn create_destination(mut self, create: bool) -> Self {
        self.create_destination = create;
        self
    }

    pub fn inherit_tool_output(mut self, inherit: bool) -> Self {
        self.inherit_tool_output = inherit;
        self
    }

    /// Load from a YAML file
    pub fn from_yaml(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            OrchestratorError::config(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_yaml_str(&content)
    }

    pub fn from_yaml_str(content: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    pub fn validate(&self) -> Result<ValidatedConfig> {
        if self.workers == 0 {
            return Err(OrchestratorError::config("workers must be at least 1"));
        }
        let source_extension = self.source_extension.trim_start_matches('.').to_string();
        if source_extension.is_empty() {
            return Err(OrchestratorError::config("source extension must not be empty"));
        }

        let corpus_root = existing_dir(&self.corpus_root)?;
        let destination_root = self.destination()?;
        let scratch_dir = match &self.scratch_dir {
            Some(dir) => existing_dir(dir)?,
            None => existing_dir(&std::env::temp_dir())?,
        };
        let pipeline = self.build_pipeline()?;

        Ok(ValidatedConfig {
            corpus_root,
            destination_root,
            log_level: self.log_level,
            workers: self.workers,
            source_extension,
            scratch_dir,
            report_dir: absolutize(&self.report_dir),
            inherit_tool_output: self.inherit_tool_output,
            pipeline,
        })
    }

    fn destination(&self) -> Result<PathBuf> {
        let dest = &self.destination_root;
        if !dest.exists() {
            if !self.create_destination {
                return Err(OrchestratorError::DestinationUnavailable {
                    path: dest.clone(),
                    reason: "does not exist".to_string(),
                });
            }
            crate::mirror::ensure_dir(dest).map_err(|e| OrchestratorError::DestinationUnavailable {
                path: dest.clone(),
                reason: e.to_string(),
            })?;
        }
        if !dest.is_dir() {
            return Err(OrchestratorError::NotADirectory(dest.clone()));
        }
        std::fs::canonicalize(dest).map_err(|e| OrchestratorError::DestinationUnavailable {
            path: dest.clone(),
            reason: e.to_string(),
        })
    }

    fn build_pipeline(&self) -> Result<Arc<dyn FilePipeline>> {
        match &self.pipeline {
            PipelineConfig::Extraction {
                clang,
                plugin,
                plugin_name,
            } => {
                let clang = resolve_executable(clang)
                    .ok_or_else(|| OrchestratorError::ToolNotFound(clang.clone()))?;
                if !plugin.is_file() {
                    return Err(OrchestratorError::ToolNotFound(plugin.clone()));
                }
                let pipeline = ExtractionPipeline::new(clang, absolutize(plugin)).with_plugin_name(
                    plugin_name
                        .clone()
                        .unwrap_or_else(|| DEFAULT_PLUGIN_NAME.to_string()),
                );
                Ok(Arc::new(pipeline))
            }
            PipelineConfig::Reconstruction {
                compiler,
                psychec_dir,
                solver_command,
                solver_timeout_secs,
            } => {
                let compiler = resolve_executable(compiler)
                    .ok_or_else(|| OrchestratorError::ToolNotFound(compiler.clone()))?;
                let psychec_dir = existing_dir(psychec_dir)?;

                let generator_path = psychec_dir.join("psychecgen");
                let generator = resolve_executable(&generator_path)
                    .ok_or(OrchestratorError::ToolNotFound(generator_path))?;
                let solver_dir = existing_dir(&psychec_dir.join("solver"))?;

                let mut command = solver_command.clone().unwrap_or_else(|| {
                    DEFAULT_SOLVER_COMMAND.iter().map(|s| s.to_string()).collect()
                });
                let program = command
                    .first()
                    .map(PathBuf::from)
                    .ok_or_else(|| OrchestratorError::config("empty solver command"))?;
                let resolved = resolve_executable(&program)
                    .ok_or_else(|| OrchestratorError::ToolNotFound(program.clone()))?;
                command[0] = resolved.display().to_string();

                if *solver_timeout_secs == 0 {
                    return Err(OrchestratorError::config("solver timeout must be at least 1 second"));
                }

                let pipeline = ReconstructionPipeline::new(generator, command, solver_dir, compiler)
                    .with_solver_timeout(Duration::from_secs(*solver_timeout_secs));
                Ok(Arc::new(pipeline))
            }
        }
    }
}

/// Configuration with every path resolved, ready to drive a run
#[derive(Clone)]
pub struct ValidatedConfig {
    pub corpus_root: PathBuf,
    pub destination_root: PathBuf,
    pub log_level: LogLevel,
    pub workers: usize,
    pub source_extension: String,
    pub scratch_dir: PathBuf,
    pub report_dir: PathBuf,
    pub inherit_tool_output: bool,
    pub pipeline: Arc<dyn FilePipeline>,
}

impl std::fmt::Debug for ValidatedConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValidatedConfig")
            .field("corpus_root", &self.corpus_root)
            .field("destination_root", &self.destination_root)
            .field("log_level", &self.log_level)
            .field("workers", &self.workers)
            .field("source_extension", &self.source_extension)
            .field("scratch_dir", &self.scratch_dir)
            .field("report_dir", &self.report_dir)
            .field("pipeline", &self.pipeline.name())
            .finish()
    }
}

fn existing_dir(path: &Path) -> Result<PathBuf> {
    if !path.exists() {
        return Err(OrchestratorError::DirectoryNotFound(path.to_path_buf()));
    }
    if !path.is_dir() {
        return Err(OrchestratorError::NotADirectory(path.to_path_buf()));
    }
    Ok(std::fs::canonicalize(path)?)
}

fn absolutize(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    std::env::current_dir()
        .map(|cwd| cwd.join(path))
        .unwrap_or_else(|_| path.to_path_buf())
}

/// Locate an executable: a path with a directory part is checked as given,
/// a bare name is searched on `PATH`. Symlinks are not resolved so tools that
/// dispatch on their invocation name keep working.
pub fn resolve_executable(program: &Path) -> Option<PathBuf> {
    if program.components().count() > 1 {
        return is_executable(program).then(|| absolutize(program));
    }
    let paths = std::env::var_os("PATH")?;
    std::env::split_paths(&paths)
        .map(|dir| dir.join(program))
        .find(|candidate| is_executable(candidate))
        .map(|found| absolutize(&found))
}

fn is_executable(path: &Path) -> bool {
    let Ok(meta) = std::fs::metadata(path) else {
        return false;
    };
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        meta.is_file() && meta.permissions().mode() & 0o111 != 0
    }
    #[cfg(not(unix))]
    {
        meta.is_file()
    }
}
