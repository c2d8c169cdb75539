use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, OrchestratorError>;

#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("Directory not found: {}", .0.display())]
    DirectoryNotFound(PathBuf),

    #[error("Not a directory: {}", .0.display())]
    NotADirectory(PathBuf),

    #[error("Binary not found: {}", .0.display())]
    ToolNotFound(PathBuf),

    #[error("Destination directory unavailable: {}: {reason}", .path.display())]
    DestinationUnavailable { path: PathBuf, reason: String },

    #[error("Logging level choices are 0, 1 or 2 (got {0})")]
    InvalidLogLevel(i64),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Mirror error: {0}")]
    Mirror(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl OrchestratorError {
    pub fn config<E: std::fmt::Display>(e: E) -> Self {
        Self::Config(e.to_string())
    }

    pub fn internal<E: std::fmt::Display>(e: E) -> Self {
        Self::Internal(e.to_string())
    }

    /// Configuration errors halt the run before any job is dispatched.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            OrchestratorError::DirectoryNotFound(_)
                | OrchestratorError::NotADirectory(_)
                | OrchestratorError::ToolNotFound(_)
                | OrchestratorError::DestinationUnavailable { .. }
                | OrchestratorError::InvalidLogLevel(_)
                | OrchestratorError::Config(_)
                | OrchestratorError::Yaml(_)
        )
    }
}
