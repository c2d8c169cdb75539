use crate::error::{OrchestratorError, Result};
use crate::runner::StageRun;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// One source file of one repository, consumed exactly once by a worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub repo_id: String,
    pub source_path: PathBuf,
}

impl Job {
    pub fn new(repo_id: impl Into<String>, source_path: impl Into<PathBuf>) -> Self {
        Self {
            id: Uuid::new_v4(),
            repo_id: repo_id.into(),
            source_path: source_path.into(),
        }
    }

    pub fn file_name(&self) -> String {
        self.source_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.source_path.display().to_string())
    }
}

/// Outcome of a single stage of a file pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageOutcome {
    pub stage: String,
    pub attempted: bool,
    pub succeeded: bool,
    pub timed_out: bool,
    pub exit_code: Option<i32>,
}

impl StageOutcome {
    /// A stage that was never reached because an earlier one failed.
    pub fn skipped(stage: impl Into<String>) -> Self {
        Self {
            stage: stage.into(),
            attempted: false,
            succeeded: false,
            timed_out: false,
            exit_code: None,
        }
    }

    pub fn from_run(stage: impl Into<String>, run: &StageRun) -> Self {
        Self {
            stage: stage.into(),
            attempted: true,
            succeeded: run.succeeded(),
            timed_out: run.timed_out,
            exit_code: run.exit_code,
        }
    }
}

/// Terminal classification of a file once its pipeline run ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalStatus {
    Succeeded,
    Stage1Failed,
    Timeout,
    IntermediateFailed,
    InternalError,
}

impl TerminalStatus {
    pub const ALL: [TerminalStatus; 5] = [
        TerminalStatus::Succeeded,
        TerminalStatus::Stage1Failed,
        TerminalStatus::Timeout,
        TerminalStatus::IntermediateFailed,
        TerminalStatus::InternalError,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TerminalStatus::Succeeded => "succeeded",
            TerminalStatus::Stage1Failed => "stage_1_failed",
            TerminalStatus::Timeout => "timeout",
            TerminalStatus::IntermediateFailed => "intermediate_failed",
            TerminalStatus::InternalError => "internal_error",
        }
    }

    pub fn from_str(s: &str) -> Result<Self> {
        match s {
            "succeeded" => Ok(TerminalStatus::Succeeded),
            "stage_1_failed" => Ok(TerminalStatus::Stage1Failed),
            "timeout" => Ok(TerminalStatus::Timeout),
            "intermediate_failed" => Ok(TerminalStatus::IntermediateFailed),
            "internal_error" => Ok(TerminalStatus::InternalError),
            _ => Err(OrchestratorError::config(format!(
                "Invalid terminal status: {}",
                s
            ))),
        }
    }

    /// Derive the terminal status from an ordered stage sequence.
    ///
    /// A timeout anywhere wins, then a failing first stage, then any later
    /// failure. An empty sequence means the pipeline never reported and is
    /// classified as an internal error.
    pub fn classify(stages: &[StageOutcome]) -> Self {
        let Some(first) = stages.first() else {
            return TerminalStatus::InternalError;
        };

        if stages.iter().any(|s| s.timed_out) {
            TerminalStatus::Timeout
        } else if !first.succeeded {
            TerminalStatus::Stage1Failed
        } else if stages.iter().all(|s| s.succeeded) {
            TerminalStatus::Succeeded
        } else {
            TerminalStatus::IntermediateFailed
        }
    }
}

impl std::fmt::Display for TerminalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Immutable result of one job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileResult {
    pub job_id: Uuid,
    pub repo_id: String,
    pub source_path: PathBuf,
    pub stages: Vec<StageOutcome>,
    pub status: TerminalStatus,
    /// Files produced by the final stage (published only on success)
    pub artifacts: usize,
    /// Diagnostic for internal errors
    pub error: Option<String>,
}

impl FileResult {
    pub fn from_stages(job: &Job, stages: Vec<StageOutcome>, artifacts: usize) -> Self {
        let status = TerminalStatus::classify(&stages);
        Self {
            job_id: job.id,
            repo_id: job.repo_id.clone(),
            source_path: job.source_path.clone(),
            stages,
            status,
            artifacts,
            error: None,
        }
    }

    /// Result for a job whose orchestration failed; every stage is recorded
    /// as unattempted.
    pub fn internal_error(job: &Job, stage_names: &[&str], error: impl Into<String>) -> Self {
        Self {
            job_id: job.id,
            repo_id: job.repo_id.clone(),
            source_path: job.source_path.clone(),
            stages: stage_names.iter().map(|n| StageOutcome::skipped(*n)).collect(),
            status: TerminalStatus::InternalError,
            artifacts: 0,
            error: Some(error.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == TerminalStatus::Succeeded
    }

    /// Source path relative to `root`, or the full path if it lies elsewhere.
    pub fn relative_path(&self, root: &Path) -> PathBuf {
        self.source_path
            .strip_prefix(root)
            .map(Path::to_path_buf)
            .unwrap_or_else(|_| self.source_path.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::StageTrack;
    use proptest::prelude::*;
    use std::time::Duration;

    fn passed(name: &str) -> StageOutcome {
        StageOutcome {
            stage: name.to_string(),
            attempted: true,
            succeeded: true,
            timed_out: false,
            exit_code: Some(0),
        }
    }

    fn failed(name: &str) -> StageOutcome {
        StageOutcome {
            stage: name.to_string(),
            attempted: true,
            succeeded: false,
            timed_out: false,
            exit_code: Some(1),
        }
    }

    fn timed_out(name: &str) -> StageOutcome {
        StageOutcome {
            stage: name.to_string(),
            attempted: true,
            succeeded: false,
            timed_out: true,
            exit_code: None,
        }
    }

    #[test]
    fn test_terminal_status_roundtrip() {
        for status in &TerminalStatus::ALL {
            let parsed = TerminalStatus::from_str(status.as_str()).unwrap();
            assert_eq!(*status, parsed);
        }
        assert!(TerminalStatus::from_str("COMPILED").is_err());
    }

    #[test]
    fn test_classify_reconstruction_shapes() {
        let all_ok = vec![passed("gen"), passed("solve"), passed("compile")];
        assert_eq!(TerminalStatus::classify(&all_ok), TerminalStatus::Succeeded);

        let gen_failed = vec![failed("gen"), StageOutcome::skipped("solve"), StageOutcome::skipped("compile")];
        assert_eq!(TerminalStatus::classify(&gen_failed), TerminalStatus::Stage1Failed);

        let solve_timeout = vec![passed("gen"), timed_out("solve"), StageOutcome::skipped("compile")];
        assert_eq!(TerminalStatus::classify(&solve_timeout), TerminalStatus::Timeout);

        let compile_failed = vec![passed("gen"), passed("solve"), failed("compile")];
        assert_eq!(
            TerminalStatus::classify(&compile_failed),
            TerminalStatus::IntermediateFailed
        );
    }

    #[test]
    fn test_classify_single_stage() {
        assert_eq!(TerminalStatus::classify(&[passed("extract")]), TerminalStatus::Succeeded);
        assert_eq!(TerminalStatus::classify(&[failed("extract")]), TerminalStatus::Stage1Failed);
        assert_eq!(TerminalStatus::classify(&[]), TerminalStatus::InternalError);
    }

    #[test]
    fn test_internal_error_result_has_no_attempted_stages() {
        let job = Job::new("repo", "/corpus/repo/a.c");
        let result = FileResult::internal_error(&job, &["gen", "solve"], "boom");
        assert_eq!(result.status, TerminalStatus::InternalError);
        assert!(result.stages.iter().all(|s| !s.attempted && !s.succeeded));
        assert_eq!(result.error.as_deref(), Some("boom"));
    }

    #[test]
    fn test_relative_path() {
        let job = Job::new("repo", "/corpus/repo/src/a.c");
        let result = FileResult::from_stages(&job, vec![passed("extract")], 2);
        assert_eq!(
            result.relative_path(Path::new("/corpus")),
            PathBuf::from("repo/src/a.c")
        );
        assert_eq!(result.relative_path(Path::new("/elsewhere")), job.source_path);
    }

    // Stage sequences shaped the way a short-circuiting pipeline produces them:
    // k passing stages, then optionally one failing/timed-out stage, then skips.
    fn pipeline_shape() -> impl Strategy<Value = Vec<StageOutcome>> {
        (1usize..5)
            .prop_flat_map(|n| (Just(n), 0..=n, 0u8..2))
            .prop_map(|(n, passing, failure)| {
                let mut stages = Vec::with_capacity(n);
                for i in 0..n {
                    let name = format!("stage-{}", i);
                    if i < passing {
                        stages.push(passed(&name));
                    } else if i == passing {
                        stages.push(if failure == 0 { failed(&name) } else { timed_out(&name) });
                    } else {
                        stages.push(StageOutcome::skipped(name));
                    }
                }
                stages
            })
    }

    static STAGE_NAMES: [&str; 3] = ["generate-constraints", "solve-constraints", "verify-compile"];

    fn stage_run() -> impl Strategy<Value = StageRun> {
        prop_oneof![
            Just(StageRun { exit_code: Some(0), timed_out: false, launch_error: None, duration: Duration::ZERO }),
            (1i32..255).prop_map(|code| StageRun {
                exit_code: Some(code),
                timed_out: false,
                launch_error: None,
                duration: Duration::ZERO,
            }),
            Just(StageRun { exit_code: None, timed_out: true, launch_error: None, duration: Duration::ZERO }),
            Just(StageRun {
                exit_code: None,
                timed_out: false,
                launch_error: Some("No such file or directory".to_string()),
                duration: Duration::ZERO,
            }),
        ]
    }

    proptest! {
        #[test]
        fn prop_exactly_one_status_from_shape(stages in pipeline_shape()) {
            let status = TerminalStatus::classify(&stages);
            prop_assert!(status != TerminalStatus::InternalError);

            let all_passed = stages.iter().all(|s| s.succeeded);
            prop_assert_eq!(status == TerminalStatus::Succeeded, all_passed);

            if stages.iter().any(|s| s.timed_out) {
                prop_assert_eq!(status, TerminalStatus::Timeout);
            }
        }

        #[test]
        fn prop_stage_track_pads_after_first_failure(
            (names, runs) in (1usize..=STAGE_NAMES.len())
                .prop_flat_map(|n| (Just(&STAGE_NAMES[..n]), prop::collection::vec(stage_run(), n)))
        ) {
            let mut track = StageTrack::new(names);
            for run in &runs {
                if !track.record(run).unwrap() {
                    break;
                }
            }
            let stages = track.finish(Vec::new()).stages;

            prop_assert_eq!(stages.len(), names.len());
            let mut seen_skip = false;
            for (i, stage) in stages.iter().enumerate() {
                prop_assert_eq!(&stage.stage, names[i]);
                if !stage.attempted {
                    seen_skip = true;
                    prop_assert!(!stage.succeeded && !stage.timed_out);
                } else {
                    prop_assert!(!seen_skip);
                    prop_assert_eq!(stage.succeeded, runs[i].succeeded());
                    // only the last attempted stage may have failed
                    if i > 0 {
                        prop_assert!(stages[i - 1].succeeded);
                    }
                }
            }
            prop_assert_ne!(TerminalStatus::classify(&stages), TerminalStatus::InternalError);
        }
    }
}
