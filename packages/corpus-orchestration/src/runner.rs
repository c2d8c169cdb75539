//! External stage runner
//!
//! Spawns one external tool as a child process in a given working directory,
//! optionally bounded by a wall-clock timeout. A run always produces a
//! [`StageRun`]; spawn and wait failures are folded into it so the caller can
//! classify every outcome.

use std::ffi::OsString;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::{Child, Command};
use tracing::{debug, warn};

/// Invocation contract for one stage
#[derive(Debug, Clone)]
pub struct StageSpec {
    pub name: String,
    pub program: PathBuf,
    pub args: Vec<OsString>,
    pub working_dir: PathBuf,
    pub timeout: Option<Duration>,
}

impl StageSpec {
    pub fn new(name: impl Into<String>, program: impl Into<PathBuf>, working_dir: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            program: program.into(),
            args: Vec::new(),
            working_dir: working_dir.into(),
            timeout: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// What happened when a stage ran
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageRun {
    /// Exit code; `None` when killed by a signal, timed out or never started
    pub exit_code: Option<i32>,
    pub timed_out: bool,
    /// Spawn or wait failure reported by the OS
    pub launch_error: Option<String>,
    pub duration: Duration,
}

impl StageRun {
    pub fn succeeded(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }

    fn launch_failed(err: std::io::Error, started: Instant) -> Self {
        Self {
            exit_code: None,
            timed_out: false,
            launch_error: Some(err.to_string()),
            duration: started.elapsed(),
        }
    }
}

/// Runs external tools for the file pipelines
#[derive(Debug, Clone, Default)]
pub struct StageRunner {
    inherit_output: bool,
}

impl StageRunner {
    /// `inherit_output` forwards tool stdout/stderr to ours; otherwise it is discarded.
    pub fn new(inherit_output: bool) -> Self {
        Self { inherit_output }
    }

    fn output(&self) -> Stdio {
        if self.inherit_output {
            Stdio::inherit()
        } else {
            Stdio::null()
        }
    }

    /// Run a stage to completion or until its timeout expires.
    ///
    /// On timeout the child is killed and reaped before returning.
    pub async fn run(&self, spec: &StageSpec) -> StageRun {
        let started = Instant::now();

        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .current_dir(&spec.working_dir)
            .stdin(Stdio::null())
            .stdout(self.output())
            .stderr(self.output())
            .kill_on_drop(true);
        // own process group, so a timeout also reaches anything the tool forked
        #[cfg(unix)]
        command.process_group(0);

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                warn!(
                    "Stage {}: failed to launch {}: {}",
                    spec.name,
                    spec.program.display(),
                    e
                );
                return StageRun::launch_failed(e, started);
            }
        };

        let waited = match spec.timeout {
            Some(limit) => match tokio::time::timeout(limit, child.wait()).await {
                Ok(waited) => waited,
                Err(_) => {
                    terminate(&mut child, &spec.name).await;
                    debug!("Stage {} timed out after {:?}", spec.name, limit);
                    return StageRun {
                        exit_code: None,
                        timed_out: true,
                        launch_error: None,
                        duration: started.elapsed(),
                    };
                }
            },
            None => child.wait().await,
        };

        match waited {
            Ok(status) => {
                debug!(
                    "Stage {} exited with {:?} in {:?}",
                    spec.name,
                    status.code(),
                    started.elapsed()
                );
                StageRun {
                    exit_code: status.code(),
                    timed_out: false,
                    launch_error: None,
                    duration: started.elapsed(),
                }
            }
            Err(e) => {
                warn!("Stage {}: failed waiting for process: {}", spec.name, e);
                StageRun::launch_failed(e, started)
            }
        }
    }
}

/// Kill a timed-out tool together with its process group, then reap it.
async fn terminate(child: &mut Child, stage: &str) {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        kill_process_group(pid, stage).await;
    }
    if let Err(e) = child.kill().await {
        warn!("Stage {}: failed to kill timed-out process: {}", stage, e);
    }
}

#[cfg(unix)]
async fn kill_process_group(pgid: u32, stage: &str) {
    if pgid == 0 || pgid > i32::MAX as u32 {
        warn!("Stage {}: not signalling invalid process group {}", stage, pgid);
        return;
    }
    let status = Command::new("kill")
        .args(["-9", "--", &format!("-{}", pgid)])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await;
    match status {
        Ok(status) if status.success() => {}
        Ok(status) => debug!("Stage {}: kill of process group {} exited with {}", stage, pgid, status),
        Err(e) => warn!("Stage {}: could not signal process group {}: {}", stage, pgid, e),
    }
}
