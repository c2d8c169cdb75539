//! Output mirror
//!
//! Re-roots the relative path of a processed source file under the
//! destination root and copies the produced artifacts there.

use crate::error::{OrchestratorError, Result};
use crate::job::Job;
use std::fs::{self, FileTimes};
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Create `dir` and its parents, tolerating concurrent creation.
pub fn ensure_dir(dir: &Path) -> io::Result<()> {
    match fs::create_dir_all(dir) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists && dir.is_dir() => Ok(()),
        Err(e) => Err(e),
    }
}

#[derive(Debug, Clone)]
pub struct OutputMirror {
    corpus_root: PathBuf,
    destination_root: PathBuf,
}

impl OutputMirror {
    pub fn new(corpus_root: impl Into<PathBuf>, destination_root: impl Into<PathBuf>) -> Self {
        Self {
            corpus_root: corpus_root.into(),
            destination_root: destination_root.into(),
        }
    }

    pub fn destination_root(&self) -> &Path {
        &self.destination_root
    }

    /// Directory under the destination root that mirrors the source's parent.
    pub fn destination_dir(&self, source: &Path) -> Result<PathBuf> {
        let relative = source.strip_prefix(&self.corpus_root).map_err(|_| {
            OrchestratorError::Mirror(format!(
                "{} is outside corpus root {}",
                source.display(),
                self.corpus_root.display()
            ))
        })?;

        Ok(match relative.parent() {
            Some(parent) => self.destination_root.join(parent),
            None => self.destination_root.clone(),
        })
    }

    /// Copy every artifact next to the mirrored location of the job's source.
    pub fn publish(&self, job: &Job, artifacts: &[PathBuf]) -> Result<Vec<PathBuf>> {
        let dest_dir = self.destination_dir(&job.source_path)?;
        ensure_dir(&dest_dir)?;

        let mut published = Vec::with_capacity(artifacts.len());
        for artifact in artifacts {
            match copy_into(artifact, &dest_dir) {
                Ok(target) => published.push(target),
                Err(e) => {
                    // a failed job leaves nothing behind in the destination tree
                    for target in &published {
                        if let Err(rm) = fs::remove_file(target) {
                            warn!("Could not remove partially published {}: {}", target.display(), rm);
                        }
                    }
                    return Err(e);
                }
            }
        }

        debug!(
            "Published {} artifact(s) for {} to {}",
            published.len(),
            job.source_path.display(),
            dest_dir.display()
        );
        Ok(published)
    }
}

fn copy_into(artifact: &Path, dest_dir: &Path) -> Result<PathBuf> {
    let file_name = artifact.file_name().ok_or_else(|| {
        OrchestratorError::Mirror(format!("artifact has no file name: {}", artifact.display()))
    })?;
    let target = dest_dir.join(file_name);
    copy_with_times(artifact, &target).map_err(|e| {
        OrchestratorError::Mirror(format!("cannot copy {}: {}", artifact.display(), e))
    })?;
    Ok(target)
}

/// Copy contents and permissions, then carry over access/modification times.
fn copy_with_times(from: &Path, to: &Path) -> io::Result<()> {
    fs::copy(from, to)?;

    let times = fs::metadata(from).and_then(|meta| {
        Ok(FileTimes::new()
            .set_accessed(meta.accessed()?)
            .set_modified(meta.modified()?))
    });
    let applied = times.and_then(|times| fs::File::options().write(true).open(to)?.set_times(times));
    if let Err(e) = applied {
        warn!("Could not preserve timestamps on {}: {}", to.display(), e);
    }
    Ok(())
}
