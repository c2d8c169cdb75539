//! End-to-end reconstruction runs against fake PsycheC tools
//!
//! The fake tools are shell scripts whose behaviour depends on the file name:
//! - `gen_fail*`  : constraint generator exits 1
//! - `slow*`      : solver forks a child and hangs past the timeout
//! - `bad_compile*`: verification compiler exits 1

#![cfg(unix)]

use corpus_orchestration::config::{PipelineConfig, RunConfig};
use corpus_orchestration::{CorpusOrchestrator, LogLevel, ReportWriter, RunOutcome, TerminalStatus};
use pretty_assertions::assert_eq;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

struct Corpus {
    root: tempfile::TempDir,
    dest: tempfile::TempDir,
    tools: tempfile::TempDir,
    scratch: tempfile::TempDir,
}

fn script(path: &Path, body: &str) {
    std::fs::write(path, format!("#!/bin/sh\n{}\n", body)).unwrap();
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).unwrap();
}

impl Corpus {
    fn new() -> Self {
        let corpus = Self {
            root: tempfile::tempdir().unwrap(),
            dest: tempfile::tempdir().unwrap(),
            tools: tempfile::tempdir().unwrap(),
            scratch: tempfile::tempdir().unwrap(),
        };

        let psychec = corpus.psychec_dir();
        std::fs::create_dir_all(psychec.join("solver")).unwrap();
        script(
            &psychec.join("psychecgen"),
            "case \"$1\" in *gen_fail*) exit 1;; esac\necho constraints > a.cstr",
        );
        // solver -i <constraints> -o <output>
        script(
            &corpus.tools.path().join("solver"),
            &format!(
                "case \"$4\" in *slow*) sleep 30 & echo $! > {}/slow.pid; wait; exit 0;; esac\necho 'typedef int T;' > \"$4\"",
                corpus.tools.path().display()
            ),
        );
        // cc -c -fsyntax-only <file>
        script(
            &corpus.tools.path().join("cc"),
            "case \"$3\" in *bad_compile*) exit 1;; esac\nexit 0",
        );
        corpus
    }

    fn psychec_dir(&self) -> PathBuf {
        self.tools.path().join("psychec")
    }

    fn add(&self, rel: &str) {
        let path = self.root.path().join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, "T x;\n").unwrap();
    }

    fn add_repo(&self, name: &str) {
        std::fs::create_dir_all(self.root.path().join(name)).unwrap();
    }

    fn config(&self) -> RunConfig {
        RunConfig::new(
            self.root.path(),
            self.dest.path(),
            PipelineConfig::Reconstruction {
                compiler: self.tools.path().join("cc"),
                psychec_dir: self.psychec_dir(),
                solver_command: Some(vec![self.tools.path().join("solver").display().to_string()]),
                solver_timeout_secs: 1,
            },
        )
        .log_level(LogLevel::Ledgers)
        .workers(4)
        .scratch_dir(self.scratch.path())
        .report_dir(self.tools.path().join("reports"))
    }

    async fn run(&self) -> RunOutcome {
        let config = self.config().validate().unwrap();
        CorpusOrchestrator::new(&config).run().await.unwrap()
    }

    fn mirrored(&self, rel: &str) -> PathBuf {
        self.dest.path().join(rel)
    }

    fn scratch_is_empty(&self) -> bool {
        std::fs::read_dir(self.scratch.path()).unwrap().next().is_none()
    }
}

/// Whether `pid` is a live (non-zombie) process; `kill -0` elsewhere.
fn running(pid: &str) -> bool {
    if cfg!(target_os = "linux") {
        return match std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
            Ok(stat) => !matches!(
                stat.rsplit(')').next().and_then(|rest| rest.trim_start().chars().next()),
                Some('Z') | Some('X')
            ),
            Err(_) => false,
        };
    }
    std::process::Command::new("kill")
        .args(["-0", pid])
        .stderr(std::process::Stdio::null())
        .status()
        .map(|status| status.success())
        .unwrap_or(false)
}

fn status_of(outcome: &RunOutcome, file: &str) -> TerminalStatus {
    outcome
        .ledgers
        .file_rows()
        .iter()
        .find(|row| row.file == file)
        .unwrap_or_else(|| panic!("no ledger row for {}", file))
        .status
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_all_files_succeed() {
    let corpus = Corpus::new();
    corpus.add("alpha/a.c");
    corpus.add("alpha/src/b.c");
    corpus.add("alpha/src/deep/c.c");

    let outcome = corpus.run().await;

    assert_eq!(outcome.report.global.counts.succeeded, 3);
    assert_eq!(outcome.report.files_processed(), 3);
    for rel in ["alpha/a.c", "alpha/src/b.c", "alpha/src/deep/c.c"] {
        let mirrored = corpus.mirrored(rel);
        assert_eq!(
            std::fs::read_to_string(&mirrored).unwrap(),
            "typedef int T;\nT x;\n",
            "{}",
            mirrored.display()
        );
    }

    let rows = outcome.ledgers.repo_rows();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].repo, "alpha");
    assert_eq!(rows[0].counts.succeeded, 3);
    assert_eq!(rows[0].artifacts, 3);
    assert!(corpus.scratch_is_empty());
}

#[tokio::test]
async fn test_stage_one_failure_is_not_mirrored() {
    let corpus = Corpus::new();
    corpus.add("alpha/gen_fail.c");
    corpus.add("alpha/ok.c");

    let outcome = corpus.run().await;

    assert_eq!(status_of(&outcome, "alpha/gen_fail.c"), TerminalStatus::Stage1Failed);
    assert_eq!(status_of(&outcome, "alpha/ok.c"), TerminalStatus::Succeeded);
    assert!(!corpus.mirrored("alpha/gen_fail.c").exists());
    assert!(corpus.mirrored("alpha/ok.c").exists());
    assert_eq!(outcome.report.global.stage_passes, vec![1, 1, 1]);
}

#[tokio::test]
async fn test_solver_timeout_kills_process() {
    let corpus = Corpus::new();
    corpus.add("alpha/slow.c");

    let outcome = corpus.run().await;

    assert_eq!(status_of(&outcome, "alpha/slow.c"), TerminalStatus::Timeout);
    assert!(!corpus.mirrored("alpha/slow.c").exists());

    // the solver forks; its child must die with it
    let pid = std::fs::read_to_string(corpus.tools.path().join("slow.pid")).unwrap();
    let pid = pid.trim();
    let mut alive = running(pid);
    for _ in 0..40 {
        if !alive {
            break;
        }
        std::thread::sleep(std::time::Duration::from_millis(50));
        alive = running(pid);
    }
    assert!(!alive, "solver child {} still running", pid);
    assert!(corpus.scratch_is_empty());
}

#[tokio::test]
async fn test_compile_failure_is_intermediate() {
    let corpus = Corpus::new();
    corpus.add("alpha/bad_compile.c");

    let outcome = corpus.run().await;

    assert_eq!(
        status_of(&outcome, "alpha/bad_compile.c"),
        TerminalStatus::IntermediateFailed
    );
    assert_eq!(outcome.report.global.stage_passes, vec![1, 1, 0]);
    assert_eq!(outcome.report.global.artifacts, 0);
}

#[tokio::test]
async fn test_empty_repository_gets_zero_row() {
    let corpus = Corpus::new();
    corpus.add_repo("empty");

    let outcome = corpus.run().await;

    assert_eq!(outcome.report.files_processed(), 0);
    assert!(outcome.ledgers.file_rows().is_empty());
    let rows = outcome.ledgers.repo_rows();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].repo, "empty");
    assert_eq!(rows[0].counts.total(), 0);
    assert_eq!(rows[0].artifacts, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_repositories_are_ledgered_in_processing_order() {
    let corpus = Corpus::new();
    for i in 0..6 {
        corpus.add(&format!("first/f{}.c", i));
        corpus.add(&format!("second/s{}.c", i));
    }
    corpus.add("second/gen_fail.c");

    let outcome = corpus.run().await;

    let order: Vec<String> = outcome
        .report
        .repositories
        .iter()
        .map(|r| r.repo_id.clone())
        .collect();
    let ledger_order: Vec<String> = outcome
        .ledgers
        .repo_rows()
        .iter()
        .map(|r| r.repo.clone())
        .collect();
    assert_eq!(ledger_order, order);

    // file rows of the first repository all precede the second's
    let file_repos: Vec<&str> = outcome
        .ledgers
        .file_rows()
        .iter()
        .map(|r| r.repo.as_str())
        .collect();
    let switch = file_repos.iter().position(|r| *r != file_repos[0]).unwrap();
    assert!(file_repos[switch..].iter().all(|r| *r == file_repos[switch]));
    assert_eq!(file_repos.len(), 13);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_counts_add_up_across_repositories() {
    let corpus = Corpus::new();
    corpus.add("alpha/a.c");
    corpus.add("alpha/gen_fail.c");
    corpus.add("beta/bad_compile.c");
    corpus.add("beta/b.c");
    corpus.add("beta/nested/c.c");
    corpus.add_repo("gamma");

    let outcome = corpus.run().await;
    let global = &outcome.report.global;

    assert_eq!(global.repositories, 3);
    assert_eq!(global.files(), 5);
    for status in TerminalStatus::ALL {
        let summed: usize = outcome
            .report
            .repositories
            .iter()
            .map(|r| r.counts.get(status))
            .sum();
        assert_eq!(summed, global.counts.get(status), "{}", status);
    }
    assert_eq!(global.counts.succeeded, 3);
    assert_eq!(global.counts.stage_1_failed, 1);
    assert_eq!(global.counts.intermediate_failed, 1);
}

#[tokio::test]
async fn test_reports_are_written_at_level_two() {
    let corpus = Corpus::new();
    corpus.add("alpha/a.c");
    corpus.add("alpha/gen_fail.c");

    let config = corpus.config().validate().unwrap();
    let writer = ReportWriter::new(
        &config.report_dir,
        config.log_level,
        config.pipeline.name(),
        config.pipeline.ledger_prefix(),
    );
    let outcome = CorpusOrchestrator::new(&config).run().await.unwrap();
    let written = outcome.write_reports(&writer).unwrap();

    let reports = corpus.tools.path().join("reports");
    assert!(written.contains(&reports.join("reconstruction.log")));

    let repo_ledger = std::fs::read_to_string(reports.join("recon_repo_log.csv")).unwrap();
    assert_eq!(
        repo_ledger,
        "repo,succeeded,stage_1_failed,timeout,intermediate_failed,internal_error,artifacts\n\
         alpha,1,1,0,0,0,1\n"
    );

    let mut file_ledger: Vec<String> = std::fs::read_to_string(reports.join("recon_file_log.csv"))
        .unwrap()
        .lines()
        .map(str::to_string)
        .collect();
    assert_eq!(file_ledger.remove(0), "file,repo,status");
    file_ledger.sort();
    assert_eq!(
        file_ledger,
        vec![
            "alpha/a.c,alpha,succeeded".to_string(),
            "alpha/gen_fail.c,alpha,stage_1_failed".to_string(),
        ]
    );

    let log = std::fs::read_to_string(reports.join("reconstruction.log")).unwrap();
    assert!(log.contains("Beginning reconstruction of repository: alpha"));
    assert!(log.contains("Number of files processed: 2"));

    let json: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(reports.join("reconstruction_report.json")).unwrap())
            .unwrap();
    assert_eq!(json["global"]["counts"]["succeeded"], 1);
}
