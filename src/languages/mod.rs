//! Languages module - per-language compile and run
//!
//! Every supported language is a variant of [`Language`] backed by a
//! [`LanguageRunner`]. Runners write the source into the slot's work dir,
//! compile it with fixed flags and execute it once per testcase through the
//! sandbox gateway, classifying each run with the checker.

pub mod c;
pub mod cpp;
pub mod python;

use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::checker::{self, Usage};
use crate::core::{ResultCode, Submission, Testcase, Verdict};
use crate::sandbox::{Limits, SandboxGateway, EXPECTED_FILE, INPUT_FILE, META_FILE, OUTPUT_FILE};

/// Wall clock limit relative to the CPU time limit
pub const WALL_TIME_FACTOR: f64 = 1.5;
/// Largest file a submission may write, in KB
pub const FILE_SIZE_LIMIT_KB: u64 = 10240;
/// Upper bound on compiler wall clock time
pub const COMPILE_TIMEOUT: Duration = Duration::from_secs(30);
/// Name of the compiled artifact inside the work dir
pub const BINARY_NAME: &str = "main";

/// Why a compilation did not produce a runnable artifact
#[derive(Debug, Error)]
pub enum CompileError {
    /// The submission does not compile; carries the `ce` verdict
    #[error("compilation failed")]
    Rejected(Verdict),
    /// Anything that is not the submission's fault
    #[error("compilation could not be carried out: {0:#}")]
    Io(#[from] anyhow::Error),
}

/// Compile and run contract implemented by every language
#[async_trait]
pub trait LanguageRunner: Send + Sync {
    /// Write the source into the slot and build it
    async fn compile(
        &self,
        gateway: &dyn SandboxGateway,
        slot: u32,
        submission: &Submission,
    ) -> Result<(), CompileError>;

    /// Run every testcase in order, stopping at the first non-accepted one
    async fn run(
        &self,
        gateway: &dyn SandboxGateway,
        slot: u32,
        submission: &Submission,
    ) -> Verdict;
}

/// Supported source languages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Language {
    C,
    Cpp,
    Python,
}

impl Language {
    /// Resolve a submission's language tag
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag.trim().to_lowercase().as_str() {
            "c" => Some(Self::C),
            "cpp" | "c++" => Some(Self::Cpp),
            "py" | "python" | "python3" => Some(Self::Python),
            _ => None,
        }
    }

    pub fn runner(self) -> &'static dyn LanguageRunner {
        match self {
            Self::C => &c::C,
            Self::Cpp => &cpp::Cpp,
            Self::Python => &python::Python,
        }
    }
}

/// Write the submission's source code into the work dir
pub(crate) async fn write_source(
    work_dir: &Path,
    file_name: &str,
    code: &str,
) -> anyhow::Result<()> {
    let path = work_dir.join(file_name);
    tokio::fs::write(&path, code)
        .await
        .with_context(|| format!("Failed to write source to {}", path.display()))
}

/// Compile `source_file` into [`BINARY_NAME`] with a native compiler
pub(crate) async fn compile_native(
    work_dir: &Path,
    submission: &Submission,
    compiler: &str,
    flags: &[&str],
    source_file: &str,
) -> Result<(), CompileError> {
    let source = work_dir.join(source_file);
    let binary = work_dir.join(BINARY_NAME);

    debug!("Compiling {} with {} {:?}", source.display(), compiler, flags);

    let child = Command::new(compiler)
        .args(flags)
        .arg(&source)
        .arg("-o")
        .arg(&binary)
        .current_dir(work_dir)
        .kill_on_drop(true)
        .output();

    let output = match tokio::time::timeout(COMPILE_TIMEOUT, child).await {
        Ok(output) => output.with_context(|| format!("Failed to run {}", compiler))?,
        Err(_) => {
            info!(
                "Compilation timed out after {:?} for submission {}",
                COMPILE_TIMEOUT,
                submission.id_for_log()
            );
            return Err(CompileError::Rejected(Verdict::compile_error(submission)));
        }
    };

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let preview: String = stderr.chars().take(1024).collect();
        info!(
            "Compilation error for submission {}: {}",
            submission.id_for_log(),
            preview
        );
        return Err(CompileError::Rejected(Verdict::compile_error(submission)));
    }

    if !tokio::fs::try_exists(&binary).await.unwrap_or(false) {
        warn!(
            "Compilation succeeded but binary not found: {}",
            binary.display()
        );
        return Err(CompileError::Rejected(Verdict::compile_error(submission)));
    }

    Ok(())
}

/// Sandbox limits derived from the submission
pub fn limits_for(submission: &Submission) -> Limits {
    Limits {
        time_secs: submission.time_limit,
        wall_time_secs: submission.time_limit * WALL_TIME_FACTOR,
        memory_kb: submission.memory_limit_kb(),
        fsize_kb: FILE_SIZE_LIMIT_KB,
    }
}

/// Lay out the fixed testcase files in the work dir
async fn stage_testcase(work_dir: &Path, testcase: &Testcase) -> anyhow::Result<()> {
    tokio::fs::write(work_dir.join(INPUT_FILE), &testcase.input)
        .await
        .context("Failed to write input file")?;
    tokio::fs::write(work_dir.join(EXPECTED_FILE), &testcase.expected_output)
        .await
        .context("Failed to write expected output file")?;
    tokio::fs::write(work_dir.join(OUTPUT_FILE), b"")
        .await
        .context("Failed to truncate output file")?;

    match tokio::fs::remove_file(work_dir.join(META_FILE)).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).context("Failed to remove stale meta file"),
    }
}

/// Run `command` against every testcase, short-circuiting on the first failure
pub(crate) async fn run_testcases(
    gateway: &dyn SandboxGateway,
    slot: u32,
    submission: &Submission,
    command: &[&str],
) -> Verdict {
    let work_dir = gateway.work_dir(slot);
    let limits = limits_for(submission);
    let mode = submission.checker_mode();

    let mut usage = Usage::default();
    let mut result = ResultCode::Ac;

    for (idx, testcase) in submission.testcases.iter().enumerate() {
        if let Err(e) = stage_testcase(&work_dir, testcase).await {
            warn!("Slot {}: {:#}", slot, e);
            result = ResultCode::Ie;
            break;
        }

        if let Err(e) = gateway.run(slot, &limits, command).await {
            warn!("Slot {}: sandbox run failed: {:#}", slot, e);
        }

        result = checker::evaluate(&work_dir, mode, &mut usage).await;
        if !result.is_accepted() {
            info!(
                "Testcase {} failed: {} for submission {}",
                idx,
                result,
                submission.id_for_log()
            );
            break;
        }
    }

    Verdict::with_usage(submission, result, usage.max_time, usage.max_memory)
}


#[cfg(test)]
mod tests {
    use super::testing::{FakeGateway, FakeRun};
    use super::*;
    use crate::core::Testcase;

    fn submission(testcases: &[(&str, &str)]) -> Submission {
        Submission {
            submission_id: Some(1),
            problem_id: Some(2),
            language: "py".into(),
            source_code: "print(input())".into(),
            testcases: testcases
                .iter()
                .map(|(input, expected)| Testcase {
                    input: input.to_string(),
                    expected_output: expected.to_string(),
                })
                .collect(),
            time_limit: 2.0,
            memory_limit: 64.0,
            ..Default::default()
        }
    }

    #[test]
    fn test_language_tags() {
        assert_eq!(Language::from_tag("c"), Some(Language::C));
        assert_eq!(Language::from_tag("cpp"), Some(Language::Cpp));
        assert_eq!(Language::from_tag("CPP"), Some(Language::Cpp));
        assert_eq!(Language::from_tag("py"), Some(Language::Python));
        assert_eq!(Language::from_tag("python3"), Some(Language::Python));
        assert_eq!(Language::from_tag("brainfuck"), None);
        assert_eq!(Language::from_tag(""), None);
    }

    #[test]
    fn test_limits_derivation() {
        let limits = limits_for(&submission(&[]));
        assert_eq!(limits.time_secs, 2.0);
        assert_eq!(limits.wall_time_secs, 3.0);
        assert_eq!(limits.memory_kb, 64 * 1024);
        assert_eq!(limits.fsize_kb, FILE_SIZE_LIMIT_KB);
    }

    #[tokio::test]
    async fn test_run_all_testcases_accepted() {
        let gateway = FakeGateway::new(vec![FakeRun::ok("1\n"), FakeRun::ok("2\n")]);
        gateway.init(0).await.unwrap();

        let sub = submission(&[("a\n", "1\n"), ("b\n", "2\n")]);
        let verdict = run_testcases(&gateway, 0, &sub, &["./main"]).await;

        assert_eq!(verdict.result, ResultCode::Ac);
        assert_eq!(verdict.max_time, Some(0.010));
        assert_eq!(verdict.max_memory, Some(1500.0));
        assert_eq!(*gateway.inputs.lock().unwrap(), vec!["a\n", "b\n"]);
    }

    #[tokio::test]
    async fn test_run_short_circuits_on_first_failure() {
        let gateway = FakeGateway::new(vec![
            FakeRun::ok("1\n"),
            FakeRun::meta("killed:1\nstatus:TO\ntime:2.001\nmax-rss:800\n"),
            FakeRun::ok("3\n"),
        ]);
        gateway.init(0).await.unwrap();

        let sub = submission(&[("", "1\n"), ("", "2\n"), ("", "3\n")]);
        let verdict = run_testcases(&gateway, 0, &sub, &["./main"]).await;

        assert_eq!(verdict.result, ResultCode::Tle);
        assert_eq!(verdict.max_time, Some(2.001));
        assert_eq!(verdict.max_memory, Some(1500.0));
        assert_eq!(gateway.commands.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_run_missing_meta_is_internal_error() {
        let gateway = FakeGateway::new(vec![FakeRun {
            meta: None,
            stdout: "1\n".into(),
        }]);
        gateway.init(0).await.unwrap();

        let verdict = run_testcases(&gateway, 0, &submission(&[("", "1\n")]), &["./main"]).await;
        assert_eq!(verdict.result, ResultCode::Ie);
    }

    #[tokio::test]
    async fn test_run_without_testcases_is_accepted() {
        let gateway = FakeGateway::new(vec![]);
        gateway.init(0).await.unwrap();

        let verdict = run_testcases(&gateway, 0, &submission(&[]), &["./main"]).await;
        assert_eq!(verdict.result, ResultCode::Ac);
        assert_eq!(verdict.max_time, Some(0.0));
    }
}
