//! Scheduler - per-submission dispatch
//!
//! Drives one submission through validate → compile → run → report on a
//! checked-out slot, then acknowledges the message and returns the slot.
//! A panic inside the grading pipeline is caught on the same task and turns
//! into a requeue instead of a lost slot or a lost message.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use futures_util::FutureExt;
use tracing::{error, info, warn};

use crate::core::{Submission, Verdict};
use crate::languages::{CompileError, Language};
use crate::pool::SlotLease;
use crate::reporter::Reporter;
use crate::sandbox::SandboxGateway;

/// Broker-side acknowledgment of one message
#[async_trait]
pub trait Acknowledger: Send + Sync + 'static {
    async fn ack(&self) -> Result<()>;
    async fn nack(&self, requeue: bool) -> Result<()>;
}

/// What to tell the broker once a submission is done
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Terminal verdict reached (including `ce`)
    Ack,
    /// Internal failure, let the broker redeliver
    Requeue,
}

/// Reject submissions that can never be graded. The error carries the `ce`
/// verdict to report.
pub fn precheck(submission: &Submission) -> Result<Language, Verdict> {
    if submission.language.trim().is_empty() {
        warn!(
            "Missing language in submission {}",
            submission.id_for_log()
        );
        return Err(Verdict::compile_error(submission));
    }
    if submission.source_code.is_empty() {
        warn!(
            "Missing source code in submission {}",
            submission.id_for_log()
        );
        return Err(Verdict::compile_error(submission));
    }
    Language::from_tag(&submission.language).ok_or_else(|| {
        warn!(
            "Unsupported language {:?} in submission {}",
            submission.language,
            submission.id_for_log()
        );
        Verdict::compile_error(submission)
    })
}

/// Compile and run a submission in `slot`, producing its terminal verdict
pub async fn grade(gateway: &dyn SandboxGateway, slot: u32, submission: &Submission) -> Verdict {
    let language = match precheck(submission) {
        Ok(language) => language,
        Err(verdict) => return verdict,
    };
    let runner = language.runner();

    match runner.compile(gateway, slot, submission).await {
        Ok(()) => {}
        Err(CompileError::Rejected(verdict)) => return verdict,
        Err(CompileError::Io(e)) => {
            error!(
                "Compilation error for submission {}: {:#}",
                submission.id_for_log(),
                e
            );
            return Verdict::compile_error(submission);
        }
    }

    runner.run(gateway, slot, submission).await
}

/// [`grade`] with panics caught and logged; `None` means grading panicked.
///
/// Runs on the caller's task, so dropping the caller (and the slot lease it
/// holds) also stops grading.
pub async fn grade_catching_panics(
    gateway: &dyn SandboxGateway,
    slot: u32,
    submission: &Submission,
) -> Option<Verdict> {
    match AssertUnwindSafe(grade(gateway, slot, submission))
        .catch_unwind()
        .await
    {
        Ok(verdict) => Some(verdict),
        Err(panic) => {
            error!(
                "Grading of submission {} on slot {} panicked: {}",
                submission.id_for_log(),
                slot,
                panic_message(panic.as_ref())
            );
            None
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message
    } else {
        "non-string panic payload"
    }
}

pub struct Scheduler {
    reporter: Arc<dyn Reporter>,
}

impl Scheduler {
    pub fn new(reporter: Arc<dyn Reporter>) -> Self {
        Self { reporter }
    }

    pub fn report(&self, verdict: &Verdict) {
        self.reporter.report(verdict);
    }

    /// Grade `submission` on `lease`, report, acknowledge and release.
    ///
    /// The slot is reset and returned and the message acked or nacked exactly
    /// once, whatever happens inside the pipeline.
    pub async fn work<A: Acknowledger>(
        self: Arc<Self>,
        lease: SlotLease,
        submission: Submission,
        acker: A,
    ) -> Outcome {
        let slot = lease.id();
        let submission_id = submission.id_for_log();
        let gateway = lease.gateway();

        let outcome = match grade_catching_panics(gateway.as_ref(), slot, &submission).await {
            Some(verdict) => {
                info!(
                    "Submission {} on slot {}: {} (time: {:?}s, memory: {:?}KB)",
                    submission_id, slot, verdict.result, verdict.max_time, verdict.max_memory
                );
                self.report(&verdict);
                Outcome::Ack
            }
            None => Outcome::Requeue,
        };

        let acked = match outcome {
            Outcome::Ack => acker.ack().await,
            Outcome::Requeue => acker.nack(true).await,
        };
        if let Err(e) = acked {
            error!(
                "Error acknowledging submission {} ({:?}): {:#}",
                submission_id, outcome, e
            );
        }

        lease.release().await;
        outcome
    }
}


#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::testing::{AckEvent, RecordingAcker};
    use super::*;
    use crate::core::{ResultCode, Testcase};
    use crate::languages::testing::{FakeGateway, FakeRun, PanickingGateway};
    use crate::pool::WorkerPool;
    use crate::reporter::testing::RecordingReporter;

    fn python_submission(id: i64, expected: &str) -> Submission {
        Submission {
            submission_id: Some(id),
            problem_id: Some(1),
            language: "py".into(),
            source_code: "a, b = map(int, input().split())\nprint(a + b)\n".into(),
            testcases: vec![Testcase {
                input: "1 2\n".into(),
                expected_output: expected.into(),
            }],
            time_limit: 1.0,
            memory_limit: 64.0,
            ..Default::default()
        }
    }

    struct Harness {
        gateway: Arc<FakeGateway>,
        pool: Arc<WorkerPool>,
        reporter: Arc<RecordingReporter>,
        scheduler: Arc<Scheduler>,
        log: Arc<Mutex<Vec<AckEvent>>>,
    }

    async fn harness(runs: Vec<FakeRun>) -> Harness {
        let gateway = Arc::new(FakeGateway::new(runs));
        let pool = WorkerPool::init(gateway.clone(), 1).await.unwrap();
        let reporter = Arc::new(RecordingReporter::default());
        let scheduler = Arc::new(Scheduler::new(reporter.clone()));
        Harness {
            gateway,
            pool,
            reporter,
            scheduler,
            log: Arc::new(Mutex::new(Vec::new())),
        }
    }

    #[test]
    fn test_precheck_rejects_incomplete_submissions() {
        let mut submission = python_submission(1, "3\n");
        assert_eq!(precheck(&submission), Ok(Language::Python));

        submission.source_code.clear();
        assert_eq!(precheck(&submission).unwrap_err().result, ResultCode::Ce);

        let mut submission = python_submission(1, "3\n");
        submission.language.clear();
        assert!(precheck(&submission).is_err());

        submission.language = "cobol".into();
        assert!(precheck(&submission).is_err());
    }

    #[tokio::test]
    async fn test_grade_compile_io_failure_is_ce() {
        // Slot 5 was never initialized, so writing the source fails
        let gateway = FakeGateway::new(vec![]);
        let submission = python_submission(21, "3\n");

        let verdict = grade(&gateway, 5, &submission).await;
        assert_eq!(verdict.result, ResultCode::Ce);
        assert_eq!(verdict.submission_id, Some(21));
        assert!(verdict.max_time.is_none());
        assert!(gateway.commands.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_work_compile_io_failure_is_reported_and_acked() {
        let h = harness(vec![]).await;

        let lease = h.pool.acquire().await.unwrap();
        std::fs::remove_dir_all(h.gateway.work_dir(lease.id())).unwrap();
        let outcome = h
            .scheduler
            .clone()
            .work(lease, python_submission(22, "3\n"), RecordingAcker::new(22, &h.log))
            .await;

        assert_eq!(outcome, Outcome::Ack);
        assert_eq!(*h.log.lock().unwrap(), vec![AckEvent::Ack(22)]);
        assert_eq!(h.reporter.verdicts.lock().unwrap()[0].result, ResultCode::Ce);
        assert_eq!(h.pool.available(), 1);
    }

    #[tokio::test]
    async fn test_work_accepts_and_acks() {
        let h = harness(vec![FakeRun::ok("3\n")]).await;

        let lease = h.pool.acquire().await.unwrap();
        let outcome = h
            .scheduler
            .clone()
            .work(lease, python_submission(11, "3\n"), RecordingAcker::new(11, &h.log))
            .await;

        assert_eq!(outcome, Outcome::Ack);
        assert_eq!(*h.log.lock().unwrap(), vec![AckEvent::Ack(11)]);

        let verdicts = h.reporter.verdicts.lock().unwrap();
        assert_eq!(verdicts.len(), 1);
        assert_eq!(verdicts[0].result, ResultCode::Ac);
        assert_eq!(verdicts[0].submission_id, Some(11));

        assert_eq!(*h.gateway.resets.lock().unwrap(), vec![0]);
        assert_eq!(h.pool.available(), 1);
    }

    #[tokio::test]
    async fn test_work_reports_wrong_answer() {
        let h = harness(vec![FakeRun::ok("4\n")]).await;

        let lease = h.pool.acquire().await.unwrap();
        let outcome = h
            .scheduler
            .clone()
            .work(lease, python_submission(12, "3\n"), RecordingAcker::new(12, &h.log))
            .await;

        assert_eq!(outcome, Outcome::Ack);
        assert_eq!(h.reporter.verdicts.lock().unwrap()[0].result, ResultCode::Wa);
    }

    #[tokio::test]
    async fn test_work_time_limit_from_meta() {
        let h = harness(vec![FakeRun::meta("killed:1\nstatus:TO\ntime:1.003\n")]).await;

        let lease = h.pool.acquire().await.unwrap();
        h.scheduler
            .clone()
            .work(lease, python_submission(13, "3\n"), RecordingAcker::new(13, &h.log))
            .await;

        let verdicts = h.reporter.verdicts.lock().unwrap();
        assert_eq!(verdicts[0].result, ResultCode::Tle);
        assert_eq!(verdicts[0].max_time, Some(1.003));
    }

    #[tokio::test]
    async fn test_work_unknown_language_is_ce_and_acked() {
        let h = harness(vec![]).await;

        let mut submission = python_submission(14, "3\n");
        submission.language = "cobol".into();

        let lease = h.pool.acquire().await.unwrap();
        let outcome = h
            .scheduler
            .clone()
            .work(lease, submission, RecordingAcker::new(14, &h.log))
            .await;

        assert_eq!(outcome, Outcome::Ack);
        assert_eq!(h.reporter.verdicts.lock().unwrap()[0].result, ResultCode::Ce);
        assert!(h.gateway.commands.lock().unwrap().is_empty());
        assert_eq!(h.pool.available(), 1);
    }

    #[tokio::test]
    async fn test_panic_is_requeued_and_slot_returned() {
        let gateway = Arc::new(PanickingGateway::new());
        let pool = WorkerPool::init(gateway.clone(), 1).await.unwrap();
        let reporter = Arc::new(RecordingReporter::default());
        let scheduler = Arc::new(Scheduler::new(reporter.clone()));
        let log = Arc::new(Mutex::new(Vec::new()));

        let lease = pool.acquire().await.unwrap();
        let outcome = scheduler
            .work(lease, python_submission(15, "3\n"), RecordingAcker::new(15, &log))
            .await;

        assert_eq!(outcome, Outcome::Requeue);
        assert_eq!(
            *log.lock().unwrap(),
            vec![AckEvent::Nack {
                tag: 15,
                requeue: true
            }]
        );
        assert!(reporter.verdicts.lock().unwrap().is_empty());
        assert_eq!(*gateway.inner.resets.lock().unwrap(), vec![0]);
        assert_eq!(pool.available(), 1);
    }
}
