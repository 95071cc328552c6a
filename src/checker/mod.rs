//! Checker module - verdict classification
//!
//! Turns the artifacts of one sandboxed run (meta file, program output,
//! expected output) into a result code. Resource-limit outcomes are read from
//! the meta file first; only a clean run reaches output comparison.

pub mod exact;
pub mod float;

use std::path::Path;

use tracing::{debug, warn};

use crate::core::{CheckerMode, ResultCode};
use crate::sandbox::{IsolateMeta, IsolateStatus, EXPECTED_FILE, META_FILE, OUTPUT_FILE};

/// Running maxima across the testcases of one submission
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Usage {
    /// Seconds
    pub max_time: f64,
    /// KB
    pub max_memory: f64,
}

impl Usage {
    pub fn record(&mut self, meta: &IsolateMeta) {
        self.max_time = self.max_time.max(meta.time);
        self.max_memory = self.max_memory.max(meta.max_rss);
    }
}

/// Classify a run from its meta record alone.
///
/// Returns `None` when the program ran to completion and its output has to be
/// compared. Order matters: OOM kill, sandbox kill on timeout, status code,
/// then exit code.
pub fn classify(meta: &IsolateMeta) -> Option<ResultCode> {
    if meta.oom_killed {
        return Some(ResultCode::Mle);
    }

    if meta.killed && meta.status == Some(IsolateStatus::TimedOut) {
        return Some(ResultCode::Tle);
    }

    match &meta.status {
        Some(IsolateStatus::RuntimeError) | Some(IsolateStatus::Signaled) => {
            return Some(ResultCode::Re)
        }
        Some(IsolateStatus::TimedOut) => return Some(ResultCode::Tle),
        Some(IsolateStatus::InternalError) => return Some(ResultCode::Ie),
        Some(IsolateStatus::Other(status)) => {
            debug!("Unclassified isolate status {:?}, falling through", status);
        }
        None => {}
    }

    if meta.status.is_none() && meta.exit_code != 0 {
        return Some(ResultCode::Re);
    }

    None
}

/// Evaluate the testcase that just ran in `work_dir`.
///
/// `usage` is updated from the meta record before any classification.
pub async fn evaluate(work_dir: &Path, mode: CheckerMode, usage: &mut Usage) -> ResultCode {
    let meta = match IsolateMeta::read(&work_dir.join(META_FILE)).await {
        Ok(meta) => meta,
        Err(e) => {
            warn!("{:#}", e);
            return ResultCode::Ie;
        }
    };

    usage.record(&meta);
    debug!(
        "Run meta: status={:?} exitcode={} exitsig={} time={}s wall={}s rss={}KB cg_mem={}KB csw={}/{} message={:?}",
        meta.status,
        meta.exit_code,
        meta.exit_signal,
        meta.time,
        meta.wall_time,
        meta.max_rss,
        meta.cg_mem,
        meta.csw_voluntary,
        meta.csw_forced,
        meta.message
    );

    if let Some(result) = classify(&meta) {
        return result;
    }

    let output_path = work_dir.join(OUTPUT_FILE);
    let expected_path = work_dir.join(EXPECTED_FILE);

    let output = match tokio::fs::read(&output_path).await {
        Ok(data) => data,
        Err(e) => {
            warn!("Output file {} unavailable: {}", output_path.display(), e);
            return ResultCode::Ie;
        }
    };
    let expected = match tokio::fs::read(&expected_path).await {
        Ok(data) => data,
        Err(e) => {
            warn!(
                "Expected output file {} unavailable: {}",
                expected_path.display(),
                e
            );
            return ResultCode::Ie;
        }
    };

    let matched = match mode {
        CheckerMode::Exact { strict_space } => exact::compare(&output, &expected, strict_space),
        CheckerMode::Float { epsilon } => float::compare(&output, &expected, epsilon),
    };

    if matched {
        ResultCode::Ac
    } else {
        ResultCode::Wa
    }
}
