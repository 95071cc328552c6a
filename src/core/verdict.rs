use serde::{Deserialize, Serialize};
use std::fmt;

use super::submission::Submission;

/// Result code of a graded submission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultCode {
    Ac,
    Wa,
    Tle,
    Mle,
    Re,
    Ce,
    Ie,
}

impl ResultCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResultCode::Ac => "ac",
            ResultCode::Wa => "wa",
            ResultCode::Tle => "tle",
            ResultCode::Mle => "mle",
            ResultCode::Re => "re",
            ResultCode::Ce => "ce",
            ResultCode::Ie => "ie",
        }
    }

    pub fn is_accepted(&self) -> bool {
        matches!(self, ResultCode::Ac)
    }
}

impl fmt::Display for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Final classification of one submission
#[derive(Debug, Clone, PartialEq)]
pub struct Verdict {
    pub submission_id: Option<i64>,
    pub problem_id: Option<i64>,
    pub result: ResultCode,
    /// Maximum CPU time across executed testcases, in seconds
    pub max_time: Option<f64>,
    /// Maximum resident memory across executed testcases, in KB
    pub max_memory: Option<f64>,
}

impl Verdict {
    /// Verdict produced without running anything (compile error, bad submission)
    pub fn without_run(submission: &Submission, result: ResultCode) -> Self {
        Self {
            submission_id: submission.submission_id,
            problem_id: submission.problem_id,
            result,
            max_time: None,
            max_memory: None,
        }
    }

    pub fn compile_error(submission: &Submission) -> Self {
        Self::without_run(submission, ResultCode::Ce)
    }

    pub fn with_usage(
        submission: &Submission,
        result: ResultCode,
        max_time: f64,
        max_memory: f64,
    ) -> Self {
        Self {
            submission_id: submission.submission_id,
            problem_id: submission.problem_id,
            result,
            max_time: Some(max_time),
            max_memory: Some(max_memory),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_code_display() {
        assert_eq!(ResultCode::Ac.to_string(), "ac");
        assert_eq!(ResultCode::Tle.to_string(), "tle");
        assert_eq!(ResultCode::Ie.to_string(), "ie");
    }

    #[test]
    fn test_result_code_serde() {
        let json = serde_json::to_string(&ResultCode::Mle).unwrap();
        assert_eq!(json, "\"mle\"");
        let parsed: ResultCode = serde_json::from_str("\"wa\"").unwrap();
        assert_eq!(parsed, ResultCode::Wa);
    }

    #[test]
    fn test_compile_error_has_no_usage() {
        let submission = Submission {
            submission_id: Some(7),
            problem_id: Some(3),
            ..Default::default()
        };
        let verdict = Verdict::compile_error(&submission);
        assert_eq!(verdict.result, ResultCode::Ce);
        assert_eq!(verdict.submission_id, Some(7));
        assert!(verdict.max_time.is_none());
        assert!(verdict.max_memory.is_none());
    }
}
