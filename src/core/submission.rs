use serde::{Deserialize, Serialize};

/// Default tolerance for the float checker
pub const DEFAULT_FLOAT_PRECISION: f64 = 1e-6;

/// Single testcase shipped with a submission
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Testcase {
    #[serde(default)]
    pub input: String,
    #[serde(default)]
    pub expected_output: String,
}

/// Submission received from the queue or the run endpoint
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Submission {
    #[serde(default)]
    pub submission_id: Option<i64>,
    #[serde(default)]
    pub problem_id: Option<i64>,
    #[serde(default)]
    pub language: String,
    #[serde(default)]
    pub source_code: String,
    #[serde(default)]
    pub testcases: Vec<Testcase>,
    /// Seconds, fractional
    #[serde(default)]
    pub time_limit: f64,
    /// MB; converted to KB for the sandbox
    #[serde(default)]
    pub memory_limit: f64,
    #[serde(default)]
    pub checker_type: String,
    #[serde(default)]
    pub checker_strict_space: bool,
    #[serde(default)]
    pub checker_precision: Option<String>,
}

/// Output comparison policy
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CheckerMode {
    Exact { strict_space: bool },
    /// Whitespace-insensitive in both spacing modes
    Float { epsilon: f64 },
}

impl Submission {
    pub fn id_for_log(&self) -> i64 {
        self.submission_id.unwrap_or(0)
    }

    pub fn checker_mode(&self) -> CheckerMode {
        let strict_space = self.checker_strict_space;
        match self.checker_type.as_str() {
            "float" => CheckerMode::Float {
                epsilon: parse_precision(self.checker_precision.as_deref()),
            },
            _ => CheckerMode::Exact { strict_space },
        }
    }

    /// Memory limit handed to isolate, in KB
    pub fn memory_limit_kb(&self) -> u64 {
        (self.memory_limit * 1024.0).max(0.0) as u64
    }
}

fn parse_precision(raw: Option<&str>) -> f64 {
    match raw.map(str::trim).and_then(|s| s.parse::<f64>().ok()) {
        Some(eps) if eps.is_finite() && eps > 0.0 => eps,
        _ => DEFAULT_FLOAT_PRECISION,
    }
}
