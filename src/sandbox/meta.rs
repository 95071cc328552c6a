//! Isolate meta file parser
//!
//! Parses the `key:value` meta file isolate writes after each run.

use std::path::Path;

use anyhow::{Context, Result};

/// Status code reported by isolate when the run did not end cleanly
#[derive(Debug, Clone, PartialEq)]
pub enum IsolateStatus {
    /// `RE`: non-zero exit
    RuntimeError,
    /// `SG`: killed by a signal
    Signaled,
    /// `TO`: time limit hit
    TimedOut,
    /// `XX`: isolate internal error
    InternalError,
    /// Anything else isolate might emit
    Other(String),
}

impl IsolateStatus {
    fn parse(value: &str) -> Option<Self> {
        match value {
            "" => None,
            "RE" => Some(Self::RuntimeError),
            "SG" => Some(Self::Signaled),
            "TO" => Some(Self::TimedOut),
            "XX" => Some(Self::InternalError),
            other => Some(Self::Other(other.to_string())),
        }
    }
}

/// Parsed isolate meta file contents
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IsolateMeta {
    pub status: Option<IsolateStatus>,
    pub message: String,
    /// Program was killed by the sandbox
    pub killed: bool,
    pub exit_code: i32,
    pub exit_signal: i32,
    /// CPU time in seconds
    pub time: f64,
    /// Wall clock time in seconds
    pub wall_time: f64,
    /// Max resident set size in KB
    pub max_rss: f64,
    /// Cgroup memory peak in KB
    pub cg_mem: f64,
    pub oom_killed: bool,
    pub csw_voluntary: u64,
    pub csw_forced: u64,
}

impl IsolateMeta {
    /// Read and parse a meta file
    pub async fn read(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read meta file {}", path.display()))?;
        Ok(parse_meta(&content))
    }
}

/// Parse isolate meta file content. Unknown keys and unparsable numbers are ignored.
pub fn parse_meta(content: &str) -> IsolateMeta {
    let mut meta = IsolateMeta::default();

    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();

        match key.trim() {
            "status" => meta.status = IsolateStatus::parse(value),
            "message" => meta.message = value.to_string(),
            "killed" => {
                if let Ok(v) = value.parse::<i32>() {
                    meta.killed = v != 0;
                }
            }
            "exitcode" => {
                if let Ok(v) = value.parse() {
                    meta.exit_code = v;
                }
            }
            "exitsig" => {
                if let Ok(v) = value.parse() {
                    meta.exit_signal = v;
                }
            }
            "time" => {
                if let Ok(v) = value.parse() {
                    meta.time = v;
                }
            }
            "time-wall" => {
                if let Ok(v) = value.parse() {
                    meta.wall_time = v;
                }
            }
            "max-rss" => {
                if let Ok(v) = value.parse() {
                    meta.max_rss = v;
                }
            }
            "cg-mem" => {
                if let Ok(v) = value.parse() {
                    meta.cg_mem = v;
                }
            }
            "cg-oom-killed" => {
                if let Ok(v) = value.parse::<i32>() {
                    meta.oom_killed = v != 0;
                }
            }
            "csw-voluntary" => {
                if let Ok(v) = value.parse() {
                    meta.csw_voluntary = v;
                }
            }
            "csw-forced" => {
                if let Ok(v) = value.parse() {
                    meta.csw_forced = v;
                }
            }
            _ => {}
        }
    }

    meta
}
