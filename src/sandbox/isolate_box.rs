//! Isolate box management
//!
//! Thin wrapper around the isolate CLI. Each worker slot maps to one box id;
//! the box directory under the isolate root is owned by whoever holds the slot.

use std::path::PathBuf;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

use super::META_FILE;

/// Resource limits for one sandboxed run
#[derive(Debug, Clone, PartialEq)]
pub struct Limits {
    /// CPU time limit in seconds
    pub time_secs: f64,
    /// Wall clock limit in seconds
    pub wall_time_secs: f64,
    /// Memory limit in KB
    pub memory_kb: u64,
    /// Maximum size of files the program may write, in KB
    pub fsize_kb: u64,
}

/// Command-line contract with the external sandbox
#[async_trait]
pub trait SandboxGateway: Send + Sync {
    /// Working directory of the slot (the box's `box/` subdirectory)
    fn work_dir(&self, slot: u32) -> PathBuf;

    /// Initialize the slot. Idempotent; also wipes previous contents.
    async fn init(&self, slot: u32) -> Result<()>;

    /// Bring the slot back to its initial state
    async fn reset(&self, slot: u32) -> Result<()> {
        self.init(slot).await
    }

    /// Run `command` inside the slot with stdin/stdout redirected to the
    /// fixed testcase files and the meta file written to the work dir.
    /// A non-zero sandbox exit is not an error; the meta file describes it.
    async fn run(&self, slot: u32, limits: &Limits, command: &[&str]) -> Result<()>;
}

/// Gateway backed by the `isolate` binary
#[derive(Debug, Clone)]
pub struct IsolateGateway {
    root: PathBuf,
    use_cgroups: bool,
}

impl IsolateGateway {
    pub fn new(root: impl Into<PathBuf>, use_cgroups: bool) -> Self {
        Self {
            root: root.into(),
            use_cgroups,
        }
    }

    fn run_args(&self, slot: u32, limits: &Limits, command: &[&str]) -> Vec<String> {
        let meta_path = self.work_dir(slot).join(META_FILE);

        let mut args = vec![
            format!("--box-id={}", slot),
            format!("--stdin={}", super::INPUT_FILE),
            format!("--stdout={}", super::OUTPUT_FILE),
            format!("--time={:.3}", limits.time_secs),
            format!("--wall-time={:.3}", limits.wall_time_secs),
            format!("--fsize={}", limits.fsize_kb),
        ];

        if self.use_cgroups {
            args.push("--cg".to_string());
            args.push(format!("--cg-mem={}", limits.memory_kb));
        } else {
            args.push(format!("--mem={}", limits.memory_kb));
        }

        args.push(format!("--meta={}", meta_path.display()));
        args.push("--run".to_string());
        args.push("--".to_string());
        args.extend(command.iter().map(|s| s.to_string()));
        args
    }
}

#[async_trait]
impl SandboxGateway for IsolateGateway {
    fn work_dir(&self, slot: u32) -> PathBuf {
        self.root.join(slot.to_string()).join("box")
    }

    async fn init(&self, slot: u32) -> Result<()> {
        let box_id = format!("--box-id={}", slot);
        let mut args = vec![box_id.as_str()];
        if self.use_cgroups {
            args.push("--cg");
        }
        args.push("--init");

        let output = Command::new("isolate")
            .args(&args)
            .output()
            .await
            .context("Failed to run isolate --init")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("Failed to initialize isolate box {}: {}", slot, stderr.trim());
        }

        info!(
            "Initialized isolate box {} at {} (cgroups: {})",
            slot,
            String::from_utf8_lossy(&output.stdout).trim(),
            self.use_cgroups
        );
        Ok(())
    }

    async fn run(&self, slot: u32, limits: &Limits, command: &[&str]) -> Result<()> {
        let args = self.run_args(slot, limits, command);
        debug!("Running isolate with args: {:?}", args);

        let status = Command::new("isolate")
            .args(&args)
            .kill_on_drop(true)
            .status()
            .await
            .context("Failed to run isolate")?;

        if !status.success() {
            debug!("isolate exited with {} for box {}", status, slot);
        }
        Ok(())
    }
}
