//! Sandbox module - Low-level isolate wrapper
//!
//! This module provides a minimal abstraction over the isolate sandbox.
//! It handles:
//! - Slot initialization and reset
//! - Running a command with limits inside a slot
//! - Parsing the meta file isolate leaves behind
//!
//! The sandbox module does NOT:
//! - Interpret verdicts (that's the checker's job)
//! - Know about languages or compilation

pub mod isolate_box;
pub mod meta;

pub use isolate_box::{IsolateGateway, Limits, SandboxGateway};
pub use meta::{IsolateMeta, IsolateStatus};

/// Testcase input, relative to the slot work dir
pub const INPUT_FILE: &str = "in.txt";
/// Program stdout
pub const OUTPUT_FILE: &str = "out.txt";
/// Expected output for the current testcase
pub const EXPECTED_FILE: &str = "expOut.txt";
/// Resource usage record written by isolate
pub const META_FILE: &str = "meta.txt";
