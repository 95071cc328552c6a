//! C (gnu11)

use async_trait::async_trait;

use super::{compile_native, run_testcases, write_source, CompileError, LanguageRunner, BINARY_NAME};
use crate::core::{Submission, Verdict};
use crate::sandbox::SandboxGateway;

const SOURCE_FILE: &str = "main.c";
const FLAGS: &[&str] = &["-std=gnu11", "-O2", "-pipe", "-s"];

pub struct C;

#[async_trait]
impl LanguageRunner for C {
    async fn compile(
        &self,
        gateway: &dyn SandboxGateway,
        slot: u32,
        submission: &Submission,
    ) -> Result<(), CompileError> {
        let work_dir = gateway.work_dir(slot);
        write_source(&work_dir, SOURCE_FILE, &submission.source_code).await?;
        compile_native(&work_dir, submission, "gcc", FLAGS, SOURCE_FILE).await
    }

    async fn run(
        &self,
        gateway: &dyn SandboxGateway,
        slot: u32,
        submission: &Submission,
    ) -> Verdict {
        let binary = format!("./{}", BINARY_NAME);
        run_testcases(gateway, slot, submission, &[binary.as_str()]).await
    }
}
