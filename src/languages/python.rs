//! Python 3, interpreted: compile only writes the script

use async_trait::async_trait;

use super::{run_testcases, write_source, CompileError, LanguageRunner};
use crate::core::{Submission, Verdict};
use crate::sandbox::SandboxGateway;

const SOURCE_FILE: &str = "main.py";
const INTERPRETER: &str = "/usr/bin/python3";

pub struct Python;

#[async_trait]
impl LanguageRunner for Python {
    async fn compile(
        &self,
        gateway: &dyn SandboxGateway,
        slot: u32,
        submission: &Submission,
    ) -> Result<(), CompileError> {
        write_source(&gateway.work_dir(slot), SOURCE_FILE, &submission.source_code).await?;
        Ok(())
    }

    async fn run(
        &self,
        gateway: &dyn SandboxGateway,
        slot: u32,
        submission: &Submission,
    ) -> Verdict {
        run_testcases(gateway, slot, submission, &[INTERPRETER, SOURCE_FILE]).await
    }
}
