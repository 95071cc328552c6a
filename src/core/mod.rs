pub mod submission;
pub mod verdict;

pub use submission::{CheckerMode, Submission, Testcase};
pub use verdict::{ResultCode, Verdict};
