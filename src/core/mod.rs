pub mod submission;
pub mod utils;
pub mod verdict;

pub use submission::{Submission, SubmissionMeta};
pub use verdict::{Adjustment, CaseVerdict, Verdict};
