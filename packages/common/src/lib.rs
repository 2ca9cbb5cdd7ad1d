pub mod bundles;
pub mod commits;
pub mod events;
pub mod problems;
pub mod report;
pub mod signature;
pub mod users;

pub use bundles::{CommitBundle, DaycareRequest, DaycareResponse, ProblemBundle, ProblemSetBundle};
pub use commits::{Commit, TRANSCRIPT_DATA_LIMIT, TRANSCRIPT_EVENT_COUNT_LIMIT};
pub use events::{EventKind, EventMessage};
pub use problems::{
    FileMap, NormalizeError, Problem, ProblemSet, ProblemSetProblem, ProblemStep, ProblemType,
    ProblemTypeAction, Whitelist,
};
pub use report::{Outcome, ReportCard, ReportCardResult};
pub use users::{Assignment, Course, User};
