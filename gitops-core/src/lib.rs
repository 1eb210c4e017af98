pub mod advisor;
pub mod migration;
pub mod report;
pub mod template;
pub mod vcs;

pub use advisor::{Advice, AdviceCode, AdviceStatus, SqlReviewer};
pub use migration::{MigrationInfo, MigrationKind};
pub use report::SqlReviewResult;
pub use vcs::{PushEvent, VcsError, VcsProvider, VcsType};
