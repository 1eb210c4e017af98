//! Persistence and side-effect seams the webhook pipeline runs against.
//!
//! The relational store, the issue engine, the activity feed and the
//! database driver layer all live outside this service. These traits are
//! what the pipeline needs from them; `InMemoryStore` implements all four
//! so the binary can run standalone and tests can inspect side effects.

mod memory;

pub use memory::{InMemoryStore, StoreSeed};

use async_trait::async_trait;
use gitops_core::advisor::{Catalog, ReadOnlyConnection, SqlReviewPolicy};

use crate::model::{
    ActivityCreate, Database, Issue, IssueCreate, Principal, Project, Repository, RepositoryCreate,
    Sheet, SheetCreate, SheetFind, SheetPatch, Task, TaskFind, TaskPatch, TokenPatch, Vcs,
};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("store error: {0}")]
    Internal(String),
}

#[async_trait]
pub trait Store: Send + Sync {
    /// All links sharing a webhook endpoint, in creation order.
    async fn find_repositories_by_endpoint(&self, endpoint_id: &str) -> Result<Vec<Repository>, StoreError>;

    async fn find_repositories_by_web_url(&self, web_url: &str) -> Result<Vec<Repository>, StoreError>;

    async fn get_repository_by_project(&self, project_id: i64) -> Result<Option<Repository>, StoreError>;

    /// Fails with `Conflict` when the project already has a link.
    async fn create_repository(&self, create: RepositoryCreate) -> Result<Repository, StoreError>;

    /// Store a rotated token pair on every link to `web_url`.
    async fn patch_repository_tokens(&self, web_url: &str, patch: &TokenPatch) -> Result<(), StoreError>;

    async fn get_project(&self, project_id: i64) -> Result<Option<Project>, StoreError>;

    async fn get_vcs(&self, vcs_id: i64) -> Result<Option<Vcs>, StoreError>;

    async fn find_databases(&self, project_id: i64, name: &str) -> Result<Vec<Database>, StoreError>;

    /// The active SQL review policy attached to an environment, if any.
    async fn get_sql_review_policy(&self, environment_id: i64) -> Result<Option<SqlReviewPolicy>, StoreError>;

    async fn get_catalog(&self, database: &Database) -> Result<Catalog, StoreError>;

    async fn find_tasks(&self, find: &TaskFind) -> Result<Vec<Task>, StoreError>;

    async fn get_issue_by_pipeline(&self, pipeline_id: i64) -> Result<Option<Issue>, StoreError>;

    async fn get_principal_by_email(&self, email: &str) -> Result<Option<Principal>, StoreError>;

    async fn get_sheet(&self, find: &SheetFind) -> Result<Option<Sheet>, StoreError>;

    async fn create_sheet(&self, create: SheetCreate) -> Result<Sheet, StoreError>;

    async fn patch_sheet(&self, patch: SheetPatch) -> Result<Sheet, StoreError>;
}

#[async_trait]
pub trait IssueService: Send + Sync {
    async fn create_issue(&self, create: IssueCreate) -> Result<Issue, StoreError>;

    async fn patch_task(&self, task: &Task, patch: TaskPatch, issue: &Issue) -> Result<Task, StoreError>;
}

#[async_trait]
pub trait ActivityService: Send + Sync {
    async fn create_activity(&self, create: ActivityCreate) -> Result<i64, StoreError>;
}

/// Opens read-only connections for SQL review rules that inspect live data.
#[async_trait]
pub trait DriverFactory: Send + Sync {
    async fn open_read_only(&self, database: &Database) -> Result<Box<dyn ReadOnlyConnection>, StoreError>;
}
