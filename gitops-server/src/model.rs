//! Records the webhook pipeline reads from and writes to the store.

use gitops_core::advisor::EngineType;
use gitops_core::migration::MigrationKind;
use gitops_core::vcs::{OauthContext, PushEvent, TokenRefresher, VcsType};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Principal that owns everything the service does on its own behalf.
pub const SYSTEM_BOT_ID: i64 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RowStatus {
    #[default]
    Normal,
    Archived,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TenantMode {
    #[default]
    Disabled,
    Tenant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SchemaChangeType {
    #[default]
    Ddl,
    Sdl,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkflowType {
    #[default]
    Ui,
    Vcs,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub row_status: RowStatus,
    #[serde(default)]
    pub tenant_mode: TenantMode,
    #[serde(default)]
    pub db_name_template: String,
    #[serde(default)]
    pub schema_change_type: SchemaChangeType,
    #[serde(default)]
    pub workflow_type: WorkflowType,
}

impl Project {
    pub fn is_tenant(&self) -> bool {
        self.tenant_mode == TenantMode::Tenant
    }
}

/// A configured VCS instance and its OAuth application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Vcs {
    pub id: i64,
    #[serde(rename = "type")]
    pub vcs_type: VcsType,
    pub instance_url: String,
    #[serde(default)]
    pub application_id: String,
    #[serde(default)]
    pub secret: String,
}

/// Fields of a repository link as stored. Also the create payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RepositoryCreate {
    pub project_id: i64,
    pub vcs_id: i64,
    pub name: String,
    pub full_path: String,
    pub web_url: String,
    pub branch_filter: String,
    pub base_directory: String,
    pub file_path_template: String,
    pub schema_path_template: String,
    pub sheet_path_template: String,
    /// GitHub `owner/name` or GitLab project ID.
    pub external_id: String,
    pub external_webhook_id: String,
    pub webhook_endpoint_id: String,
    pub webhook_secret_token: String,
    #[serde(rename = "enableSQLReviewCI")]
    pub enable_sql_review_ci: bool,
    pub access_token: String,
    pub refresh_token: String,
    pub expires_ts: i64,
}

/// A local project linked to an external repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Repository {
    pub id: i64,
    pub project: Project,
    /// None until the VCS the link points at has been resolved.
    pub vcs: Option<Vcs>,
    pub name: String,
    pub full_path: String,
    pub web_url: String,
    pub branch_filter: String,
    pub base_directory: String,
    pub file_path_template: String,
    pub schema_path_template: String,
    pub sheet_path_template: String,
    pub external_id: String,
    pub external_webhook_id: String,
    pub webhook_endpoint_id: String,
    pub webhook_secret_token: String,
    pub enable_sql_review_ci: bool,
    pub access_token: String,
    pub refresh_token: String,
    pub expires_ts: i64,
}

impl Repository {
    pub fn from_parts(id: i64, fields: RepositoryCreate, project: Project, vcs: Option<Vcs>) -> Self {
        Self {
            id,
            project,
            vcs,
            name: fields.name,
            full_path: fields.full_path,
            web_url: fields.web_url,
            branch_filter: fields.branch_filter,
            base_directory: fields.base_directory,
            file_path_template: fields.file_path_template,
            schema_path_template: fields.schema_path_template,
            sheet_path_template: fields.sheet_path_template,
            external_id: fields.external_id,
            external_webhook_id: fields.external_webhook_id,
            webhook_endpoint_id: fields.webhook_endpoint_id,
            webhook_secret_token: fields.webhook_secret_token,
            enable_sql_review_ci: fields.enable_sql_review_ci,
            access_token: fields.access_token,
            refresh_token: fields.refresh_token,
            expires_ts: fields.expires_ts,
        }
    }

    /// OAuth context for provider calls made on behalf of this link.
    pub fn oauth_context(&self, refresher: Option<Arc<dyn TokenRefresher>>) -> OauthContext {
        let (client_id, client_secret) = self
            .vcs
            .as_ref()
            .map(|vcs| (vcs.application_id.clone(), vcs.secret.clone()))
            .unwrap_or_default();
        OauthContext {
            client_id,
            client_secret,
            access_token: self.access_token.clone(),
            refresh_token: self.refresh_token.clone(),
            refresher,
        }
    }

    /// Path relative to the base directory, as shown in issue descriptions.
    pub fn relative_path<'a>(&self, file: &'a str) -> &'a str {
        if self.base_directory.is_empty() {
            return file;
        }
        file.strip_prefix(&self.base_directory)
            .and_then(|rest| rest.strip_prefix('/'))
            .unwrap_or(file)
    }
}

/// Rotated OAuth token pair to persist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenPatch {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_ts: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Environment {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Instance {
    pub id: i64,
    pub engine: EngineType,
    pub environment: Environment,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Database {
    pub id: i64,
    pub name: String,
    pub project_id: i64,
    #[serde(default)]
    pub character_set: String,
    #[serde(default)]
    pub collation: String,
    pub instance: Instance,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    PendingApproval,
    Pending,
    Running,
    Done,
    Failed,
    Canceled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskType {
    #[serde(rename = "bb.task.database.schema.update")]
    SchemaUpdate,
    #[serde(rename = "bb.task.database.schema.update-sdl")]
    SchemaUpdateSdl,
    #[serde(rename = "bb.task.database.data.update")]
    DataUpdate,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: i64,
    pub pipeline_id: i64,
    pub database_id: Option<i64>,
    pub status: TaskStatus,
    #[serde(rename = "type")]
    pub task_type: TaskType,
    #[serde(default)]
    pub schema_version: String,
    #[serde(default)]
    pub statement: String,
}

#[derive(Debug, Clone, Default)]
pub struct TaskFind {
    pub database_id: Option<i64>,
    pub status_list: Vec<TaskStatus>,
    pub type_list: Vec<TaskType>,
    pub schema_version: Option<String>,
}

impl TaskFind {
    pub fn matches(&self, task: &Task) -> bool {
        self.database_id.map_or(true, |id| task.database_id == Some(id))
            && (self.status_list.is_empty() || self.status_list.contains(&task.status))
            && (self.type_list.is_empty() || self.type_list.contains(&task.task_type))
            && self
                .schema_version
                .as_ref()
                .map_or(true, |v| &task.schema_version == v)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskPatch {
    pub id: i64,
    pub updater_id: i64,
    pub statement: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IssueType {
    #[serde(rename = "bb.issue.database.schema.update")]
    SchemaUpdate,
    #[serde(rename = "bb.issue.database.data.update")]
    DataUpdate,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Issue {
    pub id: i64,
    pub name: String,
    pub project_id: i64,
    pub pipeline_id: i64,
}

/// One database's worth of work inside a migration issue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationDetail {
    pub migration_type: MigrationKind,
    /// Set outside tenant mode.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_id: Option<i64>,
    /// Set in tenant mode, where the database is resolved at deploy time.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub database_name: String,
    pub statement: String,
    #[serde(default)]
    pub schema_version: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationContext {
    pub vcs_push_event: PushEvent,
    pub detail_list: Vec<MigrationDetail>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssueCreate {
    pub creator_id: i64,
    pub project_id: i64,
    pub name: String,
    pub issue_type: IssueType,
    pub description: String,
    pub assignee_id: i64,
    pub assignee_need_attention: bool,
    /// JSON-encoded `MigrationContext`.
    pub create_context: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ActivityLevel {
    Info,
    Warn,
}

pub const ACTIVITY_PROJECT_REPOSITORY_PUSH: &str = "bb.project.repository.push";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepositoryPushPayload {
    pub push_event: PushEvent,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issue_id: Option<i64>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub issue_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivityCreate {
    pub creator_id: i64,
    pub container_id: i64,
    pub activity_type: &'static str,
    pub level: ActivityLevel,
    pub comment: String,
    /// JSON-encoded `RepositoryPushPayload`.
    pub payload: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SheetSource {
    GitlabSelfHost,
    GithubCom,
}

impl From<VcsType> for SheetSource {
    fn from(vcs_type: VcsType) -> Self {
        match vcs_type {
            VcsType::GitLabSelfHost => SheetSource::GitlabSelfHost,
            VcsType::GitHubCom => SheetSource::GithubCom,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SheetType {
    Sql,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SheetVcsPayload {
    pub file_name: String,
    pub file_path: String,
    pub size: i64,
    pub author: String,
    pub last_commit_id: String,
    pub last_sync_ts: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sheet {
    pub id: i64,
    pub project_id: i64,
    pub creator_id: i64,
    pub name: String,
    pub statement: String,
    pub source: SheetSource,
    #[serde(rename = "type")]
    pub sheet_type: SheetType,
    pub database_id: Option<i64>,
    pub payload: SheetVcsPayload,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SheetFind {
    pub name: String,
    pub project_id: i64,
    pub source: SheetSource,
    pub sheet_type: SheetType,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SheetCreate {
    pub project_id: i64,
    pub creator_id: i64,
    pub name: String,
    pub statement: String,
    pub source: SheetSource,
    pub sheet_type: SheetType,
    pub database_id: Option<i64>,
    pub payload: SheetVcsPayload,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SheetPatch {
    pub id: i64,
    pub updater_id: i64,
    pub statement: String,
    pub database_id: Option<i64>,
    pub payload: SheetVcsPayload,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Principal {
    pub id: i64,
    pub name: String,
    pub email: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repository(base_directory: &str) -> Repository {
        Repository::from_parts(
            1,
            RepositoryCreate {
                base_directory: base_directory.to_string(),
                ..Default::default()
            },
            Project {
                id: 1,
                name: "p".to_string(),
                row_status: RowStatus::Normal,
                tenant_mode: TenantMode::Disabled,
                db_name_template: String::new(),
                schema_change_type: SchemaChangeType::Ddl,
                workflow_type: WorkflowType::Vcs,
            },
            None,
        )
    }

    #[test]
    fn test_relative_path() {
        assert_eq!(repository("bytebase").relative_path("bytebase/v1__db.sql"), "v1__db.sql");
        assert_eq!(repository("").relative_path("v1__db.sql"), "v1__db.sql");
        assert_eq!(repository("other").relative_path("bytebase/v1.sql"), "bytebase/v1.sql");
    }

    #[test]
    fn test_task_find_matches() {
        let task = Task {
            id: 1,
            pipeline_id: 10,
            database_id: Some(7),
            status: TaskStatus::Failed,
            task_type: TaskType::SchemaUpdate,
            schema_version: "v2".to_string(),
            statement: String::new(),
        };
        let find = TaskFind {
            database_id: Some(7),
            status_list: vec![TaskStatus::PendingApproval, TaskStatus::Failed],
            type_list: vec![TaskType::SchemaUpdate, TaskType::DataUpdate],
            schema_version: Some("v2".to_string()),
        };
        assert!(find.matches(&task));
        assert!(!TaskFind {
            schema_version: Some("v3".to_string()),
            ..find.clone()
        }
        .matches(&task));
        assert!(!TaskFind {
            database_id: Some(8),
            ..find
        }
        .matches(&task));
    }

    #[test]
    fn test_migration_detail_serialization() {
        let detail = MigrationDetail {
            migration_type: MigrationKind::Migrate,
            database_id: Some(3),
            database_name: String::new(),
            statement: "ALTER TABLE t ADD c int".to_string(),
            schema_version: "v2".to_string(),
        };
        let value = serde_json::to_value(&detail).unwrap();
        assert_eq!(value["migrationType"], "MIGRATE");
        assert_eq!(value["databaseId"], 3);
        assert!(value.get("databaseName").is_none());
    }
}
