//! In-memory implementation of the store seams.
//!
//! All state is held in memory and lost on restart. The initial contents can
//! be loaded from a JSON seed file.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use gitops_core::advisor::{AdvisorError, Catalog, ReadOnlyConnection, SqlReviewPolicy, TableMeta};
use serde::Deserialize;
use tokio::sync::RwLock;

use super::{ActivityService, DriverFactory, IssueService, Store, StoreError};
use crate::model::{
    ActivityCreate, Database, Issue, IssueCreate, Principal, Project, Repository, RepositoryCreate,
    Sheet, SheetCreate, SheetFind, SheetPatch, Task, TaskFind, TaskPatch, TokenPatch, Vcs,
};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepositorySeed {
    pub id: i64,
    #[serde(flatten)]
    pub fields: RepositoryCreate,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvironmentPolicySeed {
    pub environment_id: i64,
    #[serde(flatten)]
    pub policy: SqlReviewPolicy,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogSeed {
    pub database_id: i64,
    #[serde(default)]
    pub tables: Vec<TableMeta>,
}

/// Initial store contents.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StoreSeed {
    pub projects: Vec<Project>,
    pub vcs: Vec<Vcs>,
    pub repositories: Vec<RepositorySeed>,
    pub databases: Vec<Database>,
    pub sql_review_policies: Vec<EnvironmentPolicySeed>,
    pub catalogs: Vec<CatalogSeed>,
    pub tasks: Vec<Task>,
    pub issues: Vec<Issue>,
    pub principals: Vec<Principal>,
    pub sheets: Vec<Sheet>,
}

impl StoreSeed {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read store seed {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse store seed {}", path.display()))
    }
}

#[derive(Default)]
struct StoreData {
    projects: HashMap<i64, Project>,
    vcs: HashMap<i64, Vcs>,
    repositories: Vec<(i64, RepositoryCreate)>,
    databases: Vec<Database>,
    policies: HashMap<i64, SqlReviewPolicy>,
    catalogs: HashMap<i64, Vec<TableMeta>>,
    tasks: Vec<Task>,
    issues: Vec<Issue>,
    principals: Vec<Principal>,
    sheets: Vec<Sheet>,
    issue_creates: Vec<IssueCreate>,
    activities: Vec<ActivityCreate>,
}

impl StoreData {
    fn assemble(&self, id: i64, fields: &RepositoryCreate) -> Result<Repository, StoreError> {
        let project = self
            .projects
            .get(&fields.project_id)
            .cloned()
            .ok_or_else(|| StoreError::Internal(format!("repository {} references missing project {}", id, fields.project_id)))?;
        let vcs = self.vcs.get(&fields.vcs_id).cloned();
        Ok(Repository::from_parts(id, fields.clone(), project, vcs))
    }

    fn find_repositories<F>(&self, predicate: F) -> Result<Vec<Repository>, StoreError>
    where
        F: Fn(&RepositoryCreate) -> bool,
    {
        self.repositories
            .iter()
            .filter(|(_, fields)| predicate(fields))
            .map(|(id, fields)| self.assemble(*id, fields))
            .collect()
    }
}

/// In-memory store, issue engine, activity feed and driver factory.
pub struct InMemoryStore {
    data: RwLock<StoreData>,
    next_id: AtomicI64,
    open_connections: Arc<AtomicUsize>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::from_seed(StoreSeed::default())
    }

    pub fn from_seed(seed: StoreSeed) -> Self {
        let mut max_id = 0;
        let mut track = |id: i64| max_id = max_id.max(id);

        let data = StoreData {
            projects: seed.projects.into_iter().inspect(|p| track(p.id)).map(|p| (p.id, p)).collect(),
            vcs: seed.vcs.into_iter().inspect(|v| track(v.id)).map(|v| (v.id, v)).collect(),
            repositories: seed
                .repositories
                .into_iter()
                .inspect(|r| track(r.id))
                .map(|r| (r.id, r.fields))
                .collect(),
            databases: seed.databases.into_iter().inspect(|d| track(d.id)).collect(),
            policies: seed
                .sql_review_policies
                .into_iter()
                .map(|p| (p.environment_id, p.policy))
                .collect(),
            catalogs: seed.catalogs.into_iter().map(|c| (c.database_id, c.tables)).collect(),
            tasks: seed.tasks.into_iter().inspect(|t| track(t.id.max(t.pipeline_id))).collect(),
            issues: seed.issues.into_iter().inspect(|i| track(i.id.max(i.pipeline_id))).collect(),
            principals: seed.principals.into_iter().inspect(|p| track(p.id)).collect(),
            sheets: seed.sheets.into_iter().inspect(|s| track(s.id)).collect(),
            issue_creates: Vec::new(),
            activities: Vec::new(),
        };

        Self {
            data: RwLock::new(data),
            next_id: AtomicI64::new(max_id + 1),
            open_connections: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn allocate_id(&self) -> i64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Issue create requests received so far, in order.
    pub async fn created_issues(&self) -> Vec<IssueCreate> {
        self.data.read().await.issue_creates.clone()
    }

    pub async fn activities(&self) -> Vec<ActivityCreate> {
        self.data.read().await.activities.clone()
    }

    pub async fn tasks(&self) -> Vec<Task> {
        self.data.read().await.tasks.clone()
    }

    pub async fn sheets(&self) -> Vec<Sheet> {
        self.data.read().await.sheets.clone()
    }

    pub async fn repositories(&self) -> Vec<Repository> {
        let data = self.data.read().await;
        data.find_repositories(|_| true).unwrap_or_default()
    }

    /// Read-only connections opened and not yet closed.
    pub fn open_connection_count(&self) -> usize {
        self.open_connections.load(Ordering::SeqCst)
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn find_repositories_by_endpoint(&self, endpoint_id: &str) -> Result<Vec<Repository>, StoreError> {
        let data = self.data.read().await;
        data.find_repositories(|r| r.webhook_endpoint_id == endpoint_id)
    }

    async fn find_repositories_by_web_url(&self, web_url: &str) -> Result<Vec<Repository>, StoreError> {
        let data = self.data.read().await;
        data.find_repositories(|r| r.web_url == web_url)
    }

    async fn get_repository_by_project(&self, project_id: i64) -> Result<Option<Repository>, StoreError> {
        let data = self.data.read().await;
        Ok(data
            .find_repositories(|r| r.project_id == project_id)?
            .into_iter()
            .next())
    }

    async fn create_repository(&self, create: RepositoryCreate) -> Result<Repository, StoreError> {
        let mut data = self.data.write().await;
        if data.repositories.iter().any(|(_, r)| r.project_id == create.project_id) {
            return Err(StoreError::Conflict(format!(
                "project {} has already linked repository",
                create.project_id
            )));
        }
        if !data.projects.contains_key(&create.project_id) {
            return Err(StoreError::NotFound(format!("project {}", create.project_id)));
        }

        let id = self.allocate_id();
        data.repositories.push((id, create.clone()));
        data.assemble(id, &create)
    }

    async fn patch_repository_tokens(&self, web_url: &str, patch: &TokenPatch) -> Result<(), StoreError> {
        let mut data = self.data.write().await;
        for (_, repo) in data.repositories.iter_mut().filter(|(_, r)| r.web_url == web_url) {
            repo.access_token = patch.access_token.clone();
            repo.refresh_token = patch.refresh_token.clone();
            repo.expires_ts = patch.expires_ts;
        }
        Ok(())
    }

    async fn get_project(&self, project_id: i64) -> Result<Option<Project>, StoreError> {
        Ok(self.data.read().await.projects.get(&project_id).cloned())
    }

    async fn get_vcs(&self, vcs_id: i64) -> Result<Option<Vcs>, StoreError> {
        Ok(self.data.read().await.vcs.get(&vcs_id).cloned())
    }

    async fn find_databases(&self, project_id: i64, name: &str) -> Result<Vec<Database>, StoreError> {
        let data = self.data.read().await;
        Ok(data
            .databases
            .iter()
            .filter(|d| d.project_id == project_id && d.name == name)
            .cloned()
            .collect())
    }

    async fn get_sql_review_policy(&self, environment_id: i64) -> Result<Option<SqlReviewPolicy>, StoreError> {
        Ok(self.data.read().await.policies.get(&environment_id).cloned())
    }

    async fn get_catalog(&self, database: &Database) -> Result<Catalog, StoreError> {
        let data = self.data.read().await;
        Ok(Catalog {
            database: database.name.clone(),
            tables: data.catalogs.get(&database.id).cloned().unwrap_or_default(),
        })
    }

    async fn find_tasks(&self, find: &TaskFind) -> Result<Vec<Task>, StoreError> {
        let data = self.data.read().await;
        Ok(data.tasks.iter().filter(|t| find.matches(t)).cloned().collect())
    }

    async fn get_issue_by_pipeline(&self, pipeline_id: i64) -> Result<Option<Issue>, StoreError> {
        let data = self.data.read().await;
        Ok(data.issues.iter().find(|i| i.pipeline_id == pipeline_id).cloned())
    }

    async fn get_principal_by_email(&self, email: &str) -> Result<Option<Principal>, StoreError> {
        let data = self.data.read().await;
        Ok(data
            .principals
            .iter()
            .find(|p| p.email.eq_ignore_ascii_case(email))
            .cloned())
    }

    async fn get_sheet(&self, find: &SheetFind) -> Result<Option<Sheet>, StoreError> {
        let data = self.data.read().await;
        Ok(data
            .sheets
            .iter()
            .find(|s| {
                s.name == find.name
                    && s.project_id == find.project_id
                    && s.source == find.source
                    && s.sheet_type == find.sheet_type
            })
            .cloned())
    }

    async fn create_sheet(&self, create: SheetCreate) -> Result<Sheet, StoreError> {
        let sheet = Sheet {
            id: self.allocate_id(),
            project_id: create.project_id,
            creator_id: create.creator_id,
            name: create.name,
            statement: create.statement,
            source: create.source,
            sheet_type: create.sheet_type,
            database_id: create.database_id,
            payload: create.payload,
        };
        self.data.write().await.sheets.push(sheet.clone());
        Ok(sheet)
    }

    async fn patch_sheet(&self, patch: SheetPatch) -> Result<Sheet, StoreError> {
        let mut data = self.data.write().await;
        let sheet = data
            .sheets
            .iter_mut()
            .find(|s| s.id == patch.id)
            .ok_or_else(|| StoreError::NotFound(format!("sheet {}", patch.id)))?;
        sheet.statement = patch.statement;
        sheet.payload = patch.payload;
        if patch.database_id.is_some() {
            sheet.database_id = patch.database_id;
        }
        Ok(sheet.clone())
    }
}

#[async_trait]
impl IssueService for InMemoryStore {
    async fn create_issue(&self, create: IssueCreate) -> Result<Issue, StoreError> {
        // Each issue gets a fresh pipeline.
        let id = self.allocate_id();
        let issue = Issue {
            id,
            name: create.name.clone(),
            project_id: create.project_id,
            pipeline_id: self.allocate_id(),
        };

        let mut data = self.data.write().await;
        data.issue_creates.push(create);
        data.issues.push(issue.clone());
        Ok(issue)
    }

    async fn patch_task(&self, task: &Task, patch: TaskPatch, issue: &Issue) -> Result<Task, StoreError> {
        let mut data = self.data.write().await;
        let stored = data
            .tasks
            .iter_mut()
            .find(|t| t.id == task.id && t.pipeline_id == issue.pipeline_id)
            .ok_or_else(|| StoreError::NotFound(format!("task {} in issue {}", task.id, issue.id)))?;
        if let Some(statement) = patch.statement {
            stored.statement = statement;
        }
        Ok(stored.clone())
    }
}

#[async_trait]
impl ActivityService for InMemoryStore {
    async fn create_activity(&self, create: ActivityCreate) -> Result<i64, StoreError> {
        let id = self.allocate_id();
        self.data.write().await.activities.push(create);
        Ok(id)
    }
}

struct MemoryConnection {
    database_name: String,
    open_connections: Arc<AtomicUsize>,
}

#[async_trait]
impl ReadOnlyConnection for MemoryConnection {
    fn database_name(&self) -> &str {
        &self.database_name
    }

    async fn close(self: Box<Self>) -> Result<(), AdvisorError> {
        self.open_connections.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl DriverFactory for InMemoryStore {
    async fn open_read_only(&self, database: &Database) -> Result<Box<dyn ReadOnlyConnection>, StoreError> {
        self.open_connections.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemoryConnection {
            database_name: database.name.clone(),
            open_connections: Arc::clone(&self.open_connections),
        }))
    }
}
