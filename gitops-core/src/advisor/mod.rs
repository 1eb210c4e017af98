//! SQL review advice model and the reviewer seam.

mod rules;

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use rules::RuleAdvisor;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AdviceStatus {
    Success,
    Warn,
    Error,
}

impl AdviceStatus {
    fn severity(&self) -> u8 {
        match self {
            AdviceStatus::Success => 0,
            AdviceStatus::Warn => 1,
            AdviceStatus::Error => 2,
        }
    }

    /// The more severe of the two.
    pub fn worst(self, other: AdviceStatus) -> AdviceStatus {
        if other.severity() > self.severity() {
            other
        } else {
            self
        }
    }
}

impl fmt::Display for AdviceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AdviceStatus::Success => "SUCCESS",
            AdviceStatus::Warn => "WARN",
            AdviceStatus::Error => "ERROR",
        };
        f.write_str(s)
    }
}

/// Stable numeric advice code, linked from the review docs as `#<code>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AdviceCode(pub i32);

impl AdviceCode {
    pub const OK: AdviceCode = AdviceCode(0);
    pub const INTERNAL: AdviceCode = AdviceCode(1);
    pub const NOT_FOUND: AdviceCode = AdviceCode(2);
    pub const UNSUPPORTED: AdviceCode = AdviceCode(3);

    pub const STATEMENT_NO_WHERE: AdviceCode = AdviceCode(202);
    pub const STATEMENT_NO_SELECT_ALL: AdviceCode = AdviceCode(203);

    pub const CHANGE_COLUMN_ORDER: AdviceCode = AdviceCode(407);

    pub fn is_ok(&self) -> bool {
        *self == AdviceCode::OK
    }
}

impl fmt::Display for AdviceCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Advice {
    pub status: AdviceStatus,
    pub code: AdviceCode,
    pub title: String,
    pub content: String,
    /// 1-based; 0 when the advice is not tied to a line.
    #[serde(default)]
    pub line: i32,
}

impl Advice {
    pub fn ok() -> Self {
        Self {
            status: AdviceStatus::Success,
            code: AdviceCode::OK,
            title: "OK".to_string(),
            content: String::new(),
            line: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RuleLevel {
    Error,
    Warning,
    Disabled,
}

impl RuleLevel {
    /// Advice status a violation of a rule at this level produces.
    pub fn advice_status(&self) -> Option<AdviceStatus> {
        match self {
            RuleLevel::Error => Some(AdviceStatus::Error),
            RuleLevel::Warning => Some(AdviceStatus::Warn),
            RuleLevel::Disabled => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SqlReviewRule {
    #[serde(rename = "type")]
    pub rule_type: String,
    pub level: RuleLevel,
    #[serde(default)]
    pub payload: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SqlReviewPolicy {
    pub name: String,
    pub rule_list: Vec<SqlReviewRule>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EngineType {
    Mysql,
    Tidb,
    Postgres,
    Clickhouse,
    Snowflake,
    Sqlite,
}

impl fmt::Display for EngineType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EngineType::Mysql => "MYSQL",
            EngineType::Tidb => "TIDB",
            EngineType::Postgres => "POSTGRES",
            EngineType::Clickhouse => "CLICKHOUSE",
            EngineType::Snowflake => "SNOWFLAKE",
            EngineType::Sqlite => "SQLITE",
        };
        f.write_str(s)
    }
}

/// Database dialects the reviewer understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DbType {
    Mysql,
    Tidb,
    Postgres,
}

impl TryFrom<EngineType> for DbType {
    type Error = AdvisorError;

    fn try_from(engine: EngineType) -> Result<Self, Self::Error> {
        match engine {
            EngineType::Mysql => Ok(DbType::Mysql),
            EngineType::Tidb => Ok(DbType::Tidb),
            EngineType::Postgres => Ok(DbType::Postgres),
            other => Err(AdvisorError::UnsupportedEngine(other)),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableMeta {
    pub name: String,
    #[serde(default)]
    pub columns: Vec<String>,
}

/// Schema metadata of the database a statement will run against.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Catalog {
    pub database: String,
    #[serde(default)]
    pub tables: Vec<TableMeta>,
}

impl Catalog {
    pub fn table(&self, name: &str) -> Option<&TableMeta> {
        self.tables.iter().find(|t| t.name.eq_ignore_ascii_case(name))
    }
}

/// A read-only connection rules may use to inspect the live database.
#[async_trait]
pub trait ReadOnlyConnection: Send + Sync {
    fn database_name(&self) -> &str;

    async fn close(self: Box<Self>) -> Result<(), AdvisorError>;
}

pub struct SqlReviewContext<'a> {
    pub charset: &'a str,
    pub collation: &'a str,
    pub db_type: DbType,
    pub catalog: &'a Catalog,
    pub connection: &'a dyn ReadOnlyConnection,
}

#[derive(Debug, thiserror::Error)]
pub enum AdvisorError {
    #[error("engine {0} is not supported by SQL review")]
    UnsupportedEngine(EngineType),

    #[error("SQL review failed: {0}")]
    Internal(String),
}

/// Runs a rule list over a SQL file.
#[async_trait]
pub trait SqlReviewer: Send + Sync {
    async fn check(
        &self,
        statement: &str,
        rules: &[SqlReviewRule],
        ctx: SqlReviewContext<'_>,
    ) -> Result<Vec<Advice>, AdvisorError>;
}
