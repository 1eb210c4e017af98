//! Classification of repository files into migration, schema and sheet files.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::template::{self, TemplateError, DB_NAME, DESCRIPTION, ENV_NAME, NAME, TYPE, VERSION};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MigrationKind {
    Migrate,
    Data,
    Baseline,
    MigrateSdl,
}

impl MigrationKind {
    /// Whether the kind changes schema (as opposed to data).
    pub fn is_schema_change(&self) -> bool {
        matches!(self, MigrationKind::Migrate | MigrationKind::Baseline)
    }

    fn from_type_token(token: &str) -> Option<Self> {
        match token.to_lowercase().as_str() {
            "migrate" | "ddl" => Some(MigrationKind::Migrate),
            "data" | "dml" => Some(MigrationKind::Data),
            "baseline" => Some(MigrationKind::Baseline),
            _ => None,
        }
    }
}

impl fmt::Display for MigrationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MigrationKind::Migrate => "MIGRATE",
            MigrationKind::Data => "DATA",
            MigrationKind::Baseline => "BASELINE",
            MigrationKind::MigrateSdl => "MIGRATE_SDL",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationInfo {
    pub database: String,
    pub environment: String,
    pub version: String,
    pub kind: MigrationKind,
    pub description: String,
}

#[derive(Debug, thiserror::Error)]
pub enum MigrationError {
    #[error(transparent)]
    Template(#[from] TemplateError),

    #[error("file path {path:?} contains invalid migration type {token:?}, must be 'migrate'('ddl'), 'data'('dml') or 'baseline'")]
    InvalidType { path: String, token: String },

    #[error("file path {path:?} does not contain {{{{VERSION}}}}, configured file path template {template:?}")]
    MissingVersion { path: String, template: String },

    #[error("file path {path:?} does not contain {{{{DB_NAME}}}}, configured file path template {template:?}")]
    MissingDatabase { path: String, template: String },
}

/// Parses a migration file path against `template`.
///
/// Returns `Ok(None)` when the path does not match. `allow_omit_database`
/// permits a match without a `{{DB_NAME}}` capture.
pub fn parse_migration_info(
    path: &str,
    template: &str,
    allow_omit_database: bool,
) -> Result<Option<MigrationInfo>, MigrationError> {
    let re = template::compile(template, &[ENV_NAME, VERSION, DB_NAME, TYPE, DESCRIPTION])?;
    let Some(caps) = re.captures(path) else {
        return Ok(None);
    };
    let capture = |name: &str| {
        caps.name(name)
            .map(|m| m.as_str().to_string())
            .unwrap_or_default()
    };

    let kind = match caps.name(TYPE) {
        Some(token) => MigrationKind::from_type_token(token.as_str()).ok_or_else(|| {
            MigrationError::InvalidType {
                path: path.to_string(),
                token: token.as_str().to_string(),
            }
        })?,
        None => MigrationKind::Migrate,
    };

    let mut info = MigrationInfo {
        database: capture(DB_NAME),
        environment: capture(ENV_NAME),
        version: capture(VERSION),
        kind,
        description: capture(DESCRIPTION),
    };

    if info.version.is_empty() {
        return Err(MigrationError::MissingVersion {
            path: path.to_string(),
            template: template.to_string(),
        });
    }
    if info.database.is_empty() && !allow_omit_database {
        return Err(MigrationError::MissingDatabase {
            path: path.to_string(),
            template: template.to_string(),
        });
    }

    info.description = if info.description.is_empty() {
        match info.kind {
            MigrationKind::Baseline => format!("Create {} baseline", info.database),
            MigrationKind::Data => format!("Create {} data change", info.database),
            _ => format!("Create {} schema migration", info.database),
        }
    } else {
        capitalize(&info.description.replace('_', " "))
    };

    Ok(Some(info))
}

/// Parses a schema (SDL) file path. An empty template never matches.
pub fn parse_schema_file_info(
    base_directory: &str,
    schema_path_template: &str,
    path: &str,
) -> Result<Option<MigrationInfo>, MigrationError> {
    if schema_path_template.is_empty() {
        return Ok(None);
    }

    let full_template = template::join_path(base_directory, schema_path_template);
    let re = template::compile(&full_template, &[ENV_NAME, DB_NAME])?;
    let Some(caps) = re.captures(path) else {
        return Ok(None);
    };
    let capture = |name: &str| {
        caps.name(name)
            .map(|m| m.as_str().to_string())
            .unwrap_or_default()
    };

    Ok(Some(MigrationInfo {
        database: capture(DB_NAME),
        environment: capture(ENV_NAME),
        version: String::new(),
        kind: MigrationKind::MigrateSdl,
        description: String::new(),
    }))
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SheetInfo {
    pub environment: String,
    pub database: String,
    pub name: String,
}

/// Parses a sheet file path. A non-matching path yields an empty `SheetInfo`.
pub fn parse_sheet_info(path: &str, sheet_path_template: &str) -> Result<SheetInfo, MigrationError> {
    let re = template::compile(sheet_path_template, &[ENV_NAME, DB_NAME, NAME])?;
    let Some(caps) = re.captures(path) else {
        return Ok(SheetInfo::default());
    };
    let capture = |name: &str| {
        caps.name(name)
            .map(|m| m.as_str().to_string())
            .unwrap_or_default()
    };

    Ok(SheetInfo {
        environment: capture(ENV_NAME),
        database: capture(DB_NAME),
        name: capture(NAME),
    })
}

/// Directory part of a sheet template, which is where sheet files are listed from.
pub fn sheet_base_directory(sheet_path_template: &str) -> &str {
    sheet_path_template
        .rsplit_once('/')
        .map(|(dir, _)| dir)
        .unwrap_or_default()
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TemplateValidationError {
    #[error("missing {{{{VERSION}}}} in file path template")]
    MissingVersion,
    #[error("missing {{{{DB_NAME}}}} in file path template")]
    MissingDatabase,
    #[error("{{{{ENV_NAME}}}} is not allowed in the {0} template for a tenant mode project")]
    EnvironmentInTenantMode(&'static str),
}

/// Rules for a repository's file path template given the project's tenancy.
pub fn validate_file_path_template(
    template: &str,
    tenant_mode: bool,
) -> Result<(), TemplateValidationError> {
    let has = |placeholder: &str| template.contains(&format!("{{{{{}}}}}", placeholder));

    if !has(VERSION) {
        return Err(TemplateValidationError::MissingVersion);
    }
    if !tenant_mode && !has(DB_NAME) {
        return Err(TemplateValidationError::MissingDatabase);
    }
    if tenant_mode && has(ENV_NAME) {
        return Err(TemplateValidationError::EnvironmentInTenantMode("file path"));
    }
    Ok(())
}

pub fn validate_schema_path_template(
    template: &str,
    tenant_mode: bool,
) -> Result<(), TemplateValidationError> {
    if tenant_mode && template.contains(&format!("{{{{{}}}}}", ENV_NAME)) {
        return Err(TemplateValidationError::EnvironmentInTenantMode("schema path"));
    }
    Ok(())
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const TEMPLATE: &str = "migrations/{{ENV_NAME}}/{{VERSION}}__{{DB_NAME}}__{{DESCRIPTION}}.sql";

    #[test]
    fn test_parse_migration_info_full_template() {
        let info = parse_migration_info("migrations/dev/v2__shop__add_col.sql", TEMPLATE, false)
            .unwrap()
            .unwrap();
        assert_eq!(
            info,
            MigrationInfo {
                database: "shop".to_string(),
                environment: "dev".to_string(),
                version: "v2".to_string(),
                kind: MigrationKind::Migrate,
                description: "Add col".to_string(),
            }
        );
    }

    #[test]
    fn test_parse_migration_info_no_match() {
        let info = parse_migration_info("docs/README.md", TEMPLATE, false).unwrap();
        assert!(info.is_none());
    }

    #[test]
    fn test_parse_migration_info_type_tokens() {
        let template = "{{VERSION}}__{{DB_NAME}}__{{TYPE}}.sql";
        let kind = |path: &str| {
            parse_migration_info(path, template, false)
                .unwrap()
                .unwrap()
                .kind
        };
        assert_eq!(kind("v1__shop__migrate.sql"), MigrationKind::Migrate);
        assert_eq!(kind("v1__shop__ddl.sql"), MigrationKind::Migrate);
        assert_eq!(kind("v1__shop__data.sql"), MigrationKind::Data);
        assert_eq!(kind("v1__shop__DML.sql"), MigrationKind::Data);
        assert_eq!(kind("v1__shop__baseline.sql"), MigrationKind::Baseline);

        let err = parse_migration_info("v1__shop__drop.sql", template, false).unwrap_err();
        assert!(matches!(err, MigrationError::InvalidType { .. }));
    }

    #[test]
    fn test_parse_migration_info_default_descriptions() {
        let template = "{{VERSION}}__{{DB_NAME}}__{{TYPE}}.sql";
        let describe = |path: &str| {
            parse_migration_info(path, template, false)
                .unwrap()
                .unwrap()
                .description
        };
        assert_eq!(describe("v1__shop__ddl.sql"), "Create shop schema migration");
        assert_eq!(describe("v1__shop__dml.sql"), "Create shop data change");
        assert_eq!(describe("v1__shop__baseline.sql"), "Create shop baseline");
    }

    #[test]
    fn test_parse_migration_info_missing_database() {
        let template = "db/{{VERSION}}.sql";
        let err = parse_migration_info("db/v1.sql", template, false).unwrap_err();
        assert!(matches!(err, MigrationError::MissingDatabase { .. }));

        let info = parse_migration_info("db/v1.sql", template, true)
            .unwrap()
            .unwrap();
        assert_eq!(info.database, "");
        assert_eq!(info.version, "v1");
    }

    #[test]
    fn test_parse_migration_info_missing_version() {
        let err = parse_migration_info("db/shop.sql", "db/{{DB_NAME}}.sql", false).unwrap_err();
        assert!(matches!(err, MigrationError::MissingVersion { .. }));
    }

    #[test]
    fn test_parse_migration_info_bad_template() {
        let err = parse_migration_info("db/v1.sql", "db/v*/{{VERSION}}.sql", true).unwrap_err();
        assert!(matches!(err, MigrationError::Template(_)));
    }

    #[test]
    fn test_parse_schema_file_info() {
        let info = parse_schema_file_info("bytebase", ".{{ENV_NAME}}/{{DB_NAME}}##LATEST.sql", "bytebase/.prod/shop##LATEST.sql")
            .unwrap()
            .unwrap();
        assert_eq!(info.kind, MigrationKind::MigrateSdl);
        assert_eq!(info.database, "shop");
        assert_eq!(info.environment, "prod");

        assert!(parse_schema_file_info("bytebase", "", "bytebase/.prod/shop##LATEST.sql")
            .unwrap()
            .is_none());
        assert!(parse_schema_file_info("bytebase", "{{DB_NAME}}##LATEST.sql", "bytebase/v1__shop.sql")
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_parse_sheet_info() {
        let info = parse_sheet_info(
            "sheets/prod/shop/top_customers.sql",
            "sheets/{{ENV_NAME}}/{{DB_NAME}}/{{NAME}}.sql",
        )
        .unwrap();
        assert_eq!(info.environment, "prod");
        assert_eq!(info.database, "shop");
        assert_eq!(info.name, "top_customers");

        let info = parse_sheet_info("other/file.sql", "sheets/{{NAME}}.sql").unwrap();
        assert_eq!(info, SheetInfo::default());
    }

    #[test]
    fn test_sheet_base_directory() {
        assert_eq!(sheet_base_directory("sheets/{{NAME}}.sql"), "sheets");
        assert_eq!(sheet_base_directory("a/b/{{NAME}}.sql"), "a/b");
        assert_eq!(sheet_base_directory("{{NAME}}.sql"), "");
    }

    #[test]
    fn test_validate_file_path_template() {
        assert!(validate_file_path_template("{{VERSION}}__{{DB_NAME}}.sql", false).is_ok());
        assert_eq!(
            validate_file_path_template("{{DB_NAME}}.sql", false),
            Err(TemplateValidationError::MissingVersion)
        );
        assert_eq!(
            validate_file_path_template("{{VERSION}}.sql", false),
            Err(TemplateValidationError::MissingDatabase)
        );
        assert!(validate_file_path_template("{{VERSION}}.sql", true).is_ok());
        assert_eq!(
            validate_file_path_template("{{ENV_NAME}}/{{VERSION}}.sql", true),
            Err(TemplateValidationError::EnvironmentInTenantMode("file path"))
        );
    }

    #[test]
    fn test_validate_schema_path_template() {
        assert!(validate_schema_path_template("{{ENV_NAME}}/{{DB_NAME}}.sql", false).is_ok());
        assert!(validate_schema_path_template("{{ENV_NAME}}/{{DB_NAME}}.sql", true).is_err());
        assert!(validate_schema_path_template("", true).is_ok());
    }

    proptest! {
        #[test]
        fn prop_classification_is_idempotent(
            env in "[a-z]{1,8}",
            version in "v[0-9]{1,4}",
            db in "[a-z][a-z0-9]{0,8}",
            desc in "[a-z]{1,6}(_[a-z]{1,6}){0,2}",
        ) {
            let path = format!("migrations/{}/{}__{}__{}.sql", env, version, db, desc);
            let first = parse_migration_info(&path, TEMPLATE, false).unwrap();
            let second = parse_migration_info(&path, TEMPLATE, false).unwrap();
            prop_assert_eq!(&first, &second);

            let info = first.unwrap();
            prop_assert_eq!(info.environment, env);
            prop_assert_eq!(info.version, version);
            prop_assert_eq!(info.database, db);
        }
    }
}
