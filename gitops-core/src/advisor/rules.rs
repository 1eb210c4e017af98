use async_trait::async_trait;
use tracing::debug;

use super::{
    Advice, AdviceCode, AdvisorError, DbType, SqlReviewContext, SqlReviewRule, SqlReviewer,
};

pub const RULE_WHERE_REQUIRE: &str = "statement.where.require";
pub const RULE_NO_SELECT_ALL: &str = "statement.select.no-select-all";
pub const RULE_DISALLOW_CHANGING_COLUMN_ORDER: &str = "column.disallow-changing-order";

/// Built-in lexical rules. Unknown rule types are skipped.
#[derive(Debug, Clone, Default)]
pub struct RuleAdvisor;

#[derive(Debug, Clone, PartialEq, Eq)]
struct Statement {
    text: String,
    line: i32,
}

impl Statement {
    fn keywords(&self) -> Vec<String> {
        keywords(&self.text)
    }
}

#[async_trait]
impl SqlReviewer for RuleAdvisor {
    async fn check(
        &self,
        statement: &str,
        rules: &[SqlReviewRule],
        ctx: SqlReviewContext<'_>,
    ) -> Result<Vec<Advice>, AdvisorError> {
        let statements = split_statements(statement);
        debug!(
            "Reviewing {} statements against {} rules for {}",
            statements.len(),
            rules.len(),
            ctx.connection.database_name()
        );

        let mut advice_list = Vec::new();
        for rule in rules {
            let Some(status) = rule.level.advice_status() else {
                continue;
            };

            for stmt in &statements {
                let finding = match rule.rule_type.as_str() {
                    RULE_WHERE_REQUIRE => check_where_require(stmt),
                    RULE_NO_SELECT_ALL => check_no_select_all(stmt),
                    RULE_DISALLOW_CHANGING_COLUMN_ORDER => {
                        if matches!(ctx.db_type, DbType::Mysql | DbType::Tidb) {
                            check_column_order(stmt)
                        } else {
                            None
                        }
                    }
                    other => {
                        debug!("Skipping unknown SQL review rule {}", other);
                        break;
                    }
                };

                if let Some((code, content)) = finding {
                    advice_list.push(Advice {
                        status,
                        code,
                        title: rule.rule_type.clone(),
                        content,
                        line: stmt.line,
                    });
                }
            }
        }

        if advice_list.is_empty() {
            advice_list.push(Advice::ok());
        }
        Ok(advice_list)
    }
}

fn check_where_require(stmt: &Statement) -> Option<(AdviceCode, String)> {
    let keywords = stmt.keywords();
    let first = keywords.first()?;
    if (first == "UPDATE" || first == "DELETE") && !keywords.iter().any(|k| k == "WHERE") {
        return Some((
            AdviceCode::STATEMENT_NO_WHERE,
            format!("\"{}\" requires WHERE clause", stmt.text),
        ));
    }
    None
}

fn check_no_select_all(stmt: &Statement) -> Option<(AdviceCode, String)> {
    let upper = stmt.text.to_uppercase();
    let mut rest = upper.as_str();
    while let Some(pos) = rest.find("SELECT") {
        let after = rest[pos + "SELECT".len()..].trim_start();
        let after = after
            .strip_prefix("DISTINCT")
            .or_else(|| after.strip_prefix("ALL"))
            .map(str::trim_start)
            .unwrap_or(after);
        if after.starts_with('*') {
            return Some((
                AdviceCode::STATEMENT_NO_SELECT_ALL,
                format!("\"{}\" uses SELECT all", stmt.text),
            ));
        }
        rest = &rest[pos + "SELECT".len()..];
    }
    None
}

fn check_column_order(stmt: &Statement) -> Option<(AdviceCode, String)> {
    let keywords = stmt.keywords();
    if keywords.len() < 2 || keywords[0] != "ALTER" || keywords[1] != "TABLE" {
        return None;
    }
    let changes_column = keywords.iter().any(|k| k == "MODIFY" || k == "CHANGE");
    let moves_column = keywords.iter().any(|k| k == "FIRST" || k == "AFTER");
    if changes_column && moves_column {
        return Some((
            AdviceCode::CHANGE_COLUMN_ORDER,
            format!("\"{}\" changes column order", stmt.text),
        ));
    }
    None
}

/// Splits a SQL file on top-level `;`, ignoring those inside quotes or
/// comments. Each statement carries the 1-based line of its first
/// non-whitespace character.
fn split_statements(sql: &str) -> Vec<Statement> {
    let mut statements = Vec::new();
    let mut current = String::new();
    let mut start_line: Option<i32> = None;
    let mut line = 1;
    let mut chars = sql.chars().peekable();

    let mut flush = |current: &mut String, start_line: &mut Option<i32>| {
        let text = current.trim();
        if let Some(l) = start_line.take() {
            if !text.is_empty() {
                statements.push(Statement {
                    text: text.to_string(),
                    line: l,
                });
            }
        }
        current.clear();
    };

    while let Some(c) = chars.next() {
        match c {
            '\'' | '"' | '`' => {
                start_line.get_or_insert(line);
                current.push(c);
                while let Some(q) = chars.next() {
                    current.push(q);
                    if q == '\n' {
                        line += 1;
                    }
                    if q == '\\' && c != '`' {
                        if let Some(escaped) = chars.next() {
                            if escaped == '\n' {
                                line += 1;
                            }
                            current.push(escaped);
                        }
                        continue;
                    }
                    if q == c {
                        break;
                    }
                }
            }
            '-' if chars.peek() == Some(&'-') => {
                for skipped in chars.by_ref() {
                    if skipped == '\n' {
                        line += 1;
                        current.push('\n');
                        break;
                    }
                }
            }
            '#' => {
                for skipped in chars.by_ref() {
                    if skipped == '\n' {
                        line += 1;
                        current.push('\n');
                        break;
                    }
                }
            }
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                let mut prev = '\0';
                for skipped in chars.by_ref() {
                    if skipped == '\n' {
                        line += 1;
                    }
                    if prev == '*' && skipped == '/' {
                        break;
                    }
                    prev = skipped;
                }
                current.push(' ');
            }
            ';' => flush(&mut current, &mut start_line),
            '\n' => {
                line += 1;
                current.push(c);
            }
            c if c.is_whitespace() => current.push(c),
            c => {
                start_line.get_or_insert(line);
                current.push(c);
            }
        }
    }
    flush(&mut current, &mut start_line);

    statements
}

/// Upper-cased bare words outside of quoted strings and identifiers.
fn keywords(text: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut word = String::new();
    let mut quote: Option<char> = None;

    for c in text.chars() {
        if let Some(q) = quote {
            if c == q {
                quote = None;
            }
            continue;
        }
        if c == '\'' || c == '"' || c == '`' {
            quote = Some(c);
            if !word.is_empty() {
                words.push(std::mem::take(&mut word).to_uppercase());
            }
            continue;
        }
        if c.is_alphanumeric() || c == '_' {
            word.push(c);
        } else if !word.is_empty() {
            words.push(std::mem::take(&mut word).to_uppercase());
        }
    }
    if !word.is_empty() {
        words.push(word.to_uppercase());
    }
    words
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::advisor::{AdviceStatus, Catalog, ReadOnlyConnection, RuleLevel};

    struct NoopConnection;

    #[async_trait]
    impl ReadOnlyConnection for NoopConnection {
        fn database_name(&self) -> &str {
            "test"
        }

        async fn close(self: Box<Self>) -> Result<(), AdvisorError> {
            Ok(())
        }
    }

    async fn review(statement: &str, rule_type: &str, level: RuleLevel, db_type: DbType) -> Vec<Advice> {
        let catalog = Catalog::default();
        let connection = NoopConnection;
        let rules = vec![SqlReviewRule {
            rule_type: rule_type.to_string(),
            level,
            payload: String::new(),
        }];
        RuleAdvisor
            .check(
                statement,
                &rules,
                SqlReviewContext {
                    charset: "utf8mb4",
                    collation: "utf8mb4_general_ci",
                    db_type,
                    catalog: &catalog,
                    connection: &connection,
                },
            )
            .await
            .unwrap()
    }

    fn column_order_advice(content: &str) -> Vec<Advice> {
        vec![Advice {
            status: AdviceStatus::Warn,
            code: AdviceCode::CHANGE_COLUMN_ORDER,
            title: RULE_DISALLOW_CHANGING_COLUMN_ORDER.to_string(),
            content: content.to_string(),
            line: 3,
        }]
    }

    #[tokio::test]
    async fn test_column_disallow_changing_order() {
        let cases = vec![
            (
                "\n\t\t\t\tCREATE TABLE t(a int);\n\t\t\t\tALTER TABLE t MODIFY COLUMN a int",
                vec![Advice::ok()],
            ),
            (
                "\n\t\t\t\tCREATE TABLE t(a int);\n\t\t\t\tALTER TABLE t MODIFY COLUMN a int FIRST",
                column_order_advice("\"ALTER TABLE t MODIFY COLUMN a int FIRST\" changes column order"),
            ),
            (
                "\n\t\t\t\tCREATE TABLE t(b int, a1 int);\n\t\t\t\tALTER TABLE t CHANGE COLUMN a1 a int FIRST",
                column_order_advice("\"ALTER TABLE t CHANGE COLUMN a1 a int FIRST\" changes column order"),
            ),
            (
                "\n\t\t\t\tCREATE TABLE t(a int, b int);\n\t\t\t\tALTER TABLE t MODIFY COLUMN a int AFTER b",
                column_order_advice("\"ALTER TABLE t MODIFY COLUMN a int AFTER b\" changes column order"),
            ),
            (
                "\n\t\t\t\tCREATE TABLE t(a1 int, b int);\n\t\t\t\tALTER TABLE t CHANGE COLUMN a1 a int AFTER b",
                column_order_advice("\"ALTER TABLE t CHANGE COLUMN a1 a int AFTER b\" changes column order"),
            ),
        ];

        for (statement, want) in cases {
            let got = review(
                statement,
                RULE_DISALLOW_CHANGING_COLUMN_ORDER,
                RuleLevel::Warning,
                DbType::Mysql,
            )
            .await;
            assert_eq!(got, want, "statement: {:?}", statement);
        }
    }

    #[tokio::test]
    async fn test_column_order_rule_ignored_for_postgres() {
        let got = review(
            "ALTER TABLE t MODIFY COLUMN a int FIRST;",
            RULE_DISALLOW_CHANGING_COLUMN_ORDER,
            RuleLevel::Error,
            DbType::Postgres,
        )
        .await;
        assert_eq!(got, vec![Advice::ok()]);
    }

    #[tokio::test]
    async fn test_where_require() {
        let got = review(
            "UPDATE t SET a = 1;\nDELETE FROM t WHERE id = 1;\nDELETE FROM t;",
            RULE_WHERE_REQUIRE,
            RuleLevel::Error,
            DbType::Mysql,
        )
        .await;
        assert_eq!(got.len(), 2);
        assert_eq!(got[0].status, AdviceStatus::Error);
        assert_eq!(got[0].code, AdviceCode::STATEMENT_NO_WHERE);
        assert_eq!(got[0].line, 1);
        assert_eq!(got[1].content, "\"DELETE FROM t\" requires WHERE clause");
        assert_eq!(got[1].line, 3);
    }

    #[tokio::test]
    async fn test_where_inside_string_does_not_count() {
        let got = review(
            "UPDATE t SET note = 'where';",
            RULE_WHERE_REQUIRE,
            RuleLevel::Warning,
            DbType::Postgres,
        )
        .await;
        assert_eq!(got[0].code, AdviceCode::STATEMENT_NO_WHERE);
    }

    #[tokio::test]
    async fn test_no_select_all() {
        let got = review(
            "SELECT id FROM t;\nINSERT INTO t2 SELECT * FROM t;",
            RULE_NO_SELECT_ALL,
            RuleLevel::Warning,
            DbType::Postgres,
        )
        .await;
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].code, AdviceCode::STATEMENT_NO_SELECT_ALL);
        assert_eq!(got[0].line, 2);
    }

    #[tokio::test]
    async fn test_disabled_and_unknown_rules_produce_ok() {
        let got = review("DELETE FROM t;", RULE_WHERE_REQUIRE, RuleLevel::Disabled, DbType::Mysql).await;
        assert_eq!(got, vec![Advice::ok()]);

        let got = review("DELETE FROM t;", "naming.table", RuleLevel::Error, DbType::Mysql).await;
        assert_eq!(got, vec![Advice::ok()]);
    }

    #[test]
    fn test_split_statements_respects_quotes_and_comments() {
        let sql = "-- header; comment\nINSERT INTO t VALUES ('a;b');\n/* block;\n comment */ SELECT 1;\n";
        let statements = split_statements(sql);
        assert_eq!(statements.len(), 2);
        assert_eq!(statements[0].text, "INSERT INTO t VALUES ('a;b')");
        assert_eq!(statements[0].line, 2);
        assert_eq!(statements[1].text, "SELECT 1");
        assert_eq!(statements[1].line, 4);
    }

    #[test]
    fn test_keywords_skip_quoted_text() {
        assert_eq!(
            keywords("update `where` set a = 'WHERE'"),
            vec!["UPDATE", "SET", "A"]
        );
    }
}
