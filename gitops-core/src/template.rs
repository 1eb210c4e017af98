//! Path templates such as `migrations/{{ENV_NAME}}/{{VERSION}}__{{DB_NAME}}.sql`.
//!
//! A template is split on `/`. A segment that is exactly `*` matches one path
//! segment and a segment that is exactly `**` matches any number of leading
//! segments. Known `{{PLACEHOLDER}}`s become named capture groups; everything
//! else matches literally. Compiled patterns are anchored on both ends.

use regex::Regex;
use std::sync::OnceLock;

pub const ENV_NAME: &str = "ENV_NAME";
pub const VERSION: &str = "VERSION";
pub const DB_NAME: &str = "DB_NAME";
pub const TYPE: &str = "TYPE";
pub const DESCRIPTION: &str = "DESCRIPTION";
pub const NAME: &str = "NAME";

const PLACEHOLDER_VALUE: &str = r"[a-zA-Z0-9+\-=/_#?!$. ]+";
const SINGLE_ASTERISK: &str = "*";
const DOUBLE_ASTERISK: &str = "**";

#[derive(Debug, thiserror::Error)]
pub enum TemplateError {
    #[error("invalid asterisks usage in template {0:?}, an asterisk must make up a whole path segment")]
    InvalidAsterisks(String),

    #[error("template {0:?} must not end with \"**\"")]
    TrailingDoubleAsterisk(String),

    #[error("template {template:?} does not compile: {source}")]
    Regex {
        template: String,
        #[source]
        source: regex::Error,
    },
}

fn placeholder_regex() -> &'static Regex {
    static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();
    PLACEHOLDER.get_or_init(|| Regex::new(r"\{\{([A-Z_]+)\}\}").expect("placeholder pattern is valid"))
}

/// Rejects asterisks that are only part of a segment, like `v*.sql`.
pub fn validate_asterisks(template: &str) -> Result<(), TemplateError> {
    let segments: Vec<&str> = template.split('/').collect();
    for segment in &segments {
        if *segment == SINGLE_ASTERISK || *segment == DOUBLE_ASTERISK {
            continue;
        }
        if segment.contains(SINGLE_ASTERISK) {
            return Err(TemplateError::InvalidAsterisks(template.to_string()));
        }
    }
    if segments.last() == Some(&DOUBLE_ASTERISK) {
        return Err(TemplateError::TrailingDoubleAsterisk(template.to_string()));
    }
    Ok(())
}

/// Compiles `template` into an anchored regex capturing the given placeholders.
///
/// Placeholders not listed in `placeholders` are matched literally. A
/// placeholder repeated in the template is captured only at its first
/// occurrence.
pub fn compile(template: &str, placeholders: &[&str]) -> Result<Regex, TemplateError> {
    validate_asterisks(template)?;

    let segments: Vec<&str> = template.split('/').collect();
    let mut pattern = String::from("^");
    let mut captured: Vec<&str> = Vec::new();

    for (i, segment) in segments.iter().enumerate() {
        let is_last = i + 1 == segments.len();
        match *segment {
            DOUBLE_ASTERISK => {
                pattern.push_str("(?:[^/]+/)*");
                continue;
            }
            SINGLE_ASTERISK => pattern.push_str("[^/]+"),
            literal => push_segment(&mut pattern, literal, placeholders, &mut captured),
        }
        if !is_last {
            pattern.push('/');
        }
    }
    pattern.push('$');

    Regex::new(&pattern).map_err(|source| TemplateError::Regex {
        template: template.to_string(),
        source,
    })
}

fn push_segment<'a>(
    pattern: &mut String,
    segment: &'a str,
    placeholders: &[&str],
    captured: &mut Vec<&'a str>,
) {
    let mut last = 0;
    for caps in placeholder_regex().captures_iter(segment) {
        let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        pattern.push_str(&regex::escape(&segment[last..whole.start()]));
        let name = name.as_str();
        if !placeholders.contains(&name) {
            pattern.push_str(&regex::escape(whole.as_str()));
        } else if captured.contains(&name) {
            pattern.push_str(&format!("(?:{})", PLACEHOLDER_VALUE));
        } else {
            pattern.push_str(&format!("(?P<{}>{})", name, PLACEHOLDER_VALUE));
            captured.push(name);
        }
        last = whole.end();
    }
    pattern.push_str(&regex::escape(&segment[last..]));
}

/// Joins path pieces with `/`, ignoring empty pieces and duplicate separators.
pub fn join_path(base: &str, rest: &str) -> String {
    let base = base.trim_end_matches('/');
    let rest = rest.trim_start_matches('/');
    match (base.is_empty(), rest.is_empty()) {
        (true, _) => rest.to_string(),
        (_, true) => base.to_string(),
        _ => format!("{}/{}", base, rest),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compile_captures_placeholders() {
        let re = compile(
            "migrations/{{ENV_NAME}}/{{VERSION}}__{{DB_NAME}}__{{DESCRIPTION}}.sql",
            &[ENV_NAME, VERSION, DB_NAME, DESCRIPTION],
        )
        .unwrap();

        let caps = re.captures("migrations/dev/v2__shop__add_col.sql").unwrap();
        assert_eq!(&caps[ENV_NAME], "dev");
        assert_eq!(&caps[VERSION], "v2");
        assert_eq!(&caps[DB_NAME], "shop");
        assert_eq!(&caps[DESCRIPTION], "add_col");
    }

    #[test]
    fn test_compile_is_anchored_and_escapes_literals() {
        let re = compile("db/{{VERSION}}.sql", &[VERSION]).unwrap();
        assert!(re.is_match("db/v1.sql"));
        assert!(!re.is_match("prefix/db/v1.sql"));
        assert!(!re.is_match("db/v1.sql.bak"));
        assert!(!re.is_match("db/v1xsql"));
    }

    #[test]
    fn test_single_asterisk_matches_one_segment() {
        let re = compile("*/{{VERSION}}.sql", &[VERSION]).unwrap();
        assert!(re.is_match("any/v1.sql"));
        assert!(!re.is_match("v1.sql"));
        assert!(!re.is_match("a/b/v1.sql"));
    }

    #[test]
    fn test_double_asterisk_matches_any_depth() {
        let re = compile("db/**/{{VERSION}}.sql", &[VERSION]).unwrap();
        assert!(re.is_match("db/v1.sql"));
        assert!(re.is_match("db/a/v1.sql"));
        assert!(re.is_match("db/a/b/c/v1.sql"));
        assert!(!re.is_match("other/a/v1.sql"));
    }

    #[test]
    fn test_unknown_placeholder_is_literal() {
        let re = compile("{{VERSION}}_{{OTHER}}.sql", &[VERSION]).unwrap();
        assert!(re.is_match("v1_{{OTHER}}.sql"));
        assert!(!re.is_match("v1_x.sql"));
    }

    #[test]
    fn test_repeated_placeholder_is_captured_once() {
        let re = compile("{{DB_NAME}}/{{VERSION}}__{{DB_NAME}}.sql", &[VERSION, DB_NAME]).unwrap();
        let caps = re.captures("shop/v1__shop.sql").unwrap();
        assert_eq!(&caps[DB_NAME], "shop");
    }

    #[test]
    fn test_validate_asterisks() {
        assert!(validate_asterisks("a/*/b/**/c.sql").is_ok());
        assert!(matches!(
            validate_asterisks("a/v*.sql"),
            Err(TemplateError::InvalidAsterisks(_))
        ));
        assert!(matches!(
            validate_asterisks("a/***/b.sql"),
            Err(TemplateError::InvalidAsterisks(_))
        ));
        assert!(matches!(
            validate_asterisks("a/**"),
            Err(TemplateError::TrailingDoubleAsterisk(_))
        ));
    }

    #[test]
    fn test_join_path() {
        assert_eq!(join_path("", "a/b.sql"), "a/b.sql");
        assert_eq!(join_path("base/", "/a.sql"), "base/a.sql");
        assert_eq!(join_path("base", ""), "base");
    }
}
