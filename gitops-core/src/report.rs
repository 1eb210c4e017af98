//! Rendering of SQL review advice for CI consumers.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::advisor::{Advice, AdviceStatus};

pub const SQL_REVIEW_DOCS: &str = "https://www.bytebase.com/docs/reference/error-code/advisor";

/// Body returned to the CI job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SqlReviewResult {
    pub status: AdviceStatus,
    pub content: Vec<String>,
}

impl SqlReviewResult {
    pub fn empty() -> Self {
        Self {
            status: AdviceStatus::Success,
            content: Vec::new(),
        }
    }
}

/// JUnit XML, which GitLab renders as a test report.
pub fn to_gitlab_ci_result(advice_map: &BTreeMap<String, Vec<Advice>>) -> SqlReviewResult {
    let mut status = AdviceStatus::Success;
    let mut testsuites = Vec::new();

    for (file_path, advice_list) in advice_map {
        let mut testcases = Vec::new();
        for advice in advice_list.iter().filter(|a| !a.code.is_ok()) {
            status = status.worst(advice.status);

            let content = format!(
                "Error: {}.\nYou can check the docs at {}#{}",
                advice.content, SQL_REVIEW_DOCS, advice.code
            );
            testcases.push(format!(
                "<testcase name=\"{}\" classname=\"{}\" file=\"{}#L{}\">\n<failure>\n{}\n</failure>\n</testcase>",
                advice.title,
                file_path,
                file_path,
                advice.line.max(1),
                content
            ));
        }

        if !testcases.is_empty() {
            testsuites.push(format!(
                "<testsuite name=\"{}\">\n{}\n</testsuite>",
                file_path,
                testcases.join("\n")
            ));
        }
    }

    SqlReviewResult {
        status,
        content: vec![format!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<testsuites name=\"SQL Review\">\n{}\n</testsuites>",
            testsuites.join("\n")
        )],
    }
}

/// GitHub Actions workflow commands, one per advice line.
pub fn to_github_action_result(advice_map: &BTreeMap<String, Vec<Advice>>) -> SqlReviewResult {
    let mut status = AdviceStatus::Success;
    let mut messages = Vec::new();

    for (file_path, advice_list) in advice_map {
        for advice in advice_list {
            if advice.code.is_ok() || advice.status == AdviceStatus::Success {
                continue;
            }
            status = status.worst(advice.status);

            let prefix = if advice.status == AdviceStatus::Error {
                "error"
            } else {
                "warning"
            };
            let message = format!(
                "::{} file={},line={},col=1,endColumn=2,title={} ({})::{}\nDoc: {}#{}",
                prefix,
                file_path,
                advice.line.max(1),
                advice.title,
                advice.code,
                advice.content,
                SQL_REVIEW_DOCS,
                advice.code
            );
            // Workflow commands are single-line.
            messages.push(message.replace('\n', "%0A"));
        }
    }

    SqlReviewResult {
        status,
        content: messages,
    }
}
