//! Issue file serialization: YAML front matter + Markdown body.
//!
//! An issue file looks like:
//!
//! ```text
//! ---
//! number: 42
//! title: Fix the parser
//! labels:
//! - bug
//! ---
//!
//! Body text here.
//! ```
//!
//! Rendering always writes the normalized form of the issue so files are
//! stable under re-serialization.

use super::{Issue, IssueNumber, IssueRef, State, normalize_body};
use crate::error::{Result, SyncError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

const DELIMITER: &str = "---";
const BOM: &str = "\u{feff}";

/// The YAML front matter of an issue file. Field order here is the order
/// fields appear on disk.
#[derive(Debug, Serialize, Deserialize, Default)]
struct FrontMatter {
    number: IssueNumber,
    title: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    labels: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    assignees: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    milestone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    category: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    projects: Vec<String>,
    #[serde(default)]
    state: State,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    state_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    parent: Option<IssueRef>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    blocked_by: Vec<IssueRef>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    blocks: Vec<IssueRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    synced_at: Option<DateTime<Utc>>,
}

/// Parse an issue from raw file contents.
///
/// # Errors
///
/// Returns `SyncError::Parse` for missing or unterminated front matter and
/// for YAML that does not decode.
pub fn parse(data: &str, origin: &Path) -> Result<Issue> {
    let data = data.strip_prefix(BOM).unwrap_or(data);
    let Some(rest) = data.strip_prefix("---\n") else {
        return Err(SyncError::parse(origin, "missing front matter"));
    };

    let mut front_lines = Vec::new();
    let mut body = None;
    let mut remaining = rest;
    while let Some(line_end) = remaining.find('\n') {
        let line = &remaining[..line_end];
        remaining = &remaining[line_end + 1..];
        if line == DELIMITER {
            body = Some(remaining);
            break;
        }
        front_lines.push(line);
    }
    if body.is_none() && remaining == DELIMITER {
        // Front matter terminated at EOF without a trailing newline.
        body = Some("");
    }
    let Some(body) = body else {
        return Err(SyncError::parse(origin, "unterminated front matter"));
    };

    let front = front_lines.join("\n");
    let fm: FrontMatter = serde_yaml::from_str(&front)
        .map_err(|e| SyncError::parse(origin, e.to_string()))?;

    Ok(Issue {
        number: fm.number,
        title: fm.title,
        labels: fm.labels,
        assignees: fm.assignees,
        milestone: fm.milestone,
        category: fm.category,
        projects: fm.projects,
        state: fm.state,
        state_reason: fm.state_reason,
        parent: fm.parent,
        blocked_by: fm.blocked_by,
        blocks: fm.blocks,
        synced_at: fm.synced_at,
        body: normalize_body(body.trim_start_matches('\n')),
    })
}

/// Parse an issue file from disk.
///
/// # Errors
///
/// Returns `Io` if the file cannot be read, or `Parse` per [`parse`].
pub fn parse_file(path: &Path) -> Result<Issue> {
    let data = fs::read_to_string(path)?;
    parse(&data, path)
}

/// Render an issue to its canonical file form.
///
/// # Errors
///
/// Returns `Yaml` if front matter serialization fails.
pub fn render(issue: &Issue) -> Result<String> {
    let issue = issue.normalized();
    let fm = FrontMatter {
        number: issue.number.clone(),
        title: issue.title.clone(),
        labels: issue.labels.clone(),
        assignees: issue.assignees.clone(),
        milestone: issue.milestone.clone(),
        category: issue.category.clone(),
        projects: issue.projects.clone(),
        state: issue.state,
        state_reason: issue.state_reason.clone(),
        parent: issue.parent.clone(),
        blocked_by: issue.blocked_by.clone(),
        blocks: issue.blocks.clone(),
        synced_at: issue.synced_at,
    };
    let payload = serde_yaml::to_string(&fm)?;
    Ok(format!("{DELIMITER}\n{payload}{DELIMITER}\n\n{}", issue.body))
}

/// Render and write an issue file.
///
/// # Errors
///
/// Returns `Yaml` on render failure or `Io` on write failure.
pub fn write_file(path: &Path, issue: &Issue) -> Result<()> {
    let content = render(issue)?;
    fs::write(path, content)?;
    Ok(())
}
