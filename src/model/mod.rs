//! Core data types for `trackdown`.
//!
//! This module defines the fundamental types used throughout the application:
//! - `Issue` - one tracked issue (front matter + Markdown body)
//! - `IssueNumber` / `IssueRef` - string identifiers, provisional or permanent
//! - `State` - open/closed lifecycle state
//!
//! Set-valued fields (labels, assignees, blocked-by, blocks, projects) are
//! semantically sets: `normalized()` dedups and sorts them so equality and
//! serialization are order-independent.

pub mod document;

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::de::Deserializer;
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Reserved prefix distinguishing provisional (locally generated) ids from
/// permanent ids assigned by the remote tracker.
pub const PROVISIONAL_PREFIX: &str = "T";

/// An issue's own identifier. Permanent ids are decimal numbers assigned by
/// the remote tracker; provisional ids are `T`-prefixed random strings and
/// must never be sent remotely.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct IssueNumber(pub String);

/// A reference to another issue (parent, blocked-by, blocks).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct IssueRef(pub String);

macro_rules! id_newtype {
    ($name:ident) => {
        impl $name {
            #[must_use]
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// True for locally generated ids not yet known to the remote.
            #[must_use]
            pub fn is_provisional(&self) -> bool {
                self.0.starts_with(PROVISIONAL_PREFIX)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                // Permanent ids render as YAML integers, provisional ids as
                // strings, so files round-trip the way users write them.
                if !self.is_provisional() {
                    if let Ok(n) = self.0.parse::<u64>() {
                        return serializer.serialize_u64(n);
                    }
                }
                serializer.serialize_str(&self.0)
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                #[derive(Deserialize)]
                #[serde(untagged)]
                enum Repr {
                    Int(u64),
                    Str(String),
                }
                Ok(match Repr::deserialize(deserializer)? {
                    Repr::Int(n) => Self(n.to_string()),
                    Repr::Str(s) => Self(s),
                })
            }
        }
    };
}

id_newtype!(IssueNumber);
id_newtype!(IssueRef);

impl IssueNumber {
    /// View this number as a reference to itself.
    #[must_use]
    pub fn as_ref_id(&self) -> IssueRef {
        IssueRef(self.0.clone())
    }
}

/// Open/closed lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum State {
    #[default]
    Open,
    Closed,
}

impl State {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Closed => "closed",
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for State {
    type Err = crate::error::SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "open" | "" => Ok(Self::Open),
            "closed" => Ok(Self::Closed),
            other => Err(crate::error::SyncError::Config(format!(
                "invalid state: {other}"
            ))),
        }
    }
}

/// One tracked issue.
///
/// The `body` is Markdown; everything else lives in the YAML front matter
/// of the issue file. `synced_at` records the last successful sync and is
/// ignored by all equality checks.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Issue {
    pub number: IssueNumber,
    pub title: String,
    pub labels: Vec<String>,
    pub assignees: Vec<String>,
    pub milestone: Option<String>,
    pub category: Option<String>,
    pub projects: Vec<String>,
    pub state: State,
    pub state_reason: Option<String>,
    pub parent: Option<IssueRef>,
    pub blocked_by: Vec<IssueRef>,
    pub blocks: Vec<IssueRef>,
    pub synced_at: Option<DateTime<Utc>>,
    pub body: String,
}

impl Issue {
    /// Canonical form: set fields deduped and sorted, body line endings
    /// normalized. Pure; never touches disk.
    #[must_use]
    pub fn normalized(&self) -> Self {
        let mut issue = self.clone();
        issue.labels = sorted_unique(&issue.labels);
        issue.assignees = sorted_unique(&issue.assignees);
        issue.projects = sorted_unique(&issue.projects);
        issue.blocked_by = sorted_unique_refs(&issue.blocked_by);
        issue.blocks = sorted_unique_refs(&issue.blocks);
        issue.milestone = normalize_optional(issue.milestone);
        issue.category = normalize_optional(issue.category);
        issue.state_reason = normalize_optional(issue.state_reason);
        issue.body = normalize_body(&issue.body);
        issue
    }

    /// Full equality modulo normalization and `synced_at`.
    #[must_use]
    pub fn equal_ignoring_synced_at(&self, other: &Self) -> bool {
        let mut a = self.normalized();
        let mut b = other.normalized();
        a.synced_at = None;
        b.synced_at = None;
        a == b
    }

    /// Equality used for conflict detection.
    ///
    /// Additionally ignores `blocks` (the derived reverse of blocked-by,
    /// which the remote reports but does not authoritatively own) and
    /// `projects` (informational membership enriched out-of-band), so those
    /// fields never produce false conflicts.
    #[must_use]
    pub fn equal_for_conflict_check(&self, other: &Self) -> bool {
        let mut a = self.normalized();
        let mut b = other.normalized();
        a.synced_at = None;
        b.synced_at = None;
        a.blocks = Vec::new();
        b.blocks = Vec::new();
        a.projects = Vec::new();
        b.projects = Vec::new();
        a == b
    }
}

fn normalize_optional(value: Option<String>) -> Option<String> {
    match value {
        Some(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            }
        }
        None => None,
    }
}

/// CRLF to LF, leading blank lines stripped, exactly one trailing newline
/// on non-empty bodies.
#[must_use]
pub fn normalize_body(body: &str) -> String {
    let body = body.replace("\r\n", "\n");
    let body = body.trim_start_matches('\n');
    if body.is_empty() {
        return String::new();
    }
    let trimmed = body.trim_end_matches('\n');
    format!("{trimmed}\n")
}

fn sorted_unique(items: &[String]) -> Vec<String> {
    let mut cleaned: Vec<String> = items
        .iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();
    cleaned.sort();
    cleaned.dedup();
    cleaned
}

fn sorted_unique_refs(items: &[IssueRef]) -> Vec<IssueRef> {
    let mut cleaned: Vec<IssueRef> = items
        .iter()
        .map(|r| IssueRef(r.0.trim().to_string()))
        .filter(|r| !r.0.is_empty())
        .collect();
    cleaned.sort();
    cleaned.dedup();
    cleaned
}

static SLUG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^a-z0-9]+").expect("valid regex"));

/// Lowercase hyphenated slug of a title, used in file names.
#[must_use]
pub fn slugify(title: &str) -> String {
    let lower = title.trim().to_lowercase();
    if lower.is_empty() {
        return String::new();
    }
    let slug = SLUG_RE.replace_all(&lower, "-");
    slug.trim_matches('-').trim_matches('.').replace("--", "-")
}

/// File name for an issue: `<number>-<slug>.md`.
#[must_use]
pub fn file_name(number: &IssueNumber, title: &str) -> String {
    let mut slug = slugify(title);
    if slug.is_empty() {
        slug = "issue".to_string();
    }
    format!("{number}-{slug}.md")
}

/// Full path for an issue file in the given directory.
#[must_use]
pub fn path_for(dir: &Path, number: &IssueNumber, title: &str) -> PathBuf {
    dir.join(file_name(number, title))
}
