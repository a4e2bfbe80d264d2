//! Remote tracker interface.
//!
//! The orchestrator talks to the remote through the [`RemoteTracker`]
//! trait so it can be driven against an in-memory fake in tests. The
//! production implementation shells out to the `gh` CLI ([`gh`]).
//!
//! No call here retries on failure: failures are reported to the caller,
//! which decides what to surface and what to re-run.

pub mod gh;

use crate::error::Result;
use crate::model::Issue;
use std::collections::BTreeMap;

/// A label known to the remote tracker.
#[derive(Debug, Clone)]
pub struct RemoteLabel {
    pub name: String,
    pub color: String,
}

/// A milestone known to the remote tracker.
#[derive(Debug, Clone)]
pub struct RemoteMilestone {
    pub title: String,
    pub state: String,
}

/// An issue category (org-level issue type) known to the remote tracker.
#[derive(Debug, Clone)]
pub struct RemoteCategory {
    pub id: String,
    pub name: String,
}

/// A project known to the remote tracker.
#[derive(Debug, Clone)]
pub struct RemoteProject {
    pub id: String,
    pub title: String,
}

/// One record's worth of plain field edits, batchable with others.
/// `milestone: Some(None)` clears the milestone.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchUpdate {
    pub number: String,
    pub title: Option<String>,
    pub body: Option<String>,
    pub milestone: Option<Option<String>>,
    pub add_labels: Vec<String>,
    pub remove_labels: Vec<String>,
    pub add_assignees: Vec<String>,
    pub remove_assignees: Vec<String>,
}

/// Outcome of a batched edit: per-record failures keyed by issue number.
/// A failed record does not abort the rest of the batch.
#[derive(Debug, Clone, Default)]
pub struct BatchEditResult {
    pub errors: BTreeMap<String, String>,
}

/// Operations the reconciliation engine needs from the remote tracker.
pub trait RemoteTracker {
    /// Fetch a batch of issues by number, keyed by number. Numbers absent
    /// from the result do not exist remotely.
    fn fetch_issues(&self, numbers: &[String]) -> Result<BTreeMap<String, Issue>>;

    /// Create an issue; returns the permanent number the remote assigned.
    fn create_issue(&self, issue: &Issue) -> Result<String>;

    /// Apply plain field edits to many issues, isolating per-record
    /// failures.
    fn edit_issues(&self, updates: &[BatchUpdate]) -> Result<BatchEditResult>;

    /// Close an issue, optionally with a reason.
    fn close_issue(&self, number: &str, reason: Option<&str>) -> Result<()>;

    /// Reopen a closed issue.
    fn reopen_issue(&self, number: &str) -> Result<()>;

    /// Reconcile parent and blocked-by relationships for an issue.
    fn sync_relationships(&self, number: &str, issue: &Issue) -> Result<()>;

    /// Set or clear (`None`) the issue's category.
    fn set_category(&self, number: &str, category_id: Option<&str>) -> Result<()>;

    /// Reconcile project membership; `known_ids` maps lowercased project
    /// titles to project ids.
    fn sync_projects(
        &self,
        number: &str,
        projects: &[String],
        known_ids: &BTreeMap<String, String>,
    ) -> Result<()>;

    /// Post a comment on an issue.
    fn create_comment(&self, number: &str, body: &str) -> Result<()>;

    /// List the label vocabulary.
    fn list_labels(&self) -> Result<Vec<RemoteLabel>>;

    /// Create a label.
    fn create_label(&self, name: &str, color: &str) -> Result<()>;

    /// List the milestone vocabulary.
    fn list_milestones(&self) -> Result<Vec<RemoteMilestone>>;

    /// Create an open milestone.
    fn create_milestone(&self, title: &str) -> Result<()>;

    /// List issue categories. Empty when the remote does not support them.
    fn list_categories(&self) -> Result<Vec<RemoteCategory>>;

    /// List projects.
    fn list_projects(&self) -> Result<Vec<RemoteProject>>;
}
