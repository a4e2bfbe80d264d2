//! Field-level diff and three-way reconciliation of issues.
//!
//! `diff_issue` produces the change-set between a baseline and a candidate:
//! scalar replacements, set additions/removals, and an open/closed state
//! transition modeled separately because the remote treats close/reopen as
//! a distinct, non-batchable action.
//!
//! `three_way_merge` reconciles a last-synced baseline, the current local
//! issue, and a fresh remote snapshot field by field: a field changed on
//! only one side takes that side's value; both sides changed to the same
//! value is no conflict; both sides changed to different values puts the
//! field in the conflict set. A conflicted merge still returns best-effort
//! merged values for inspection, but callers must not write any field of a
//! conflicted issue.

use crate::model::Issue;
use std::fmt;

/// Fields participating in diff and merge, in the fixed order conflicts
/// are reported in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Field {
    Title,
    Body,
    Labels,
    Assignees,
    Milestone,
    Category,
    Projects,
    State,
    StateReason,
    Parent,
    BlockedBy,
    Blocks,
}

impl Field {
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Title => "title",
            Self::Body => "body",
            Self::Labels => "labels",
            Self::Assignees => "assignees",
            Self::Milestone => "milestone",
            Self::Category => "category",
            Self::Projects => "projects",
            Self::State => "state",
            Self::StateReason => "state_reason",
            Self::Parent => "parent",
            Self::BlockedBy => "blocked_by",
            Self::Blocks => "blocks",
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// An open/closed transition. Never batched with plain field edits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateTransition {
    Close,
    Reopen,
}

/// Field-level description of the differences between a baseline and a
/// candidate issue. `None` / empty means "unchanged".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    pub title: Option<String>,
    pub body: Option<String>,
    /// `Some(None)` clears the milestone.
    pub milestone: Option<Option<String>>,
    /// `Some(None)` clears the category.
    pub category: Option<Option<String>>,
    pub add_labels: Vec<String>,
    pub remove_labels: Vec<String>,
    pub add_assignees: Vec<String>,
    pub remove_assignees: Vec<String>,
    pub add_projects: Vec<String>,
    pub remove_projects: Vec<String>,
    pub parent_changed: bool,
    pub blocked_by_changed: bool,
    pub state_transition: Option<StateTransition>,
    pub state_reason: Option<String>,
}

impl ChangeSet {
    /// True if any plain field edit is present (the kind the remote
    /// accepts in one batched call). Excludes state transitions,
    /// relationship changes, category, and project membership.
    #[must_use]
    pub fn has_edits(&self) -> bool {
        self.title.is_some()
            || self.body.is_some()
            || self.milestone.is_some()
            || !self.add_labels.is_empty()
            || !self.remove_labels.is_empty()
            || !self.add_assignees.is_empty()
            || !self.remove_assignees.is_empty()
    }

    /// True if parent or blocked-by changed.
    #[must_use]
    pub const fn relationships_changed(&self) -> bool {
        self.parent_changed || self.blocked_by_changed
    }

    /// True if project membership changed.
    #[must_use]
    pub fn projects_changed(&self) -> bool {
        !self.add_projects.is_empty() || !self.remove_projects.is_empty()
    }

    /// True if nothing at all changed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        !self.has_edits()
            && self.category.is_none()
            && !self.relationships_changed()
            && !self.projects_changed()
            && self.state_transition.is_none()
    }
}

fn set_diff(base: &[String], candidate: &[String]) -> (Vec<String>, Vec<String>) {
    let added = candidate
        .iter()
        .filter(|item| !base.contains(item))
        .cloned()
        .collect();
    let removed = base
        .iter()
        .filter(|item| !candidate.contains(item))
        .cloned()
        .collect();
    (added, removed)
}

/// Compute the change-set between `base` and `candidate`.
///
/// Pure structural diff over normalized values: a field is changed iff its
/// normalized value differs.
#[must_use]
pub fn diff_issue(base: &Issue, candidate: &Issue) -> ChangeSet {
    let base = base.normalized();
    let candidate = candidate.normalized();
    let mut change = ChangeSet::default();

    if base.title != candidate.title {
        change.title = Some(candidate.title.clone());
    }
    if base.body != candidate.body {
        change.body = Some(candidate.body.clone());
    }
    if base.milestone != candidate.milestone {
        change.milestone = Some(candidate.milestone.clone());
    }
    if base.category != candidate.category {
        change.category = Some(candidate.category.clone());
    }

    (change.add_labels, change.remove_labels) = set_diff(&base.labels, &candidate.labels);
    (change.add_assignees, change.remove_assignees) =
        set_diff(&base.assignees, &candidate.assignees);
    (change.add_projects, change.remove_projects) = set_diff(&base.projects, &candidate.projects);

    change.parent_changed = base.parent != candidate.parent;
    change.blocked_by_changed = base.blocked_by != candidate.blocked_by;

    if base.state != candidate.state {
        change.state_transition = Some(match candidate.state {
            crate::model::State::Closed => StateTransition::Close,
            crate::model::State::Open => StateTransition::Reopen,
        });
        change.state_reason = candidate.state_reason.clone();
    }

    change
}

/// Result of a three-way merge.
#[derive(Debug, Clone)]
pub struct MergeOutcome {
    /// Best-effort merged issue. On conflicted fields the local value is
    /// kept so the caller can inspect both sides via the conflict list.
    pub merged: Issue,
    /// Fields where local and remote diverged from base to different
    /// values, in fixed field order.
    pub conflicts: Vec<Field>,
    /// What the local side changed relative to base.
    pub local_changes: ChangeSet,
}

impl MergeOutcome {
    /// True if the merge completed without conflicts.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.conflicts.is_empty()
    }
}

// Per-field rule: only-local-diverged takes local, only-remote-diverged
// takes remote, both-same takes either, both-different is a conflict
// (local kept as the best-effort value).
fn merge3<T: Clone + PartialEq>(base: &T, local: &T, remote: &T) -> (T, bool) {
    if local == base {
        (remote.clone(), false)
    } else if remote == base || remote == local {
        (local.clone(), false)
    } else {
        (local.clone(), true)
    }
}

/// Three-way merge of `base` (last-synced snapshot), `local` (current
/// file), and `remote` (fresh snapshot). Fields merge independently; a
/// conflict on one field never blocks another field from merging.
#[must_use]
pub fn three_way_merge(base: &Issue, local: &Issue, remote: &Issue) -> MergeOutcome {
    let base = base.normalized();
    let local = local.normalized();
    let remote = remote.normalized();

    let mut merged = local.clone();
    let mut conflicts = Vec::new();
    let mut record = |field: Field, conflicted: bool| {
        if conflicted {
            conflicts.push(field);
        }
    };

    let (value, c) = merge3(&base.title, &local.title, &remote.title);
    merged.title = value;
    record(Field::Title, c);

    let (value, c) = merge3(&base.body, &local.body, &remote.body);
    merged.body = value;
    record(Field::Body, c);

    let (value, c) = merge3(&base.labels, &local.labels, &remote.labels);
    merged.labels = value;
    record(Field::Labels, c);

    let (value, c) = merge3(&base.assignees, &local.assignees, &remote.assignees);
    merged.assignees = value;
    record(Field::Assignees, c);

    let (value, c) = merge3(&base.milestone, &local.milestone, &remote.milestone);
    merged.milestone = value;
    record(Field::Milestone, c);

    let (value, c) = merge3(&base.category, &local.category, &remote.category);
    merged.category = value;
    record(Field::Category, c);

    let (value, c) = merge3(&base.projects, &local.projects, &remote.projects);
    merged.projects = value;
    record(Field::Projects, c);

    let (value, c) = merge3(&base.state, &local.state, &remote.state);
    merged.state = value;
    record(Field::State, c);

    let (value, c) = merge3(&base.state_reason, &local.state_reason, &remote.state_reason);
    merged.state_reason = value;
    record(Field::StateReason, c);

    let (value, c) = merge3(&base.parent, &local.parent, &remote.parent);
    merged.parent = value;
    record(Field::Parent, c);

    let (value, c) = merge3(&base.blocked_by, &local.blocked_by, &remote.blocked_by);
    merged.blocked_by = value;
    record(Field::BlockedBy, c);

    let (value, c) = merge3(&base.blocks, &local.blocks, &remote.blocks);
    merged.blocks = value;
    record(Field::Blocks, c);

    let local_changes = diff_issue(&base, &local);

    MergeOutcome {
        merged,
        conflicts,
        local_changes,
    }
}
