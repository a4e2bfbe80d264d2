//! Push orchestration: reconcile the local issue store with the remote
//! tracker.
//!
//! A push run proceeds in fixed phases under the store lock:
//!
//! 1. load local issues and restrict to the requested selection
//! 2. ensure the remote vocabularies (labels, milestones) cover everything
//!    the selection uses, creating what is missing
//! 3. create remote issues for provisional records, remapping every
//!    reference to each provisional id across the whole store as soon as
//!    the permanent number is known
//! 4. fetch the remote side of all permanent records in one batch, merge
//!    base/local/remote per record, and push the resulting edits (plain
//!    field edits batched, state transitions and relationship updates per
//!    record)
//! 5. post pending comments
//!
//! Conflicted records are reported and skipped wholesale; nothing of a
//! conflicted record is written in either direction. Per-record remote
//! failures are collected and do not abort the run. Failure to persist a
//! provisional-to-permanent remap is fatal because continuing would leave
//! dangling references.
//!
//! `--dry-run` walks the same phases in the same order but performs no
//! writes, local or remote.

use crate::diff::{self, ChangeSet, Field, StateTransition};
use crate::error::{Result, SyncError};
use crate::lock;
use crate::model::{Issue, IssueNumber};
use crate::remote::{BatchEditResult, BatchUpdate, RemoteTracker};
use crate::store::{
    self, CategoryEntry, IssueFile, LabelEntry, MilestoneEntry, Paths, ProjectEntry,
};
use crate::util::id::{self, IdMapping};
use crate::util::progress::PushProgress;
use chrono::Utc;
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use tracing::{debug, info, warn};

const DEFAULT_LABEL_COLOR: &str = "ededed";

/// Options controlling a push run.
#[derive(Debug, Clone, Default)]
pub struct PushOptions {
    /// Issue numbers or file names to push; empty means everything.
    pub selection: Vec<String>,
    /// Overwrite remote state with local state, skipping the merge.
    pub force: bool,
    /// Leave pending comments untouched.
    pub skip_comments: bool,
    /// Analyze and report without writing anywhere.
    pub dry_run: bool,
    /// Draw a progress bar.
    pub show_progress: bool,
}

/// One provisional record materialized during the run.
#[derive(Debug, Clone)]
pub struct CreatedIssue {
    pub provisional: String,
    /// `None` in a dry run, where no number is assigned.
    pub permanent: Option<String>,
    pub title: String,
}

/// Outcome of a push run.
#[derive(Debug, Default)]
pub struct PushReport {
    pub created: Vec<CreatedIssue>,
    pub updated: Vec<String>,
    pub unchanged: usize,
    /// Conflicted records, with the diverging fields in fixed field order.
    pub conflicts: Vec<(String, Vec<Field>)>,
    /// Per-record failures that did not abort the run.
    pub failed: Vec<(String, String)>,
    pub comments_posted: usize,
    /// Labels a real run would have to create (populated in dry runs).
    pub would_create_labels: Vec<String>,
    /// Milestones a real run would have to create (populated in dry runs).
    pub would_create_milestones: Vec<String>,
    /// Files that could not be parsed and were left alone.
    pub skipped_files: Vec<(PathBuf, String)>,
    pub dry_run: bool,
}

impl PushReport {
    /// True when anything needs the user's attention.
    #[must_use]
    pub fn has_problems(&self) -> bool {
        !self.conflicts.is_empty() || !self.failed.is_empty()
    }

    /// True when the run had nothing to do.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.created.is_empty()
            && self.updated.is_empty()
            && self.comments_posted == 0
            && self.would_create_labels.is_empty()
            && self.would_create_milestones.is_empty()
            && !self.has_problems()
    }
}

/// Run a push against `remote` for the store at `paths`.
///
/// # Errors
///
/// Returns `NotInitialized` for a missing store, `LockTimeout` when another
/// push holds the lock, `Mapping` when a permanent id could not be
/// persisted locally, and `Remote` for failures in the non-per-record
/// remote calls (vocabulary setup, the batch fetch).
pub fn push(paths: &Paths, remote: &dyn RemoteTracker, options: &PushOptions) -> Result<PushReport> {
    if !paths.is_initialized() {
        return Err(SyncError::NotInitialized);
    }
    let _lock = lock::acquire(&paths.sync_dir, lock::DEFAULT_TIMEOUT)?;

    let outcome = store::load_local_issues(paths)?;
    let mut all = outcome.issues;
    let selected_paths: BTreeSet<PathBuf> =
        store::filter_by_selection(all.clone(), &options.selection)?
            .into_iter()
            .map(|file| file.path)
            .collect();

    let mut report = PushReport {
        skipped_files: outcome.skipped,
        dry_run: options.dry_run,
        ..PushReport::default()
    };

    let progress = PushProgress::new(selected_paths.len() as u64, options.show_progress);

    progress.set_phase("Checking vocab");
    let selected_issues: Vec<&Issue> = all
        .iter()
        .filter(|file| selected_paths.contains(&file.path))
        .map(|file| &file.issue)
        .collect();
    ensure_labels(paths, remote, &selected_issues, options.dry_run, &mut report)?;
    ensure_milestones(paths, remote, &selected_issues, options.dry_run, &mut report)?;
    let category_ids = category_ids(paths, remote, &selected_issues, options.dry_run)?;
    let project_ids = project_ids(paths, remote, &selected_issues, options.dry_run)?;

    progress.set_phase("Creating");
    let mapping = create_provisional(
        paths,
        remote,
        &mut all,
        &selected_paths,
        options,
        &category_ids,
        &project_ids,
        &mut report,
        &progress,
    )?;

    progress.set_phase("Updating");
    let conflicted = update_permanent(
        paths,
        remote,
        &mut all,
        &selected_paths,
        options,
        &category_ids,
        &project_ids,
        &mut report,
        &progress,
    )?;

    if !options.skip_comments {
        progress.set_phase("Comments");
        post_comments(
            paths,
            remote,
            &mapping,
            &conflicted,
            options,
            &mut report,
            &progress,
        )?;
    }

    progress.done();
    Ok(report)
}

// ============================================================================
// Vocabulary setup
// ============================================================================

fn ensure_labels(
    paths: &Paths,
    remote: &dyn RemoteTracker,
    issues: &[&Issue],
    dry_run: bool,
    report: &mut PushReport,
) -> Result<()> {
    let used: BTreeSet<String> = issues
        .iter()
        .flat_map(|issue| issue.labels.iter().cloned())
        .collect();
    if used.is_empty() {
        return Ok(());
    }

    let mut cache = store::load_label_cache(paths)?;
    let mut known: BTreeSet<String> = cache.labels.iter().map(|l| l.name.clone()).collect();
    if used.is_subset(&known) {
        return Ok(());
    }
    if dry_run {
        // Read-only narrowing against the live vocabulary; nothing is
        // created and the cache file stays as it was.
        let listed: BTreeSet<String> =
            remote.list_labels()?.into_iter().map(|l| l.name).collect();
        report.would_create_labels = used.difference(&listed).cloned().collect();
        return Ok(());
    }

    // Cache is behind; refresh before deciding what to create.
    cache.labels = remote
        .list_labels()?
        .into_iter()
        .map(|l| LabelEntry {
            name: l.name,
            color: l.color,
        })
        .collect();
    known = cache.labels.iter().map(|l| l.name.clone()).collect();

    for name in used.difference(&known) {
        info!(label = %name, "creating missing label");
        remote.create_label(name, DEFAULT_LABEL_COLOR)?;
        cache.labels.push(LabelEntry {
            name: name.clone(),
            color: DEFAULT_LABEL_COLOR.to_string(),
        });
    }
    cache.synced_at = Some(Utc::now());
    store::save_label_cache(paths, &cache)
}

fn ensure_milestones(
    paths: &Paths,
    remote: &dyn RemoteTracker,
    issues: &[&Issue],
    dry_run: bool,
    report: &mut PushReport,
) -> Result<()> {
    let used: BTreeSet<String> = issues
        .iter()
        .filter_map(|issue| issue.milestone.clone())
        .collect();
    if used.is_empty() {
        return Ok(());
    }

    let mut cache = store::load_milestone_cache(paths)?;
    let mut known: BTreeSet<String> = cache.milestones.iter().map(|m| m.title.clone()).collect();
    if used.is_subset(&known) {
        return Ok(());
    }
    if dry_run {
        let listed: BTreeSet<String> = remote
            .list_milestones()?
            .into_iter()
            .map(|m| m.title)
            .collect();
        report.would_create_milestones = used.difference(&listed).cloned().collect();
        return Ok(());
    }

    cache.milestones = remote
        .list_milestones()?
        .into_iter()
        .map(|m| MilestoneEntry {
            title: m.title,
            state: m.state,
        })
        .collect();
    known = cache.milestones.iter().map(|m| m.title.clone()).collect();

    for title in used.difference(&known) {
        info!(milestone = %title, "creating missing milestone");
        remote.create_milestone(title)?;
        cache.milestones.push(MilestoneEntry {
            title: title.clone(),
            state: "open".to_string(),
        });
    }
    cache.synced_at = Some(Utc::now());
    store::save_milestone_cache(paths, &cache)
}

/// Lowercased category name to remote category id. Categories cannot be
/// created through the remote API, so an unknown one becomes a per-record
/// failure later instead of aborting here.
fn category_ids(
    paths: &Paths,
    remote: &dyn RemoteTracker,
    issues: &[&Issue],
    dry_run: bool,
) -> Result<BTreeMap<String, String>> {
    let used: BTreeSet<String> = issues
        .iter()
        .filter_map(|issue| issue.category.as_ref().map(|c| c.to_lowercase()))
        .collect();

    let mut cache = store::load_category_cache(paths)?;
    let ids = |cache: &store::CategoryCache| {
        cache
            .categories
            .iter()
            .map(|c| (c.name.to_lowercase(), c.id.clone()))
            .collect::<BTreeMap<String, String>>()
    };

    let mut known = ids(&cache);
    if !dry_run && !used.iter().all(|name| known.contains_key(name)) {
        cache.categories = remote
            .list_categories()?
            .into_iter()
            .map(|c| CategoryEntry {
                id: c.id,
                name: c.name,
            })
            .collect();
        cache.synced_at = Some(Utc::now());
        store::save_category_cache(paths, &cache)?;
        known = ids(&cache);
    }
    Ok(known)
}

/// Lowercased project title to remote project id, refreshed like
/// categories.
fn project_ids(
    paths: &Paths,
    remote: &dyn RemoteTracker,
    issues: &[&Issue],
    dry_run: bool,
) -> Result<BTreeMap<String, String>> {
    let used: BTreeSet<String> = issues
        .iter()
        .flat_map(|issue| issue.projects.iter().map(|p| p.to_lowercase()))
        .collect();

    let mut cache = store::load_project_cache(paths)?;
    let ids = |cache: &store::ProjectCache| {
        cache
            .projects
            .iter()
            .map(|p| (p.title.to_lowercase(), p.id.clone()))
            .collect::<BTreeMap<String, String>>()
    };

    let mut known = ids(&cache);
    if !dry_run && !used.iter().all(|title| known.contains_key(title)) {
        cache.projects = remote
            .list_projects()?
            .into_iter()
            .map(|p| ProjectEntry {
                id: p.id,
                title: p.title,
            })
            .collect();
        cache.synced_at = Some(Utc::now());
        store::save_project_cache(paths, &cache)?;
        known = ids(&cache);
    }
    Ok(known)
}

// ============================================================================
// Phase: create provisional records
// ============================================================================

#[allow(clippy::too_many_arguments)]
fn create_provisional(
    paths: &Paths,
    remote: &dyn RemoteTracker,
    all: &mut [IssueFile],
    selected: &BTreeSet<PathBuf>,
    options: &PushOptions,
    category_ids: &BTreeMap<String, String>,
    project_ids: &BTreeMap<String, String>,
    report: &mut PushReport,
    progress: &PushProgress,
) -> Result<IdMapping> {
    let provisional_idx: Vec<usize> = all
        .iter()
        .enumerate()
        .filter(|(_, file)| {
            selected.contains(&file.path) && file.issue.number.is_provisional()
        })
        .map(|(idx, _)| idx)
        .collect();

    let mut mapping = IdMapping::new();
    let mut created_idx = Vec::new();

    for idx in provisional_idx {
        let provisional = all[idx].issue.number.as_str().to_string();
        let title = all[idx].issue.title.clone();
        progress.log(&format!("creating {provisional} ({title})"));

        if options.dry_run {
            report.created.push(CreatedIssue {
                provisional,
                permanent: None,
                title,
            });
            progress.advance();
            continue;
        }

        let permanent = match remote.create_issue(&all[idx].issue.normalized()) {
            Ok(number) => number,
            Err(e) => {
                warn!(issue = %provisional, "create failed: {e}");
                report.failed.push((provisional, e.to_string()));
                progress.advance();
                continue;
            }
        };

        // Remap every reference to the fresh number across the whole
        // store immediately; a half-applied remap is unrecoverable, so
        // persistence failures abort the run.
        let step: IdMapping = std::iter::once((provisional.clone(), permanent.clone())).collect();
        for file in all.iter_mut() {
            if id::rewrite_references(&mut file.issue, &step) {
                file.save()
                    .and_then(|()| file.rename_canonical())
                    .map_err(|e| SyncError::Mapping {
                        from: provisional.clone(),
                        to: permanent.clone(),
                        reason: e.to_string(),
                    })?;
            }
        }
        mapping.insert(provisional.clone(), permanent.clone());
        created_idx.push(idx);
        report.created.push(CreatedIssue {
            provisional,
            permanent: Some(permanent),
            title,
        });
        progress.advance();
    }

    // Relationship, category, and project sync happens once every number
    // is final, so a parent created later in the loop resolves too.
    let now = Utc::now();
    for idx in created_idx {
        let number = all[idx].issue.number.as_str().to_string();
        let mut settled = true;
        if let Err(e) = post_create_sync(remote, &all[idx].issue, category_ids, project_ids) {
            report.failed.push((number.clone(), e.to_string()));
            settled = false;
        }
        if all[idx].issue.state == crate::model::State::Closed {
            // Records authored directly as closed get closed right after
            // creation; the remote always creates issues open.
            let reason = close_reason(all[idx].issue.state_reason.as_deref());
            if let Err(e) = remote.close_issue(&number, Some(reason)) {
                report.failed.push((number.clone(), e.to_string()));
                settled = false;
            }
        }
        if !settled {
            // The remote rejected part of this record; without a snapshot
            // the next push falls back to the remote baseline and retries
            // exactly what was refused.
            continue;
        }
        all[idx].issue.synced_at = Some(now);
        all[idx].save()?;
        store::write_original(paths, &all[idx].issue)?;
    }

    Ok(mapping)
}

fn post_create_sync(
    remote: &dyn RemoteTracker,
    issue: &Issue,
    category_ids: &BTreeMap<String, String>,
    project_ids: &BTreeMap<String, String>,
) -> Result<()> {
    let number = issue.number.as_str();
    if issue.parent.is_some() || !issue.blocked_by.is_empty() {
        check_refs_permanent(issue)?;
        remote.sync_relationships(number, issue)?;
    }
    if let Some(category) = &issue.category {
        let id = category_ids
            .get(&category.to_lowercase())
            .ok_or_else(|| SyncError::Config(format!("unknown category '{category}'")))?;
        remote.set_category(number, Some(id))?;
    }
    if !issue.projects.is_empty() {
        remote.sync_projects(number, &issue.projects, project_ids)?;
    }
    Ok(())
}

fn check_refs_permanent(issue: &Issue) -> Result<()> {
    let provisional = issue
        .parent
        .iter()
        .chain(issue.blocked_by.iter())
        .find(|r| r.is_provisional());
    match provisional {
        Some(r) => Err(SyncError::remote(
            format!("syncing relationships for #{}", issue.number),
            format!("reference '{r}' has not been pushed yet"),
        )),
        None => Ok(()),
    }
}

// ============================================================================
// Phase: update permanent records
// ============================================================================

struct PendingUpdate {
    idx: usize,
    change: ChangeSet,
}

#[allow(clippy::too_many_arguments, clippy::too_many_lines)]
fn update_permanent(
    paths: &Paths,
    remote: &dyn RemoteTracker,
    all: &mut [IssueFile],
    selected: &BTreeSet<PathBuf>,
    options: &PushOptions,
    category_ids: &BTreeMap<String, String>,
    project_ids: &BTreeMap<String, String>,
    report: &mut PushReport,
    progress: &PushProgress,
) -> Result<BTreeSet<String>> {
    let just_created: BTreeSet<String> = report
        .created
        .iter()
        .filter_map(|c| c.permanent.clone())
        .collect();
    let update_idx: Vec<usize> = all
        .iter()
        .enumerate()
        .filter(|(_, file)| {
            selected.contains(&file.path)
                && !file.issue.number.is_provisional()
                && !just_created.contains(file.issue.number.as_str())
        })
        .map(|(idx, _)| idx)
        .collect();

    let mut conflicted = BTreeSet::new();
    if update_idx.is_empty() {
        return Ok(conflicted);
    }

    // A permanent number must be decimal; anything else would poison the
    // batched fetch, so it fails alone.
    let mut numbers = Vec::new();
    let mut fetch_idx = Vec::new();
    for &idx in &update_idx {
        let number = all[idx].issue.number.as_str().to_string();
        if number.parse::<u64>().is_err() {
            report
                .failed
                .push((number, "invalid issue number".to_string()));
            progress.advance();
            continue;
        }
        numbers.push(number);
        fetch_idx.push(idx);
    }
    debug!(count = numbers.len(), "fetching remote snapshots");
    let remote_issues = remote.fetch_issues(&numbers)?;

    let now = Utc::now();
    let mut batch = Vec::new();
    let mut pending = Vec::new();

    for idx in fetch_idx {
        let number = all[idx].issue.number.as_str().to_string();
        let Some(snapshot) = remote_issues.get(&number) else {
            report
                .failed
                .push((number, "issue not found on remote".to_string()));
            progress.advance();
            continue;
        };

        // The batched fetch does not carry blocks (the derived reverse of
        // blocked-by) or project membership; local is authoritative for
        // those, so they are excluded from the merge by mirroring the
        // local values. blocked-by comes from the fetch and merges like
        // any other field.
        let mut snapshot = snapshot.clone();
        snapshot.number = all[idx].issue.number.clone();
        snapshot.blocks = all[idx].issue.blocks.clone();
        snapshot.projects = all[idx].issue.projects.clone();

        // Without a snapshot of the last sync, the remote side doubles as
        // the baseline and only local changes apply.
        let base = store::read_original(paths, &all[idx].issue.number)
            .unwrap_or_else(|| snapshot.clone());

        let (merged, conflicts) = if options.force {
            (all[idx].issue.normalized(), Vec::new())
        } else {
            let outcome = diff::three_way_merge(&base, &all[idx].issue, &snapshot);
            (outcome.merged, outcome.conflicts)
        };

        if !conflicts.is_empty() {
            progress.log(&format!(
                "conflict on #{number}: {}",
                conflicts
                    .iter()
                    .map(|f| f.name())
                    .collect::<Vec<_>>()
                    .join(", ")
            ));
            conflicted.insert(number.clone());
            report.conflicts.push((number, conflicts));
            progress.advance();
            continue;
        }

        // Remote-side edits flow into the local file as part of the merge.
        if !merged.equal_ignoring_synced_at(&all[idx].issue) && !options.dry_run {
            let synced_at = all[idx].issue.synced_at;
            all[idx].issue = merged.clone();
            all[idx].issue.synced_at = synced_at;
            all[idx].save()?;
            all[idx].rename_canonical()?;
        }

        let mut change = diff::diff_issue(&snapshot, &merged);
        // Project membership was mirrored into the snapshot above, so its
        // changes must be measured against the last-synced baseline
        // instead.
        let baseline_change = diff::diff_issue(&base, &merged);
        change.add_projects = baseline_change.add_projects;
        change.remove_projects = baseline_change.remove_projects;

        if change.is_empty() {
            report.unchanged += 1;
            if !options.dry_run {
                all[idx].issue.synced_at = Some(now);
                all[idx].save()?;
                store::write_original(paths, &all[idx].issue)?;
            }
            progress.advance();
            continue;
        }

        if options.dry_run {
            report.updated.push(number);
            progress.advance();
            continue;
        }

        if change.has_edits() {
            batch.push(batch_update(&number, &change));
        }
        pending.push(PendingUpdate { idx, change });
    }

    let edit_result = if batch.is_empty() {
        BatchEditResult::default()
    } else {
        remote.edit_issues(&batch)?
    };

    for update in pending {
        let idx = update.idx;
        let number = all[idx].issue.number.as_str().to_string();
        if let Some(message) = edit_result.errors.get(&number) {
            report.failed.push((number, message.clone()));
            progress.advance();
            continue;
        }

        if let Err(e) = apply_side_effects(
            remote,
            &all[idx].issue,
            &update.change,
            category_ids,
            project_ids,
        ) {
            report.failed.push((number, e.to_string()));
            progress.advance();
            continue;
        }

        all[idx].issue.synced_at = Some(now);
        all[idx].save()?;
        store::write_original(paths, &all[idx].issue)?;
        report.updated.push(number);
        progress.advance();
    }

    Ok(conflicted)
}

/// Non-batchable changes: state transitions, relationships, category, and
/// project membership, each applied per record.
fn apply_side_effects(
    remote: &dyn RemoteTracker,
    issue: &Issue,
    change: &ChangeSet,
    category_ids: &BTreeMap<String, String>,
    project_ids: &BTreeMap<String, String>,
) -> Result<()> {
    let number = issue.number.as_str();
    match change.state_transition {
        Some(StateTransition::Close) => {
            let reason = close_reason(change.state_reason.as_deref());
            remote.close_issue(number, Some(reason))?;
        }
        Some(StateTransition::Reopen) => remote.reopen_issue(number)?,
        None => {}
    }
    if change.relationships_changed() {
        check_refs_permanent(issue)?;
        remote.sync_relationships(number, issue)?;
    }
    match &change.category {
        Some(Some(category)) => {
            let id = category_ids
                .get(&category.to_lowercase())
                .ok_or_else(|| SyncError::Config(format!("unknown category '{category}'")))?;
            remote.set_category(number, Some(id))?;
        }
        Some(None) => remote.set_category(number, None)?,
        None => {}
    }
    if change.projects_changed() {
        remote.sync_projects(number, &issue.projects, project_ids)?;
    }
    Ok(())
}

fn batch_update(number: &str, change: &ChangeSet) -> BatchUpdate {
    BatchUpdate {
        number: number.to_string(),
        title: change.title.clone(),
        body: change.body.clone(),
        milestone: change.milestone.clone(),
        add_labels: change.add_labels.clone(),
        remove_labels: change.remove_labels.clone(),
        add_assignees: change.add_assignees.clone(),
        remove_assignees: change.remove_assignees.clone(),
    }
}

/// Close reason in the form the remote accepts.
fn close_reason(state_reason: Option<&str>) -> &'static str {
    match state_reason {
        Some("not_planned" | "not planned") => "not planned",
        _ => "completed",
    }
}

// ============================================================================
// Phase: pending comments
// ============================================================================

#[allow(clippy::too_many_arguments)]
fn post_comments(
    paths: &Paths,
    remote: &dyn RemoteTracker,
    mapping: &IdMapping,
    conflicted: &BTreeSet<String>,
    options: &PushOptions,
    report: &mut PushReport,
    progress: &PushProgress,
) -> Result<()> {
    let comments = store::load_pending_comments(paths)?;
    // Comment work is only known at this point; grow the bar accordingly.
    progress.add_total(comments.len() as u64);

    for mut comment in comments {
        if let Some(permanent) = mapping.get(comment.number.as_str()) {
            comment.number = IssueNumber::new(permanent.clone());
        }
        if comment.number.is_provisional() {
            warn!(
                comment = %comment.path.display(),
                "leaving comment pending: target issue has not been pushed"
            );
            progress.advance();
            continue;
        }
        if conflicted.contains(comment.number.as_str()) {
            // A conflicted record gets nothing pushed, comments included.
            progress.advance();
            continue;
        }
        if options.dry_run {
            report.comments_posted += 1;
            progress.advance();
            continue;
        }
        match remote.create_comment(comment.number.as_str(), &comment.body) {
            Ok(()) => {
                store::delete_pending_comment(&comment)?;
                report.comments_posted += 1;
            }
            Err(e) => {
                report
                    .failed
                    .push((comment.number.as_str().to_string(), e.to_string()));
            }
        }
        progress.advance();
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{IssueRef, State, document, path_for};
    use crate::remote::{RemoteCategory, RemoteLabel, RemoteMilestone, RemoteProject};
    use std::cell::RefCell;
    use tempfile::TempDir;

    /// In-memory remote recording mutations.
    #[derive(Default)]
    struct MockRemote {
        issues: RefCell<BTreeMap<String, Issue>>,
        labels: RefCell<Vec<String>>,
        next_number: RefCell<u64>,
        comments: RefCell<Vec<(String, String)>>,
        closed: RefCell<Vec<String>>,
        reopened: RefCell<Vec<String>>,
        relationships: RefCell<Vec<String>>,
        edits: RefCell<Vec<BatchUpdate>>,
        fail_edit_for: RefCell<BTreeSet<String>>,
        fail_close: RefCell<bool>,
    }

    impl MockRemote {
        fn new() -> Self {
            Self {
                next_number: RefCell::new(100),
                ..Self::default()
            }
        }

        fn seed(&self, issue: Issue) {
            self.issues
                .borrow_mut()
                .insert(issue.number.as_str().to_string(), issue);
        }
    }

    impl RemoteTracker for MockRemote {
        fn fetch_issues(&self, numbers: &[String]) -> Result<BTreeMap<String, Issue>> {
            let issues = self.issues.borrow();
            Ok(numbers
                .iter()
                .filter_map(|n| issues.get(n).map(|i| (n.clone(), i.clone())))
                .collect())
        }

        fn create_issue(&self, issue: &Issue) -> Result<String> {
            let mut next = self.next_number.borrow_mut();
            let number = next.to_string();
            *next += 1;
            let mut created = issue.clone();
            created.number = IssueNumber::new(number.clone());
            created.state = State::Open;
            self.issues.borrow_mut().insert(number.clone(), created);
            Ok(number)
        }

        fn edit_issues(&self, updates: &[BatchUpdate]) -> Result<BatchEditResult> {
            let mut result = BatchEditResult::default();
            for update in updates {
                if self.fail_edit_for.borrow().contains(&update.number) {
                    result
                        .errors
                        .insert(update.number.clone(), "edit rejected".to_string());
                    continue;
                }
                self.edits.borrow_mut().push(update.clone());
            }
            Ok(result)
        }

        fn close_issue(&self, number: &str, _reason: Option<&str>) -> Result<()> {
            if *self.fail_close.borrow() {
                return Err(SyncError::remote(
                    format!("closing #{number}"),
                    "service unavailable",
                ));
            }
            self.closed.borrow_mut().push(number.to_string());
            Ok(())
        }

        fn reopen_issue(&self, number: &str) -> Result<()> {
            self.reopened.borrow_mut().push(number.to_string());
            Ok(())
        }

        fn sync_relationships(&self, number: &str, _issue: &Issue) -> Result<()> {
            self.relationships.borrow_mut().push(number.to_string());
            Ok(())
        }

        fn set_category(&self, _number: &str, _category_id: Option<&str>) -> Result<()> {
            Ok(())
        }

        fn sync_projects(
            &self,
            _number: &str,
            _projects: &[String],
            _known_ids: &BTreeMap<String, String>,
        ) -> Result<()> {
            Ok(())
        }

        fn create_comment(&self, number: &str, body: &str) -> Result<()> {
            self.comments
                .borrow_mut()
                .push((number.to_string(), body.to_string()));
            Ok(())
        }

        fn list_labels(&self) -> Result<Vec<RemoteLabel>> {
            Ok(self
                .labels
                .borrow()
                .iter()
                .map(|name| RemoteLabel {
                    name: name.clone(),
                    color: "ededed".to_string(),
                })
                .collect())
        }

        fn create_label(&self, name: &str, _color: &str) -> Result<()> {
            self.labels.borrow_mut().push(name.to_string());
            Ok(())
        }

        fn list_milestones(&self) -> Result<Vec<RemoteMilestone>> {
            Ok(Vec::new())
        }

        fn create_milestone(&self, _title: &str) -> Result<()> {
            Ok(())
        }

        fn list_categories(&self) -> Result<Vec<RemoteCategory>> {
            Ok(Vec::new())
        }

        fn list_projects(&self) -> Result<Vec<RemoteProject>> {
            Ok(Vec::new())
        }
    }

    fn store_with(issues: &[Issue]) -> (TempDir, Paths) {
        let dir = TempDir::new().unwrap();
        let paths = Paths::new(dir.path());
        paths.ensure_layout().unwrap();
        for issue in issues {
            let target = paths.dir_for_state(issue.state);
            document::write_file(&path_for(target, &issue.number, &issue.title), issue).unwrap();
        }
        (dir, paths)
    }

    fn issue(number: &str, title: &str) -> Issue {
        Issue {
            number: IssueNumber::from(number),
            title: title.to_string(),
            body: "Body.\n".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_create_materializes_and_rewrites_references() {
        let parent = issue("Taaaa0001", "Parent work");
        let mut child = issue("Tbbbb0002", "Child of #Taaaa0001");
        child.parent = Some(IssueRef::from("Taaaa0001"));
        let (_dir, paths) = store_with(&[parent, child]);
        let remote = MockRemote::new();

        let report = push(&paths, &remote, &PushOptions::default()).unwrap();
        assert_eq!(report.created.len(), 2);
        assert!(report.failed.is_empty(), "{:?}", report.failed);

        let loaded = store::load_local_issues(&paths).unwrap().issues;
        assert!(loaded.iter().all(|f| !f.issue.number.is_provisional()));
        let child = loaded
            .iter()
            .find(|f| f.issue.parent.is_some())
            .unwrap();
        let parent_number = child.issue.parent.as_ref().unwrap();
        assert!(!parent_number.is_provisional());
        assert!(child.issue.title.contains(&format!("#{parent_number}")));
        // Snapshot written under the permanent number.
        assert!(store::read_original(&paths, &child.issue.number).is_some());
        assert!(child.issue.synced_at.is_some());
    }

    #[test]
    fn test_missing_label_is_created_first() {
        let mut record = issue("Tcccc0003", "Tag me");
        record.labels = vec!["brand-new".to_string()];
        let (_dir, paths) = store_with(&[record]);
        let remote = MockRemote::new();

        let report = push(&paths, &remote, &PushOptions::default()).unwrap();
        assert!(report.failed.is_empty());
        assert_eq!(*remote.labels.borrow(), vec!["brand-new"]);
        assert_eq!(store::load_label_cache(&paths).unwrap().labels.len(), 1);
    }

    #[test]
    fn test_clean_update_pushes_diff_and_snapshots() {
        let mut local = issue("100", "New title");
        local.labels = vec!["bug".to_string()];
        let base = issue("100", "Old title");
        let (_dir, paths) = store_with(&[local]);
        store::write_original(&paths, &base).unwrap();
        let remote = MockRemote::new();
        remote.seed(base);
        remote.labels.borrow_mut().push("bug".to_string());

        let report = push(&paths, &remote, &PushOptions::default()).unwrap();
        assert_eq!(report.updated, vec!["100"]);
        assert!(report.failed.is_empty(), "{:?}", report.failed);

        let edits = remote.edits.borrow();
        assert_eq!(edits.len(), 1);
        assert_eq!(edits[0].title.as_deref(), Some("New title"));
        assert_eq!(edits[0].add_labels, vec!["bug"]);

        let snapshot = store::read_original(&paths, &IssueNumber::from("100")).unwrap();
        assert_eq!(snapshot.title, "New title");
    }

    #[test]
    fn test_remote_only_change_flows_into_local_file() {
        let base = issue("100", "Title");
        let (_dir, paths) = store_with(&[base.clone()]);
        store::write_original(&paths, &base).unwrap();
        let mut remote_side = base.clone();
        remote_side.body = "Edited remotely.\n".to_string();
        let remote = MockRemote::new();
        remote.seed(remote_side);

        let report = push(&paths, &remote, &PushOptions::default()).unwrap();
        assert_eq!(report.unchanged, 1);
        assert!(remote.edits.borrow().is_empty());

        let loaded = store::load_local_issues(&paths).unwrap().issues;
        assert_eq!(loaded[0].issue.body, "Edited remotely.\n");
    }

    #[test]
    fn test_conflict_skips_record_entirely() {
        let base = issue("100", "Base");
        let local = issue("100", "Local");
        let mut remote_side = issue("100", "Remote");
        remote_side.state_reason = None;
        let (_dir, paths) = store_with(&[local]);
        store::write_original(&paths, &base).unwrap();
        let remote = MockRemote::new();
        remote.seed(remote_side);

        let report = push(&paths, &remote, &PushOptions::default()).unwrap();
        assert_eq!(report.conflicts.len(), 1);
        assert_eq!(report.conflicts[0].0, "100");
        assert_eq!(report.conflicts[0].1, vec![Field::Title]);
        assert!(remote.edits.borrow().is_empty());

        // Local file untouched, snapshot untouched.
        let loaded = store::load_local_issues(&paths).unwrap().issues;
        assert_eq!(loaded[0].issue.title, "Local");
        let snapshot = store::read_original(&paths, &IssueNumber::from("100")).unwrap();
        assert_eq!(snapshot.title, "Base");
    }

    #[test]
    fn test_force_overwrites_remote() {
        let base = issue("100", "Base");
        let local = issue("100", "Local");
        let remote_side = issue("100", "Remote");
        let (_dir, paths) = store_with(&[local]);
        store::write_original(&paths, &base).unwrap();
        let remote = MockRemote::new();
        remote.seed(remote_side);

        let options = PushOptions {
            force: true,
            ..PushOptions::default()
        };
        let report = push(&paths, &remote, &options).unwrap();
        assert!(report.conflicts.is_empty());
        assert_eq!(report.updated, vec!["100"]);
        assert_eq!(remote.edits.borrow()[0].title.as_deref(), Some("Local"));
    }

    #[test]
    fn test_close_transition_is_separate_from_edits() {
        let base = issue("100", "Title");
        let mut local = base.clone();
        local.state = State::Closed;
        local.state_reason = Some("completed".to_string());
        let (_dir, paths) = store_with(&[local]);
        store::write_original(&paths, &base).unwrap();
        let remote = MockRemote::new();
        remote.seed(base);

        let report = push(&paths, &remote, &PushOptions::default()).unwrap();
        assert_eq!(report.updated, vec!["100"]);
        assert!(remote.edits.borrow().is_empty());
        assert_eq!(*remote.closed.borrow(), vec!["100"]);
    }

    #[test]
    fn test_blocked_by_change_triggers_relationship_sync() {
        let base = issue("100", "Title");
        let mut local = base.clone();
        local.blocked_by = vec![IssueRef::from("101")];
        let (_dir, paths) = store_with(&[local]);
        store::write_original(&paths, &base).unwrap();
        let remote = MockRemote::new();
        remote.seed(base);

        let report = push(&paths, &remote, &PushOptions::default()).unwrap();
        assert_eq!(report.updated, vec!["100"]);
        // No plain field edits, only the relationship call.
        assert!(remote.edits.borrow().is_empty());
        assert_eq!(*remote.relationships.borrow(), vec!["100"]);
    }

    #[test]
    fn test_dry_run_writes_nothing() {
        let provisional = issue("Tdddd0004", "Planned");
        let local = issue("100", "Local");
        let (_dir, paths) = store_with(&[provisional, local]);
        store::write_original(&paths, &issue("100", "Base")).unwrap();
        let remote = MockRemote::new();
        remote.seed(issue("100", "Base"));

        let options = PushOptions {
            dry_run: true,
            ..PushOptions::default()
        };
        let report = push(&paths, &remote, &options).unwrap();
        assert!(report.dry_run);
        assert_eq!(report.created.len(), 1);
        assert!(report.created[0].permanent.is_none());
        assert_eq!(report.updated, vec!["100"]);

        // No remote mutations, no local rewrites.
        assert!(remote.edits.borrow().is_empty());
        assert_eq!(remote.issues.borrow().len(), 1);
        let loaded = store::load_local_issues(&paths).unwrap().issues;
        assert!(loaded.iter().any(|f| f.issue.number.is_provisional()));
    }

    #[test]
    fn test_failed_edit_keeps_snapshot_stale() {
        let base = issue("100", "Base");
        let local = issue("100", "Local");
        let (_dir, paths) = store_with(&[local]);
        store::write_original(&paths, &base).unwrap();
        let remote = MockRemote::new();
        remote.seed(base);
        remote.fail_edit_for.borrow_mut().insert("100".to_string());

        let report = push(&paths, &remote, &PushOptions::default()).unwrap();
        assert_eq!(report.failed.len(), 1);
        assert!(report.updated.is_empty());
        let snapshot = store::read_original(&paths, &IssueNumber::from("100")).unwrap();
        assert_eq!(snapshot.title, "Base");
    }

    #[test]
    fn test_comments_posted_and_remapped() {
        let provisional = issue("Teeee0005", "With comment");
        let (_dir, paths) = store_with(&[provisional]);
        std::fs::write(
            paths.comments_dir.join("Teeee0005-note.md"),
            "First comment.\n",
        )
        .unwrap();
        let remote = MockRemote::new();

        let report = push(&paths, &remote, &PushOptions::default()).unwrap();
        assert_eq!(report.comments_posted, 1);
        let comments = remote.comments.borrow();
        assert_eq!(comments.len(), 1);
        assert_eq!(comments[0].0, report.created[0].permanent.clone().unwrap());
        assert!(store::load_pending_comments(&paths).unwrap().is_empty());
    }

    #[test]
    fn test_selection_limits_scope() {
        let a = issue("100", "Alpha");
        let b = issue("101", "Beta");
        let (_dir, paths) = store_with(&[a.clone(), b.clone()]);
        store::write_original(&paths, &issue("100", "Old alpha")).unwrap();
        store::write_original(&paths, &issue("101", "Old beta")).unwrap();
        let remote = MockRemote::new();
        remote.seed(issue("100", "Old alpha"));
        remote.seed(issue("101", "Old beta"));

        let options = PushOptions {
            selection: vec!["100".to_string()],
            ..PushOptions::default()
        };
        let report = push(&paths, &remote, &options).unwrap();
        assert_eq!(report.updated, vec!["100"]);
        assert_eq!(remote.edits.borrow().len(), 1);
    }

    #[test]
    fn test_uninitialized_store_fails() {
        let dir = TempDir::new().unwrap();
        let paths = Paths::new(dir.path());
        let remote = MockRemote::new();
        let err = push(&paths, &remote, &PushOptions::default()).unwrap_err();
        assert!(matches!(err, SyncError::NotInitialized));
    }

    #[test]
    fn test_missing_remote_issue_is_reported() {
        let local = issue("999", "Ghost");
        let (_dir, paths) = store_with(&[local]);
        let remote = MockRemote::new();

        let report = push(&paths, &remote, &PushOptions::default()).unwrap();
        assert_eq!(report.failed.len(), 1);
        assert!(report.failed[0].1.contains("not found"));
    }

    #[test]
    fn test_failed_close_on_create_keeps_record_pending() {
        // A record authored directly as closed whose close call fails must
        // not be snapshotted, so the next push retries the close.
        let mut record = issue("Tffff0006", "Done before push");
        record.state = State::Closed;
        record.state_reason = Some("completed".to_string());
        let (_dir, paths) = store_with(&[record]);
        let remote = MockRemote::new();
        *remote.fail_close.borrow_mut() = true;

        let report = push(&paths, &remote, &PushOptions::default()).unwrap();
        let permanent = report.created[0].permanent.clone().unwrap();
        assert_eq!(report.failed.len(), 1);
        assert!(remote.closed.borrow().is_empty());
        assert!(store::read_original(&paths, &IssueNumber::from(permanent.as_str())).is_none());
        let loaded = store::load_local_issues(&paths).unwrap().issues;
        assert!(loaded[0].issue.synced_at.is_none());

        // The remote recovers; the re-run picks the close back up.
        *remote.fail_close.borrow_mut() = false;
        let report = push(&paths, &remote, &PushOptions::default()).unwrap();
        assert!(report.failed.is_empty(), "{:?}", report.failed);
        assert_eq!(report.updated, vec![permanent.clone()]);
        assert_eq!(*remote.closed.borrow(), vec![permanent.clone()]);
        let snapshot = store::read_original(&paths, &IssueNumber::from(permanent.as_str())).unwrap();
        assert_eq!(snapshot.state, State::Closed);
    }

    #[test]
    fn test_non_numeric_permanent_number_fails_alone() {
        let bad = issue("12abc", "Mangled number");
        let good = issue("100", "Fine");
        let (_dir, paths) = store_with(&[bad, good]);
        store::write_original(&paths, &issue("100", "Fine")).unwrap();
        let remote = MockRemote::new();
        remote.seed(issue("100", "Fine"));

        let report = push(&paths, &remote, &PushOptions::default()).unwrap();
        assert_eq!(
            report.failed,
            vec![("12abc".to_string(), "invalid issue number".to_string())]
        );
        assert_eq!(report.unchanged, 1);
    }

    #[test]
    fn test_remote_blocked_by_edit_flows_into_local() {
        let base = issue("100", "Title");
        let (_dir, paths) = store_with(&[base.clone()]);
        store::write_original(&paths, &base).unwrap();
        let mut remote_side = base.clone();
        remote_side.blocked_by = vec![IssueRef::from("7")];
        let remote = MockRemote::new();
        remote.seed(remote_side);

        let report = push(&paths, &remote, &PushOptions::default()).unwrap();
        assert_eq!(report.unchanged, 1);
        assert!(report.conflicts.is_empty());
        // The edit came from the remote, so nothing is pushed back.
        assert!(remote.relationships.borrow().is_empty());
        let loaded = store::load_local_issues(&paths).unwrap().issues;
        assert_eq!(loaded[0].issue.blocked_by, vec![IssueRef::from("7")]);
    }

    #[test]
    fn test_blocked_by_conflict_detected() {
        let base = issue("100", "Title");
        let mut local = base.clone();
        local.blocked_by = vec![IssueRef::from("101")];
        let mut remote_side = base.clone();
        remote_side.blocked_by = vec![IssueRef::from("7")];
        let (_dir, paths) = store_with(&[local]);
        store::write_original(&paths, &base).unwrap();
        let remote = MockRemote::new();
        remote.seed(remote_side);

        let report = push(&paths, &remote, &PushOptions::default()).unwrap();
        assert_eq!(report.conflicts.len(), 1);
        assert_eq!(report.conflicts[0].1, vec![Field::BlockedBy]);
        assert!(remote.relationships.borrow().is_empty());
    }

    #[test]
    fn test_dry_run_reports_missing_vocabulary() {
        let mut record = issue("Tgggg0007", "Needs vocab");
        record.labels = vec!["brand-new".to_string()];
        record.milestone = Some("v2".to_string());
        let (_dir, paths) = store_with(&[record]);
        let remote = MockRemote::new();

        let options = PushOptions {
            dry_run: true,
            ..PushOptions::default()
        };
        let report = push(&paths, &remote, &options).unwrap();
        assert_eq!(report.would_create_labels, vec!["brand-new"]);
        assert_eq!(report.would_create_milestones, vec!["v2"]);
        // Nothing was created and the cache was not touched.
        assert!(remote.labels.borrow().is_empty());
        assert!(store::load_label_cache(&paths).unwrap().labels.is_empty());
    }
}
