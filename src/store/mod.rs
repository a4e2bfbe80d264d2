//! Local issue store: directory layout and persistence.
//!
//! Layout under the workspace root:
//!
//! ```text
//! .issues/
//!   open/                   one .md file per open issue
//!   closed/                 one .md file per closed issue
//!   comments/               pending comments awaiting push
//!   .sync/
//!     config.json           remote repository coordinates
//!     lock.json             push mutual-exclusion marker
//!     labels.json           vocabulary caches
//!     milestones.json
//!     categories.json
//!     projects.json
//!     originals/<number>.md last-synced snapshot per permanent id
//! ```
//!
//! Only the push orchestrator writes here, and only while holding the
//! lock. Original snapshots are immutable once written and replaced
//! wholesale on the next successful sync.

use crate::error::{Result, SyncError};
use crate::model::{self, Issue, IssueNumber, State, document};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

pub const ISSUES_DIR_NAME: &str = ".issues";
pub const SYNC_DIR_NAME: &str = ".sync";
pub const ORIGINALS_DIR_NAME: &str = "originals";
pub const OPEN_DIR_NAME: &str = "open";
pub const CLOSED_DIR_NAME: &str = "closed";
pub const COMMENTS_DIR_NAME: &str = "comments";
pub const CONFIG_FILE_NAME: &str = "config.json";

/// Resolved locations of the store's fixed layout.
#[derive(Debug, Clone)]
pub struct Paths {
    pub root: PathBuf,
    pub issues_dir: PathBuf,
    pub sync_dir: PathBuf,
    pub originals_dir: PathBuf,
    pub open_dir: PathBuf,
    pub closed_dir: PathBuf,
    pub comments_dir: PathBuf,
    pub config_path: PathBuf,
}

impl Paths {
    /// Compute the layout rooted at `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let issues_dir = root.join(ISSUES_DIR_NAME);
        let sync_dir = issues_dir.join(SYNC_DIR_NAME);
        Self {
            originals_dir: sync_dir.join(ORIGINALS_DIR_NAME),
            open_dir: issues_dir.join(OPEN_DIR_NAME),
            closed_dir: issues_dir.join(CLOSED_DIR_NAME),
            comments_dir: issues_dir.join(COMMENTS_DIR_NAME),
            config_path: sync_dir.join(CONFIG_FILE_NAME),
            root,
            issues_dir,
            sync_dir,
        }
    }

    /// Create every directory of the layout.
    ///
    /// # Errors
    ///
    /// Returns `Io` on directory creation failure.
    pub fn ensure_layout(&self) -> Result<()> {
        for dir in [
            &self.issues_dir,
            &self.sync_dir,
            &self.originals_dir,
            &self.open_dir,
            &self.closed_dir,
            &self.comments_dir,
        ] {
            fs::create_dir_all(dir)?;
        }
        Ok(())
    }

    /// True once `ensure_layout` has run here.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.issues_dir.is_dir() && self.sync_dir.is_dir()
    }

    /// Directory an issue file belongs in, by state.
    #[must_use]
    pub fn dir_for_state(&self, state: State) -> &Path {
        match state {
            State::Open => &self.open_dir,
            State::Closed => &self.closed_dir,
        }
    }
}

/// One issue loaded from disk together with its file location.
#[derive(Debug, Clone)]
pub struct IssueFile {
    pub path: PathBuf,
    pub issue: Issue,
}

impl IssueFile {
    /// Re-render the issue to its current path.
    ///
    /// # Errors
    ///
    /// Returns `Yaml` or `Io` per [`document::write_file`].
    pub fn save(&self) -> Result<()> {
        document::write_file(&self.path, &self.issue)
    }

    /// Move the file to the canonical name for its (possibly new) number
    /// and title, staying in the same directory.
    ///
    /// # Errors
    ///
    /// Returns `Io` if the rename fails.
    pub fn rename_canonical(&mut self) -> Result<()> {
        let Some(dir) = self.path.parent() else {
            return Ok(());
        };
        let new_path = model::path_for(dir, &self.issue.number, &self.issue.title);
        if new_path != self.path {
            fs::rename(&self.path, &new_path)?;
            self.path = new_path;
        }
        Ok(())
    }
}

/// Result of scanning the store: parsed issues plus files that failed to
/// parse (reported, not fatal).
#[derive(Debug, Default)]
pub struct LoadOutcome {
    pub issues: Vec<IssueFile>,
    pub skipped: Vec<(PathBuf, String)>,
}

/// Load every issue file from the open and closed directories, sorted by
/// path for deterministic ordering.
///
/// # Errors
///
/// Returns `Io` if a directory scan fails. Individual malformed files land
/// in `skipped`.
pub fn load_local_issues(paths: &Paths) -> Result<LoadOutcome> {
    let mut outcome = LoadOutcome::default();
    for dir in [&paths.open_dir, &paths.closed_dir] {
        if !dir.is_dir() {
            continue;
        }
        let mut entries: Vec<PathBuf> = fs::read_dir(dir)?
            .filter_map(std::result::Result::ok)
            .map(|entry| entry.path())
            .filter(|path| path.extension().is_some_and(|ext| ext == "md"))
            .collect();
        entries.sort();
        for path in entries {
            match document::parse_file(&path) {
                Ok(issue) => outcome.issues.push(IssueFile { path, issue }),
                Err(e) => {
                    warn!(path = %path.display(), "skipping malformed issue file: {e}");
                    outcome.skipped.push((path, e.to_string()));
                }
            }
        }
    }
    Ok(outcome)
}

/// Restrict loaded issues to a selection of issue numbers or file paths.
/// An empty selection selects everything.
///
/// # Errors
///
/// Returns `Config` for a selection entry matching nothing, so typos fail
/// loudly instead of silently pushing nothing.
pub fn filter_by_selection(issues: Vec<IssueFile>, selection: &[String]) -> Result<Vec<IssueFile>> {
    if selection.is_empty() {
        return Ok(issues);
    }
    let mut filtered = Vec::new();
    for wanted in selection {
        let matched: Vec<&IssueFile> = issues
            .iter()
            .filter(|item| {
                item.issue.number.as_str() == wanted
                    || item.path.ends_with(wanted)
                    || item
                        .path
                        .file_name()
                        .is_some_and(|name| name.to_string_lossy() == *wanted)
            })
            .collect();
        if matched.is_empty() {
            return Err(SyncError::Config(format!(
                "no local issue matches '{wanted}'"
            )));
        }
        for item in matched {
            if !filtered
                .iter()
                .any(|existing: &IssueFile| existing.path == item.path)
            {
                filtered.push(item.clone());
            }
        }
    }
    Ok(filtered)
}

/// Read the original (last-synced) snapshot for an issue number.
///
/// A missing or corrupt snapshot reads as `None`: the orchestrator then
/// falls back to the remote as merge baseline rather than aborting.
#[must_use]
pub fn read_original(paths: &Paths, number: &IssueNumber) -> Option<Issue> {
    let path = paths.originals_dir.join(format!("{number}.md"));
    if !path.is_file() {
        return None;
    }
    match document::parse_file(&path) {
        Ok(issue) => Some(issue),
        Err(e) => {
            warn!(path = %path.display(), "treating corrupt original snapshot as absent: {e}");
            None
        }
    }
}

/// Replace the original snapshot for an issue wholesale.
///
/// # Errors
///
/// Returns `Yaml` or `Io` on failure.
pub fn write_original(paths: &Paths, issue: &Issue) -> Result<()> {
    fs::create_dir_all(&paths.originals_dir)?;
    let path = paths.originals_dir.join(format!("{}.md", issue.number));
    document::write_file(&path, issue)
}

// ============================================================================
// Vocabulary caches
// ============================================================================

/// Cached remote label vocabulary.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LabelCache {
    #[serde(default)]
    pub labels: Vec<LabelEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub synced_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabelEntry {
    pub name: String,
    pub color: String,
}

/// Cached remote milestone vocabulary.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MilestoneCache {
    #[serde(default)]
    pub milestones: Vec<MilestoneEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub synced_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MilestoneEntry {
    pub title: String,
    #[serde(default)]
    pub state: String,
}

/// Cached remote category (issue type) vocabulary.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CategoryCache {
    #[serde(default)]
    pub categories: Vec<CategoryEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub synced_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryEntry {
    pub id: String,
    pub name: String,
}

/// Cached remote project vocabulary.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProjectCache {
    #[serde(default)]
    pub projects: Vec<ProjectEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub synced_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectEntry {
    pub id: String,
    pub title: String,
}

fn load_cache<T: Default + for<'de> Deserialize<'de>>(path: &Path) -> Result<T> {
    let data = match fs::read_to_string(path) {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(T::default()),
        Err(e) => return Err(e.into()),
    };
    Ok(serde_json::from_str(&data)?)
}

fn save_cache<T: Serialize>(path: &Path, cache: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut data = serde_json::to_string_pretty(cache)?;
    data.push('\n');
    fs::write(path, data)?;
    Ok(())
}

macro_rules! cache_io {
    ($load:ident, $save:ident, $ty:ty, $file:literal) => {
        /// Load the cache, defaulting to empty when the file is absent.
        ///
        /// # Errors
        ///
        /// Returns `Io` or `Json` on read/parse failure.
        pub fn $load(paths: &Paths) -> Result<$ty> {
            load_cache(&paths.sync_dir.join($file))
        }

        /// Persist the cache.
        ///
        /// # Errors
        ///
        /// Returns `Io` or `Json` on failure.
        pub fn $save(paths: &Paths, cache: &$ty) -> Result<()> {
            save_cache(&paths.sync_dir.join($file), cache)
        }
    };
}

cache_io!(load_label_cache, save_label_cache, LabelCache, "labels.json");
cache_io!(
    load_milestone_cache,
    save_milestone_cache,
    MilestoneCache,
    "milestones.json"
);
cache_io!(
    load_category_cache,
    save_category_cache,
    CategoryCache,
    "categories.json"
);
cache_io!(
    load_project_cache,
    save_project_cache,
    ProjectCache,
    "projects.json"
);

// ============================================================================
// Pending comments
// ============================================================================

/// A comment written offline, waiting to be posted.
///
/// Stored as `comments/<number>-<anything>.md`; the file name up to the
/// first `-` is the target issue number.
#[derive(Debug, Clone)]
pub struct PendingComment {
    pub path: PathBuf,
    pub number: IssueNumber,
    pub body: String,
}

/// Load all pending comments, sorted by target issue number then path.
///
/// # Errors
///
/// Returns `Io` if the directory scan fails. Unreadable files are skipped
/// with a warning.
pub fn load_pending_comments(paths: &Paths) -> Result<Vec<PendingComment>> {
    let mut comments = Vec::new();
    if !paths.comments_dir.is_dir() {
        return Ok(comments);
    }
    for entry in fs::read_dir(&paths.comments_dir)? {
        let Ok(entry) = entry else { continue };
        let path = entry.path();
        if !path.extension().is_some_and(|ext| ext == "md") {
            continue;
        }
        let Some(stem) = path.file_stem().map(|s| s.to_string_lossy().to_string()) else {
            continue;
        };
        let number = stem.split('-').next().unwrap_or(&stem).to_string();
        if number.is_empty() {
            continue;
        }
        match fs::read_to_string(&path) {
            Ok(body) => comments.push(PendingComment {
                path,
                number: IssueNumber::new(number),
                body,
            }),
            Err(e) => warn!(path = %path.display(), "skipping unreadable comment: {e}"),
        }
    }
    comments.sort_by(|a, b| a.number.cmp(&b.number).then_with(|| a.path.cmp(&b.path)));
    Ok(comments)
}

/// Remove a pending comment file after a successful post.
///
/// # Errors
///
/// Returns `Io` if the file cannot be removed.
pub fn delete_pending_comment(comment: &PendingComment) -> Result<()> {
    fs::remove_file(&comment.path)?;
    Ok(())
}
