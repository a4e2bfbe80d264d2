//! trackdown: keep a directory of Markdown issue files in sync with a
//! remote issue tracker.
//!
//! Issues live as plain files with YAML front matter under `.issues/`,
//! split into `open/` and `closed/`. Records created offline get a
//! provisional `T`-prefixed id; pushing materializes them remotely and
//! rewrites every reference to the permanent number. Edits are reconciled
//! with a field-level three-way merge against the last-synced snapshot, so
//! concurrent local and remote changes to different fields both survive.

pub mod cli;
pub mod config;
pub mod diff;
pub mod error;
pub mod lock;
pub mod logging;
pub mod model;
pub mod remote;
pub mod store;
pub mod sync;
pub mod util;

pub use error::{Result, SyncError};
pub use model::{Issue, IssueNumber, IssueRef, State};
