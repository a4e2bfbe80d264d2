//! Error types and handling for `trackdown`.
//!
//! # Design
//!
//! - Uses `thiserror` for derive-based error types
//! - Supports `anyhow` integration at the binary boundary
//! - Provides recovery hints for user-facing errors
//!
//! The variants mirror the failure taxonomy of a push run: lock
//! contention, malformed local files, per-record conflicts, remote
//! call failures, and identifier-remapping failures. Conflicts and
//! most remote failures are collected per record by the orchestrator;
//! lock and mapping failures abort the whole run.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Primary error type for `trackdown` operations.
#[derive(Error, Debug)]
pub enum SyncError {
    // === Lock Errors ===
    /// Another push run holds the store lock and did not release it in time.
    #[error("timeout waiting for lock in '{dir}' after {timeout:?} (another push may be running)", dir = .dir.display())]
    LockTimeout { dir: PathBuf, timeout: Duration },

    // === Local Record Errors ===
    /// A local issue file could not be parsed.
    #[error("parse error in '{path}': {reason}", path = .path.display())]
    Parse { path: PathBuf, reason: String },

    /// Local and remote edits to the same fields diverged.
    #[error("conflict on issue #{number}: {fields:?} changed both locally and remotely")]
    Conflict {
        number: String,
        fields: Vec<String>,
    },

    // === Remote Errors ===
    /// A remote tracker call failed (transport, auth, permissions).
    #[error("remote error while {context}: {message}")]
    Remote { context: String, message: String },

    // === Identifier Errors ===
    /// Provisional-to-permanent remapping could not be fully applied.
    #[error("failed to remap '{from}' to '{to}': {reason}")]
    Mapping {
        from: String,
        to: String,
        reason: String,
    },

    // === Configuration Errors ===
    /// Configuration file error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Issue directory layout not initialized.
    #[error("issue store not initialized: run 'td init' first")]
    NotInitialized,

    // === I/O Errors ===
    /// File system I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML parsing error.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Wrapped anyhow error.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl SyncError {
    /// Shorthand for a remote failure with call context.
    #[must_use]
    pub fn remote(context: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Remote {
            context: context.into(),
            message: message.into(),
        }
    }

    /// Shorthand for a parse failure at a path.
    #[must_use]
    pub fn parse(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::Parse {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Can the user fix this without touching the remote tracker?
    #[must_use]
    pub const fn is_user_recoverable(&self) -> bool {
        matches!(
            self,
            Self::LockTimeout { .. }
                | Self::Parse { .. }
                | Self::Conflict { .. }
                | Self::Config(_)
                | Self::NotInitialized
        )
    }

    /// Human-friendly suggestion for fixing this error.
    #[must_use]
    pub const fn suggestion(&self) -> Option<&'static str> {
        match self {
            Self::NotInitialized => Some("Run: td init --owner <owner> --repo <repo>"),
            Self::LockTimeout { .. } => {
                Some("Wait for the other push to finish; a lock left by a dead process is reclaimed automatically")
            }
            Self::Conflict { .. } => {
                Some("Merge the remote changes into the local file, or re-run with --force to overwrite")
            }
            Self::Mapping { .. } => {
                Some("Check the issue files for the old provisional id and fix references by hand")
            }
            _ => None,
        }
    }

    /// Process exit code for this error.
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        1
    }
}

/// Result type using `SyncError`.
pub type Result<T> = std::result::Result<T, SyncError>;
