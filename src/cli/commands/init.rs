//! `td init`: create the issue store layout and record the remote
//! repository.

use crate::config::{self, Config};
use crate::error::{Result, SyncError};
use crate::store::Paths;
use clap::Args;
use std::path::Path;
use tracing::info;

#[derive(Args, Debug)]
pub struct InitArgs {
    /// Remote repository owner (user or organization)
    #[arg(long)]
    pub owner: String,

    /// Remote repository name
    #[arg(long)]
    pub repo: String,

    /// Overwrite an existing configuration
    #[arg(long)]
    pub force: bool,
}

/// Run `td init`.
///
/// # Errors
///
/// Returns `Config` when a configuration already exists and `--force` was
/// not given, or `Io` on layout creation failure.
pub fn run(root: &Path, args: &InitArgs) -> Result<()> {
    let paths = Paths::new(root);
    if paths.config_path.is_file() && !args.force {
        return Err(SyncError::Config(format!(
            "already initialized at {} (use --force to overwrite)",
            paths.config_path.display()
        )));
    }

    paths.ensure_layout()?;
    let config = Config::new(&args.owner, &args.repo);
    config::save(&paths.config_path, &config)?;
    info!(repo = %config.repo_slug(), "initialized issue store");
    println!(
        "Initialized issue store for {} in {}",
        config.repo_slug(),
        paths.issues_dir.display()
    );
    Ok(())
}
