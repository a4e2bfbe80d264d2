//! `td push`: reconcile local issue files with the remote tracker.

use crate::config;
use crate::error::{Result, SyncError};
use crate::remote::gh::GhClient;
use crate::store::Paths;
use crate::sync::{self, PushOptions, PushReport};
use crate::util::progress;
use clap::Args;
use std::path::Path;

#[derive(Args, Debug)]
pub struct PushArgs {
    /// Issue numbers or file names to push (everything when omitted)
    #[arg(value_name = "ISSUE")]
    pub issues: Vec<String>,

    /// Overwrite remote state with local state instead of merging
    #[arg(long)]
    pub force: bool,

    /// Do not post pending comments
    #[arg(long)]
    pub no_comments: bool,

    /// Show what would be pushed without changing anything
    #[arg(long)]
    pub dry_run: bool,
}

/// Run `td push`.
///
/// # Errors
///
/// Propagates fatal errors from the orchestrator; per-record problems land
/// in the printed report instead and turn into a non-zero exit.
pub fn run(root: &Path, args: &PushArgs, quiet: bool) -> Result<bool> {
    let paths = Paths::new(root);
    let config = config::load(&paths.config_path)?;
    let remote = GhClient::new(config.repo_slug());

    let options = PushOptions {
        selection: args.issues.clone(),
        force: args.force,
        skip_comments: args.no_comments,
        dry_run: args.dry_run,
        show_progress: !quiet && !args.dry_run && progress::should_show_progress(),
    };
    let report = sync::push(&paths, &remote, &options)?;
    if !quiet {
        print_report(&report);
    }
    Ok(!report.has_problems())
}

fn print_report(report: &PushReport) {
    for name in &report.would_create_labels {
        println!("would create label '{name}'");
    }
    for title in &report.would_create_milestones {
        println!("would create milestone '{title}'");
    }
    for created in &report.created {
        match &created.permanent {
            Some(permanent) => {
                println!(
                    "created #{permanent} from {} ({})",
                    created.provisional, created.title
                );
            }
            None => println!("would create {} ({})", created.provisional, created.title),
        }
    }
    for number in &report.updated {
        if report.dry_run {
            println!("would update #{number}");
        } else {
            println!("updated #{number}");
        }
    }
    if report.comments_posted > 0 {
        if report.dry_run {
            println!("would post {} comment(s)", report.comments_posted);
        } else {
            println!("posted {} comment(s)", report.comments_posted);
        }
    }
    if report.unchanged > 0 {
        println!("{} issue(s) already up to date", report.unchanged);
    }

    for (path, reason) in &report.skipped_files {
        eprintln!("skipped {}: {reason}", path.display());
    }
    for (number, fields) in &report.conflicts {
        let err = SyncError::Conflict {
            number: number.clone(),
            fields: fields.iter().map(|f| f.name().to_string()).collect(),
        };
        eprintln!("{err}");
        if let Some(suggestion) = err.suggestion() {
            eprintln!("{suggestion}");
        }
    }
    for (number, reason) in &report.failed {
        eprintln!("failed #{number}: {reason}");
    }

    if report.is_noop() {
        println!("Nothing to push.");
    }
}
