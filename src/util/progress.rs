//! Progress reporting for the push operation.
//!
//! Shows a determinate `indicatif` bar only when stderr is an interactive
//! terminal; otherwise every call is a no-op except `log`, which falls back
//! to plain stderr lines so piped output stays useful.

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::io::{IsTerminal, stderr};

/// Check if we should show a progress bar.
#[must_use]
pub fn should_show_progress() -> bool {
    stderr().is_terminal()
}

/// Phase-aware progress bar for a push run.
///
/// The total grows as later phases discover work (pending updates are only
/// counted after reference remapping), so `add_total` is additive.
pub struct PushProgress {
    bar: ProgressBar,
    showing: bool,
}

impl PushProgress {
    /// Create a progress reporter with an initial total.
    #[must_use]
    pub fn new(total: u64, show: bool) -> Self {
        let bar = ProgressBar::new(total);
        if show {
            bar.set_style(
                ProgressStyle::default_bar()
                    .template("{spinner:.green} {msg:>16} [{bar:30.cyan/blue}] {pos}/{len}")
                    .expect("valid template")
                    .progress_chars("=>-"),
            );
        } else {
            bar.set_draw_target(ProgressDrawTarget::hidden());
        }
        Self { bar, showing: show }
    }

    /// Label the current phase.
    pub fn set_phase(&self, phase: &str) {
        self.bar.set_message(phase.to_string());
    }

    /// Grow the total by `extra` items.
    pub fn add_total(&self, extra: u64) {
        self.bar.set_length(self.bar.length().unwrap_or(0) + extra);
    }

    /// Advance by one item.
    pub fn advance(&self) {
        self.bar.inc(1);
    }

    /// Print a line above the bar (or to stderr when hidden).
    pub fn log(&self, line: &str) {
        if self.showing {
            self.bar.println(line);
        } else {
            eprintln!("{line}");
        }
    }

    /// Finish and clear the bar.
    pub fn done(&self) {
        self.bar.finish_and_clear();
    }
}
