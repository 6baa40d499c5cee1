// Copyright 2026 relink Contributors
// SPDX-License-Identifier: Apache-2.0

//! Thin progress-bar wrapper around indicatif.
//!
//! Batches tick a bar per completed item; under `--quiet` (and in tests)
//! everything draws to a hidden target and costs nothing.

use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};

/// Progress sink handed through the pipeline.
pub struct Progress {
    multi: MultiProgress,
}

impl Progress {
    pub fn new(quiet: bool) -> Self {
        let multi = if quiet {
            MultiProgress::with_draw_target(ProgressDrawTarget::hidden())
        } else {
            MultiProgress::new()
        };
        Self { multi }
    }

    /// A hidden sink, for tests and library callers.
    pub fn hidden() -> Self {
        Self::new(true)
    }

    /// A counting bar for one batch of `len` keyed operations.
    pub fn batch_bar(&self, label: &str, len: u64) -> ProgressBar {
        let bar = self.multi.add(ProgressBar::new(len));
        bar.set_style(
            ProgressStyle::with_template("{msg:<24} {bar:40.cyan/blue} {pos}/{len}")
                .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );
        bar.set_message(label.to_string());
        bar
    }

    /// An unbounded spinner for single long operations.
    pub fn spinner(&self, label: &str) -> ProgressBar {
        let bar = self.multi.add(ProgressBar::new_spinner());
        bar.set_message(label.to_string());
        bar
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hidden_progress_counts() {
        let progress = Progress::hidden();
        let bar = progress.batch_bar("test", 3);
        bar.inc(1);
        bar.inc(1);
        assert_eq!(bar.position(), 2);
        bar.finish_and_clear();
        assert_eq!(bar.position(), 2);
    }
}
