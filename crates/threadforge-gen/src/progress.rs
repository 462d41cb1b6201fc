//! Terminal progress display for the generation phases.

use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::sync::Arc;

/// Shared handle to the terminal progress area. Cheap to clone.
///
/// Content and image phases run at the same time, so each phase gets its own bar.
#[derive(Clone)]
pub struct PipelineProgress {
    multi: Arc<MultiProgress>,
}

impl Default for PipelineProgress {
    fn default() -> Self {
        Self::hidden()
    }
}

impl PipelineProgress {
    /// Draw to stderr.
    pub fn new() -> Self {
        Self {
            multi: Arc::new(MultiProgress::new()),
        }
    }

    /// Draw nothing (tests, `--quiet`).
    pub fn hidden() -> Self {
        Self {
            multi: Arc::new(MultiProgress::with_draw_target(ProgressDrawTarget::hidden())),
        }
    }

    /// Add a bar for a phase of `total` steps.
    pub fn start_phase(&self, name: &str, total: u64) -> PhaseBar {
        let bar = self.multi.add(ProgressBar::new(total));
        bar.set_style(
            ProgressStyle::default_bar()
                .template("  {prefix:.bold} [{bar:30.cyan/blue}] {pos}/{len} {msg}")
                .expect("valid template")
                .progress_chars("##-"),
        );
        bar.set_prefix(name.to_string());
        PhaseBar { bar }
    }
}

/// One phase's bar. Cleared when finished or dropped.
pub struct PhaseBar {
    bar: ProgressBar,
}

impl PhaseBar {
    pub fn tick(&self) {
        self.bar.inc(1);
    }

    pub fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl Drop for PhaseBar {
    fn drop(&mut self) {
        if !self.bar.is_finished() {
            self.bar.finish_and_clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hidden_phase_counts() {
        let progress = PipelineProgress::hidden();
        let phase = progress.start_phase("Rewrite", 3);
        phase.tick();
        phase.tick();
        assert_eq!(phase.bar.position(), 2);
        phase.finish();
        assert!(phase.bar.is_finished());
    }
}
