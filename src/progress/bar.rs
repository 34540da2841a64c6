//! Terminal progress bar for batch exports

use super::{ProgressEvent, ProgressHandler};
use indicatif::{ProgressBar, ProgressStyle};

/// Draws an `indicatif` bar on stderr, advancing once per finished file
pub struct ProgressBarHandler {
    bar: ProgressBar,
}

impl ProgressBarHandler {
    pub fn new() -> Self {
        let bar = ProgressBar::new(0);
        if let Ok(style) =
            ProgressStyle::with_template("{bar:40} {pos:>4}/{len:4} {elapsed_precise} {msg}")
        {
            bar.set_style(style);
        }
        Self { bar }
    }

    /// A bar that never draws, for tests and non-interactive output
    pub fn hidden() -> Self {
        Self {
            bar: ProgressBar::hidden(),
        }
    }

    pub fn position(&self) -> u64 {
        self.bar.position()
    }
}

impl Default for ProgressBarHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressHandler for ProgressBarHandler {
    fn on_progress(&self, event: &ProgressEvent) {
        match event {
            ProgressEvent::Started { total_files, .. } => {
                self.bar.set_length(*total_files as u64);
            }
            ProgressEvent::FileStarted { path, .. } => {
                self.bar.set_message(path.clone());
            }
            ProgressEvent::FileFinished { .. } => self.bar.inc(1),
            ProgressEvent::Completed { .. } => self.bar.finish_and_clear(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::FileStatus;
    use std::time::Duration;

    #[test]
    fn test_bar_advances_per_file() {
        let handler = ProgressBarHandler::hidden();
        handler.on_progress(&ProgressEvent::Started {
            root: "/t".to_string(),
            total_files: 2,
        });
        for index in 1..=2 {
            handler.on_progress(&ProgressEvent::FileFinished {
                path: format!("/t/test_{}.py", index),
                index,
                total: 2,
                status: FileStatus::Success,
                duration: Duration::from_millis(1),
            });
        }
        assert_eq!(handler.position(), 2);
    }
}
