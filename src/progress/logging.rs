//! Logging-based progress handler

use super::{ProgressEvent, ProgressHandler};
use crate::batch::FileStatus;
use tracing::{debug, info, warn};

/// Handler that logs progress events using tracing
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingHandler;

impl ProgressHandler for LoggingHandler {
    fn on_progress(&self, event: &ProgressEvent) {
        match event {
            ProgressEvent::Started { root, total_files } => {
                info!(root = %root, files = total_files, "Starting batch export");
            }
            ProgressEvent::FileStarted { path, index, total } => {
                debug!(
                    file = %path,
                    progress = format!("{}/{}", index, total),
                    "Extracting"
                );
            }
            ProgressEvent::FileFinished {
                path,
                index,
                total,
                status,
                duration,
            } => {
                let progress = format!("{}/{}", index, total);
                match status {
                    FileStatus::Success => info!(
                        file = %path,
                        progress,
                        duration_ms = duration.as_millis(),
                        "Exported"
                    ),
                    FileStatus::Empty => info!(
                        file = %path,
                        progress,
                        "No nodes found"
                    ),
                    FileStatus::Failed => warn!(
                        file = %path,
                        progress,
                        "Extraction failed"
                    ),
                }
            }
            ProgressEvent::Completed {
                succeeded,
                empty,
                failed,
                total_time,
            } => {
                info!(
                    succeeded,
                    empty,
                    failed,
                    total_time_ms = total_time.as_millis(),
                    "Batch export complete"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_logging_all_events() {
        let handler = LoggingHandler;

        let mut events = vec![
            ProgressEvent::Started {
                root: "/topotests".to_string(),
                total_files: 3,
            },
            ProgressEvent::FileStarted {
                path: "/topotests/a/test_a.py".to_string(),
                index: 1,
                total: 3,
            },
        ];
        for status in [FileStatus::Success, FileStatus::Empty, FileStatus::Failed] {
            events.push(ProgressEvent::FileFinished {
                path: "/topotests/a/test_a.py".to_string(),
                index: 1,
                total: 3,
                status,
                duration: Duration::from_millis(12),
            });
        }
        events.push(ProgressEvent::Completed {
            succeeded: 1,
            empty: 1,
            failed: 1,
            total_time: Duration::from_secs(1),
        });

        for event in events {
            handler.on_progress(&event);
        }
    }
}
