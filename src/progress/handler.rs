//! Progress handler trait and events

use crate::batch::FileStatus;
use std::time::Duration;

/// Events emitted while a batch export runs
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    /// Discovery finished, extraction is about to begin
    Started { root: String, total_files: usize },

    /// Extraction of one file started (`index` counts from 1)
    FileStarted {
        path: String,
        index: usize,
        total: usize,
    },

    /// Extraction of one file finished
    FileFinished {
        path: String,
        index: usize,
        total: usize,
        status: FileStatus,
        duration: Duration,
    },

    /// All files processed
    Completed {
        succeeded: usize,
        empty: usize,
        failed: usize,
        total_time: Duration,
    },
}

/// Trait for handling progress events during a batch export
pub trait ProgressHandler: Send + Sync {
    /// Called when a progress event occurs
    fn on_progress(&self, event: &ProgressEvent);
}

/// No-op handler that ignores all events
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpHandler;

impl ProgressHandler for NoOpHandler {
    fn on_progress(&self, _event: &ProgressEvent) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingHandler {
        count: Arc<AtomicUsize>,
    }

    impl ProgressHandler for CountingHandler {
        fn on_progress(&self, _event: &ProgressEvent) {
            self.count.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_noop_handler() {
        NoOpHandler.on_progress(&ProgressEvent::Started {
            root: "/topotests".to_string(),
            total_files: 0,
        });
    }

    #[test]
    fn test_progress_events() {
        let count = Arc::new(AtomicUsize::new(0));
        let handler = CountingHandler {
            count: count.clone(),
        };

        handler.on_progress(&ProgressEvent::Started {
            root: "/topotests".to_string(),
            total_files: 1,
        });
        handler.on_progress(&ProgressEvent::FileStarted {
            path: "/topotests/a/test_a.py".to_string(),
            index: 1,
            total: 1,
        });
        handler.on_progress(&ProgressEvent::Completed {
            succeeded: 1,
            empty: 0,
            failed: 0,
            total_time: Duration::from_millis(5),
        });

        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_event_debug() {
        let event = ProgressEvent::FileStarted {
            path: "test_a.py".to_string(),
            index: 2,
            total: 7,
        };
        let debug_str = format!("{:?}", event);
        assert!(debug_str.contains("FileStarted"));
        assert!(debug_str.contains("index: 2"));
    }
}
