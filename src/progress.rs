//! Progress reporting for a batch run.
//!
//! The runner advances the sink once for every job it collects, whether the
//! job succeeded or failed. Rendering is left to the sink.

use std::sync::Arc;
use tracing::{debug, info};

/// What a progress display is told when a run starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressSpec {
    pub caption: String,
    pub total: usize,
    /// Whether the indicator stays visible once the run has finished.
    pub leave_visible: bool,
}

pub trait ProgressSink: Send + Sync {
    fn start(&self, spec: &ProgressSpec);

    fn advance(&self, completed: usize, total: usize);

    fn finish(&self, completed: usize, total: usize);
}

/// Reports progress through `tracing` events.
#[derive(Debug, Default)]
pub struct TracingProgress {
    spec: std::sync::Mutex<Option<ProgressSpec>>,
}

impl TracingProgress {
    pub fn new() -> Self {
        Self::default()
    }

    fn caption(&self) -> (String, bool) {
        match self.spec.lock() {
            Ok(guard) => guard
                .as_ref()
                .map(|s| (s.caption.clone(), s.leave_visible))
                .unwrap_or_default(),
            Err(_) => (String::new(), false),
        }
    }
}

impl ProgressSink for TracingProgress {
    fn start(&self, spec: &ProgressSpec) {
        info!(caption = %spec.caption, total = spec.total, "{}: 0/{}", spec.caption, spec.total);
        if let Ok(mut guard) = self.spec.lock() {
            *guard = Some(spec.clone());
        }
    }

    fn advance(&self, completed: usize, total: usize) {
        let (caption, _) = self.caption();
        debug!(caption = %caption, completed, total, "{}: {}/{}", caption, completed, total);
    }

    fn finish(&self, completed: usize, total: usize) {
        let (caption, leave_visible) = self.caption();
        if leave_visible {
            info!(caption = %caption, completed, total, "{}: {}/{} done", caption, completed, total);
        } else {
            debug!(caption = %caption, completed, total, "{}: {}/{} done", caption, completed, total);
        }
    }
}

/// Discards all progress updates.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn start(&self, _spec: &ProgressSpec) {}

    fn advance(&self, _completed: usize, _total: usize) {}

    fn finish(&self, _completed: usize, _total: usize) {}
}

pub fn default_sink() -> Arc<dyn ProgressSink> {
    Arc::new(TracingProgress::new())
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::Mutex;

    /// Records every call so tests can assert on the sequence.
    #[derive(Debug, Default)]
    pub struct RecordingProgress {
        pub events: Mutex<Vec<ProgressEvent>>,
    }

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum ProgressEvent {
        Start(ProgressSpec),
        Advance(usize, usize),
        Finish(usize, usize),
    }

    impl RecordingProgress {
        pub fn events(&self) -> Vec<ProgressEvent> {
            self.events.lock().unwrap().clone()
        }
    }

    impl ProgressSink for RecordingProgress {
        fn start(&self, spec: &ProgressSpec) {
            self.events.lock().unwrap().push(ProgressEvent::Start(spec.clone()));
        }

        fn advance(&self, completed: usize, total: usize) {
            self.events.lock().unwrap().push(ProgressEvent::Advance(completed, total));
        }

        fn finish(&self, completed: usize, total: usize) {
            self.events.lock().unwrap().push(ProgressEvent::Finish(completed, total));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracing_progress_remembers_spec() {
        let sink = TracingProgress::new();
        sink.start(&ProgressSpec {
            caption: "Evaluating".into(),
            total: 3,
            leave_visible: false,
        });
        sink.advance(1, 3);
        sink.finish(3, 3);
        assert_eq!(sink.caption(), ("Evaluating".to_string(), false));
    }

    #[test]
    fn test_no_progress_is_silent() {
        let sink: Arc<dyn ProgressSink> = Arc::new(NoProgress);
        sink.start(&ProgressSpec {
            caption: String::new(),
            total: 0,
            leave_visible: true,
        });
        sink.finish(0, 0);
    }
}
