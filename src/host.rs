//! Terminal operator host.
//!
//! Prints the operator log to stdout and reports install progress through
//! `tracing`, in tenths, so a long install does not flood the terminal.

use certkit_core::capabilities::{OperatorHost, ProgressSink};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// [`OperatorHost`] for a terminal session.
pub struct ConsoleHost {
    echo: bool,
    modal: AtomicBool,
    lines: Mutex<Vec<String>>,
}

impl ConsoleHost {
    /// New host; `echo` prints every log line to stdout
    pub fn new(echo: bool) -> Self {
        Self {
            echo,
            modal: AtomicBool::new(false),
            lines: Mutex::new(Vec::new()),
        }
    }

    /// Every line logged so far
    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().clone()
    }

    /// Whether the host currently blocks operator input
    pub fn is_modal(&self) -> bool {
        self.modal.load(Ordering::SeqCst)
    }
}

impl OperatorHost for ConsoleHost {
    fn log(&self, text: &str) {
        if self.echo {
            println!("{}", text);
        }
        self.lines.lock().push(text.to_string());
    }

    fn open_progress_indicator(&self, title: &str) -> Arc<dyn ProgressSink> {
        tracing::info!(target: "certkit::progress", title = %title, "Progress opened");
        Arc::new(TracingProgress::new(title))
    }

    fn set_modal(&self, modal: bool) {
        tracing::debug!(modal, "Operator input {}", if modal { "blocked" } else { "released" });
        self.modal.store(modal, Ordering::SeqCst);
    }
}

#[derive(Debug, Default)]
struct ProgressState {
    max: u32,
    last_tenth: u32,
    finished: bool,
}

/// Progress sink that logs each completed tenth.
pub struct TracingProgress {
    title: String,
    state: Mutex<ProgressState>,
}

impl TracingProgress {
    /// Sink for the progress of `title`
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            state: Mutex::new(ProgressState::default()),
        }
    }

    /// Last reported tenth (0..=10)
    pub fn reported_tenth(&self) -> u32 {
        self.state.lock().last_tenth
    }

    /// Whether `finish` was called
    pub fn is_finished(&self) -> bool {
        self.state.lock().finished
    }
}

impl ProgressSink for TracingProgress {
    fn set_max(&self, max: u32) {
        let mut state = self.state.lock();
        state.max = max;
        state.last_tenth = 0;
    }

    fn set_progress(&self, value: u32) {
        let mut state = self.state.lock();
        if state.max == 0 {
            return;
        }
        let tenth = (u64::from(value.min(state.max)) * 10 / u64::from(state.max)) as u32;
        if tenth > state.last_tenth {
            state.last_tenth = tenth;
            tracing::info!(
                target: "certkit::progress",
                title = %self.title,
                percent = tenth * 10,
                "Progress"
            );
        }
    }

    fn finish(&self) {
        self.state.lock().finished = true;
        tracing::info!(target: "certkit::progress", title = %self.title, "Progress finished");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_reports_tenths() {
        let progress = TracingProgress::new("Installing Test Title on devkit-1");
        progress.set_progress(5);
        assert_eq!(progress.reported_tenth(), 0);

        progress.set_max(40);
        progress.set_progress(3);
        assert_eq!(progress.reported_tenth(), 0);
        progress.set_progress(4);
        assert_eq!(progress.reported_tenth(), 1);
        progress.set_progress(2);
        assert_eq!(progress.reported_tenth(), 1);
        progress.set_progress(400);
        assert_eq!(progress.reported_tenth(), 10);

        assert!(!progress.is_finished());
        progress.finish();
        assert!(progress.is_finished());
    }

    #[test]
    fn test_host_keeps_lines_and_modal_state() {
        let host = ConsoleHost::new(false);
        host.log("Starting");
        host.set_modal(true);
        assert!(host.is_modal());
        host.set_modal(false);
        assert!(!host.is_modal());
        assert_eq!(host.lines(), vec!["Starting".to_string()]);
    }
}
