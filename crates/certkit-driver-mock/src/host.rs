//! Recording operator host for tests.

use certkit_core::capabilities::{OperatorHost, ProgressSink};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

/// Progress indicator that remembers what it was told.
#[derive(Debug)]
pub struct MockProgress {
    title: String,
    max: AtomicU32,
    value: AtomicU32,
    finished: AtomicBool,
}

impl MockProgress {
    /// New open indicator
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            max: AtomicU32::new(0),
            value: AtomicU32::new(0),
            finished: AtomicBool::new(false),
        }
    }

    /// Title the indicator was opened with
    pub fn title(&self) -> &str {
        &self.title
    }

    /// Last maximum set
    pub fn max(&self) -> u32 {
        self.max.load(Ordering::SeqCst)
    }

    /// Last progress value set
    pub fn value(&self) -> u32 {
        self.value.load(Ordering::SeqCst)
    }

    /// Whether `finish` was called
    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }
}

impl ProgressSink for MockProgress {
    fn set_max(&self, max: u32) {
        self.max.store(max, Ordering::SeqCst);
    }

    fn set_progress(&self, value: u32) {
        self.value.store(value, Ordering::SeqCst);
    }

    fn finish(&self) {
        self.finished.store(true, Ordering::SeqCst);
    }
}

/// Operator host that records log lines, modal changes and progress indicators.
#[derive(Debug, Default)]
pub struct MockOperatorHost {
    lines: Mutex<Vec<String>>,
    modal_history: Mutex<Vec<bool>>,
    progress: Mutex<Vec<Arc<MockProgress>>>,
}

impl MockOperatorHost {
    /// Empty host
    pub fn new() -> Self {
        Self::default()
    }

    /// Every logged line, in order
    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().clone()
    }

    /// Whether any logged line contains `needle`
    pub fn logged(&self, needle: &str) -> bool {
        self.lines.lock().iter().any(|line| line.contains(needle))
    }

    /// Current modal state
    pub fn is_modal(&self) -> bool {
        self.modal_history.lock().last().copied().unwrap_or(false)
    }

    /// Every `set_modal` call, in order
    pub fn modal_history(&self) -> Vec<bool> {
        self.modal_history.lock().clone()
    }

    /// Indicators opened so far
    pub fn progress_indicators(&self) -> Vec<Arc<MockProgress>> {
        self.progress.lock().clone()
    }
}

impl OperatorHost for MockOperatorHost {
    fn log(&self, text: &str) {
        self.lines.lock().push(text.to_string());
    }

    fn open_progress_indicator(&self, title: &str) -> Arc<dyn ProgressSink> {
        let progress = Arc::new(MockProgress::new(title));
        self.progress.lock().push(progress.clone());
        progress
    }

    fn set_modal(&self, modal: bool) {
        self.modal_history.lock().push(modal);
    }
}
