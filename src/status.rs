//! Model loading flags shared by the preloader and request handlers

use parking_lot::Mutex;
use serde::Serialize;

use crate::error::LoadingKind;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LoadingStatus {
    pub ocr_loading: bool,
    pub ocr_ready: bool,
    pub translate_loading: bool,
    pub translate_ready: bool,
    pub last_error: Option<String>,
}

#[derive(Debug, Default)]
pub struct LoadingStatusTracker {
    status: Mutex<LoadingStatus>,
}

impl LoadingStatusTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> LoadingStatus {
        self.status.lock().clone()
    }

    pub fn is_loading(&self, kind: LoadingKind) -> bool {
        let status = self.status.lock();
        match kind {
            LoadingKind::Ocr => status.ocr_loading,
            LoadingKind::Translate => status.translate_loading,
        }
    }

    /// Start an OCR load; the flag is cleared when the guard drops
    pub fn begin_ocr(&self) -> LoadGuard<'_> {
        self.begin(LoadingKind::Ocr)
    }

    /// Start a translation model load; the flag is cleared when the guard drops
    pub fn begin_translate(&self) -> LoadGuard<'_> {
        self.begin(LoadingKind::Translate)
    }

    fn begin(&self, kind: LoadingKind) -> LoadGuard<'_> {
        let mut status = self.status.lock();
        match kind {
            LoadingKind::Ocr => status.ocr_loading = true,
            LoadingKind::Translate => status.translate_loading = true,
        }
        status.last_error = None;
        LoadGuard {
            tracker: self,
            kind,
        }
    }

    pub fn mark_ocr_ready(&self) {
        self.status.lock().ocr_ready = true;
    }

    pub fn mark_translate_ready(&self) {
        self.status.lock().translate_ready = true;
    }

    /// Replace the last error
    pub fn record_error(&self, message: impl Into<String>) {
        self.status.lock().last_error = Some(message.into());
    }

    fn finish(&self, kind: LoadingKind) {
        let mut status = self.status.lock();
        match kind {
            LoadingKind::Ocr => status.ocr_loading = false,
            LoadingKind::Translate => status.translate_loading = false,
        }
    }
}

/// Clears the loading flag it was created for on drop
#[must_use = "the loading flag is cleared as soon as the guard is dropped"]
pub struct LoadGuard<'a> {
    tracker: &'a LoadingStatusTracker,
    kind: LoadingKind,
}

impl LoadGuard<'_> {
    pub fn succeed(self) {
        match self.kind {
            LoadingKind::Ocr => self.tracker.mark_ocr_ready(),
            LoadingKind::Translate => self.tracker.mark_translate_ready(),
        }
    }

    pub fn fail(self, message: impl Into<String>) {
        self.tracker.record_error(message);
    }
}

impl Drop for LoadGuard<'_> {
    fn drop(&mut self) {
        self.tracker.finish(self.kind);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_transition() {
        let tracker = LoadingStatusTracker::new();
        let guard = tracker.begin_ocr();
        assert!(tracker.snapshot().ocr_loading);
        assert!(tracker.is_loading(LoadingKind::Ocr));
        assert!(!tracker.is_loading(LoadingKind::Translate));

        guard.succeed();
        let status = tracker.snapshot();
        assert!(!status.ocr_loading);
        assert!(status.ocr_ready);
        assert_eq!(status.last_error, None);
    }

    #[test]
    fn test_failure_transition() {
        let tracker = LoadingStatusTracker::new();
        tracker.begin_translate().fail("model not found");

        let status = tracker.snapshot();
        assert!(!status.translate_loading);
        assert!(!status.translate_ready);
        assert_eq!(status.last_error.as_deref(), Some("model not found"));
    }

    #[test]
    fn test_flag_cleared_on_early_drop() {
        let tracker = LoadingStatusTracker::new();
        {
            let _guard = tracker.begin_ocr();
        }
        assert!(!tracker.snapshot().ocr_loading);
    }

    #[test]
    fn test_error_overwritten_and_cleared_by_next_attempt() {
        let tracker = LoadingStatusTracker::new();
        tracker.record_error("first");
        tracker.record_error("second");
        assert_eq!(tracker.snapshot().last_error.as_deref(), Some("second"));

        let _guard = tracker.begin_ocr();
        assert_eq!(tracker.snapshot().last_error, None);
    }
}
