//! Progress-callback trait for per-page job events.
//!
//! Inject an [`Arc<dyn OcrProgressCallback>`] via
//! [`crate::config::OcrConfigBuilder::progress_callback`] to receive events
//! as the dispatch engine works through a document.
//!
//! # Example
//!
//! ```rust
//! use edgequake_ocr::{OcrConfig, OcrProgressCallback};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct Counter(AtomicUsize);
//!
//! impl OcrProgressCallback for Counter {
//!     fn on_page_complete(&self, _index: usize, _total: usize, _text_len: usize) {
//!         self.0.fetch_add(1, Ordering::SeqCst);
//!     }
//! }
//!
//! let config = OcrConfig::builder()
//!     .progress_callback(Arc::new(Counter(AtomicUsize::new(0))))
//!     .build()
//!     .unwrap();
//! ```

use std::sync::Arc;

/// Called by the engine while it processes a job.
///
/// Page events arrive from concurrently running tasks, in completion order.
/// Page indices are 0-based. All methods default to no-ops.
pub trait OcrProgressCallback: Send + Sync {
    /// Called once the document has been split into `total_pages` units.
    fn on_job_start(&self, total_pages: usize) {
        let _ = total_pages;
    }

    /// Called when a page is handed to the inference client.
    fn on_page_start(&self, index: usize, total_pages: usize) {
        let _ = (index, total_pages);
    }

    /// Called when a page produced text.
    fn on_page_complete(&self, index: usize, total_pages: usize, text_len: usize) {
        let _ = (index, total_pages, text_len);
    }

    /// Called when a page failed after all retries.
    fn on_page_error(&self, index: usize, total_pages: usize, error: &str) {
        let _ = (index, total_pages, error);
    }

    /// Called once after every page has reported.
    fn on_job_complete(&self, total_pages: usize, success_count: usize) {
        let _ = (total_pages, success_count);
    }

    /// Called instead of all the above when the result came from the cache.
    fn on_cache_hit(&self, fingerprint: &str) {
        let _ = fingerprint;
    }
}

/// A callback that ignores every event.
pub struct NoopProgressCallback;

impl OcrProgressCallback for NoopProgressCallback {}

/// Type stored in [`crate::config::OcrConfig`].
pub type ProgressCallback = Arc<dyn OcrProgressCallback>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Tracking {
        starts: AtomicUsize,
        completes: AtomicUsize,
        errors: AtomicUsize,
        hits: AtomicUsize,
    }

    impl OcrProgressCallback for Tracking {
        fn on_page_start(&self, _index: usize, _total: usize) {
            self.starts.fetch_add(1, Ordering::SeqCst);
        }
        fn on_page_complete(&self, _index: usize, _total: usize, _len: usize) {
            self.completes.fetch_add(1, Ordering::SeqCst);
        }
        fn on_page_error(&self, _index: usize, _total: usize, _error: &str) {
            self.errors.fetch_add(1, Ordering::SeqCst);
        }
        fn on_cache_hit(&self, _fingerprint: &str) {
            self.hits.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn noop_callback_does_not_panic() {
        let cb = NoopProgressCallback;
        cb.on_job_start(3);
        cb.on_page_start(0, 3);
        cb.on_page_complete(0, 3, 10);
        cb.on_page_error(1, 3, "boom");
        cb.on_job_complete(3, 2);
        cb.on_cache_hit("abc");
    }

    #[test]
    fn tracking_callback_counts() {
        let t = Tracking::default();
        t.on_page_start(0, 2);
        t.on_page_complete(0, 2, 5);
        t.on_page_start(1, 2);
        t.on_page_error(1, 2, "model error");
        t.on_cache_hit("ff");
        assert_eq!(t.starts.load(Ordering::SeqCst), 2);
        assert_eq!(t.completes.load(Ordering::SeqCst), 1);
        assert_eq!(t.errors.load(Ordering::SeqCst), 1);
        assert_eq!(t.hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn arc_dyn_is_send_sync() {
        fn assert_send_sync<T: Send + Sync + ?Sized>() {}
        assert_send_sync::<dyn OcrProgressCallback>();
        let cb: ProgressCallback = Arc::new(NoopProgressCallback);
        cb.on_job_start(1);
    }
}
