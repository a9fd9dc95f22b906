//! Progress-callback trait for per-item conversion events.
//!
//! Inject an [`Arc<dyn ConversionProgressCallback>`] via
//! [`crate::config::ServiceConfigBuilder::progress_callback`] to receive
//! events as the pipeline converts the e-mail body and each attachment.
//!
//! # Why callbacks instead of channels?
//!
//! Callers can forward events to a broadcast channel, a WebSocket or a
//! terminal progress bar without the library knowing how the host
//! application communicates. The trait is `Send + Sync` because items are
//! converted concurrently.
//!
//! # Example
//!
//! ```rust
//! use edgequake_mail2pdf::{ConversionProgressCallback, ServiceConfig};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     completed: Arc<AtomicUsize>,
//! }
//!
//! impl ConversionProgressCallback for CountingCallback {
//!     fn on_item_complete(&self, index: usize, total: usize, name: &str, pdf_len: usize) {
//!         self.completed.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("{}/{} {} done ({} bytes)", index + 1, total, name, pdf_len);
//!     }
//! }
//!
//! let counter = Arc::new(CountingCallback {
//!     completed: Arc::new(AtomicUsize::new(0)),
//! });
//!
//! let config = ServiceConfig::builder()
//!     .progress_callback(counter as Arc<dyn ConversionProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use std::sync::Arc;

/// Called by the service as it converts each item of a request.
///
/// Item `0` is always the e-mail body; attachments follow in request order,
/// then images extracted from the body. All methods default to no-ops.
///
/// # Thread safety
///
/// `on_item_start`, `on_item_complete` and `on_item_error` may be called
/// concurrently from different tasks.
pub trait ConversionProgressCallback: Send + Sync {
    /// Called once before any item is converted.
    fn on_conversion_start(&self, total_items: usize) {
        let _ = total_items;
    }

    /// Called just before an item's strategy chain starts.
    ///
    /// # Arguments
    /// * `index` — 0-based item index (0 is the body)
    /// * `total` — total items in the request
    /// * `name`  — file name, or `email.html` for the body
    fn on_item_start(&self, index: usize, total: usize, name: &str) {
        let _ = (index, total, name);
    }

    /// Called when an item produced a PDF.
    fn on_item_complete(&self, index: usize, total: usize, name: &str, pdf_len: usize) {
        let _ = (index, total, name, pdf_len);
    }

    /// Called when an item failed or was abandoned.
    fn on_item_error(&self, index: usize, total: usize, name: &str, error: &str) {
        let _ = (index, total, name, error);
    }

    /// Called once after every item has been attempted, before packaging.
    fn on_conversion_complete(&self, total_items: usize, success_count: usize) {
        let _ = (total_items, success_count);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl ConversionProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::ServiceConfig`].
pub type ProgressCallback = Arc<dyn ConversionProgressCallback>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct TrackingCallback {
        starts: AtomicUsize,
        completes: AtomicUsize,
        errors: AtomicUsize,
        completed_total: AtomicUsize,
    }

    impl ConversionProgressCallback for TrackingCallback {
        fn on_item_start(&self, _index: usize, _total: usize, _name: &str) {
            self.starts.fetch_add(1, Ordering::SeqCst);
        }

        fn on_item_complete(&self, _index: usize, _total: usize, _name: &str, _len: usize) {
            self.completes.fetch_add(1, Ordering::SeqCst);
        }

        fn on_item_error(&self, _index: usize, _total: usize, _name: &str, _error: &str) {
            self.errors.fetch_add(1, Ordering::SeqCst);
        }

        fn on_conversion_complete(&self, _total: usize, success_count: usize) {
            self.completed_total.store(success_count, Ordering::SeqCst);
        }
    }

    #[test]
    fn noop_callback_does_not_panic() {
        let cb = NoopProgressCallback;
        cb.on_conversion_start(3);
        cb.on_item_start(0, 3, "email.html");
        cb.on_item_complete(0, 3, "email.html", 42);
        cb.on_item_error(1, 3, "broken.docx", "rejected");
        cb.on_conversion_complete(3, 2);
    }

    #[test]
    fn tracking_callback_receives_events() {
        let tracker = TrackingCallback::default();

        tracker.on_item_start(0, 2, "email.html");
        tracker.on_item_complete(0, 2, "email.html", 100);
        tracker.on_item_start(1, 2, "x.bin");
        tracker.on_item_error(1, 2, "x.bin", "timeout");
        tracker.on_conversion_complete(2, 1);

        assert_eq!(tracker.starts.load(Ordering::SeqCst), 2);
        assert_eq!(tracker.completes.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.errors.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.completed_total.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn arc_dyn_callback_works() {
        let cb: ProgressCallback = Arc::new(NoopProgressCallback);
        cb.on_conversion_start(1);
        cb.on_item_start(0, 1, "email.html");
    }
}
