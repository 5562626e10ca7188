//! Notification callbacks for scan lifecycle events.
//!
//! Inject an [`Arc<dyn ScanProgressCallback>`] via
//! [`crate::config::ScanConfigBuilder::progress_callback`] to hear about a
//! scan as the controller drives it: streamed text arriving, graphics being
//! cropped, review being required, and the single terminal outcome.
//!
//! Callbacks fire only for mutations that were actually applied. A scan that
//! has been superseded by a newer one goes quiet.
//!
//! # Example
//!
//! ```rust
//! use mediscan::{DocumentId, ScanConfig, ScanProgressCallback};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CharCounter {
//!     chars: AtomicUsize,
//! }
//!
//! impl ScanProgressCallback for CharCounter {
//!     fn on_fragment(&self, _id: DocumentId, accumulated_len: usize) {
//!         self.chars.store(accumulated_len, Ordering::SeqCst);
//!     }
//! }
//!
//! let counter = Arc::new(CharCounter { chars: AtomicUsize::new(0) });
//! let config = ScanConfig::builder()
//!     .progress_callback(counter as Arc<dyn ScanProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use crate::document::DocumentId;
use std::sync::Arc;

/// Called by the lifecycle controller as a scan progresses.
///
/// All methods have default no-op implementations. Implementations must be
/// `Send + Sync`: scans run on the tokio runtime.
pub trait ScanProgressCallback: Send + Sync {
    /// A new scan became the active document.
    fn on_scan_start(&self, id: DocumentId, page_count: usize) {
        let _ = (id, page_count);
    }

    /// A streamed fragment was appended.
    ///
    /// * `accumulated_len`: byte length of all text received so far
    fn on_fragment(&self, id: DocumentId, accumulated_len: usize) {
        let _ = (id, accumulated_len);
    }

    /// The model reported graphics; cropping is about to start.
    fn on_graphics_detected(&self, id: DocumentId, count: usize) {
        let _ = (id, count);
    }

    /// The document entered `reviewing`.
    fn on_review_required(&self, id: DocumentId, categories: &[String], graphics: usize) {
        let _ = (id, categories, graphics);
    }

    /// The document reached `completed` and was added to history.
    fn on_scan_complete(&self, id: DocumentId) {
        let _ = id;
    }

    /// The document reached `error`.
    fn on_scan_error(&self, id: DocumentId, error: &str) {
        let _ = (id, error);
    }
}

/// A no-op implementation for callers that don't need notifications.
pub struct NoopProgressCallback;

impl ScanProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::ScanConfig`].
pub type ProgressCallback = Arc<dyn ScanProgressCallback>;
