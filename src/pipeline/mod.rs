//! Scan pipeline.
//!
//! - `merge`: Combine per-source results under a merge strategy
//! - `detect`: Compare merged items with the stored watermark
//! - `dispatch`: Render and pace notifications
//! - `scan`: Run every entity once and commit state

pub mod detect;
pub mod dispatch;
pub mod merge;
pub mod retry;
pub mod scan;

pub use detect::{Change, ChangeDetector, ChangeKind, Detection, detector_for};
pub use dispatch::Dispatcher;
pub use merge::{MergeOutcome, MergePolicy};
pub use retry::{RetryPolicy, retry_with_backoff};
pub use scan::{ScanReport, Scanner, run_scan};
