//! Pure Rust IoU-based tracking library
//!
//! Assigns persistent identities to per-frame detections using spatial
//! overlap and label continuity. Association is greedy in detection order,
//! tracks age out after a configurable number of unmatched frames, and a
//! track becomes *stable* once it has been matched for a minimum number of
//! frames.
//!
//! ```rust,ignore
//! use ioutrack::{IouTracker, TrackerConfig};
//!
//! let mut tracker = IouTracker::new(TrackerConfig::default());
//! tracker.update(&mut detections); // stamps track ids onto each detection
//! let ready = tracker.is_stable(detections[0].track_id.unwrap());
//! ```

pub mod bbox;
pub mod tracker;

pub use bbox::{calculate_iou, ious, Bbox};
pub use tracker::{IouTracker, TrackInput, TrackedObject, TrackerConfig};
