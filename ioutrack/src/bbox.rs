//! Pixel bounding boxes and IoU calculations

use ndarray::prelude::*;
use rayon::prelude::*;
use std::fmt;

/// Axis-aligned rectangle in integer pixel coordinates `(x1, y1, x2, y2)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Bbox {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
}

impl Bbox {
    pub fn new(x1: i32, y1: i32, x2: i32, y2: i32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn width(&self) -> i32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> i32 {
        self.y2 - self.y1
    }

    /// Area in square pixels. Degenerate or inverted boxes have zero area.
    pub fn area(&self) -> i64 {
        let w = self.width().max(0) as i64;
        let h = self.height().max(0) as i64;
        w * h
    }

    pub fn center(&self) -> (f32, f32) {
        (
            (self.x1 + self.x2) as f32 / 2.0,
            (self.y1 + self.y2) as f32 / 2.0,
        )
    }

    /// Shift the box by `(dx, dy)` pixels
    pub fn translated(&self, dx: i32, dy: i32) -> Self {
        Self {
            x1: self.x1 + dx,
            y1: self.y1 + dy,
            x2: self.x2 + dx,
            y2: self.y2 + dy,
        }
    }

    /// Convert to bounds array [x1, y1, x2, y2]
    pub fn to_bounds(&self) -> [i32; 4] {
        [self.x1, self.y1, self.x2, self.y2]
    }
}

impl From<(i32, i32, i32, i32)> for Bbox {
    fn from((x1, y1, x2, y2): (i32, i32, i32, i32)) -> Self {
        Self::new(x1, y1, x2, y2)
    }
}

impl fmt::Display for Bbox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {}, {})", self.x1, self.y1, self.x2, self.y2)
    }
}

/// Calculate intersection over union between two boxes.
///
/// Returns 0.0 for disjoint or edge-touching boxes and whenever the union
/// has no positive area.
pub fn calculate_iou(a: &Bbox, b: &Bbox) -> f32 {
    let x1 = a.x1.max(b.x1);
    let y1 = a.y1.max(b.y1);
    let x2 = a.x2.min(b.x2);
    let y2 = a.y2.min(b.y2);

    if x2 <= x1 || y2 <= y1 {
        return 0.0;
    }

    let intersection = (x2 - x1) as i64 * (y2 - y1) as i64;
    let union = a.area() + b.area() - intersection;

    if union > 0 {
        intersection as f32 / union as f32
    } else {
        0.0
    }
}

/// Compute the IoU matrix between detections and tracks in parallel.
/// Returns an (n_detections, n_tracks) matrix.
pub fn ious(detections: &[Bbox], tracks: &[Bbox]) -> Array2<f32> {
    let n_dets = detections.len();
    let n_tracks = tracks.len();

    if n_dets == 0 || n_tracks == 0 {
        return Array2::zeros((n_dets, n_tracks));
    }

    let iou_data: Vec<f32> = detections
        .par_iter()
        .flat_map_iter(|det| tracks.iter().map(move |track| calculate_iou(det, track)))
        .collect();

    Array2::from_shape_vec((n_dets, n_tracks), iou_data)
        .unwrap_or_else(|_| Array2::zeros((n_dets, n_tracks)))
}
