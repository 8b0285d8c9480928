//! Greedy IoU tracker with label continuity, frame-based aging and stability
//! classification.

use crate::bbox::{ious, Bbox};
use std::collections::BTreeMap;
use std::time::Instant;

/// Anything the tracker can associate: a labelled, scored box that can be
/// stamped with a track id.
pub trait TrackInput {
    fn label(&self) -> &str;
    fn bbox(&self) -> Bbox;
    fn confidence(&self) -> f32;
    fn set_track_id(&mut self, track_id: u32);
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackerConfig {
    /// A detection joins a track only when IoU is strictly above this value
    pub iou_threshold: f32,
    /// Number of `update` calls a track may go unmatched before it is dropped
    pub max_age: u32,
    /// Matched frames required before a track counts as stable
    pub min_stable: u32,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            iou_threshold: 0.5,
            max_age: 30,
            min_stable: 3,
        }
    }
}

/// A persistent identity linking detections of one object across frames
#[derive(Debug, Clone)]
pub struct TrackedObject {
    pub track_id: u32,
    pub label: String,
    pub confidence: f32,
    pub bbox: Bbox,
    /// Tracker step at which this track was last matched
    pub last_seen: u64,
    /// Wall-clock time of the last match
    pub last_seen_at: Instant,
    /// Number of frames in which this track was matched, creation included
    pub frame_count: u32,
}

#[derive(Debug, Clone)]
pub struct IouTracker {
    config: TrackerConfig,
    tracks: BTreeMap<u32, TrackedObject>,
    next_track_id: u32,
    n_steps: u64,
    evicted: Vec<u32>,
}

impl IouTracker {
    pub fn new(config: TrackerConfig) -> Self {
        Self {
            config,
            tracks: BTreeMap::new(),
            next_track_id: 0,
            n_steps: 0,
            evicted: Vec::new(),
        }
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    /// Associate this frame's detections with existing tracks.
    ///
    /// Detections are visited in input order. Each one claims the unclaimed
    /// track with the same label and the highest IoU above the threshold;
    /// ties keep the earlier track in id order. Detections that match nothing
    /// open a new track. Every detection comes back stamped with a track id.
    pub fn update<D: TrackInput>(&mut self, detections: &mut [D]) {
        self.n_steps += 1;
        self.evict_stale();

        if detections.is_empty() {
            return;
        }

        let now = Instant::now();
        let track_ids: Vec<u32> = self.tracks.keys().copied().collect();
        let track_boxes: Vec<Bbox> = self.tracks.values().map(|t| t.bbox).collect();
        let det_boxes: Vec<Bbox> = detections.iter().map(|d| d.bbox()).collect();
        let iou_matrix = ious(&det_boxes, &track_boxes);

        let mut claimed = vec![false; track_ids.len()];

        for (det_idx, detection) in detections.iter_mut().enumerate() {
            let mut best: Option<usize> = None;
            let mut best_iou = self.config.iou_threshold;

            for (track_idx, track_id) in track_ids.iter().enumerate() {
                if claimed[track_idx] {
                    continue;
                }
                let iou = iou_matrix[[det_idx, track_idx]];
                if iou > best_iou && self.tracks[track_id].label == detection.label() {
                    best_iou = iou;
                    best = Some(track_idx);
                }
            }

            let track_id = match best {
                Some(track_idx) => {
                    claimed[track_idx] = true;
                    let track_id = track_ids[track_idx];
                    if let Some(track) = self.tracks.get_mut(&track_id) {
                        track.bbox = detection.bbox();
                        track.confidence = detection.confidence();
                        track.last_seen = self.n_steps;
                        track.last_seen_at = now;
                        track.frame_count += 1;
                    }
                    track_id
                }
                None => self.open_track(detection, now),
            };

            detection.set_track_id(track_id);
        }

        log::debug!(
            "Tracker step {}: {} detections, {} active tracks",
            self.n_steps,
            detections.len(),
            self.tracks.len()
        );
    }

    fn open_track<D: TrackInput>(&mut self, detection: &D, now: Instant) -> u32 {
        let track_id = self.next_track_id;
        self.next_track_id += 1;
        self.tracks.insert(
            track_id,
            TrackedObject {
                track_id,
                label: detection.label().to_string(),
                confidence: detection.confidence(),
                bbox: detection.bbox(),
                last_seen: self.n_steps,
                last_seen_at: now,
                frame_count: 1,
            },
        );
        track_id
    }

    fn evict_stale(&mut self) {
        self.evicted.clear();
        let step = self.n_steps;
        let max_age = self.config.max_age as u64;
        let evicted = &mut self.evicted;
        self.tracks.retain(|&track_id, track| {
            let keep = step - track.last_seen <= max_age;
            if !keep {
                evicted.push(track_id);
            }
            keep
        });
        if !self.evicted.is_empty() {
            log::debug!("Tracker aged out tracks {:?}", self.evicted);
        }
    }

    /// True iff the track is alive and has been matched at least `min_stable` times
    pub fn is_stable(&self, track_id: u32) -> bool {
        self.tracks
            .get(&track_id)
            .is_some_and(|t| t.frame_count >= self.config.min_stable)
    }

    pub fn stable_tracks(&self) -> Vec<&TrackedObject> {
        self.tracks
            .values()
            .filter(|t| t.frame_count >= self.config.min_stable)
            .collect()
    }

    pub fn track(&self, track_id: u32) -> Option<&TrackedObject> {
        self.tracks.get(&track_id)
    }

    pub fn tracks(&self) -> impl Iterator<Item = &TrackedObject> {
        self.tracks.values()
    }

    /// Track ids dropped by the most recent `update`
    pub fn evicted(&self) -> &[u32] {
        &self.evicted
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn step_count(&self) -> u64 {
        self.n_steps
    }

    /// Forget every track and restart ids from zero
    pub fn reset(&mut self) {
        self.tracks.clear();
        self.evicted.clear();
        self.next_track_id = 0;
        self.n_steps = 0;
    }
}

impl Default for IouTracker {
    fn default() -> Self {
        Self::new(TrackerConfig::default())
    }
}
