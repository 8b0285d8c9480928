//! Gating and per-track memoization of explanation calls

use crate::config::GateConfig;
use crate::explainer::Explainer;
use crate::types::ClassificationResult;
use std::collections::{HashMap, VecDeque};

/// Inputs the gate needs for one frame
#[derive(Debug, Clone, Copy)]
pub struct GateRequest<'a> {
    pub classification: &'a ClassificationResult,
    pub track_id: Option<u32>,
    pub stable: bool,
    pub manual_override: bool,
    pub llm_enabled: bool,
}

/// Decides when the explainer runs and remembers its first answer per track.
///
/// A call is made only for a stable track whose fused confidence reaches
/// `min_confidence`, with LLM output enabled and no manual override. Cached
/// text is reused for later frames of the same track regardless of
/// confidence. The cache is bounded by `cache_capacity` (oldest insert
/// evicted first) and by `evict`, which the pipeline drives from tracker
/// age-outs.
#[derive(Debug)]
pub struct ExplanationGate {
    config: GateConfig,
    cache: HashMap<u32, String>,
    order: VecDeque<u32>,
    calls: u64,
}

impl ExplanationGate {
    pub fn new(config: GateConfig) -> Self {
        Self {
            config,
            cache: HashMap::new(),
            order: VecDeque::new(),
            calls: 0,
        }
    }

    pub fn resolve(
        &mut self,
        request: GateRequest<'_>,
        explainer: &mut dyn Explainer,
    ) -> Option<String> {
        if request.manual_override || !request.llm_enabled {
            return None;
        }
        let track_id = request.track_id?;

        if let Some(text) = self.cache.get(&track_id) {
            return Some(text.clone());
        }

        let cls = request.classification;
        if cls.confidence < self.config.min_confidence || !request.stable {
            return None;
        }

        self.calls += 1;
        match explainer.explain(&cls.label, cls.confidence) {
            Ok(text) => {
                if self.config.cache_enabled {
                    self.insert(track_id, text.clone());
                }
                Some(text)
            }
            Err(e) => {
                log::warn!("Explainer {} failed for track {}: {}", explainer.name(), track_id, e);
                None
            }
        }
    }

    fn insert(&mut self, track_id: u32, text: String) {
        self.cache.insert(track_id, text);
        self.order.push_back(track_id);
        while self.cache.len() > self.config.cache_capacity {
            match self.order.pop_front() {
                Some(oldest) => {
                    self.cache.remove(&oldest);
                }
                None => break,
            }
        }
    }

    /// Forget explanations for tracks the tracker no longer holds
    pub fn evict(&mut self, track_ids: &[u32]) {
        if track_ids.is_empty() {
            return;
        }
        for id in track_ids {
            self.cache.remove(id);
        }
        self.order.retain(|id| !track_ids.contains(id));
    }

    pub fn clear(&mut self) {
        self.cache.clear();
        self.order.clear();
    }

    pub fn cached(&self, track_id: u32) -> Option<&str> {
        self.cache.get(&track_id).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    /// Explainer invocations so far
    pub fn calls(&self) -> u64 {
        self.calls
    }
}
