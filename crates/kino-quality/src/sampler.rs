//! Buffer health sampling
//!
//! Classifies buffer-ahead into coarse bandwidth buckets and keeps a bounded
//! rolling history for the decision engine.

use crate::config::ControllerConfig;
use crate::quality::QualityLevel;
use crate::surface::ReadyState;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tokio::time::Instant;
use tracing::debug;

/// Coarse bandwidth classification of one buffer reading
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BandwidthBucket {
    Low,
    Medium,
    High,
}

/// One buffer reading
#[derive(Debug, Clone, Copy)]
pub struct BandwidthSample {
    pub bucket: BandwidthBucket,
    pub at_quality: QualityLevel,
    pub timestamp: Instant,
}

/// Low/high tallies over the most recent samples
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SampleCounts {
    pub low: usize,
    pub high: usize,
}

/// Buffer health sampler with a fixed-capacity FIFO history
#[derive(Debug)]
pub struct BufferHealthSampler {
    low_threshold: f64,
    high_threshold: f64,
    capacity: usize,
    min_samples: usize,
    history: VecDeque<BandwidthSample>,
}

impl BufferHealthSampler {
    pub fn new(config: &ControllerConfig) -> Self {
        Self {
            low_threshold: config.low_buffer_secs,
            high_threshold: config.high_buffer_secs,
            capacity: config.history_capacity.max(1),
            min_samples: config.min_samples,
            history: VecDeque::with_capacity(config.history_capacity.max(1)),
        }
    }

    /// Classify a buffer-ahead reading
    pub fn classify(&self, buffered_ahead: f64) -> BandwidthBucket {
        if buffered_ahead < self.low_threshold {
            BandwidthBucket::Low
        } else if buffered_ahead < self.high_threshold {
            BandwidthBucket::Medium
        } else {
            BandwidthBucket::High
        }
    }

    /// Take a sample and append it to the history.
    ///
    /// Returns `None` without recording anything when the surface has no
    /// metadata yet; an empty buffer at that point says nothing about the
    /// network.
    pub fn sample(
        &mut self,
        ready_state: ReadyState,
        buffered_ahead: f64,
        at_quality: QualityLevel,
        now: Instant,
    ) -> Option<BandwidthBucket> {
        if !ready_state.has_metadata() {
            debug!(?ready_state, "Skipping buffer sample before metadata");
            return None;
        }

        let bucket = self.classify(buffered_ahead);
        if self.history.len() >= self.capacity {
            self.history.pop_front();
        }
        self.history.push_back(BandwidthSample {
            bucket,
            at_quality,
            timestamp: now,
        });

        debug!(
            buffered_ahead,
            ?bucket,
            quality = %at_quality,
            samples = self.history.len(),
            "Buffer sampled"
        );

        Some(bucket)
    }

    /// Low and high counts over the last `window` samples.
    ///
    /// Zero counts when fewer than the minimum number of samples exist, so
    /// the engine abstains.
    pub fn recent_counts(&self, window: usize) -> SampleCounts {
        if self.history.len() < self.min_samples {
            return SampleCounts::default();
        }

        self.history
            .iter()
            .rev()
            .take(window)
            .fold(SampleCounts::default(), |mut counts, sample| {
                match sample.bucket {
                    BandwidthBucket::Low => counts.low += 1,
                    BandwidthBucket::High => counts.high += 1,
                    BandwidthBucket::Medium => {}
                }
                counts
            })
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    /// Most recent sample
    pub fn latest(&self) -> Option<&BandwidthSample> {
        self.history.back()
    }

    /// Drop the whole history
    pub fn clear(&mut self) {
        self.history.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sampler() -> BufferHealthSampler {
        BufferHealthSampler::new(&ControllerConfig::default())
    }

    fn push(sampler: &mut BufferHealthSampler, buffered: f64) {
        sampler.sample(ReadyState::HaveEnoughData, buffered, QualityLevel::Q720, Instant::now());
    }

    #[test]
    fn test_classification() {
        let sampler = sampler();
        assert_eq!(sampler.classify(0.0), BandwidthBucket::Low);
        assert_eq!(sampler.classify(1.99), BandwidthBucket::Low);
        assert_eq!(sampler.classify(2.0), BandwidthBucket::Medium);
        assert_eq!(sampler.classify(4.9), BandwidthBucket::Medium);
        assert_eq!(sampler.classify(5.0), BandwidthBucket::High);
    }

    #[test]
    fn test_no_sample_before_metadata() {
        let mut sampler = sampler();
        let bucket = sampler.sample(ReadyState::HaveNothing, 0.0, QualityLevel::Q720, Instant::now());
        assert_eq!(bucket, None);
        assert!(sampler.is_empty());
    }

    #[test]
    fn test_ring_buffer_evicts_oldest() {
        let mut sampler = sampler();
        push(&mut sampler, 0.5);
        for _ in 0..10 {
            push(&mut sampler, 10.0);
        }
        assert_eq!(sampler.len(), 10);
        // the Low sample was evicted
        assert_eq!(sampler.recent_counts(10), SampleCounts { low: 0, high: 10 });
    }

    #[test]
    fn test_counts_need_minimum_samples() {
        let mut sampler = sampler();
        push(&mut sampler, 0.5);
        push(&mut sampler, 0.5);
        assert_eq!(sampler.recent_counts(5), SampleCounts::default());

        push(&mut sampler, 0.5);
        assert_eq!(sampler.recent_counts(5), SampleCounts { low: 3, high: 0 });
    }

    #[test]
    fn test_counts_only_look_at_window() {
        let mut sampler = sampler();
        for buffered in [0.5, 0.5, 0.5, 8.0, 8.0, 3.0, 8.0, 8.0] {
            push(&mut sampler, buffered);
        }
        assert_eq!(sampler.recent_counts(5), SampleCounts { low: 0, high: 4 });
        assert_eq!(sampler.latest().map(|s| s.bucket), Some(BandwidthBucket::High));
    }
}
