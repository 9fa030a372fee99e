//! Synthetic breathing waveform.
//!
//! Produces a steady baseline with a pressure dip at the start of every
//! breath. Used by the CLI when no sensor driver is attached and by tests.

use crate::sampler::SampleSource;
use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Shape of the generated waveform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreathingPattern {
    /// Resting reading in ADC counts
    pub baseline: u16,
    /// How far each breath pulls the reading below baseline
    pub dip_depth: u16,
    /// Length of each dip in milliseconds
    pub dip_ms: u32,
    /// Time from one breath onset to the next
    pub period_ms: u32,
    /// Stop breathing after this many breaths
    pub stop_after: Option<u32>,
}

impl Default for BreathingPattern {
    fn default() -> Self {
        Self {
            baseline: 2048,
            dip_depth: 400,
            dip_ms: 300,
            period_ms: 3000, // 20 BPM
            stop_after: None,
        }
    }
}

/// Deterministic breath waveform generator.
pub struct SyntheticBreathing {
    pattern: BreathingPattern,
    sample_period_ms: u32,
    emitted: u64,
    started: Option<Instant>,
}

impl SyntheticBreathing {
    /// Generator that returns as many samples as requested on every call.
    pub fn new(pattern: BreathingPattern, sample_period_ms: u32) -> Self {
        Self {
            pattern,
            sample_period_ms: sample_period_ms.max(1),
            emitted: 0,
            started: None,
        }
    }

    /// Generator that releases samples at the real sample rate.
    pub fn paced(pattern: BreathingPattern, sample_period_ms: u32) -> Self {
        let mut source = Self::new(pattern, sample_period_ms);
        source.started = Some(Instant::now());
        source
    }

    pub fn pattern(&self) -> &BreathingPattern {
        &self.pattern
    }

    /// Samples generated so far.
    pub fn emitted(&self) -> u64 {
        self.emitted
    }

    /// Produce the next sample.
    pub fn next_sample(&mut self) -> u16 {
        let t_ms = self.emitted * u64::from(self.sample_period_ms);
        self.emitted += 1;

        let period = u64::from(self.pattern.period_ms.max(1));
        let breath = t_ms / period;
        let phase = t_ms % period;

        let breathing = self
            .pattern
            .stop_after
            .map_or(true, |limit| breath < u64::from(limit));

        if breathing && phase < u64::from(self.pattern.dip_ms) {
            self.pattern.baseline.saturating_sub(self.pattern.dip_depth)
        } else {
            self.pattern.baseline
        }
    }

    /// Collect `count` samples.
    pub fn take(&mut self, count: usize) -> Vec<u16> {
        (0..count).map(|_| self.next_sample()).collect()
    }

    fn due(&self) -> usize {
        match self.started {
            None => usize::MAX,
            Some(start) => {
                let elapsed_ms = start.elapsed().as_millis() as u64;
                let total = elapsed_ms / u64::from(self.sample_period_ms);
                total.saturating_sub(self.emitted) as usize
            }
        }
    }
}

impl SampleSource for SyntheticBreathing {
    fn get_samples(&mut self, buf: &mut [u16]) -> usize {
        let count = buf.len().min(self.due());
        for slot in &mut buf[..count] {
            *slot = self.next_sample();
        }
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_waveform_shape() {
        let pattern = BreathingPattern {
            baseline: 2000,
            dip_depth: 500,
            dip_ms: 2,
            period_ms: 5,
            stop_after: None,
        };
        let mut gen = SyntheticBreathing::new(pattern, 1);
        assert_eq!(
            gen.take(10),
            vec![1500, 1500, 2000, 2000, 2000, 1500, 1500, 2000, 2000, 2000]
        );
        assert_eq!(gen.emitted(), 10);
    }

    #[test]
    fn test_stop_after_goes_flat() {
        let pattern = BreathingPattern {
            baseline: 2000,
            dip_depth: 500,
            dip_ms: 1,
            period_ms: 3,
            stop_after: Some(2),
        };
        let mut gen = SyntheticBreathing::new(pattern, 1);
        assert_eq!(gen.take(9), vec![1500, 2000, 2000, 1500, 2000, 2000, 2000, 2000, 2000]);
    }

    #[test]
    fn test_unpaced_fills_buffer() {
        let mut gen = SyntheticBreathing::new(BreathingPattern::default(), 1);
        let mut buf = [0u16; 8];
        assert_eq!(gen.get_samples(&mut buf), 8);
    }

    #[test]
    fn test_paced_releases_nothing_immediately() {
        let mut gen = SyntheticBreathing::paced(BreathingPattern::default(), 1000);
        let mut buf = [0u16; 8];
        assert_eq!(gen.get_samples(&mut buf), 0);
    }
}
