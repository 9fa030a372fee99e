//! Breath report log.
//!
//! Receives every confirmed breath from the detector and keeps running
//! statistics that can be displayed or persisted between sessions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use uuid::Uuid;

/// Number of recent breath periods kept for rate statistics.
pub const RECENT_PERIODS: usize = 16;

/// Receiver of confirmed breaths. Must not block.
pub trait BreathReportSink: Send + Sync {
    /// Called once per confirmed breath with the observed (unclamped) period.
    fn report_breath(&self, period_ms: u32);

    /// Called once per tick with the number of samples processed.
    fn record_tick(&self, _samples: usize) {}
}

impl<T: BreathReportSink + ?Sized> BreathReportSink for Arc<T> {
    fn report_breath(&self, period_ms: u32) {
        (**self).report_breath(period_ms)
    }

    fn record_tick(&self, samples: usize) {
        (**self).record_tick(samples)
    }
}

/// Breath statistics for the current session.
#[derive(Debug)]
pub struct BreathLog {
    /// Number of breaths reported
    breaths_reported: AtomicU64,
    /// Number of raw samples processed
    samples_processed: AtomicU64,
    /// Number of ticks run
    ticks: AtomicU64,
    /// Most recent observed period
    last_period_ms: AtomicU32,
    /// Ring of recent observed periods (0 = empty slot)
    recent_periods: [AtomicU32; RECENT_PERIODS],
    /// Next slot to write in `recent_periods`
    recent_head: AtomicUsize,
    /// Session identifier
    session_id: Uuid,
    /// Session start time
    session_start: DateTime<Utc>,
    /// Path for persisting stats
    persist_path: Option<PathBuf>,
}

impl BreathLog {
    /// Create a new breath log.
    pub fn new() -> Self {
        Self {
            breaths_reported: AtomicU64::new(0),
            samples_processed: AtomicU64::new(0),
            ticks: AtomicU64::new(0),
            last_period_ms: AtomicU32::new(0),
            recent_periods: std::array::from_fn(|_| AtomicU32::new(0)),
            recent_head: AtomicUsize::new(0),
            session_id: Uuid::new_v4(),
            session_start: Utc::now(),
            persist_path: None,
        }
    }

    /// Create a breath log whose totals carry over between sessions.
    pub fn with_persistence(path: PathBuf) -> Self {
        let mut log = Self::new();
        log.persist_path = Some(path);

        if let Err(e) = log.load() {
            tracing::warn!("Could not load previous breath stats: {e}");
        }

        log
    }

    /// Recent periods, oldest first.
    pub fn recent_periods(&self) -> Vec<u32> {
        let head = self.recent_head.load(Ordering::Acquire);
        (0..RECENT_PERIODS)
            .map(|i| self.recent_periods[(head + i) % RECENT_PERIODS].load(Ordering::Relaxed))
            .filter(|&p| p != 0)
            .collect()
    }

    /// Get the current statistics.
    pub fn stats(&self) -> BreathStats {
        let recent: Vec<f64> = self.recent_periods().into_iter().map(f64::from).collect();

        let mean_period_ms = (!recent.is_empty()).then(|| recent.iter().mean());
        let period_std_dev_ms = (recent.len() >= 2).then(|| recent.iter().std_dev());
        let breaths_per_minute = mean_period_ms
            .filter(|&mean| mean > 0.0)
            .map(|mean| 60_000.0 / mean);

        BreathStats {
            session_id: self.session_id,
            breaths_reported: self.breaths_reported.load(Ordering::Relaxed),
            samples_processed: self.samples_processed.load(Ordering::Relaxed),
            ticks: self.ticks.load(Ordering::Relaxed),
            last_period_ms: self.last_period_ms.load(Ordering::Relaxed),
            mean_period_ms,
            period_std_dev_ms,
            breaths_per_minute,
            session_start: self.session_start,
            session_duration_secs: (Utc::now() - self.session_start).num_seconds().max(0) as u64,
        }
    }

    /// Get a summary string for display.
    pub fn summary(&self) -> String {
        let stats = self.stats();
        let rate = stats
            .breaths_per_minute
            .map(|bpm| format!("{bpm:.1} BPM"))
            .unwrap_or_else(|| "n/a".to_string());

        format!(
            "Session Statistics:\n\
             - Session: {}\n\
             - Samples processed: {}\n\
             - Breaths reported: {}\n\
             - Last breath period: {} ms\n\
             - Breath rate (last {} breaths): {}\n\
             - Session duration: {} seconds",
            stats.session_id,
            stats.samples_processed,
            stats.breaths_reported,
            stats.last_period_ms,
            RECENT_PERIODS,
            rate,
            stats.session_duration_secs
        )
    }

    /// Save stats to disk.
    pub fn save(&self) -> Result<(), std::io::Error> {
        if let Some(ref path) = self.persist_path {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }

            let stats = self.stats();
            let persisted = PersistedStats {
                breaths_reported: stats.breaths_reported,
                samples_processed: stats.samples_processed,
                last_updated: Utc::now(),
            };

            let json = serde_json::to_string_pretty(&persisted).map_err(std::io::Error::other)?;

            std::fs::write(path, json)?;
        }
        Ok(())
    }

    /// Load stats from disk.
    fn load(&mut self) -> Result<(), std::io::Error> {
        if let Some(ref path) = self.persist_path {
            if path.exists() {
                let content = std::fs::read_to_string(path)?;
                let persisted: PersistedStats =
                    serde_json::from_str(&content).map_err(std::io::Error::other)?;

                self.breaths_reported
                    .store(persisted.breaths_reported, Ordering::Relaxed);
                self.samples_processed
                    .store(persisted.samples_processed, Ordering::Relaxed);
            }
        }
        Ok(())
    }

    /// Reset all counters.
    pub fn reset(&self) {
        self.breaths_reported.store(0, Ordering::Relaxed);
        self.samples_processed.store(0, Ordering::Relaxed);
        self.ticks.store(0, Ordering::Relaxed);
        self.last_period_ms.store(0, Ordering::Relaxed);
        for slot in &self.recent_periods {
            slot.store(0, Ordering::Relaxed);
        }
        self.recent_head.store(0, Ordering::Release);
    }
}

impl Default for BreathLog {
    fn default() -> Self {
        Self::new()
    }
}

impl BreathReportSink for BreathLog {
    fn report_breath(&self, period_ms: u32) {
        self.breaths_reported.fetch_add(1, Ordering::Relaxed);
        self.last_period_ms.store(period_ms, Ordering::Relaxed);

        // Single writer (the sampling worker)
        let head = self.recent_head.load(Ordering::Relaxed);
        self.recent_periods[head].store(period_ms.max(1), Ordering::Relaxed);
        self.recent_head
            .store((head + 1) % RECENT_PERIODS, Ordering::Release);
    }

    fn record_tick(&self, samples: usize) {
        self.ticks.fetch_add(1, Ordering::Relaxed);
        self.samples_processed
            .fetch_add(samples as u64, Ordering::Relaxed);
    }
}

/// Snapshot of breath statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreathStats {
    pub session_id: Uuid,
    pub breaths_reported: u64,
    pub samples_processed: u64,
    pub ticks: u64,
    pub last_period_ms: u32,
    pub mean_period_ms: Option<f64>,
    pub period_std_dev_ms: Option<f64>,
    pub breaths_per_minute: Option<f64>,
    pub session_start: DateTime<Utc>,
    pub session_duration_secs: u64,
}

/// Stats format for persistence.
#[derive(Debug, Serialize, Deserialize)]
struct PersistedStats {
    breaths_reported: u64,
    samples_processed: u64,
    last_updated: DateTime<Utc>,
}

/// Thread-safe shared breath log.
pub type SharedBreathLog = Arc<BreathLog>;

/// Create a new shared breath log.
pub fn create_shared_log() -> SharedBreathLog {
    Arc::new(BreathLog::new())
}

/// Create a new shared breath log with persistence.
pub fn create_shared_log_with_persistence(path: PathBuf) -> SharedBreathLog {
    Arc::new(BreathLog::with_persistence(path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_breath_counting() {
        let log = BreathLog::new();

        log.report_breath(3000);
        log.report_breath(3200);
        log.record_tick(4);
        log.record_tick(3);

        let stats = log.stats();
        assert_eq!(stats.breaths_reported, 2);
        assert_eq!(stats.last_period_ms, 3200);
        assert_eq!(stats.samples_processed, 7);
        assert_eq!(stats.ticks, 2);
    }

    #[test]
    fn test_rate_statistics() {
        let log = BreathLog::new();
        assert!(log.stats().breaths_per_minute.is_none());

        for _ in 0..4 {
            log.report_breath(3000);
        }

        let stats = log.stats();
        assert!((stats.mean_period_ms.unwrap() - 3000.0).abs() < 1e-9);
        assert!(stats.period_std_dev_ms.unwrap().abs() < 1e-9);
        assert!((stats.breaths_per_minute.unwrap() - 20.0).abs() < 1e-9);
    }

    #[test]
    fn test_recent_ring_keeps_latest() {
        let log = BreathLog::new();
        for period in 1..=(RECENT_PERIODS as u32 + 4) {
            log.report_breath(period * 100);
        }

        let recent = log.recent_periods();
        assert_eq!(recent.len(), RECENT_PERIODS);
        assert_eq!(recent[0], 500);
        assert_eq!(*recent.last().unwrap(), (RECENT_PERIODS as u32 + 4) * 100);
    }

    #[test]
    fn test_reset() {
        let log = BreathLog::new();
        log.report_breath(2500);
        log.record_tick(10);
        log.reset();

        let stats = log.stats();
        assert_eq!(stats.breaths_reported, 0);
        assert_eq!(stats.samples_processed, 0);
        assert!(log.recent_periods().is_empty());
    }

    #[test]
    fn test_persistence_roundtrip() {
        let path = std::env::temp_dir()
            .join(format!("breath-monitor-log-{}", Uuid::new_v4()))
            .join("stats.json");

        let log = BreathLog::with_persistence(path.clone());
        log.report_breath(3000);
        log.record_tick(40);
        log.save().unwrap();

        let reloaded = BreathLog::with_persistence(path.clone());
        let stats = reloaded.stats();
        assert_eq!(stats.breaths_reported, 1);
        assert_eq!(stats.samples_processed, 40);

        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn test_summary_format() {
        let log = BreathLog::new();
        let summary = log.summary();

        assert!(summary.contains("Breaths reported"));
        assert!(summary.contains("Samples processed"));
        assert!(summary.contains("n/a"));
    }
}
