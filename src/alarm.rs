//! Alarm sink used by the breath detector.
//!
//! The detector only decides when an alarm should be raised or cleared.
//! How it is presented is up to the sink.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// Alarms raised by this crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlarmKind {
    /// No breath detected for the apnea detection period
    Apnea,
}

/// Receiver of alarm activations. Calls are idempotent and must not block.
pub trait AlarmSink: Send + Sync {
    fn activate(&self, alarm: AlarmKind);
    fn clear(&self, alarm: AlarmKind);
}

impl<T: AlarmSink + ?Sized> AlarmSink for Arc<T> {
    fn activate(&self, alarm: AlarmKind) {
        (**self).activate(alarm)
    }

    fn clear(&self, alarm: AlarmKind) {
        (**self).clear(alarm)
    }
}

/// In-process alarm state with transition counters.
#[derive(Debug, Default)]
pub struct AlarmPanel {
    apnea_active: AtomicBool,
    apnea_activations: AtomicU64,
    apnea_clears: AtomicU64,
}

/// Point-in-time view of an [`AlarmPanel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlarmStatus {
    pub apnea_active: bool,
    pub apnea_activations: u64,
    pub apnea_clears: u64,
}

impl AlarmPanel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_active(&self, alarm: AlarmKind) -> bool {
        match alarm {
            AlarmKind::Apnea => self.apnea_active.load(Ordering::Acquire),
        }
    }

    pub fn status(&self) -> AlarmStatus {
        AlarmStatus {
            apnea_active: self.apnea_active.load(Ordering::Acquire),
            apnea_activations: self.apnea_activations.load(Ordering::Relaxed),
            apnea_clears: self.apnea_clears.load(Ordering::Relaxed),
        }
    }
}

impl AlarmSink for AlarmPanel {
    fn activate(&self, alarm: AlarmKind) {
        match alarm {
            AlarmKind::Apnea => {
                if !self.apnea_active.swap(true, Ordering::AcqRel) {
                    self.apnea_activations.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(?alarm, "Alarm activated");
                }
            }
        }
    }

    fn clear(&self, alarm: AlarmKind) {
        match alarm {
            AlarmKind::Apnea => {
                if self.apnea_active.swap(false, Ordering::AcqRel) {
                    self.apnea_clears.fetch_add(1, Ordering::Relaxed);
                    tracing::info!(?alarm, "Alarm cleared");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_activation_is_idempotent() {
        let panel = AlarmPanel::new();
        panel.activate(AlarmKind::Apnea);
        panel.activate(AlarmKind::Apnea);
        assert!(panel.is_active(AlarmKind::Apnea));
        assert_eq!(panel.status().apnea_activations, 1);

        panel.clear(AlarmKind::Apnea);
        panel.clear(AlarmKind::Apnea);
        let status = panel.status();
        assert!(!status.apnea_active);
        assert_eq!(status.apnea_clears, 1);
    }

    #[test]
    fn test_shared_panel_through_arc() {
        let panel = Arc::new(AlarmPanel::new());
        let sink: Arc<dyn AlarmSink> = panel.clone();
        sink.activate(AlarmKind::Apnea);
        assert!(panel.is_active(AlarmKind::Apnea));
    }
}
