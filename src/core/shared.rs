//! State shared between the sampling worker and request handlers.

use crate::calibration::{CalibrationStore, MemoryCalibrationStore};
use crate::core::engineering::EngineeringOverride;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

/// Calibration, engineering override and the latest filtered pressure.
///
/// The worker writes `last_filtered_pressure` and reads the rest once per
/// tick. Request handlers do the opposite.
pub struct SharedState {
    calibration: Arc<dyn CalibrationStore>,
    engineering: EngineeringOverride,
    last_filtered_pressure: AtomicI32,
}

impl SharedState {
    pub fn new(calibration: Arc<dyn CalibrationStore>) -> Self {
        Self {
            calibration,
            engineering: EngineeringOverride::new(),
            last_filtered_pressure: AtomicI32::new(0),
        }
    }

    /// Shared state backed by an in-memory calibration store.
    pub fn in_memory() -> Arc<Self> {
        Arc::new(Self::new(Arc::new(MemoryCalibrationStore::default())))
    }

    pub fn calibration(&self) -> &dyn CalibrationStore {
        self.calibration.as_ref()
    }

    pub fn engineering(&self) -> &EngineeringOverride {
        &self.engineering
    }

    /// Latest filter output, in filter-gain units.
    pub fn last_filtered_pressure(&self) -> i32 {
        self.last_filtered_pressure.load(Ordering::Relaxed)
    }

    pub(crate) fn store_filtered_pressure(&self, value: i32) {
        self.last_filtered_pressure.store(value, Ordering::Relaxed);
    }
}

impl std::fmt::Debug for SharedState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedState")
            .field("calibration", &self.calibration.get_calibration())
            .field("engineering", &self.engineering)
            .field("last_filtered_pressure", &self.last_filtered_pressure())
            .finish()
    }
}
