//! Breath sensor calibration and its storage.
//!
//! Calibration values are raw sensor counts. The detector reads one
//! snapshot per tick; request handlers read, modify and write back whole
//! snapshots, so a partial update is never visible.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Breath sensor calibration, in raw sensor counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Calibration {
    /// Subtracted from every raw sample
    pub zero_offset: i32,
    /// Filtered pressure at or below this level triggers a breath
    pub trigger_level: i32,
    /// Exhalation detection level
    pub exhalation_detect_level: i32,
}

/// Access to the calibration owned by the surrounding system.
pub trait CalibrationStore: Send + Sync {
    /// Consistent snapshot of the current calibration.
    fn get_calibration(&self) -> Calibration;

    /// Replace the calibration as a whole.
    fn set_calibration(&self, calibration: Calibration) {
        self.update(&mut |current| *current = calibration);
    }

    /// Read, modify and write back the calibration as one step. Concurrent
    /// updates are applied one after the other, never interleaved.
    fn update(&self, f: &mut dyn FnMut(&mut Calibration));
}

/// Linear conversion between sensor counts and pascals.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PressureTransform {
    pub pascals_per_count: f32,
}

impl Default for PressureTransform {
    fn default() -> Self {
        Self {
            pascals_per_count: 0.0625,
        }
    }
}

impl PressureTransform {
    pub fn new(pascals_per_count: f32) -> Self {
        Self { pascals_per_count }
    }

    pub fn counts_to_pascals(&self, counts: i32) -> f32 {
        counts as f32 * self.pascals_per_count
    }

    /// Inverse of [`counts_to_pascals`](Self::counts_to_pascals), rounded to the nearest count.
    pub fn pascals_to_counts(&self, pascals: f32) -> i32 {
        (pascals / self.pascals_per_count).round() as i32
    }
}

/// Calibration held in memory.
#[derive(Debug, Default)]
pub struct MemoryCalibrationStore {
    current: RwLock<Calibration>,
}

impl MemoryCalibrationStore {
    pub fn new(calibration: Calibration) -> Self {
        Self {
            current: RwLock::new(calibration),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Calibration> {
        // A writer cannot leave a Copy value half-written, so a poisoned
        // lock still guards a consistent snapshot.
        self.current.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Calibration> {
        self.current.write().unwrap_or_else(|e| e.into_inner())
    }
}

impl CalibrationStore for MemoryCalibrationStore {
    fn get_calibration(&self) -> Calibration {
        *self.read()
    }

    fn update(&self, f: &mut dyn FnMut(&mut Calibration)) {
        f(&mut *self.write());
    }
}

/// Calibration held in memory and mirrored to a JSON file.
#[derive(Debug)]
pub struct FileCalibrationStore {
    memory: MemoryCalibrationStore,
    path: PathBuf,
    /// Held across update and file write so the file sees updates in order
    writer: Mutex<()>,
}

impl FileCalibrationStore {
    /// Open the store, loading the file if it exists.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, CalibrationError> {
        let path = path.into();
        let calibration = if path.exists() {
            let content = std::fs::read_to_string(&path)
                .map_err(|e| CalibrationError::IoError(e.to_string()))?;
            serde_json::from_str(&content)
                .map_err(|e| CalibrationError::ParseError(e.to_string()))?
        } else {
            Calibration::default()
        };

        Ok(Self {
            memory: MemoryCalibrationStore::new(calibration),
            path,
            writer: Mutex::new(()),
        })
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write the current calibration to disk.
    pub fn save(&self) -> Result<(), CalibrationError> {
        let _writer = self.writer.lock().unwrap_or_else(|e| e.into_inner());
        self.write_file(&self.memory.get_calibration())
    }

    fn write_file(&self, calibration: &Calibration) -> Result<(), CalibrationError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| CalibrationError::IoError(e.to_string()))?;
        }

        let content = serde_json::to_string_pretty(calibration)
            .map_err(|e| CalibrationError::SerializeError(e.to_string()))?;

        std::fs::write(&self.path, content).map_err(|e| CalibrationError::IoError(e.to_string()))
    }
}

impl CalibrationStore for FileCalibrationStore {
    fn get_calibration(&self) -> Calibration {
        self.memory.get_calibration()
    }

    /// Readers see the new value before it reaches the file.
    fn update(&self, f: &mut dyn FnMut(&mut Calibration)) {
        let _writer = self.writer.lock().unwrap_or_else(|e| e.into_inner());

        let mut updated = Calibration::default();
        self.memory.update(&mut |current| {
            f(current);
            updated = *current;
        });

        if let Err(e) = self.write_file(&updated) {
            tracing::warn!("Could not persist calibration to {:?}: {e}", self.path);
        }
    }
}

/// Calibration storage errors.
#[derive(Debug)]
pub enum CalibrationError {
    IoError(String),
    ParseError(String),
    SerializeError(String),
}

impl std::fmt::Display for CalibrationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CalibrationError::IoError(e) => write!(f, "IO error: {e}"),
            CalibrationError::ParseError(e) => write!(f, "Parse error: {e}"),
            CalibrationError::SerializeError(e) => write!(f, "Serialize error: {e}"),
        }
    }
}

impl std::error::Error for CalibrationError {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Barrier};

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("breath-monitor-cal-{}", uuid::Uuid::new_v4()))
            .join(name)
    }

    #[test]
    fn test_pressure_roundtrip() {
        let transform = PressureTransform::default();
        for counts in [-4096, -100, -1, 0, 1, 37, 2048, 65535] {
            let pascals = transform.counts_to_pascals(counts);
            assert_eq!(transform.pascals_to_counts(pascals), counts);
        }

        let transform = PressureTransform::new(0.3);
        for pascals in [-12.0_f32, -0.9, 0.0, 0.3, 150.0] {
            let counts = transform.pascals_to_counts(pascals);
            assert!((transform.counts_to_pascals(counts) - pascals).abs() <= 0.15 + 1e-4);
        }
    }

    #[test]
    fn test_memory_store_snapshot() {
        let store = MemoryCalibrationStore::default();
        assert_eq!(store.get_calibration(), Calibration::default());

        let cal = Calibration {
            zero_offset: 2048,
            trigger_level: -80,
            exhalation_detect_level: 40,
        };
        store.set_calibration(cal);
        assert_eq!(store.get_calibration(), cal);
    }

    #[test]
    fn test_file_store_persists() {
        let path = temp_path("calibration.json");
        let cal = Calibration {
            zero_offset: 1900,
            trigger_level: -120,
            exhalation_detect_level: 15,
        };

        {
            let store = FileCalibrationStore::open(&path).unwrap();
            assert_eq!(store.get_calibration(), Calibration::default());
            store.set_calibration(cal);
        }

        let reopened = FileCalibrationStore::open(&path).unwrap();
        assert_eq!(reopened.get_calibration(), cal);
        assert_eq!(reopened.path(), path.as_path());

        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn test_concurrent_updates_are_not_lost() {
        let store = Arc::new(MemoryCalibrationStore::default());
        let barrier = Arc::new(Barrier::new(2));

        let handles: Vec<_> = (0..2)
            .map(|worker| {
                let store = store.clone();
                let barrier = barrier.clone();
                std::thread::spawn(move || {
                    barrier.wait();
                    for _ in 0..20_000 {
                        store.update(&mut |cal| {
                            if worker == 0 {
                                cal.trigger_level -= 1;
                            } else {
                                cal.exhalation_detect_level += 1;
                            }
                        });
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        let cal = store.get_calibration();
        assert_eq!(cal.trigger_level, -20_000);
        assert_eq!(cal.exhalation_detect_level, 20_000);
    }

    #[test]
    fn test_file_store_update_persists() {
        let path = temp_path("calibration.json");
        let store = FileCalibrationStore::open(&path).unwrap();
        store.update(&mut |cal| cal.zero_offset = 1234);
        store.update(&mut |cal| cal.trigger_level = -50);

        let reopened = FileCalibrationStore::open(&path).unwrap();
        assert_eq!(
            reopened.get_calibration(),
            Calibration {
                zero_offset: 1234,
                trigger_level: -50,
                exhalation_detect_level: 0,
            }
        );

        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn test_file_store_rejects_garbage() {
        let path = temp_path("calibration.json");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "not json").unwrap();

        assert!(matches!(
            FileCalibrationStore::open(&path),
            Err(CalibrationError::ParseError(_))
        ));

        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }
}
