//! Breath Monitor - breath detection and apnea alarm engine.
//!
//! This library samples a breathing-pressure sensor, filters the signal,
//! detects the onset of each breath, measures inter-breath timing and raises
//! an alarm when breathing stops for too long.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        Breath Monitor                        │
//! ├──────────────────────────────────────────────────────────────┤
//! │  ┌─────────────┐   ┌─────────────┐   ┌──────────────────┐    │
//! │  │   Sampler   │──▶│  IIR Filter │──▶│  Breath Detector │    │
//! │  │  (ADC feed) │   │  (10 Hz LP) │   │ (holdoff, apnea) │    │
//! │  └─────────────┘   └─────────────┘   └──────────────────┘    │
//! │                                        │       │      ▲      │
//! │                                        ▼       ▼      │      │
//! │                          ┌───────────────┐ ┌───────┐  │      │
//! │                          │  Breath Log   │ │ Alarm │  │      │
//! │                          └───────────────┘ └───────┘  │      │
//! │  ┌──────────────────────────────────────────────────┐ │      │
//! │  │ Calibration protocol / engineering override      │─┘      │
//! │  └──────────────────────────────────────────────────┘        │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use breath_monitor::{
//!     AlarmPanel, BreathDetector, BreathLog, BreathingPattern, Config, Monitor, SharedState,
//!     SyntheticBreathing,
//! };
//!
//! let config = Config::default();
//! let shared = SharedState::in_memory();
//! let detector = BreathDetector::new(
//!     &config,
//!     shared,
//!     Arc::new(AlarmPanel::new()),
//!     Arc::new(BreathLog::new()),
//! );
//!
//! let source = SyntheticBreathing::paced(BreathingPattern::default(), 1);
//! let mut monitor = Monitor::new(detector, source, config.sampling.tick_interval);
//! monitor.enable().expect("Failed to start sampling worker");
//! ```

pub mod alarm;
pub mod calibration;
pub mod config;
pub mod core;
pub mod monitor;
pub mod protocol;
pub mod sampler;
pub mod transparency;

#[cfg(feature = "server")]
pub mod server;

// Re-export key types at crate root for convenience
pub use alarm::{AlarmKind, AlarmPanel, AlarmSink, AlarmStatus};
pub use calibration::{
    Calibration, CalibrationError, CalibrationStore, FileCalibrationStore,
    MemoryCalibrationStore, PressureTransform,
};
pub use config::{Config, ConfigError, SamplingConfig, TimingConfig};
pub use crate::core::{
    BreathDetector, BreathEvent, DetectorState, EngineeringOverride, SharedState, TickOutcome,
    ENGINEERING_UNLOCK_CODE,
};
pub use monitor::Monitor;
pub use protocol::{CalibrationProtocol, ConsoleCommand, Request, Response};
pub use sampler::{BreathingPattern, ChannelSource, SampleSource, SyntheticBreathing};
pub use transparency::{BreathLog, BreathReportSink, BreathStats, SharedBreathLog};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
