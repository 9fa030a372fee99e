//! Core breath detection for the breath monitor.
//!
//! This module contains:
//! - The fixed-point low-pass filter applied to raw pressure samples
//! - The breath cycle engine (trigger, holdoff, period clamping, apnea timing)
//! - The engineering override that substitutes synthetic breaths
//! - State shared with asynchronous request handlers

pub mod detector;
pub mod engineering;
pub mod filter;
pub mod shared;

// Re-export commonly used types
pub use detector::{
    BreathCallback, BreathDetector, BreathEvent, BreathTiming, DetectorState, TickOutcome,
};
pub use engineering::{EngineeringOverride, ENGINEERING_UNLOCK_CODE};
pub use filter::{breath_filter, BreathFilter, IirFilter, FILTER_GAIN_SHIFT};
pub use shared::SharedState;
