//! Breath reporting for the breath monitor.
//!
//! Every confirmed breath is reported here with its observed period, so
//! clinicians and engineers can audit what the detector saw.

pub mod log;

// Re-export commonly used types
pub use log::{
    create_shared_log, create_shared_log_with_persistence, BreathLog, BreathReportSink,
    BreathStats, SharedBreathLog,
};
