//! Calibration adjustment protocol.
//!
//! Request handlers read the current calibration, compute the new value,
//! write it back and return both values for audit. Pressures cross this
//! boundary in pascals so callers never depend on the sensor's scaling;
//! only the zero offset stays in raw counts.

use crate::calibration::{Calibration, PressureTransform};
use crate::core::filter::filter_output_to_level;
use crate::core::SharedState;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::sync::Arc;

/// Console usage line.
pub const CONSOLE_USAGE: &str =
    "breath { read | showcal | zero | settrigger <mPa> | setexhalation <mPa> }";

/// Calibration as seen by protocol clients.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalibrationReading {
    /// Raw counts, hardware referenced
    pub zero_offset: i32,
    pub trigger_level_pa: f32,
    pub exhalation_level_pa: f32,
}

/// Old and new value of a mutated field.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Change<T> {
    pub old: T,
    pub new: T,
}

/// Protocol requests.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    GetCalibration,
    SetZeroOffset,
    SetTriggerLevel { pascals: f32 },
    SetExhalationLevel { pascals: f32 },
    GetPressure,
    GetOverridePeriod,
    SetOverridePeriod { unlock: u32, period_ms: u32 },
}

/// Protocol responses, one variant per request kind.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    Calibration(CalibrationReading),
    ZeroOffset(Change<i32>),
    TriggerLevel(Change<f32>),
    ExhalationLevel(Change<f32>),
    Pressure { pascals: f32 },
    OverridePeriod { period_ms: u32 },
}

/// Handler for calibration and engineering override requests.
#[derive(Debug, Clone)]
pub struct CalibrationProtocol {
    shared: Arc<SharedState>,
    transform: PressureTransform,
}

impl CalibrationProtocol {
    pub fn new(shared: Arc<SharedState>, transform: PressureTransform) -> Self {
        Self { shared, transform }
    }

    pub fn transform(&self) -> PressureTransform {
        self.transform
    }

    /// Dispatch a request.
    pub fn handle(&self, request: Request) -> Response {
        match request {
            Request::GetCalibration => Response::Calibration(self.get_calibration()),
            Request::SetZeroOffset => Response::ZeroOffset(self.set_zero_offset()),
            Request::SetTriggerLevel { pascals } => {
                Response::TriggerLevel(self.set_trigger_level(pascals))
            }
            Request::SetExhalationLevel { pascals } => {
                Response::ExhalationLevel(self.set_exhalation_level(pascals))
            }
            Request::GetPressure => Response::Pressure {
                pascals: self.get_pressure(),
            },
            Request::GetOverridePeriod => Response::OverridePeriod {
                period_ms: self.get_override_period(),
            },
            Request::SetOverridePeriod { unlock, period_ms } => Response::OverridePeriod {
                period_ms: self.set_override_period(unlock, period_ms),
            },
        }
    }

    pub fn get_calibration(&self) -> CalibrationReading {
        let cal = self.shared.calibration().get_calibration();
        CalibrationReading {
            zero_offset: cal.zero_offset,
            trigger_level_pa: self.transform.counts_to_pascals(cal.trigger_level),
            exhalation_level_pa: self.transform.counts_to_pascals(cal.exhalation_detect_level),
        }
    }

    /// Fold the current reading into the zero offset so that it reads zero.
    pub fn set_zero_offset(&self) -> Change<i32> {
        let level = self.current_level();
        let mut change = Change { old: 0, new: 0 };

        self.shared.calibration().update(&mut |cal| {
            change.old = cal.zero_offset;
            cal.zero_offset = level.saturating_add(cal.zero_offset);
            change.new = cal.zero_offset;
        });

        tracing::info!(old = change.old, new = change.new, "Breath zero offset updated");
        change
    }

    pub fn set_trigger_level(&self, pascals: f32) -> Change<f32> {
        let change = self.update_level(pascals, |cal| &mut cal.trigger_level);
        tracing::info!(old = change.old, new = change.new, "Breath trigger level updated");
        change
    }

    pub fn set_exhalation_level(&self, pascals: f32) -> Change<f32> {
        let change = self.update_level(pascals, |cal| &mut cal.exhalation_detect_level);
        tracing::info!(
            old = change.old,
            new = change.new,
            "Breath exhalation level updated"
        );
        change
    }

    /// Latest filtered pressure in pascals.
    pub fn get_pressure(&self) -> f32 {
        self.transform.counts_to_pascals(self.current_level())
    }

    pub fn get_override_period(&self) -> u32 {
        self.shared.engineering().period_ms()
    }

    /// Apply an override request and return the period now in effect.
    pub fn set_override_period(&self, unlock: u32, period_ms: u32) -> u32 {
        self.shared.engineering().set(unlock, period_ms);
        self.get_override_period()
    }

    /// Run a diagnostic console command and return its printable output.
    pub fn console(&self, command: ConsoleCommand) -> String {
        let mut out = String::new();

        match command {
            ConsoleCommand::Read => {
                let level = self.current_level();
                let millipascals = to_millipascals(self.transform.counts_to_pascals(level));
                // Add the offset back to show a filtered ADC value
                let zero_offset = self.shared.calibration().get_calibration().zero_offset;
                let counts = level.saturating_add(zero_offset);
                let _ = writeln!(out, "Breath Pressure: {millipascals} mPa ({counts})");
                return out;
            }
            ConsoleCommand::ShowCal => {}
            ConsoleCommand::Zero => {
                let change = self.set_zero_offset();
                let _ = writeln!(out, "\nZero Offset was: {}\n", change.old);
            }
            ConsoleCommand::SetTrigger { millipascals } => {
                let change = self.set_trigger_level(millipascals as f32 / 1000.0);
                let _ = writeln!(
                    out,
                    "\nTrigger level was: {} mPa\n",
                    to_millipascals(change.old)
                );
            }
            ConsoleCommand::SetExhalation { millipascals } => {
                let change = self.set_exhalation_level(millipascals as f32 / 1000.0);
                let _ = writeln!(
                    out,
                    "\nExhalation level was: {} mPa\n",
                    to_millipascals(change.old)
                );
            }
        }

        out.push_str(&self.calibration_table());
        out
    }

    fn calibration_table(&self) -> String {
        let cal = self.shared.calibration().get_calibration();
        format!(
            "\n--------------------------------\n\
             Breath Calibration\n\
             --------------------------------\n\
             Zero Offset (counts):     {}\n\
             Trigger Level (mPa):      {}\n\
             Exhalation Level (mPa):   {}\n\
             --------------------------------\n",
            cal.zero_offset,
            to_millipascals(self.transform.counts_to_pascals(cal.trigger_level)),
            to_millipascals(self.transform.counts_to_pascals(cal.exhalation_detect_level)),
        )
    }

    /// Filtered pressure with the filter gain removed, in sensor counts.
    fn current_level(&self) -> i32 {
        filter_output_to_level(self.shared.last_filtered_pressure())
    }

    fn update_level(
        &self,
        pascals: f32,
        field: fn(&mut Calibration) -> &mut i32,
    ) -> Change<f32> {
        let counts = self.transform.pascals_to_counts(pascals);
        let mut change = Change { old: 0.0, new: 0.0 };

        self.shared.calibration().update(&mut |cal| {
            let level = field(cal);
            change.old = self.transform.counts_to_pascals(*level);
            *level = counts;
            change.new = self.transform.counts_to_pascals(*level);
        });

        change
    }
}

fn to_millipascals(pascals: f32) -> i32 {
    (1000.0 * pascals) as i32
}

/// Diagnostic console commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleCommand {
    Read,
    ShowCal,
    Zero,
    SetTrigger { millipascals: i32 },
    SetExhalation { millipascals: i32 },
}

impl ConsoleCommand {
    /// Parse the arguments following the `breath` command word.
    pub fn parse(args: &[&str]) -> Result<Self, ConsoleError> {
        match args {
            ["read"] => Ok(Self::Read),
            ["showcal"] => Ok(Self::ShowCal),
            ["zero"] => Ok(Self::Zero),
            ["settrigger", value] => Ok(Self::SetTrigger {
                millipascals: parse_millipascals(value)?,
            }),
            ["setexhalation", value] => Ok(Self::SetExhalation {
                millipascals: parse_millipascals(value)?,
            }),
            _ => Err(ConsoleError::Usage),
        }
    }
}

fn parse_millipascals(value: &str) -> Result<i32, ConsoleError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConsoleError::InvalidValue(value.to_string()))
}

/// Console parsing errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleError {
    Usage,
    InvalidValue(String),
}

impl std::fmt::Display for ConsoleError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConsoleError::Usage => write!(f, "usage: {CONSOLE_USAGE}"),
            ConsoleError::InvalidValue(v) => write!(f, "invalid level '{v}' (expected mPa)"),
        }
    }
}

impl std::error::Error for ConsoleError {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ENGINEERING_UNLOCK_CODE;

    fn protocol() -> (Arc<SharedState>, CalibrationProtocol) {
        let shared = SharedState::in_memory();
        shared.calibration().set_calibration(Calibration {
            zero_offset: 2000,
            trigger_level: -160,
            exhalation_detect_level: 80,
        });
        let protocol = CalibrationProtocol::new(shared.clone(), PressureTransform::default());
        (shared, protocol)
    }

    #[test]
    fn test_get_calibration_in_pascals() {
        let (_, protocol) = protocol();
        let reading = protocol.get_calibration();
        assert_eq!(reading.zero_offset, 2000);
        assert_eq!(reading.trigger_level_pa, -10.0);
        assert_eq!(reading.exhalation_level_pa, 5.0);
    }

    #[test]
    fn test_set_zero_offset_folds_in_reading() {
        let (shared, protocol) = protocol();
        shared.store_filtered_pressure(40 << 5);

        let change = protocol.set_zero_offset();
        assert_eq!(change, Change { old: 2000, new: 2040 });
        assert_eq!(shared.calibration().get_calibration().zero_offset, 2040);
    }

    #[test]
    fn test_set_levels_return_old_and_new() {
        let (shared, protocol) = protocol();

        let change = protocol.set_trigger_level(-7.5);
        assert_eq!(change, Change { old: -10.0, new: -7.5 });
        assert_eq!(shared.calibration().get_calibration().trigger_level, -120);

        let change = protocol.set_exhalation_level(2.0);
        assert_eq!(change, Change { old: 5.0, new: 2.0 });
        let cal = shared.calibration().get_calibration();
        assert_eq!(cal.exhalation_detect_level, 32);
        assert_eq!(cal.trigger_level, -120);
    }

    #[test]
    fn test_concurrent_level_updates_keep_both() {
        let (shared, protocol) = protocol();
        let barrier = Arc::new(std::sync::Barrier::new(2));

        let trigger = {
            let protocol = protocol.clone();
            let barrier = barrier.clone();
            std::thread::spawn(move || {
                barrier.wait();
                for i in 1..=20_000 {
                    protocol.set_trigger_level(-(i as f32) / 16.0);
                }
            })
        };
        let exhalation = {
            let protocol = protocol.clone();
            std::thread::spawn(move || {
                barrier.wait();
                for i in 1..=20_000 {
                    protocol.set_exhalation_level(i as f32 / 16.0);
                }
            })
        };
        trigger.join().unwrap();
        exhalation.join().unwrap();

        let cal = shared.calibration().get_calibration();
        assert_eq!(cal.trigger_level, -20_000);
        assert_eq!(cal.exhalation_detect_level, 20_000);
    }

    #[test]
    fn test_zero_offset_saturates() {
        let (shared, protocol) = protocol();
        let mut cal = shared.calibration().get_calibration();
        cal.zero_offset = i32::MAX - 10;
        shared.calibration().set_calibration(cal);
        shared.store_filtered_pressure(1000 << 5);

        let change = protocol.set_zero_offset();
        assert_eq!(change.new, i32::MAX);
    }

    #[test]
    fn test_get_pressure_removes_filter_gain() {
        let (shared, protocol) = protocol();
        shared.store_filtered_pressure(-80 << 5);
        assert_eq!(protocol.get_pressure(), -5.0);
    }

    #[test]
    fn test_override_requests() {
        let (_, protocol) = protocol();
        assert_eq!(
            protocol.handle(Request::SetOverridePeriod {
                unlock: 0,
                period_ms: 2000
            }),
            Response::OverridePeriod { period_ms: 0 }
        );
        assert_eq!(
            protocol.handle(Request::SetOverridePeriod {
                unlock: ENGINEERING_UNLOCK_CODE,
                period_ms: 2000
            }),
            Response::OverridePeriod { period_ms: 2000 }
        );
        assert_eq!(
            protocol.handle(Request::GetOverridePeriod),
            Response::OverridePeriod { period_ms: 2000 }
        );
    }

    #[test]
    fn test_request_json_shape() {
        let request: Request =
            serde_json::from_str(r#"{"type":"set_trigger_level","pascals":-3.5}"#).unwrap();
        assert_eq!(request, Request::SetTriggerLevel { pascals: -3.5 });

        let (_, protocol) = protocol();
        let json = serde_json::to_value(protocol.handle(Request::GetCalibration)).unwrap();
        assert_eq!(json["type"], "calibration");
        assert_eq!(json["zero_offset"], 2000);
    }

    #[test]
    fn test_console_parse() {
        assert_eq!(ConsoleCommand::parse(&["read"]), Ok(ConsoleCommand::Read));
        assert_eq!(
            ConsoleCommand::parse(&["settrigger", "-2500"]),
            Ok(ConsoleCommand::SetTrigger {
                millipascals: -2500
            })
        );
        assert_eq!(ConsoleCommand::parse(&[]), Err(ConsoleError::Usage));
        assert_eq!(
            ConsoleCommand::parse(&["settrigger", "low"]),
            Err(ConsoleError::InvalidValue("low".to_string()))
        );
    }

    #[test]
    fn test_console_output() {
        let (shared, protocol) = protocol();
        shared.store_filtered_pressure(16 << 5);

        let read = protocol.console(ConsoleCommand::Read);
        assert_eq!(read, "Breath Pressure: 1000 mPa (2016)\n");

        let out = protocol.console(ConsoleCommand::SetTrigger {
            millipascals: -2500,
        });
        assert!(out.contains("Trigger level was: -10000 mPa"));
        assert!(out.contains("Trigger Level (mPa):      -2500"));

        let out = protocol.console(ConsoleCommand::Zero);
        assert!(out.contains("Zero Offset was: 2000"));
        assert!(out.contains("Zero Offset (counts):     2016"));
    }
}
