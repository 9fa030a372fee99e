//! Breath cycle detection and apnea timing.
//!
//! The detector runs once per tick on the batch of raw pressure samples that
//! arrived since the previous tick. For every sample it:
//! 1. Removes the zero offset (saturating) and low-pass filters the reading
//! 2. Decides whether a breath trigger is present (threshold or simulated)
//! 3. Applies the post-trigger holdoff
//! 4. On a confirmed breath, reports the elapsed period, clamps it to the
//!    plausible range and hands the clamped value to the breath callback
//!
//! After the batch, silence that lasted the apnea detection period raises the
//! apnea alarm. Only a confirmed breath clears it.

use crate::alarm::{AlarmKind, AlarmSink};
use crate::config::{Config, TimingConfig};
use crate::core::filter::{breath_filter, level_to_filter_output, BreathFilter};
use crate::core::shared::SharedState;
use crate::sampler::SampleSource;
use crate::transparency::BreathReportSink;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Called with the clamped breath period after every confirmed breath.
pub type BreathCallback = Box<dyn FnMut(u32) + Send>;

/// Lifecycle of a [`BreathDetector`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectorState {
    Uninitialized,
    Stopped,
    Running,
}

/// A confirmed breath.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreathEvent {
    /// Elapsed time since the previous breath, as reported
    pub observed_period_ms: u32,
    /// Period handed to the breath callback
    pub clamped_period_ms: u32,
    /// Produced by the engineering override rather than the pressure signal
    pub simulated: bool,
}

/// Result of one tick.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickOutcome {
    /// Breaths confirmed during the tick, in order
    pub breaths: Vec<BreathEvent>,
    /// Whether the apnea alarm should be active after the tick
    pub apnea_alarm: bool,
}

/// Per-sample timing state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreathTiming {
    pub time_since_last_breath_ms: u32,
    /// Remaining samples during which triggers are ignored
    pub trigger_holdoff: u32,
    pub last_filtered_pressure: i32,
}

/// Breath cycle engine.
pub struct BreathDetector {
    state: DetectorState,
    limits: TimingConfig,
    sample_period_ms: u32,
    filter: BreathFilter,
    timing: BreathTiming,
    apnea_active: bool,
    shared: Arc<SharedState>,
    alarms: Arc<dyn AlarmSink>,
    reports: Arc<dyn BreathReportSink>,
    on_breath: Option<BreathCallback>,
    buffer: Vec<u16>,
}

impl BreathDetector {
    /// Create an uninitialized detector.
    pub fn new(
        config: &Config,
        shared: Arc<SharedState>,
        alarms: Arc<dyn AlarmSink>,
        reports: Arc<dyn BreathReportSink>,
    ) -> Self {
        if let Err(e) = config.sampling.validate() {
            tracing::error!("Breath timing will drift from real time: {e}");
        }

        Self {
            state: DetectorState::Uninitialized,
            limits: config.timing.clone(),
            sample_period_ms: config.sampling.sample_period_ms(),
            filter: breath_filter(),
            timing: BreathTiming::default(),
            apnea_active: false,
            shared,
            alarms,
            reports,
            on_breath: None,
            buffer: vec![0; config.sampling.max_samples_per_tick.max(1)],
        }
    }

    /// Register the breath callback and move to `Stopped`.
    ///
    /// Only the first call has any effect.
    pub fn init(&mut self, on_breath: Option<BreathCallback>) {
        if self.state != DetectorState::Uninitialized {
            return;
        }

        self.shared.engineering().reset();
        self.on_breath = on_breath;
        self.state = DetectorState::Stopped;
        tracing::info!("Breath detector initialized");
    }

    /// Start detecting. Resets the filter, the timing state and the
    /// engineering override. No-op unless `Stopped`.
    pub fn enable(&mut self) {
        if self.state != DetectorState::Stopped {
            return;
        }

        self.filter.reset();
        self.timing.time_since_last_breath_ms = 0;
        self.timing.trigger_holdoff = self.holdoff_samples(self.limits.holdoff_startup_ms);
        self.shared.engineering().reset();

        self.state = DetectorState::Running;
        tracing::info!(
            sample_period_ms = self.sample_period_ms,
            "Breath detector running"
        );
    }

    /// Stop detecting. Filter and timing state are kept. No-op unless `Running`.
    pub fn disable(&mut self) {
        if self.state != DetectorState::Running {
            return;
        }

        self.state = DetectorState::Stopped;
        tracing::info!("Breath detector stopped");
    }

    pub fn state(&self) -> DetectorState {
        self.state
    }

    pub fn timing(&self) -> BreathTiming {
        self.timing
    }

    pub fn is_apnea_active(&self) -> bool {
        self.apnea_active
    }

    pub fn shared(&self) -> &Arc<SharedState> {
        &self.shared
    }

    /// Read one batch from `source` and process it.
    pub fn run_tick(&mut self, source: &mut dyn SampleSource) -> TickOutcome {
        let mut buffer = std::mem::take(&mut self.buffer);
        let count = source.get_samples(&mut buffer);
        let outcome = self.process_samples(&buffer[..count]);
        self.buffer = buffer;
        outcome
    }

    /// Process one tick worth of raw samples.
    ///
    /// Ignored unless the detector is running. An empty batch leaves the
    /// state untouched.
    pub fn process_samples(&mut self, samples: &[u16]) -> TickOutcome {
        let mut outcome = TickOutcome::default();
        if self.state != DetectorState::Running {
            return outcome;
        }

        let calibration = self.shared.calibration().get_calibration();
        let trigger_output = level_to_filter_output(calibration.trigger_level);

        for &raw in samples {
            let pressure = self
                .filter
                .step(i32::from(raw).saturating_sub(calibration.zero_offset));
            self.timing.last_filtered_pressure = pressure;

            self.timing.time_since_last_breath_ms = self
                .timing
                .time_since_last_breath_ms
                .saturating_add(self.sample_period_ms);

            let simulated_period = self.shared.engineering().active_period();
            let trigger = match simulated_period {
                Some(period_ms) => self.timing.time_since_last_breath_ms >= period_ms,
                None => pressure <= trigger_output,
            };

            if self.timing.trigger_holdoff > 0 {
                self.timing.trigger_holdoff -= 1;
            } else if trigger {
                let event = self.confirm_breath(simulated_period.is_some());
                outcome.breaths.push(event);
            }
        }

        if !samples.is_empty() {
            self.shared
                .store_filtered_pressure(self.timing.last_filtered_pressure);
        }
        self.reports.record_tick(samples.len());

        if self.timing.time_since_last_breath_ms >= self.limits.apnea_detection_period_ms {
            if !self.apnea_active {
                self.apnea_active = true;
                self.alarms.activate(AlarmKind::Apnea);
                tracing::warn!(
                    silence_ms = self.timing.time_since_last_breath_ms,
                    "Apnea detected"
                );
            }
            self.timing.time_since_last_breath_ms = self.limits.apnea_detection_period_ms;
        }

        outcome.apnea_alarm = self.apnea_active;
        outcome
    }

    fn confirm_breath(&mut self, simulated: bool) -> BreathEvent {
        if self.apnea_active {
            self.apnea_active = false;
            self.alarms.clear(AlarmKind::Apnea);
            tracing::info!("Apnea cleared by breath");
        }

        let observed = self.timing.time_since_last_breath_ms;
        self.reports.report_breath(observed);

        let clamped = self.clamp_period(observed);
        if let Some(on_breath) = self.on_breath.as_mut() {
            on_breath(clamped);
        }

        self.timing.trigger_holdoff = self.holdoff_samples(self.limits.holdoff_standard_ms);
        self.timing.time_since_last_breath_ms = 0;

        tracing::debug!(observed, clamped, simulated, "Breath detected");

        BreathEvent {
            observed_period_ms: observed,
            clamped_period_ms: clamped,
            simulated,
        }
    }

    /// Too long falls back to the default period, too short to the minimum.
    fn clamp_period(&self, period_ms: u32) -> u32 {
        if period_ms > self.limits.max_breath_period_ms {
            self.limits.default_breath_period_ms
        } else if period_ms < self.limits.min_breath_period_ms {
            self.limits.min_breath_period_ms
        } else {
            period_ms
        }
    }

    fn holdoff_samples(&self, holdoff_ms: u32) -> u32 {
        holdoff_ms / self.sample_period_ms
    }
}

impl std::fmt::Debug for BreathDetector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BreathDetector")
            .field("state", &self.state)
            .field("timing", &self.timing)
            .field("apnea_active", &self.apnea_active)
            .finish_non_exhaustive()
    }
}
