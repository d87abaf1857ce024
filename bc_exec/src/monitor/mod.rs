//! Supervisory monitor module
//!
//! The monitor watches every failure, inference latency and decision confidence in the loop, and
//! drives the NORMAL, DEGRADED and FAILSAFE mode machine:
//!
//! ```text
//!            failure | latency > soft | low confidence
//!   NORMAL ------------------------------------------------> DEGRADED
//!     ^   <------------------------------------------------     |
//!     |            recovery_tick_count good ticks               |
//!     |                                                         | consecutive failures
//!     | reset()                                                 | latency > hard
//!     |                                                         | low confidence streak
//!     +---------------------------- FAILSAFE <------------------+
//! ```
//!
//! FAILSAFE is latched, only an explicit [`SupervisoryMonitor::reset`] leaves it.

// ---------------------------------------------------------------------------
// MODULES
// ---------------------------------------------------------------------------

mod health;

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use chrono::{DateTime, Utc};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::{fmt, time::Duration};

pub use health::*;
use util::time::duration_to_millis;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Thresholds of the monitor's mode machine.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Consecutive failures which escalate DEGRADED to FAILSAFE.
    pub failsafe_trigger_count: u32,

    /// Confidence below which a decision counts as low confidence.
    pub confidence_floor: f64,

    /// Consecutive low confidence decisions which escalate DEGRADED to FAILSAFE.
    pub confidence_trigger_count: u32,

    /// Consecutive good ticks which recover DEGRADED to NORMAL.
    pub recovery_tick_count: u32,

    /// Inference latency above which NORMAL degrades.
    ///
    /// Units: milliseconds
    pub latency_soft_ms: f64,

    /// Inference latency above which DEGRADED escalates to FAILSAFE.
    ///
    /// Units: milliseconds
    pub latency_hard_ms: f64,
}

/// The supervisory monitor, sole owner of the [`LoopHealthState`].
pub struct SupervisoryMonitor {
    config: MonitorConfig,

    state: LoopHealthState,

    /// A failure was recorded during the current tick.
    tick_failed: bool,

    /// The current tick's inference was inside the latency and confidence budgets.
    tick_in_budget: bool,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// The kinds of failure event which can occur during a control tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FailureKind {
    SensorUnavailable,
    SensorStale,
    DuplicateFrame,
    InvalidFrameFormat,
    InferenceTimeout,
    InferenceError,
    ActuatorUnavailable,
}

/// Cause of a mode transition, used when logging transitions.
#[derive(Debug, Clone, PartialEq)]
pub enum TransitionCause {
    Failure(FailureKind, u32),
    LatencySoft(f64),
    LatencyHard(f64),
    LowConfidence(f64, u32),
    Recovered(u32),
    Forced(String),
    Reset,
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum MonitorConfigError {
    #[error("The failsafe trigger count must be at least 1")]
    InvalidFailsafeTriggerCount,

    #[error("The confidence trigger count must be at least 1")]
    InvalidConfidenceTriggerCount,

    #[error("The recovery tick count must be at least 1")]
    InvalidRecoveryTickCount,

    #[error("The confidence floor must be within [0, 1], found {0}")]
    InvalidConfidenceFloor(f64),

    #[error("Latency thresholds must satisfy 0 < soft ({soft}) <= hard ({hard})")]
    InvalidLatencyThresholds { soft: f64, hard: f64 },
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl MonitorConfig {
    pub fn validate(&self) -> Result<(), MonitorConfigError> {
        if self.failsafe_trigger_count == 0 {
            return Err(MonitorConfigError::InvalidFailsafeTriggerCount);
        }
        if self.confidence_trigger_count == 0 {
            return Err(MonitorConfigError::InvalidConfidenceTriggerCount);
        }
        if self.recovery_tick_count == 0 {
            return Err(MonitorConfigError::InvalidRecoveryTickCount);
        }
        if !(0.0..=1.0).contains(&self.confidence_floor) {
            return Err(MonitorConfigError::InvalidConfidenceFloor(
                self.confidence_floor,
            ));
        }
        if !(self.latency_soft_ms > 0.0 && self.latency_soft_ms <= self.latency_hard_ms) {
            return Err(MonitorConfigError::InvalidLatencyThresholds {
                soft: self.latency_soft_ms,
                hard: self.latency_hard_ms,
            });
        }

        Ok(())
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            failsafe_trigger_count: 2,
            confidence_floor: 0.5,
            confidence_trigger_count: 5,
            recovery_tick_count: 10,
            latency_soft_ms: 30.0,
            latency_hard_ms: 50.0,
        }
    }
}

impl SupervisoryMonitor {
    /// Create a new monitor, starting in NORMAL mode.
    pub fn new(config: MonitorConfig) -> Result<Self, MonitorConfigError> {
        config.validate()?;

        Ok(Self {
            config,
            state: LoopHealthState::default(),
            tick_failed: false,
            tick_in_budget: false,
        })
    }

    /// Get a copy of the current loop health.
    pub fn snapshot(&self) -> LoopHealthState {
        self.state
    }

    pub fn mode(&self) -> Mode {
        self.state.mode
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// Record the timestamp of a frame accepted by the sensor adapter.
    pub fn record_frame(&mut self, timestamp: DateTime<Utc>) {
        self.state.last_frame_timestamp = Some(timestamp);
    }

    /// Record a failure event.
    ///
    /// Returns the mode after the event.
    pub fn record_failure(&mut self, kind: FailureKind) -> Mode {
        self.tick_failed = true;
        self.state.consecutive_failures = self.state.consecutive_failures.saturating_add(1);
        self.state.total_failures = self.state.total_failures.saturating_add(1);
        self.state.consecutive_good_ticks = 0;

        let cause = TransitionCause::Failure(kind, self.state.consecutive_failures);

        if self.state.mode == Mode::Normal {
            self.transition(Mode::Degraded, cause.clone());
        }

        if self.state.mode == Mode::Degraded
            && self.state.consecutive_failures >= self.config.failsafe_trigger_count
        {
            self.transition(Mode::FailSafe, cause);
        }

        self.state.mode
    }

    /// Record a completed inference with its latency and the decision's confidence.
    ///
    /// Returns the mode after the event.
    pub fn record_inference(&mut self, latency: Duration, confidence: f64) -> Mode {
        let latency_ms = duration_to_millis(latency);
        self.state.last_inference_latency_ms = Some(latency_ms);

        // NaN confidence counts as low confidence
        let low_confidence = !(confidence >= self.config.confidence_floor);
        if low_confidence {
            self.state.consecutive_low_confidence =
                self.state.consecutive_low_confidence.saturating_add(1);
        } else {
            self.state.consecutive_low_confidence = 0;
        }

        let over_soft = latency_ms > self.config.latency_soft_ms;
        let over_hard = latency_ms > self.config.latency_hard_ms;
        self.tick_in_budget = !over_soft && !low_confidence;

        let entry_mode = self.state.mode;

        if entry_mode == Mode::Normal {
            if over_soft {
                self.transition(Mode::Degraded, TransitionCause::LatencySoft(latency_ms));
            } else if low_confidence {
                self.transition(
                    Mode::Degraded,
                    TransitionCause::LowConfidence(confidence, self.state.consecutive_low_confidence),
                );
            }
        }

        if self.state.mode == Mode::Degraded {
            if entry_mode == Mode::Degraded && over_hard {
                self.transition(Mode::FailSafe, TransitionCause::LatencyHard(latency_ms));
            } else if self.state.consecutive_low_confidence >= self.config.confidence_trigger_count
            {
                self.transition(
                    Mode::FailSafe,
                    TransitionCause::LowConfidence(confidence, self.state.consecutive_low_confidence),
                );
            }
        }

        self.state.mode
    }

    /// Close the current tick.
    ///
    /// A tick without any failure clears the consecutive failure count, and counts towards
    /// recovery if its inference was inside budget.
    pub fn end_tick(&mut self) -> Mode {
        if self.tick_failed {
            self.state.consecutive_good_ticks = 0;
        } else {
            self.state.consecutive_failures = 0;

            if self.tick_in_budget {
                self.state.consecutive_good_ticks =
                    self.state.consecutive_good_ticks.saturating_add(1);
            } else {
                self.state.consecutive_good_ticks = 0;
            }

            if self.state.mode == Mode::Degraded
                && self.state.consecutive_good_ticks >= self.config.recovery_tick_count
            {
                self.transition(
                    Mode::Normal,
                    TransitionCause::Recovered(self.state.consecutive_good_ticks),
                );
            }
        }

        self.tick_failed = false;
        self.tick_in_budget = false;

        self.state.mode
    }

    /// Put the loop into FAILSAFE from any mode.
    pub fn force_failsafe(&mut self, reason: &str) {
        if self.state.mode != Mode::FailSafe {
            self.transition(Mode::FailSafe, TransitionCause::Forced(reason.into()));
        }
    }

    /// Reset the loop to NORMAL, clearing all consecutive counters.
    ///
    /// Returns `true` if the loop was in FAILSAFE.
    pub fn reset(&mut self) -> bool {
        let was_failsafe = self.state.mode == Mode::FailSafe;

        self.state.consecutive_failures = 0;
        self.state.consecutive_good_ticks = 0;
        self.state.consecutive_low_confidence = 0;
        self.tick_failed = false;
        self.tick_in_budget = false;

        if self.state.mode != Mode::Normal {
            self.transition(Mode::Normal, TransitionCause::Reset);
        }

        was_failsafe
    }

    fn transition(&mut self, to: Mode, cause: TransitionCause) {
        let from = self.state.mode;
        self.state.mode = to;

        match to {
            Mode::Normal => info!("Loop mode {} -> {}: {}", from, to, cause),
            _ => warn!("Loop mode {} -> {}: {}", from, to, cause),
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FailureKind::SensorUnavailable => "sensor unavailable",
            FailureKind::SensorStale => "sensor stale",
            FailureKind::DuplicateFrame => "duplicate frame",
            FailureKind::InvalidFrameFormat => "invalid frame format",
            FailureKind::InferenceTimeout => "inference timeout",
            FailureKind::InferenceError => "inference error",
            FailureKind::ActuatorUnavailable => "actuator unavailable",
        };
        write!(f, "{}", s)
    }
}

impl fmt::Display for TransitionCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransitionCause::Failure(kind, n) => write!(f, "{} ({} consecutive)", kind, n),
            TransitionCause::LatencySoft(ms) => write!(f, "inference latency {:.1} ms", ms),
            TransitionCause::LatencyHard(ms) => {
                write!(f, "inference latency {:.1} ms over hard limit", ms)
            }
            TransitionCause::LowConfidence(c, n) => {
                write!(f, "confidence {:.3} below floor ({} consecutive)", c, n)
            }
            TransitionCause::Recovered(n) => write!(f, "{} good ticks", n),
            TransitionCause::Forced(reason) => write!(f, "forced: {}", reason),
            TransitionCause::Reset => write!(f, "reset"),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn monitor() -> SupervisoryMonitor {
        SupervisoryMonitor::new(MonitorConfig {
            failsafe_trigger_count: 2,
            confidence_floor: 0.5,
            confidence_trigger_count: 3,
            recovery_tick_count: 2,
            latency_soft_ms: 20.0,
            latency_hard_ms: 40.0,
        })
        .unwrap()
    }

    fn good_tick(m: &mut SupervisoryMonitor) -> Mode {
        m.record_inference(Duration::from_millis(5), 0.9);
        m.end_tick()
    }

    #[test]
    fn test_two_failures_latch_failsafe() {
        let mut m = monitor();

        assert_eq!(m.record_failure(FailureKind::InferenceTimeout), Mode::Degraded);
        m.end_tick();
        assert_eq!(m.record_failure(FailureKind::SensorUnavailable), Mode::FailSafe);
        m.end_tick();

        for _ in 0..10 {
            assert_eq!(good_tick(&mut m), Mode::FailSafe);
        }

        assert!(m.reset());
        assert_eq!(m.mode(), Mode::Normal);
        assert_eq!(m.snapshot().consecutive_failures, 0);
        assert_eq!(m.snapshot().total_failures, 2);
    }

    #[test]
    fn test_failure_count_increments_once() {
        let mut m = monitor();
        let before = m.snapshot();

        m.record_failure(FailureKind::InferenceTimeout);

        let after = m.snapshot();
        assert_eq!(after.consecutive_failures, before.consecutive_failures + 1);
        assert_eq!(after.total_failures, before.total_failures + 1);
    }

    #[test]
    fn test_recovery() {
        let mut m = monitor();

        m.record_failure(FailureKind::DuplicateFrame);
        m.end_tick();
        assert_eq!(good_tick(&mut m), Mode::Degraded);
        assert_eq!(good_tick(&mut m), Mode::Normal);
    }

    #[test]
    fn test_failure_between_good_ticks_escalates() {
        let mut m = monitor();

        // Inference is fine but the actuator fails on two consecutive ticks
        m.record_inference(Duration::from_millis(5), 0.9);
        assert_eq!(m.record_failure(FailureKind::ActuatorUnavailable), Mode::Degraded);
        m.end_tick();
        m.record_inference(Duration::from_millis(5), 0.9);
        assert_eq!(m.record_failure(FailureKind::ActuatorUnavailable), Mode::FailSafe);
    }

    #[test]
    fn test_latency() {
        let mut m = monitor();

        // Hard latency from NORMAL only degrades
        assert_eq!(m.record_inference(Duration::from_millis(45), 0.9), Mode::Degraded);
        m.end_tick();
        assert_eq!(m.record_inference(Duration::from_millis(25), 0.9), Mode::Degraded);
        m.end_tick();
        assert_eq!(m.record_inference(Duration::from_millis(45), 0.9), Mode::FailSafe);
    }

    #[test]
    fn test_low_confidence_streak() {
        let mut m = monitor();

        assert_eq!(m.record_inference(Duration::from_millis(5), 0.1), Mode::Degraded);
        m.end_tick();
        assert_eq!(m.record_inference(Duration::from_millis(5), 0.1), Mode::Degraded);
        m.end_tick();
        assert_eq!(m.record_inference(Duration::from_millis(5), 0.1), Mode::FailSafe);
    }

    #[test]
    fn test_force_failsafe() {
        let mut m = monitor();

        m.force_failsafe("operator");
        assert_eq!(m.mode(), Mode::FailSafe);
        assert_eq!(good_tick(&mut m), Mode::FailSafe);
    }

    #[test]
    fn test_invalid_config() {
        let config = MonitorConfig {
            failsafe_trigger_count: 0,
            ..Default::default()
        };
        assert_eq!(
            SupervisoryMonitor::new(config).err(),
            Some(MonitorConfigError::InvalidFailsafeTriggerCount)
        );

        let config = MonitorConfig {
            latency_soft_ms: 60.0,
            latency_hard_ms: 50.0,
            ..Default::default()
        };
        assert!(SupervisoryMonitor::new(config).is_err());
    }
}
