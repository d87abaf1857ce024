//! # Drive Executive Parameters
//!
//! This module provides parameters for the drive executive, loaded from `params/bc_exec.toml`.
//! The safety envelope, inference deadline and fail-safe thresholds sit at the top level of the
//! file, each component's own parameters are in a table named after it.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::{
    arbiter::{EnvelopeError, MaxDelta, SafetyEnvelope},
    dispatcher,
    monitor::{MonitorConfig, MonitorConfigError},
    obstacle, policy,
    preproc::{self, FramePreprocessor, PreprocError},
    sensor_adapter, telemetry,
};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Default hard latency limit as a fraction of the inference timeout.
const DEFAULT_HARD_LATENCY_FRACTION: f64 = 0.8;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecParams {
    // ---- SAFETY ENVELOPE ----
    /// Allowed normalised steering, `[min, max]`.
    pub steer_range: [f64; 2],

    /// Allowed normalised throttle, `[min, max]`.
    pub throttle_range: [f64; 2],

    /// Allowed normalised brake, `[min, max]`.
    pub brake_range: [f64; 2],

    /// Maximum change of a channel between two ticks, either a number for all channels or a table
    /// with `steering`, `throttle` and `brake` keys.
    pub max_delta_per_tick: MaxDelta,

    // ---- INFERENCE ----
    /// Deadline for a single inference.
    ///
    /// Units: milliseconds
    pub inference_timeout_ms: u64,

    /// Confidence below which decisions are blended towards the fail-safe command and count as
    /// low confidence.
    pub confidence_floor: f64,

    // ---- SUPERVISION ----
    /// Consecutive failures which put a degraded loop into fail-safe.
    #[serde(default = "default_failsafe_trigger_count")]
    pub failsafe_trigger_count: u32,

    #[serde(default)]
    pub monitor: MonitorParams,

    // ---- COMPONENTS ----
    #[serde(default)]
    pub sensor: sensor_adapter::Params,

    #[serde(default)]
    pub preproc: preproc::Params,

    pub policy: policy::Params,

    #[serde(default)]
    pub obstacle: obstacle::Params,

    #[serde(default)]
    pub actuator: dispatcher::Params,

    #[serde(default)]
    pub telemetry: telemetry::Params,
}

/// Thresholds of the supervisory monitor beyond the top level ones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorParams {
    /// Consecutive low confidence decisions which put a degraded loop into fail-safe.
    pub confidence_trigger_count: u32,

    /// Consecutive good ticks which return a degraded loop to normal.
    pub recovery_tick_count: u32,

    /// Inference latency which degrades the loop, half the inference timeout if not given.
    ///
    /// Units: milliseconds
    pub latency_soft_ms: Option<f64>,

    /// Inference latency which puts a degraded loop into fail-safe, 80% of the inference timeout if
    /// not given. Must be below the inference timeout.
    ///
    /// Units: milliseconds
    pub latency_hard_ms: Option<f64>,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ParamsError {
    #[error("Invalid safety envelope: {0}")]
    Envelope(EnvelopeError),

    #[error("Invalid monitor parameters: {0}")]
    Monitor(MonitorConfigError),

    #[error("{0}")]
    Preproc(PreprocError),

    #[error("The inference timeout must be non-zero")]
    ZeroInferenceTimeout,

    #[error("The hard latency limit ({hard_ms} ms) must be below the inference timeout ({timeout_ms} ms)")]
    HardLatencyNotBelowTimeout { hard_ms: f64, timeout_ms: u64 },
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl ExecParams {
    /// Check that the parameters describe a usable loop.
    pub fn validate(&self) -> Result<(), ParamsError> {
        if self.inference_timeout_ms == 0 {
            return Err(ParamsError::ZeroInferenceTimeout);
        }

        self.envelope()?;

        let monitor_config = self.monitor_config();
        monitor_config.validate().map_err(ParamsError::Monitor)?;

        // The hard limit must be reachable before the inference times out
        if monitor_config.latency_hard_ms >= self.inference_timeout_ms as f64 {
            return Err(ParamsError::HardLatencyNotBelowTimeout {
                hard_ms: monitor_config.latency_hard_ms,
                timeout_ms: self.inference_timeout_ms,
            });
        }

        FramePreprocessor::new(self.preproc.clone()).map_err(ParamsError::Preproc)?;

        Ok(())
    }

    /// Build the safety envelope.
    pub fn envelope(&self) -> Result<SafetyEnvelope, ParamsError> {
        SafetyEnvelope::new(
            self.steer_range,
            self.throttle_range,
            self.brake_range,
            self.max_delta_per_tick,
        )
        .map_err(ParamsError::Envelope)
    }

    /// Build the monitor's configuration.
    pub fn monitor_config(&self) -> MonitorConfig {
        let timeout_ms = self.inference_timeout_ms as f64;

        MonitorConfig {
            failsafe_trigger_count: self.failsafe_trigger_count,
            confidence_floor: self.confidence_floor,
            confidence_trigger_count: self.monitor.confidence_trigger_count,
            recovery_tick_count: self.monitor.recovery_tick_count,
            latency_soft_ms: self.monitor.latency_soft_ms.unwrap_or(timeout_ms / 2.0),
            latency_hard_ms: self
                .monitor
                .latency_hard_ms
                .unwrap_or(timeout_ms * DEFAULT_HARD_LATENCY_FRACTION),
        }
    }

    pub fn inference_timeout(&self) -> Duration {
        Duration::from_millis(self.inference_timeout_ms)
    }
}

impl Default for MonitorParams {
    fn default() -> Self {
        Self {
            confidence_trigger_count: 5,
            recovery_tick_count: 10,
            latency_soft_ms: None,
            latency_hard_ms: None,
        }
    }
}

fn default_failsafe_trigger_count() -> u32 {
    2
}
