//! Loop health state definitions

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// The health of the control loop.
///
/// Only the [`super::SupervisoryMonitor`] changes this state, all other components see a copy
/// taken at the start of arbitration.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct LoopHealthState {
    pub mode: Mode,

    /// Timestamp of the last frame accepted by the sensor adapter.
    pub last_frame_timestamp: Option<DateTime<Utc>>,

    /// Latency of the last completed inference.
    ///
    /// Units: milliseconds
    pub last_inference_latency_ms: Option<f64>,

    /// Number of failure events since the last tick without any failure.
    pub consecutive_failures: u32,

    /// Number of failure events since startup.
    pub total_failures: u64,

    /// Number of consecutive failure free ticks inside the latency and confidence budgets.
    pub consecutive_good_ticks: u32,

    /// Number of consecutive decisions below the confidence floor.
    pub consecutive_low_confidence: u32,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// Operating mode of the control loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Mode {
    /// Policy decisions are trusted.
    Normal,

    /// Something is wrong, decisions are still used but closely watched.
    Degraded,

    /// The loop cannot be trusted and only the fail-safe command is issued. Latched until reset.
    FailSafe,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Default for Mode {
    fn default() -> Self {
        Mode::Normal
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Normal => write!(f, "NORMAL"),
            Mode::Degraded => write!(f, "DEGRADED"),
            Mode::FailSafe => write!(f, "FAILSAFE"),
        }
    }
}
