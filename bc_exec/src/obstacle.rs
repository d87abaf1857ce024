//! # Obstacle guard
//!
//! Classifies the returns of the front lidar and stops the vehicle for pedestrians and nearby
//! vehicles. Few returns are a narrow target, taken to be a pedestrian, while many returns are a
//! vehicle.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use log::debug;
use serde::{Deserialize, Serialize};

use comms_if::eqpt::sensor::SensorFrame;

use crate::policy::PolicyDecision;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Parameters for the obstacle guard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Params {
    pub enabled: bool,

    /// Obstacles with fewer returns than this are pedestrians.
    pub pedestrian_max_returns: usize,

    /// Vehicles closer than this stop the vehicle.
    ///
    /// Units: meters
    pub vehicle_stop_distance_m: f64,
}

/// The obstacle guard.
#[derive(Debug, Clone)]
pub struct ObstacleGuard {
    params: Params,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// What the lidar sees in front of the vehicle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum Obstacle {
    Clear,
    Pedestrian { returns: usize, nearest_m: f64 },
    Vehicle { returns: usize, nearest_m: f64 },
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl ObstacleGuard {
    pub fn new(params: Params) -> Self {
        Self { params }
    }

    /// Classify the lidar returns of a frame.
    pub fn classify(&self, frame: &SensorFrame) -> Obstacle {
        let returns = frame.returns().count();

        match frame.nearest_proximity_m() {
            None => Obstacle::Clear,
            Some(nearest_m) if returns < self.params.pedestrian_max_returns => {
                Obstacle::Pedestrian { returns, nearest_m }
            }
            Some(nearest_m) => Obstacle::Vehicle { returns, nearest_m },
        }
    }

    /// Returns true if the obstacle requires the vehicle to stop.
    pub fn must_stop(&self, obstacle: &Obstacle) -> bool {
        match obstacle {
            Obstacle::Clear => false,
            Obstacle::Pedestrian { .. } => true,
            Obstacle::Vehicle { nearest_m, .. } => *nearest_m < self.params.vehicle_stop_distance_m,
        }
    }

    /// Apply the guard to this tick's decision.
    ///
    /// A stop keeps the decision's steering and confidence but removes throttle and applies full
    /// brake. A tick without a decision is left alone, so the arbiter holds the previous command.
    pub fn apply(
        &self,
        decision: Option<PolicyDecision>,
        frame: Option<&SensorFrame>,
    ) -> (Option<PolicyDecision>, Obstacle) {
        let (d, f) = match (self.params.enabled, decision, frame) {
            (true, Some(d), Some(f)) => (d, f),
            _ => return (decision, Obstacle::Clear),
        };

        let obstacle = self.classify(f);
        if !self.must_stop(&obstacle) {
            return (decision, obstacle);
        }

        debug!("Stopping for {:?}", obstacle);

        (
            Some(PolicyDecision::new(d.steering, 0.0, 1.0, d.confidence)),
            obstacle,
        )
    }
}

impl Obstacle {
    /// Short name of the obstacle class.
    pub fn label(&self) -> &'static str {
        match self {
            Obstacle::Clear => "clear",
            Obstacle::Pedestrian { .. } => "pedestrian",
            Obstacle::Vehicle { .. } => "vehicle",
        }
    }
}

impl Default for Params {
    fn default() -> Self {
        Self {
            enabled: true,
            pedestrian_max_returns: 150,
            vehicle_stop_distance_m: 6.5,
        }
    }
}
