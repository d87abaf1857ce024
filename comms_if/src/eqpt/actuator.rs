//! # Actuator Equipment Communications Module

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::{Deserialize, Serialize};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Demands sent by the actuator client to the simulation's vehicle driver.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Default)]
pub struct ActuatorDems {
    /// Demanded steering angle of the front wheels, positive to the right.
    ///
    /// Units: radians
    pub steering_angle_rad: f64,

    /// Demanded throttle, between 0 (released) and 1 (full).
    pub throttle: f64,

    /// Demanded brake, between 0 (released) and 1 (full).
    pub brake: f64,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// Response from the simulation's actuator server based on the demands sent by the client.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActuatorDemsResponse {
    /// Demands were valid and will be executed
    DemsOk,

    /// Demands were invalid and have been rejected
    DemsInvalid,

    /// Equipment is invalid so demands cannot be actuated
    EqptInvalid,
}
