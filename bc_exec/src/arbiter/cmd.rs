//! Actuation command definitions

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use serde::Serialize;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// A command for the vehicle's actuators which has passed through the arbiter.
///
/// This is the only type which crosses into the actuator interface.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct ActuationCommand {
    /// Normalised steering demand, positive to the right.
    pub steering: f64,

    /// Normalised throttle demand.
    pub throttle: f64,

    /// Normalised brake demand.
    pub brake: f64,
}

/// Identifies one of the three actuation channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Channel {
    Steering,
    Throttle,
    Brake,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl ActuationCommand {
    /// The command issued whenever the loop cannot be trusted: wheels straight, no throttle, full
    /// brake.
    pub const FAILSAFE: ActuationCommand = ActuationCommand {
        steering: 0.0,
        throttle: 0.0,
        brake: 1.0,
    };

    pub fn new(steering: f64, throttle: f64, brake: f64) -> Self {
        Self {
            steering,
            throttle,
            brake,
        }
    }

    /// Get the value of one channel.
    pub fn get(&self, channel: Channel) -> f64 {
        match channel {
            Channel::Steering => self.steering,
            Channel::Throttle => self.throttle,
            Channel::Brake => self.brake,
        }
    }

    /// Set the value of one channel.
    pub fn set(&mut self, channel: Channel, value: f64) {
        match channel {
            Channel::Steering => self.steering = value,
            Channel::Throttle => self.throttle = value,
            Channel::Brake => self.brake = value,
        }
    }
}

impl Channel {
    pub const ALL: [Channel; 3] = [Channel::Steering, Channel::Throttle, Channel::Brake];

    /// Index of the channel in per channel arrays.
    pub fn index(&self) -> usize {
        match self {
            Channel::Steering => 0,
            Channel::Throttle => 1,
            Channel::Brake => 2,
        }
    }
}
