//! Safety envelope definition

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use serde::{Deserialize, Serialize};

use super::{ActuationCommand, Channel};
use util::maths::clamp;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Allowed range and per tick rate of change of a single channel.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ChannelLimits {
    pub min: f64,
    pub max: f64,

    /// Maximum change of the channel between two consecutive ticks.
    pub max_delta: f64,
}

/// Hard bounds on every command sent to the actuators.
///
/// The envelope is loaded once at startup and never changes. It is guaranteed to contain the
/// [`ActuationCommand::FAILSAFE`] command.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SafetyEnvelope {
    steering: ChannelLimits,
    throttle: ChannelLimits,
    brake: ChannelLimits,
}

/// Per channel maximum deltas.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChannelDeltas {
    pub steering: f64,
    pub throttle: f64,
    pub brake: f64,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// The `max_delta_per_tick` parameter, either one delta for all channels or one per channel.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MaxDelta {
    Uniform(f64),
    PerChannel(ChannelDeltas),
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum EnvelopeError {
    #[error("Invalid range for the {channel:?} channel: [{min}, {max}]")]
    InvalidRange { channel: Channel, min: f64, max: f64 },

    #[error("Invalid maximum delta for the {channel:?} channel: {delta} (must be finite and positive)")]
    InvalidDelta { channel: Channel, delta: f64 },

    #[error("The fail-safe command ({value}) is outside of the {channel:?} channel's range")]
    FailsafeOutside { channel: Channel, value: f64 },
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl SafetyEnvelope {
    /// Build a new envelope, checking that it is well formed and contains the fail-safe command.
    pub fn new(
        steer_range: [f64; 2],
        throttle_range: [f64; 2],
        brake_range: [f64; 2],
        max_delta: MaxDelta,
    ) -> Result<Self, EnvelopeError> {
        let deltas = max_delta.per_channel();

        let envelope = Self {
            steering: ChannelLimits::new(Channel::Steering, steer_range, deltas.steering)?,
            throttle: ChannelLimits::new(Channel::Throttle, throttle_range, deltas.throttle)?,
            brake: ChannelLimits::new(Channel::Brake, brake_range, deltas.brake)?,
        };

        for &channel in Channel::ALL.iter() {
            let value = ActuationCommand::FAILSAFE.get(channel);
            if !envelope.limits(channel).contains(value) {
                return Err(EnvelopeError::FailsafeOutside { channel, value });
            }
        }

        Ok(envelope)
    }

    /// Get the limits of the given channel.
    pub fn limits(&self, channel: Channel) -> &ChannelLimits {
        match channel {
            Channel::Steering => &self.steering,
            Channel::Throttle => &self.throttle,
            Channel::Brake => &self.brake,
        }
    }

    /// Returns true if every channel of the command is inside the envelope.
    pub fn contains(&self, cmd: &ActuationCommand) -> bool {
        Channel::ALL
            .iter()
            .all(|&c| self.limits(c).contains(cmd.get(c)))
    }

    /// Clamp every channel of the command into the envelope.
    pub fn clamp(&self, cmd: &ActuationCommand) -> ActuationCommand {
        let mut out = *cmd;
        for &c in Channel::ALL.iter() {
            out.set(c, self.limits(c).clamp(cmd.get(c)));
        }
        out
    }
}

impl Default for SafetyEnvelope {
    /// The full normalised envelope with no effective rate limit.
    fn default() -> Self {
        Self {
            steering: ChannelLimits {
                min: -1.0,
                max: 1.0,
                max_delta: 2.0,
            },
            throttle: ChannelLimits {
                min: 0.0,
                max: 1.0,
                max_delta: 1.0,
            },
            brake: ChannelLimits {
                min: 0.0,
                max: 1.0,
                max_delta: 1.0,
            },
        }
    }
}

impl ChannelLimits {
    fn new(channel: Channel, range: [f64; 2], max_delta: f64) -> Result<Self, EnvelopeError> {
        let [min, max] = range;

        if !min.is_finite() || !max.is_finite() || min > max {
            return Err(EnvelopeError::InvalidRange { channel, min, max });
        }

        if !max_delta.is_finite() || max_delta <= 0.0 {
            return Err(EnvelopeError::InvalidDelta {
                channel,
                delta: max_delta,
            });
        }

        Ok(Self {
            min,
            max,
            max_delta,
        })
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }

    pub fn clamp(&self, value: f64) -> f64 {
        clamp(value, self.min, self.max)
    }
}

impl MaxDelta {
    pub fn per_channel(&self) -> ChannelDeltas {
        match *self {
            MaxDelta::Uniform(d) => ChannelDeltas {
                steering: d,
                throttle: d,
                brake: d,
            },
            MaxDelta::PerChannel(d) => d,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_envelope_new() {
        let env = SafetyEnvelope::new(
            [-0.5, 0.5],
            [0.0, 0.8],
            [0.0, 1.0],
            MaxDelta::Uniform(0.1),
        )
        .unwrap();

        assert_eq!(env.limits(Channel::Throttle).max, 0.8);
        assert_eq!(env.limits(Channel::Brake).max_delta, 0.1);
        assert!(env.contains(&ActuationCommand::FAILSAFE));
    }

    #[test]
    fn test_envelope_rejects() {
        assert_eq!(
            SafetyEnvelope::new([1.0, -1.0], [0.0, 1.0], [0.0, 1.0], MaxDelta::Uniform(0.1)),
            Err(EnvelopeError::InvalidRange {
                channel: Channel::Steering,
                min: 1.0,
                max: -1.0
            })
        );

        assert_eq!(
            SafetyEnvelope::new([-1.0, 1.0], [0.0, 1.0], [0.0, 1.0], MaxDelta::Uniform(0.0)),
            Err(EnvelopeError::InvalidDelta {
                channel: Channel::Steering,
                delta: 0.0
            })
        );

        // A brake range which can't fully brake can't hold the fail-safe command
        assert_eq!(
            SafetyEnvelope::new([-1.0, 1.0], [0.0, 1.0], [0.0, 0.5], MaxDelta::Uniform(0.1)),
            Err(EnvelopeError::FailsafeOutside {
                channel: Channel::Brake,
                value: 1.0
            })
        );
    }

    #[test]
    fn test_envelope_clamp() {
        let env = SafetyEnvelope::new(
            [-0.5, 0.5],
            [0.0, 0.8],
            [0.0, 1.0],
            MaxDelta::Uniform(0.1),
        )
        .unwrap();

        let clamped = env.clamp(&ActuationCommand::new(-2.0, 0.9, std::f64::NAN));
        assert_eq!(clamped, ActuationCommand::new(-0.5, 0.8, 0.0));
        assert!(env.contains(&clamped));
    }

    #[test]
    fn test_max_delta_deserialise() {
        #[derive(Deserialize)]
        struct P {
            max_delta_per_tick: MaxDelta,
        }

        let p: P = util::params::from_str("max_delta_per_tick = 0.2").unwrap();
        assert_eq!(p.max_delta_per_tick, MaxDelta::Uniform(0.2));

        let p: P = util::params::from_str(
            "[max_delta_per_tick]\nsteering = 0.1\nthrottle = 0.05\nbrake = 0.5",
        )
        .unwrap();
        assert_eq!(p.max_delta_per_tick.per_channel().brake, 0.5);
    }
}
