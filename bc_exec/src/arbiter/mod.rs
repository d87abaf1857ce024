//! Command arbiter module
//!
//! The arbiter is the last line of defence between the policy and the actuators. Every command it
//! produces lies inside the [`SafetyEnvelope`], moves no further than the envelope's per tick
//! deltas from the previous command (outside of a fail-safe), and is pulled towards the fail-safe
//! command when the policy is not confident in its decision.

// ---------------------------------------------------------------------------
// MODULES
// ---------------------------------------------------------------------------

mod cmd;
mod envelope;
mod state;

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

pub use cmd::*;
pub use envelope::*;
pub use state::*;

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// Possible errors that can occur during CommandArbiter initialisation.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ArbiterError {
    #[error("The confidence floor must be within [0, 1], found {0}")]
    InvalidConfidenceFloor(f64),
}
