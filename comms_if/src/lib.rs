//! # Communications interface crate.
//!
//! Provides the interfaces shared between the drive executive, the simulation and the operator
//! console.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

/// Telecommands sent by the operator to the executive
pub mod tc;

/// Sensor and actuator definitions exchanged with the simulation
pub mod eqpt;

/// Network module
pub mod net;
