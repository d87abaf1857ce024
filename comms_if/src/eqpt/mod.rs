//! # Equipment Interface
//!
//! This module defines the structures exchanged with the simulation's sensor publisher and
//! actuator server.

// -----------------------------------------------------------------------------------------------
// MODULES
// -----------------------------------------------------------------------------------------------

pub mod actuator;
pub mod sensor;
