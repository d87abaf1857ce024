//! # Telecommand module
//!
//! Telecommands are instructions sent to the executive by the operator console. They are
//! serialised as JSON objects tagged by a `type` field, for example `{"type":"RESET_FAILSAFE"}`.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use serde::{Deserialize, Serialize};
use structopt::StructOpt;

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// A telecommand, i.e. an instruction sent to the executive by the operator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, StructOpt)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Tc {
    /// Check the executive is listening.
    #[structopt(name = "heartbeat")]
    Heartbeat,

    /// Force the control loop into fail-safe, bringing the vehicle to a stop.
    #[structopt(name = "safe")]
    MakeSafe,

    /// Acknowledge a fail-safe and return the control loop to normal operation.
    #[structopt(name = "reset")]
    ResetFailsafe,
}

/// Response sent back by the executive for each telecommand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TcResponse {
    /// The telecommand was executed
    Ok,

    /// The telecommand could not be parsed
    Invalid,

    /// The telecommand was valid but cannot be executed in the current state
    CannotExecute,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Tc {
    /// Parse a new TC from a JSON packet
    pub fn from_json(json_str: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json_str)
    }

    /// Serialise this TC into a JSON packet
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
