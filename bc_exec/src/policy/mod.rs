//! Policy inference module
//!
//! The trained driving policy is anything implementing [`Policy`]. The back-end is picked from the
//! parameters once at startup and handed to the [`PolicyInferenceEngine`], which runs it on a
//! dedicated worker with a bounded deadline.

// ---------------------------------------------------------------------------
// MODULES
// ---------------------------------------------------------------------------

mod engine;
mod mlp;
mod replay;

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::{arbiter::ActuationCommand, preproc::FeatureVector};

pub use engine::*;
pub use mlp::*;
pub use replay::*;

// ---------------------------------------------------------------------------
// TRAITS
// ---------------------------------------------------------------------------

/// A trained driving policy.
pub trait Policy {
    /// Run the policy on one tick's features.
    fn infer(&mut self, features: &FeatureVector) -> Result<PolicyDecision, PolicyError>;

    /// Number of features the policy was trained on, `None` if it accepts any length.
    fn input_len(&self) -> Option<usize> {
        None
    }
}

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// The raw, unclamped output of the policy.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PolicyDecision {
    pub steering: f64,
    pub throttle: f64,
    pub brake: f64,

    /// Confidence of the policy in this decision, in `[0, 1]`.
    pub confidence: f64,
}

/// Parameters for the policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Params {
    /// The policy back-end to load.
    pub backend: Backend,

    /// Path to the model artifact. Relative paths are taken from the software root.
    pub model_path: PathBuf,

    /// Throttle used with steering only models.
    #[serde(default = "default_throttle")]
    pub default_throttle: f64,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// Available policy back-ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// A dense feed-forward network stored as JSON, see [`MlpPolicy`].
    Mlp,

    /// A CSV of recorded decisions played back in order, see [`ReplayPolicy`].
    Replay,
}

/// An error raised by a policy while making a decision.
#[derive(Debug, thiserror::Error, Clone, PartialEq)]
pub enum PolicyError {
    #[error("Expected {expected} input features but got {actual}")]
    InputLengthMismatch { expected: usize, actual: usize },

    #[error("The policy produced a non-finite decision: {0:?}")]
    NonFinite(PolicyDecision),

    #[error("All {0} recorded decisions have been replayed")]
    Exhausted(usize),
}

/// An error loading the policy. These are fatal at startup.
#[derive(Debug, thiserror::Error)]
pub enum ModelLoadError {
    #[error("Could not find the software root to resolve the model path {0:?}")]
    SwRootNotSet(PathBuf),

    #[error("Could not read the model file: {0}")]
    FileError(std::io::Error),

    #[error("Could not parse the model file: {0}")]
    ParseError(serde_json::Error),

    #[error("Could not read the replay file: {0}")]
    CsvError(csv::Error),

    #[error("Invalid model shape: {0}")]
    InvalidShape(String),

    #[error("The replay file contains no decisions")]
    EmptyReplay,

    #[error("Could not start the inference worker: {0}")]
    WorkerSpawnError(std::io::Error),
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl PolicyDecision {
    pub fn new(steering: f64, throttle: f64, brake: f64, confidence: f64) -> Self {
        Self {
            steering,
            throttle,
            brake,
            confidence,
        }
    }

    /// The command channels of the decision, before any arbitration.
    pub fn as_command(&self) -> ActuationCommand {
        ActuationCommand::new(self.steering, self.throttle, self.brake)
    }

    pub fn is_finite(&self) -> bool {
        self.steering.is_finite()
            && self.throttle.is_finite()
            && self.brake.is_finite()
            && self.confidence.is_finite()
    }
}

impl Params {
    /// Get the model path, resolving relative paths against the software root.
    pub fn resolved_model_path(&self) -> Result<PathBuf, ModelLoadError> {
        if self.model_path.is_absolute() {
            return Ok(self.model_path.clone());
        }

        let mut path = util::host::get_sw_root()
            .map_err(|_| ModelLoadError::SwRootNotSet(self.model_path.clone()))?;
        path.push(&self.model_path);
        Ok(path)
    }
}

// ---------------------------------------------------------------------------
// FUNCTIONS
// ---------------------------------------------------------------------------

/// Load the policy back-end chosen in the parameters.
pub fn load(params: &Params) -> Result<Box<dyn Policy + Send>, ModelLoadError> {
    let path = params.resolved_model_path()?;

    Ok(match params.backend {
        Backend::Mlp => Box::new(MlpPolicy::from_path(&path, params.default_throttle)?),
        Backend::Replay => Box::new(ReplayPolicy::from_path(&path)?),
    })
}

fn default_throttle() -> f64 {
    0.3
}
