//! Dense feed-forward network policy
//!
//! The network is stored as a JSON artifact exported by the training pipeline:
//!
//! ```json
//! {
//!     "input_len": 39603,
//!     "layers": [
//!         { "weights": [[...], ...], "bias": [...], "activation": "relu" },
//!         { "weights": [[...]], "bias": [0.0], "activation": "tanh" }
//!     ]
//! }
//! ```
//!
//! `weights` is `outputs x inputs`. The width of the last layer selects how the outputs map onto
//! a decision, see [`Head`].

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use log::info;
use ndarray::{Array1, Array2};
use serde::Deserialize;
use std::path::Path;

use super::{ModelLoadError, Policy, PolicyDecision, PolicyError};
use crate::preproc::FeatureVector;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// A multi-layer perceptron driving policy.
#[derive(Debug, Clone)]
pub struct MlpPolicy {
    input_len: usize,
    layers: Vec<Layer>,
    head: Head,
    default_throttle: f64,
}

#[derive(Debug, Clone)]
struct Layer {
    weights: Array2<f32>,
    bias: Array1<f32>,
    activation: Activation,
}

#[derive(Deserialize)]
struct MlpArtifact {
    input_len: usize,
    layers: Vec<LayerArtifact>,
}

#[derive(Deserialize)]
struct LayerArtifact {
    weights: Vec<Vec<f32>>,
    bias: Vec<f32>,
    #[serde(default)]
    activation: Activation,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(rename_all = "lowercase")]
enum Activation {
    Linear,
    Relu,
    Tanh,
    Sigmoid,
}

/// How the network's outputs map onto a decision.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Head {
    /// `[steering]`, throttle is fixed and confidence is 1.
    SteeringOnly,

    /// `[steering, throttle, brake]`, confidence is 1.
    Command,

    /// `[steering, throttle, brake, confidence]`.
    CommandConfidence,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl MlpPolicy {
    /// Load the network from a JSON artifact.
    pub fn from_path<P: AsRef<Path>>(
        path: P,
        default_throttle: f64,
    ) -> Result<Self, ModelLoadError> {
        let json = std::fs::read_to_string(path.as_ref()).map_err(ModelLoadError::FileError)?;
        let policy = Self::from_json(&json, default_throttle)?;

        info!(
            "Loaded {}-layer MLP policy from {:?} ({:?} head)",
            policy.layers.len(),
            path.as_ref(),
            policy.head
        );

        Ok(policy)
    }

    /// Parse the network from a JSON artifact string.
    pub fn from_json(json: &str, default_throttle: f64) -> Result<Self, ModelLoadError> {
        let artifact: MlpArtifact =
            serde_json::from_str(json).map_err(ModelLoadError::ParseError)?;

        Self::from_artifact(artifact, default_throttle)
    }

    pub fn head(&self) -> Head {
        self.head
    }

    fn from_artifact(artifact: MlpArtifact, default_throttle: f64) -> Result<Self, ModelLoadError> {
        if artifact.input_len == 0 {
            return Err(ModelLoadError::InvalidShape("input_len is zero".into()));
        }
        if artifact.layers.is_empty() {
            return Err(ModelLoadError::InvalidShape("the network has no layers".into()));
        }

        let mut layers = Vec::with_capacity(artifact.layers.len());
        let mut width = artifact.input_len;

        for (i, layer) in artifact.layers.into_iter().enumerate() {
            let rows = layer.weights.len();

            if rows == 0 {
                return Err(ModelLoadError::InvalidShape(format!("layer {} has no outputs", i)));
            }
            if let Some(row) = layer.weights.iter().find(|r| r.len() != width) {
                return Err(ModelLoadError::InvalidShape(format!(
                    "layer {} has a weight row of length {}, expected {}",
                    i,
                    row.len(),
                    width
                )));
            }
            if layer.bias.len() != rows {
                return Err(ModelLoadError::InvalidShape(format!(
                    "layer {} has {} biases for {} outputs",
                    i,
                    layer.bias.len(),
                    rows
                )));
            }

            let flat: Vec<f32> = layer.weights.into_iter().flatten().collect();
            let weights = Array2::from_shape_vec((rows, width), flat)
                .map_err(|e| ModelLoadError::InvalidShape(format!("layer {}: {}", i, e)))?;

            layers.push(Layer {
                weights,
                bias: Array1::from(layer.bias),
                activation: layer.activation,
            });
            width = rows;
        }

        let head = match width {
            1 => Head::SteeringOnly,
            3 => Head::Command,
            4 => Head::CommandConfidence,
            w => {
                return Err(ModelLoadError::InvalidShape(format!(
                    "the output layer has {} outputs, expected 1, 3 or 4",
                    w
                )))
            }
        };

        Ok(Self {
            input_len: artifact.input_len,
            layers,
            head,
            default_throttle,
        })
    }
}

impl Policy for MlpPolicy {
    fn infer(&mut self, features: &FeatureVector) -> Result<PolicyDecision, PolicyError> {
        if features.len() != self.input_len {
            return Err(PolicyError::InputLengthMismatch {
                expected: self.input_len,
                actual: features.len(),
            });
        }

        let mut x: Array1<f32> = features.iter().copied().collect();
        for layer in self.layers.iter() {
            x = layer.forward(&x);
        }

        let y = |i: usize| x[i] as f64;

        Ok(match self.head {
            Head::SteeringOnly => PolicyDecision::new(y(0), self.default_throttle, 0.0, 1.0),
            Head::Command => PolicyDecision::new(y(0), y(1), y(2), 1.0),
            Head::CommandConfidence => PolicyDecision::new(y(0), y(1), y(2), y(3)),
        })
    }

    fn input_len(&self) -> Option<usize> {
        Some(self.input_len)
    }
}

impl Layer {
    fn forward(&self, x: &Array1<f32>) -> Array1<f32> {
        let mut y = self.weights.dot(x);
        y += &self.bias;
        y.mapv_inplace(|v| self.activation.apply(v));
        y
    }
}

impl Activation {
    fn apply(&self, v: f32) -> f32 {
        match self {
            Activation::Linear => v,
            Activation::Relu => v.max(0.0),
            Activation::Tanh => v.tanh(),
            Activation::Sigmoid => 1.0 / (1.0 + (-v).exp()),
        }
    }
}

impl Default for Activation {
    fn default() -> Self {
        Activation::Linear
    }
}
