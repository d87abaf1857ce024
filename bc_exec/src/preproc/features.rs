//! Feature vector definition

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use ndarray::{Array1, Array3};

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Number of colour channels in the image tensor (BGR).
pub const NUM_IMAGE_CHANNELS: usize = 3;

/// Number of scalar features: speed, heading and nearest proximity.
pub const NUM_SCALARS: usize = 3;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// The normalised input of the policy for one tick.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureVector {
    /// Image tensor, `height x width x 3`, BGR, values in `[0, 1]`.
    pub image: Array3<f32>,

    /// Scaled scalars `[speed, heading, nearest proximity]`.
    pub scalars: Array1<f32>,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl FeatureVector {
    /// Total number of features.
    pub fn len(&self) -> usize {
        self.image.len() + self.scalars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Iterate over all features, the image in row major order followed by the scalars.
    pub fn iter(&self) -> impl Iterator<Item = &f32> + '_ {
        self.image.iter().chain(self.scalars.iter())
    }
}
