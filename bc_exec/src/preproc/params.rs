//! Parameters structure for the FramePreprocessor

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Parameters for the frame preprocessor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Params {
    // ---- IMAGE ----
    /// Width of the image given to the policy.
    ///
    /// Units: pixels
    pub output_width: u32,

    /// Height of the image given to the policy.
    ///
    /// Units: pixels
    pub output_height: u32,

    /// Number of rows removed from the top of the resized image, taking out the sky and horizon.
    ///
    /// Units: pixels
    pub crop_top: u32,

    /// Number of channels the camera is expected to provide, 4 for BGRA or 3 for BGR.
    pub expected_channels: u8,

    // ---- SCALARS ----
    /// Speed which maps to 1.0 in the feature vector. Faster frames are rejected.
    ///
    /// Units: kilometers/hour
    pub max_speed_kmh: f64,

    /// Lidar range which maps to 1.0 in the feature vector, also used when there are no returns.
    /// Further returns are rejected.
    ///
    /// Units: meters
    pub max_proximity_m: f64,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Default for Params {
    fn default() -> Self {
        Self {
            output_width: 200,
            output_height: 66,
            crop_top: 35,
            expected_channels: 4,
            max_speed_kmh: 120.0,
            max_proximity_m: 80.0,
        }
    }
}
