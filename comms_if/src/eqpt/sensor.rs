//! # Sensor Equipment Communications Module
//!
//! The simulation publishes one [`SensorBundle`] per simulation step, containing the camera frame
//! and the scalar telemetry of the vehicle. Bundles are converted into [`SensorFrame`]s, which
//! hold the decoded image, before being used by the executive.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::convert::TryFrom;

use base64::DecodeError;
use chrono::{serde::ts_milliseconds, DateTime, Utc};
use serde::{Deserialize, Serialize};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// A serialisable, synchronised sample of all vehicle sensors.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SensorBundle {
    /// UTC timestamp at which the sample was captured
    #[serde(with = "ts_milliseconds")]
    pub timestamp: DateTime<Utc>,

    /// Width of the camera image in pixels
    pub width: u32,

    /// Height of the camera image in pixels
    pub height: u32,

    /// Number of interleaved channels per pixel (4 for the BGRA camera of the simulation)
    pub channels: u8,

    /// The raw interleaved image bytes, row major, encoded in base64.
    pub b64_image: String,

    /// Current vehicle speed.
    ///
    /// Units: kilometers/hour
    pub speed_kmh: f64,

    /// Current vehicle heading.
    ///
    /// Units: radians
    pub heading_rad: f64,

    /// Range image of the front lidar. A `null` entry is a laser with no return.
    ///
    /// Units: meters
    pub lidar_ranges_m: Vec<Option<f64>>,
}

/// A decoded camera image.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameImage {
    /// Width in pixels
    pub width: u32,

    /// Height in pixels
    pub height: u32,

    /// Number of interleaved channels per pixel
    pub channels: u8,

    /// Raw interleaved pixel data, row major
    pub data: Vec<u8>,
}

/// A synchronised sample of all vehicle sensors, owned by the control tick that acquired it.
#[derive(Debug, Clone, PartialEq)]
pub struct SensorFrame {
    /// UTC timestamp at which the sample was captured
    pub timestamp: DateTime<Utc>,

    /// The camera image
    pub image: FrameImage,

    /// Current vehicle speed.
    ///
    /// Units: kilometers/hour
    pub speed_kmh: f64,

    /// Current vehicle heading.
    ///
    /// Units: radians
    pub heading_rad: f64,

    /// Lidar ranges, with `f64::INFINITY` marking lasers with no return.
    ///
    /// Units: meters
    pub proximity_m: Vec<f64>,
}

// -----------------------------------------------------------------------------------------------
// ENUMS
// -----------------------------------------------------------------------------------------------

#[derive(Debug, thiserror::Error, Clone, PartialEq)]
pub enum SensorBundleError {
    #[error("Failed to decode the camera image from base64: {0}")]
    ImageDecodeError(DecodeError),

    #[error("The image data is {actual} bytes but the frame describes {expected} bytes")]
    FrameWrongSize { expected: usize, actual: usize },
}

// -----------------------------------------------------------------------------------------------
// IMPLS
// -----------------------------------------------------------------------------------------------

impl FrameImage {
    /// Number of bytes the image should contain given its dimensions.
    pub fn expected_len(&self) -> usize {
        self.width as usize * self.height as usize * self.channels as usize
    }
}

impl SensorFrame {
    /// Iterator over the lidar ranges which had a return.
    pub fn returns(&self) -> impl Iterator<Item = f64> + '_ {
        self.proximity_m.iter().copied().filter(|r| r.is_finite())
    }

    /// Distance to the nearest lidar return, or `None` if no laser returned.
    pub fn nearest_proximity_m(&self) -> Option<f64> {
        self.returns().fold(None, |acc, r| match acc {
            Some(a) if a <= r => Some(a),
            _ => Some(r),
        })
    }

    /// Convert this frame back into its wire representation.
    pub fn to_bundle(&self) -> SensorBundle {
        SensorBundle {
            timestamp: self.timestamp,
            width: self.image.width,
            height: self.image.height,
            channels: self.image.channels,
            b64_image: base64::encode(&self.image.data),
            speed_kmh: self.speed_kmh,
            heading_rad: self.heading_rad,
            lidar_ranges_m: self
                .proximity_m
                .iter()
                .map(|r| if r.is_finite() { Some(*r) } else { None })
                .collect(),
        }
    }
}

impl TryFrom<SensorBundle> for SensorFrame {
    type Error = SensorBundleError;

    fn try_from(bundle: SensorBundle) -> Result<Self, Self::Error> {
        let data = base64::decode(&bundle.b64_image).map_err(SensorBundleError::ImageDecodeError)?;

        let image = FrameImage {
            width: bundle.width,
            height: bundle.height,
            channels: bundle.channels,
            data,
        };

        if image.data.len() != image.expected_len() {
            return Err(SensorBundleError::FrameWrongSize {
                expected: image.expected_len(),
                actual: image.data.len(),
            });
        }

        Ok(Self {
            timestamp: bundle.timestamp,
            image,
            speed_kmh: bundle.speed_kmh,
            heading_rad: bundle.heading_rad,
            proximity_m: bundle
                .lidar_ranges_m
                .into_iter()
                .map(|r| r.unwrap_or(std::f64::INFINITY))
                .collect(),
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn bundle_json(b64_image: &str, width: u32) -> String {
        format!(
            r#"{{
                "timestamp": 1700000000123,
                "width": {},
                "height": 1,
                "channels": 4,
                "b64_image": "{}",
                "speed_kmh": 25.0,
                "heading_rad": 0.5,
                "lidar_ranges_m": [12.5, null, 7.25]
            }}"#,
            width, b64_image
        )
    }

    #[test]
    fn test_bundle_to_frame() {
        let b64 = base64::encode(&[1u8, 2, 3, 255, 4, 5, 6, 255]);
        let bundle: SensorBundle = serde_json::from_str(&bundle_json(&b64, 2)).unwrap();
        let frame = SensorFrame::try_from(bundle).unwrap();

        assert_eq!(frame.timestamp.timestamp_millis(), 1_700_000_000_123);
        assert_eq!(frame.image.data, vec![1, 2, 3, 255, 4, 5, 6, 255]);
        assert!(frame.proximity_m[1].is_infinite());
        assert_eq!(frame.returns().count(), 2);
        assert_eq!(frame.nearest_proximity_m(), Some(7.25));
    }

    #[test]
    fn test_frame_to_bundle() {
        let b64 = base64::encode(&[9u8, 8, 7, 255]);
        let bundle: SensorBundle = serde_json::from_str(&bundle_json(&b64, 1)).unwrap();
        let frame = SensorFrame::try_from(bundle).unwrap();

        let back = frame.to_bundle();
        assert_eq!(back.b64_image, b64);
        assert_eq!(back.lidar_ranges_m, vec![Some(12.5), None, Some(7.25)]);

        assert_eq!(SensorFrame::try_from(back).unwrap(), frame);
    }

    #[test]
    fn test_bundle_wrong_size() {
        let b64 = base64::encode(&[1u8, 2, 3, 255]);
        let bundle: SensorBundle = serde_json::from_str(&bundle_json(&b64, 2)).unwrap();

        assert_eq!(
            SensorFrame::try_from(bundle),
            Err(SensorBundleError::FrameWrongSize {
                expected: 8,
                actual: 4
            })
        );
    }

    #[test]
    fn test_bad_base64() {
        let bundle: SensorBundle = serde_json::from_str(&bundle_json("not*base64", 2)).unwrap();

        assert!(matches!(
            SensorFrame::try_from(bundle),
            Err(SensorBundleError::ImageDecodeError(_))
        ));
    }
}
