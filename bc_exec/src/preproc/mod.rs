//! Frame preprocessor module
//!
//! Converts raw [`SensorFrame`]s into the [`FeatureVector`] the policy was trained on. The image
//! goes through the same pipeline used when recording the training set:
//!
//! 1. Resize to the output size
//! 2. Crop away the top rows (sky and horizon)
//! 3. Resize back up to the output size
//! 4. Drop the alpha channel and scale to `[0, 1]`
//!
//! The transform is pure, so identical frames always give identical features.

// ---------------------------------------------------------------------------
// MODULES
// ---------------------------------------------------------------------------

mod features;
mod params;

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use image::{
    imageops::{self, FilterType},
    ImageBuffer, Pixel, Rgb, Rgba,
};
use ndarray::{arr1, Array3};
use std::f64::consts::PI;

use comms_if::eqpt::sensor::SensorFrame;

pub use features::*;
pub use params::Params;

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

const RESIZE_FILTER: FilterType = FilterType::Triangle;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// The frame preprocessor.
#[derive(Debug, Clone)]
pub struct FramePreprocessor {
    params: Params,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// Reasons a frame cannot be turned into features. All of these are reported to the monitor as an
/// invalid frame format.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum PreprocError {
    #[error("Invalid preprocessor parameters: {0}")]
    InvalidParams(&'static str),

    #[error("Expected a {expected} channel image but got {actual} channels")]
    WrongChannelCount { expected: u8, actual: u8 },

    #[error("The frame's image is empty")]
    EmptyImage,

    #[error("The image buffer is {actual} bytes but {expected} were expected")]
    BufferLengthMismatch { expected: usize, actual: usize },

    #[error("Speed out of range: {0} km/h")]
    InvalidSpeed(f64),

    #[error("Heading out of range: {0} rad")]
    InvalidHeading(f64),

    #[error("Invalid lidar range: {0} m")]
    InvalidProximity(f64),
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl FramePreprocessor {
    pub fn new(params: Params) -> Result<Self, PreprocError> {
        if params.output_width == 0 || params.output_height == 0 {
            return Err(PreprocError::InvalidParams("output size must be non-zero"));
        }
        if params.crop_top >= params.output_height {
            return Err(PreprocError::InvalidParams(
                "crop_top must be less than output_height",
            ));
        }
        if params.expected_channels != 3 && params.expected_channels != 4 {
            return Err(PreprocError::InvalidParams(
                "expected_channels must be 3 (BGR) or 4 (BGRA)",
            ));
        }
        if !(params.max_speed_kmh > 0.0 && params.max_speed_kmh.is_finite()) {
            return Err(PreprocError::InvalidParams(
                "max_speed_kmh must be finite and positive",
            ));
        }
        if !(params.max_proximity_m > 0.0 && params.max_proximity_m.is_finite()) {
            return Err(PreprocError::InvalidParams(
                "max_proximity_m must be finite and positive",
            ));
        }

        Ok(Self { params })
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    /// Number of features produced for each frame.
    pub fn feature_len(&self) -> usize {
        self.params.output_width as usize * self.params.output_height as usize * NUM_IMAGE_CHANNELS
            + NUM_SCALARS
    }

    /// Transform a frame into a feature vector.
    pub fn transform(&self, frame: &SensorFrame) -> Result<FeatureVector, PreprocError> {
        let scalars = self.scalars(frame)?;
        let image = self.image(frame)?;

        Ok(FeatureVector { image, scalars })
    }

    fn image(&self, frame: &SensorFrame) -> Result<Array3<f32>, PreprocError> {
        let img = &frame.image;

        if img.channels != self.params.expected_channels {
            return Err(PreprocError::WrongChannelCount {
                expected: self.params.expected_channels,
                actual: img.channels,
            });
        }
        if img.width == 0 || img.height == 0 {
            return Err(PreprocError::EmptyImage);
        }
        if img.data.len() != img.expected_len() {
            return Err(PreprocError::BufferLengthMismatch {
                expected: img.expected_len(),
                actual: img.data.len(),
            });
        }

        // The pixel types only describe the channel count, the BGR(A) order is kept as is
        let tensor = match img.channels {
            4 => ImageBuffer::<Rgba<u8>, _>::from_raw(img.width, img.height, img.data.clone())
                .map(|buf| self.pipeline(&buf)),
            _ => ImageBuffer::<Rgb<u8>, _>::from_raw(img.width, img.height, img.data.clone())
                .map(|buf| self.pipeline(&buf)),
        };

        tensor.ok_or(PreprocError::BufferLengthMismatch {
            expected: img.expected_len(),
            actual: img.data.len(),
        })
    }

    fn pipeline<P>(&self, buf: &ImageBuffer<P, Vec<u8>>) -> Array3<f32>
    where
        P: Pixel<Subpixel = u8> + 'static,
    {
        let (w, h) = (self.params.output_width, self.params.output_height);
        let crop = self.params.crop_top;

        let resized = imageops::resize(buf, w, h, RESIZE_FILTER);
        let cropped = imageops::crop_imm(&resized, 0, crop, w, h - crop).to_image();
        let out = imageops::resize(&cropped, w, h, RESIZE_FILTER);

        let mut tensor = Array3::zeros((h as usize, w as usize, NUM_IMAGE_CHANNELS));
        for (x, y, px) in out.enumerate_pixels() {
            for (c, v) in px.channels().iter().take(NUM_IMAGE_CHANNELS).enumerate() {
                tensor[[y as usize, x as usize, c]] = *v as f32 / 255.0;
            }
        }

        tensor
    }

    fn scalars(&self, frame: &SensorFrame) -> Result<ndarray::Array1<f32>, PreprocError> {
        let speed = frame.speed_kmh;
        if !(speed >= 0.0 && speed <= self.params.max_speed_kmh) {
            return Err(PreprocError::InvalidSpeed(speed));
        }

        let heading = frame.heading_rad;
        if !(heading >= -PI && heading <= PI) {
            return Err(PreprocError::InvalidHeading(heading));
        }

        // Infinite ranges are lasers without a return, everything else must be in range
        for &r in frame.proximity_m.iter() {
            if r.is_nan() || r < 0.0 || (r.is_finite() && r > self.params.max_proximity_m) {
                return Err(PreprocError::InvalidProximity(r));
            }
        }
        let proximity = frame
            .nearest_proximity_m()
            .unwrap_or(self.params.max_proximity_m);

        Ok(arr1(&[
            (speed / self.params.max_speed_kmh) as f32,
            (heading / PI) as f32,
            (proximity / self.params.max_proximity_m) as f32,
        ]))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use chrono::{TimeZone, Utc};
    use comms_if::eqpt::sensor::FrameImage;

    fn frame(width: u32, height: u32) -> SensorFrame {
        let data = (0..width * height * 4).map(|i| (i % 251) as u8).collect();

        SensorFrame {
            timestamp: Utc.timestamp_millis(1_000),
            image: FrameImage {
                width,
                height,
                channels: 4,
                data,
            },
            speed_kmh: 30.0,
            heading_rad: PI / 2.0,
            proximity_m: vec![std::f64::INFINITY, 20.0, 40.0],
        }
    }

    #[test]
    fn test_transform_shape_and_range() {
        let pp = FramePreprocessor::new(Params::default()).unwrap();
        let fv = pp.transform(&frame(320, 160)).unwrap();

        assert_eq!(fv.image.shape(), &[66, 200, 3]);
        assert_eq!(fv.len(), pp.feature_len());
        assert!(fv.image.iter().all(|v| *v >= 0.0 && *v <= 1.0));

        assert!((fv.scalars[0] - 0.25).abs() < 1e-6);
        assert!((fv.scalars[1] - 0.5).abs() < 1e-6);
        assert!((fv.scalars[2] - 0.25).abs() < 1e-6);
    }

    #[test]
    fn test_transform_deterministic() {
        let pp = FramePreprocessor::new(Params::default()).unwrap();
        let f = frame(64, 48);

        let a = pp.transform(&f).unwrap();
        let b = pp.transform(&f).unwrap();

        assert_eq!(a, b);
        assert!(a
            .iter()
            .zip(b.iter())
            .all(|(x, y)| x.to_bits() == y.to_bits()));
    }

    #[test]
    fn test_uniform_colour_kept() {
        let pp = FramePreprocessor::new(Params::default()).unwrap();
        let mut f = frame(40, 30);
        f.image.data = [10u8, 20, 30, 255].repeat(40 * 30);

        let fv = pp.transform(&f).unwrap();

        // BGR order kept and alpha dropped
        assert!((fv.image[[0, 0, 0]] - 10.0 / 255.0).abs() < 1e-6);
        assert!((fv.image[[10, 100, 1]] - 20.0 / 255.0).abs() < 1e-6);
        assert!((fv.image[[65, 199, 2]] - 30.0 / 255.0).abs() < 1e-6);
    }

    #[test]
    fn test_no_returns_max_proximity() {
        let pp = FramePreprocessor::new(Params::default()).unwrap();
        let mut f = frame(8, 8);
        f.proximity_m = vec![std::f64::INFINITY; 4];

        let fv = pp.transform(&f).unwrap();
        assert_eq!(fv.scalars[2], 1.0);
    }

    #[test]
    fn test_rejects() {
        let pp = FramePreprocessor::new(Params::default()).unwrap();

        let mut f = frame(8, 8);
        f.image.channels = 3;
        assert!(matches!(
            pp.transform(&f),
            Err(PreprocError::WrongChannelCount { .. })
        ));

        let mut f = frame(8, 8);
        f.image.data.pop();
        assert!(matches!(
            pp.transform(&f),
            Err(PreprocError::BufferLengthMismatch { .. })
        ));

        let mut f = frame(8, 8);
        f.image.width = 0;
        f.image.data.clear();
        assert_eq!(pp.transform(&f), Err(PreprocError::EmptyImage));

        let mut f = frame(8, 8);
        f.speed_kmh = std::f64::NAN;
        assert!(matches!(pp.transform(&f), Err(PreprocError::InvalidSpeed(_))));

        let mut f = frame(8, 8);
        f.heading_rad = 4.0;
        assert_eq!(pp.transform(&f), Err(PreprocError::InvalidHeading(4.0)));

        let mut f = frame(8, 8);
        f.proximity_m.push(-1.0);
        assert_eq!(pp.transform(&f), Err(PreprocError::InvalidProximity(-1.0)));

        let mut f = frame(8, 8);
        f.proximity_m.push(500.0);
        assert_eq!(pp.transform(&f), Err(PreprocError::InvalidProximity(500.0)));
    }

    #[test]
    fn test_invalid_params() {
        let params = Params {
            crop_top: 66,
            ..Default::default()
        };
        assert!(FramePreprocessor::new(params).is_err());
    }
}
