//! # Sensor adapter
//!
//! Pulls frames from a [`SensorSource`] and only lets through frames which are newer than the last
//! delivered frame and fresh enough to act on.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use chrono::{DateTime, Utc};
use log::trace;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use comms_if::eqpt::sensor::SensorFrame;

use crate::monitor::FailureKind;

// ---------------------------------------------------------------------------
// TRAITS
// ---------------------------------------------------------------------------

/// A source of sensor frames, such as the simulation's sensor publisher.
pub trait SensorSource {
    /// Wait up to `timeout` for the next frame, returning `None` if there is none.
    fn next_frame(&mut self, timeout: Duration) -> Option<SensorFrame>;
}

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Parameters for the sensor adapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Params {
    /// Maximum time to wait for a frame.
    ///
    /// Units: milliseconds
    pub acquire_timeout_ms: u64,

    /// Maximum age of a frame when it is acquired, 0 disables the check.
    ///
    /// Units: milliseconds
    pub max_frame_age_ms: u64,
}

/// The sensor adapter.
pub struct SensorAdapter {
    source: Box<dyn SensorSource>,

    params: Params,

    /// Timestamp of the last delivered frame.
    watermark: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error, Clone, PartialEq)]
pub enum SensorError {
    #[error("No sensor frame recieved within {0:?}")]
    SensorUnavailable(Duration),

    #[error("Frame from {timestamp} is older than the last frame ({watermark})")]
    OutOfOrder {
        timestamp: DateTime<Utc>,
        watermark: DateTime<Utc>,
    },

    #[error("Frame from {timestamp} is {age_ms} ms old")]
    TooOld {
        timestamp: DateTime<Utc>,
        age_ms: i64,
    },

    #[error("Frame from {0} has already been delivered")]
    DuplicateFrame(DateTime<Utc>),
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl SensorAdapter {
    pub fn new(source: Box<dyn SensorSource>, params: Params) -> Self {
        Self {
            source,
            params,
            watermark: None,
        }
    }

    /// Acquire the next frame.
    pub fn acquire(&mut self) -> Result<SensorFrame, SensorError> {
        let timeout = Duration::from_millis(self.params.acquire_timeout_ms);

        let frame = self
            .source
            .next_frame(timeout)
            .ok_or(SensorError::SensorUnavailable(timeout))?;

        self.accept(frame, Utc::now())
    }

    /// Check a frame's ordering and age at the time `now`, advancing the watermark if accepted.
    pub fn accept(
        &mut self,
        frame: SensorFrame,
        now: DateTime<Utc>,
    ) -> Result<SensorFrame, SensorError> {
        if let Some(watermark) = self.watermark {
            if frame.timestamp == watermark {
                return Err(SensorError::DuplicateFrame(frame.timestamp));
            }
            if frame.timestamp < watermark {
                return Err(SensorError::OutOfOrder {
                    timestamp: frame.timestamp,
                    watermark,
                });
            }
        }

        let age_ms = (now - frame.timestamp).num_milliseconds();
        if self.params.max_frame_age_ms > 0 && age_ms > self.params.max_frame_age_ms as i64 {
            return Err(SensorError::TooOld {
                timestamp: frame.timestamp,
                age_ms,
            });
        }

        trace!("Accepted frame from {} ({} ms old)", frame.timestamp, age_ms);
        self.watermark = Some(frame.timestamp);

        Ok(frame)
    }

    /// Timestamp of the last delivered frame.
    pub fn watermark(&self) -> Option<DateTime<Utc>> {
        self.watermark
    }
}

impl Default for Params {
    fn default() -> Self {
        Self {
            acquire_timeout_ms: 100,
            max_frame_age_ms: 250,
        }
    }
}

impl From<&SensorError> for FailureKind {
    fn from(e: &SensorError) -> Self {
        match e {
            SensorError::SensorUnavailable(_) => FailureKind::SensorUnavailable,
            SensorError::OutOfOrder { .. } | SensorError::TooOld { .. } => {
                FailureKind::SensorStale
            }
            SensorError::DuplicateFrame(_) => FailureKind::DuplicateFrame,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use chrono::{Duration as ChronoDuration, TimeZone};
    use comms_if::eqpt::sensor::FrameImage;
    use std::collections::VecDeque;

    struct QueueSource(VecDeque<SensorFrame>);

    impl SensorSource for QueueSource {
        fn next_frame(&mut self, _: Duration) -> Option<SensorFrame> {
            self.0.pop_front()
        }
    }

    fn frame(ms: i64) -> SensorFrame {
        SensorFrame {
            timestamp: Utc.timestamp_millis(ms),
            image: FrameImage {
                width: 1,
                height: 1,
                channels: 4,
                data: vec![0; 4],
            },
            speed_kmh: 0.0,
            heading_rad: 0.0,
            proximity_m: vec![],
        }
    }

    fn adapter() -> SensorAdapter {
        SensorAdapter::new(Box::new(QueueSource(VecDeque::new())), Params::default())
    }

    #[test]
    fn test_ordering() {
        let mut sa = adapter();
        let now = Utc.timestamp_millis(1_100);

        assert!(sa.accept(frame(1_000), now).is_ok());
        assert_eq!(
            sa.accept(frame(1_000), now),
            Err(SensorError::DuplicateFrame(Utc.timestamp_millis(1_000)))
        );
        assert!(matches!(
            sa.accept(frame(900), now),
            Err(SensorError::OutOfOrder { .. })
        ));

        // Rejections don't move the watermark
        assert_eq!(sa.watermark(), Some(Utc.timestamp_millis(1_000)));
        assert!(sa.accept(frame(1_050), now).is_ok());
    }

    #[test]
    fn test_too_old() {
        let mut sa = adapter();
        let ts = Utc.timestamp_millis(10_000);

        let err = sa.accept(frame(10_000), ts + ChronoDuration::milliseconds(300));
        assert_eq!(
            err,
            Err(SensorError::TooOld {
                timestamp: ts,
                age_ms: 300
            })
        );
        assert_eq!(FailureKind::from(&err.unwrap_err()), FailureKind::SensorStale);
        assert_eq!(sa.watermark(), None);
    }

    #[test]
    fn test_unavailable() {
        let mut sa = adapter();

        assert_eq!(
            sa.acquire(),
            Err(SensorError::SensorUnavailable(Duration::from_millis(100)))
        );
    }
}
