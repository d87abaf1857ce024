//! # Telemetry recorder
//!
//! Keeps an append-only CSV record of every control tick. Records are handed to a background
//! writer through a bounded queue, the control tick never waits on the disk. When the queue is full
//! the record is dropped and counted.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::{
    sync::mpsc::{self, Receiver, SyncSender, TrySendError},
    thread::{self, JoinHandle},
};

use util::{
    archive::{ArchiveError, Archiver},
    session::Session,
};

use crate::monitor::{FailureKind, Mode};

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Number of records written between flushes of the telemetry file.
const FLUSH_INTERVAL: usize = 50;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Parameters for the telemetry recorder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Params {
    pub enabled: bool,

    /// Maximum number of records waiting to be written.
    pub queue_len: usize,

    /// Name of the telemetry file in the session's archive directory.
    pub file_name: String,
}

/// One row of the telemetry file.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TelemetryRecord {
    pub tick: u64,

    /// Session elapsed time.
    ///
    /// Units: seconds
    pub time_s: Option<f64>,

    pub frame_timestamp_ms: Option<i64>,
    pub speed_kmh: Option<f64>,
    pub heading_rad: Option<f64>,
    pub nearest_proximity_m: Option<f64>,

    pub obstacle: &'static str,

    pub decision_steering: Option<f64>,
    pub decision_throttle: Option<f64>,
    pub decision_brake: Option<f64>,
    pub decision_confidence: Option<f64>,
    pub inference_latency_ms: Option<f64>,

    pub cmd_steering: f64,
    pub cmd_throttle: f64,
    pub cmd_brake: f64,
    pub blend_weight: f64,

    pub mode: Mode,
    pub failure: Option<FailureKind>,
    pub dispatched: bool,
    pub consecutive_failures: u32,
    pub total_failures: u64,
}

/// The telemetry recorder.
pub struct TelemetryRecorder {
    tx: Option<SyncSender<TelemetryRecord>>,
    writer_jh: Option<JoinHandle<()>>,
    dropped: u64,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("Could not create the telemetry archive: {0}")]
    ArchiveError(ArchiveError),

    #[error("Could not start the telemetry writer: {0}")]
    ThreadSpawnError(std::io::Error),
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl TelemetryRecorder {
    /// Start a recorder writing to the given archive.
    pub fn new(archiver: Archiver, queue_len: usize) -> Result<Self, TelemetryError> {
        let (tx, rx) = mpsc::sync_channel(queue_len.max(1));

        let writer_jh = thread::Builder::new()
            .name("telemetry_writer".into())
            .spawn(move || writer_thread(archiver, rx))
            .map_err(TelemetryError::ThreadSpawnError)?;

        Ok(Self {
            tx: Some(tx),
            writer_jh: Some(writer_jh),
            dropped: 0,
        })
    }

    /// Start a recorder in the session's archive directory, or a disabled one if telemetry is
    /// turned off.
    pub fn from_session(session: &Session, params: &Params) -> Result<Self, TelemetryError> {
        if !params.enabled {
            return Ok(Self::disabled());
        }

        let archiver = Archiver::from_path(session, &params.file_name)
            .map_err(TelemetryError::ArchiveError)?;

        Self::new(archiver, params.queue_len)
    }

    /// A recorder which discards every record.
    pub fn disabled() -> Self {
        Self {
            tx: None,
            writer_jh: None,
            dropped: 0,
        }
    }

    /// Hand a record to the writer without blocking.
    ///
    /// Returns `false` if the record was dropped.
    pub fn record(&mut self, record: TelemetryRecord) -> bool {
        let tx = match self.tx {
            Some(ref tx) => tx,
            None => return false,
        };

        match tx.try_send(record) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                self.dropped += 1;
                debug!("Telemetry queue full, {} records dropped", self.dropped);
                false
            }
            Err(TrySendError::Disconnected(_)) => {
                warn!("Telemetry writer has stopped, telemetry disabled");
                self.tx = None;
                self.dropped += 1;
                false
            }
        }
    }

    /// Number of records dropped because the writer could not keep up.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

impl Drop for TelemetryRecorder {
    fn drop(&mut self) {
        // Closing the channel stops the writer once the queue is drained
        self.tx.take();

        if let Some(jh) = self.writer_jh.take() {
            jh.join().ok();
        }
    }
}

impl Default for Params {
    fn default() -> Self {
        Self {
            enabled: true,
            queue_len: 256,
            file_name: "telemetry.csv".into(),
        }
    }
}

// ---------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ---------------------------------------------------------------------------

fn writer_thread(mut archiver: Archiver, rx: Receiver<TelemetryRecord>) {
    let mut written = 0usize;

    for record in rx.iter() {
        if let Err(e) = archiver.serialise(&record) {
            warn!("Could not write telemetry record: {}", e);
            continue;
        }

        written += 1;
        if written % FLUSH_INTERVAL == 0 {
            archiver.flush().ok();
        }
    }

    if let Err(e) = archiver.flush() {
        warn!("Could not flush telemetry: {}", e);
    }
}
