//! Policy inference engine
//!
//! The policy is owned by a single worker thread, so no two inferences can ever run at the same
//! time. Requests carry a sequence number; a request abandoned after its deadline may still be
//! answered later, and that stale reply is discarded when it arrives.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use log::{debug, trace};
use std::{
    sync::mpsc::{self, Receiver, RecvTimeoutError, Sender},
    thread,
    time::{Duration, Instant},
};

use super::{ModelLoadError, Policy, PolicyDecision, PolicyError};
use crate::preproc::FeatureVector;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Runs the policy with a deadline.
pub struct PolicyInferenceEngine {
    request_tx: Sender<Request>,
    reply_rx: Receiver<Reply>,

    timeout: Duration,

    next_seq: u64,
}

/// A completed inference.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InferenceOutput {
    pub decision: PolicyDecision,

    /// Time between submitting the request and recieving the decision.
    pub latency: Duration,
}

struct Request {
    seq: u64,
    features: FeatureVector,
}

struct Reply {
    seq: u64,
    result: Result<PolicyDecision, PolicyError>,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error, Clone, PartialEq)]
pub enum InferenceError {
    #[error("Inference did not complete within {0:?}")]
    Timeout(Duration),

    #[error("The policy failed: {0}")]
    PolicyError(PolicyError),

    #[error("The inference worker has stopped")]
    WorkerStopped,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl PolicyInferenceEngine {
    /// Start the engine on the given policy.
    pub fn new(policy: Box<dyn Policy + Send>, timeout: Duration) -> Result<Self, ModelLoadError> {
        let (request_tx, request_rx) = mpsc::channel();
        let (reply_tx, reply_rx) = mpsc::channel();

        // The worker is never joined, a policy stuck in inference must not block shutdown
        thread::Builder::new()
            .name("policy_worker".into())
            .spawn(move || worker(policy, request_rx, reply_tx))
            .map_err(ModelLoadError::WorkerSpawnError)?;

        Ok(Self {
            request_tx,
            reply_rx,
            timeout,
            next_seq: 0,
        })
    }

    /// Run the policy on the features, waiting at most for the engine's timeout.
    pub fn infer(&mut self, features: &FeatureVector) -> Result<InferenceOutput, InferenceError> {
        let seq = self.next_seq;
        self.next_seq += 1;

        let start = Instant::now();
        let deadline = start + self.timeout;

        self.request_tx
            .send(Request {
                seq,
                features: features.clone(),
            })
            .map_err(|_| InferenceError::WorkerStopped)?;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());

            match self.reply_rx.recv_timeout(remaining) {
                Ok(reply) if reply.seq == seq => {
                    let latency = start.elapsed();
                    trace!("Inference {} completed in {:?}", seq, latency);

                    return reply
                        .result
                        .map(|decision| InferenceOutput { decision, latency })
                        .map_err(InferenceError::PolicyError);
                }
                Ok(reply) => debug!("Discarding stale reply to inference {}", reply.seq),
                Err(RecvTimeoutError::Timeout) => return Err(InferenceError::Timeout(self.timeout)),
                Err(RecvTimeoutError::Disconnected) => return Err(InferenceError::WorkerStopped),
            }
        }
    }
}

// ---------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ---------------------------------------------------------------------------

fn worker(mut policy: Box<dyn Policy + Send>, rx: Receiver<Request>, tx: Sender<Reply>) {
    while let Ok(mut request) = rx.recv() {
        // Requests queued behind a slow inference are already abandoned, only the newest matters
        while let Ok(newer) = rx.try_recv() {
            request = newer;
        }

        let result = policy.infer(&request.features).and_then(|d| match d.is_finite() {
            true => Ok(d),
            false => Err(PolicyError::NonFinite(d)),
        });

        if tx.send(Reply {
            seq: request.seq,
            result,
        })
        .is_err()
        {
            break;
        }
    }

    debug!("Policy worker stopped");
}
