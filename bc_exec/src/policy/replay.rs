//! Recorded decision replay policy
//!
//! Plays back a CSV of decisions in order, ignoring the features. Used to commission the loop and
//! the vehicle interface without a trained network.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use log::info;
use std::path::Path;

use super::{ModelLoadError, Policy, PolicyDecision, PolicyError};
use crate::preproc::FeatureVector;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// A policy which replays recorded decisions.
#[derive(Debug, Clone)]
pub struct ReplayPolicy {
    decisions: Vec<PolicyDecision>,
    next: usize,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl ReplayPolicy {
    /// Load decisions from a CSV file with a `steering,throttle,brake,confidence` header.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, ModelLoadError> {
        let reader = csv::Reader::from_path(path.as_ref()).map_err(ModelLoadError::CsvError)?;
        let policy = Self::from_reader(reader)?;

        info!(
            "Loaded {} recorded decisions from {:?}",
            policy.decisions.len(),
            path.as_ref()
        );

        Ok(policy)
    }

    pub fn from_reader<R: std::io::Read>(
        mut reader: csv::Reader<R>,
    ) -> Result<Self, ModelLoadError> {
        let decisions = reader
            .deserialize()
            .collect::<Result<Vec<PolicyDecision>, _>>()
            .map_err(ModelLoadError::CsvError)?;

        Self::from_decisions(decisions)
    }

    pub fn from_decisions(decisions: Vec<PolicyDecision>) -> Result<Self, ModelLoadError> {
        if decisions.is_empty() {
            return Err(ModelLoadError::EmptyReplay);
        }

        Ok(Self { decisions, next: 0 })
    }

    /// Number of decisions not yet replayed.
    pub fn remaining(&self) -> usize {
        self.decisions.len() - self.next
    }
}

impl Policy for ReplayPolicy {
    fn infer(&mut self, _features: &FeatureVector) -> Result<PolicyDecision, PolicyError> {
        let decision = self
            .decisions
            .get(self.next)
            .copied()
            .ok_or_else(|| PolicyError::Exhausted(self.decisions.len()))?;

        self.next += 1;

        Ok(decision)
    }
}
