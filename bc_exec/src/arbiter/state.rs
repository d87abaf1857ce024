//! Implementations for the CommandArbiter state structure

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use log::trace;
use serde::Serialize;
use std::{convert::Infallible, sync::Arc};

// Internal
use super::{ActuationCommand, ArbiterError, Channel, SafetyEnvelope};
use crate::{
    monitor::{LoopHealthState, Mode},
    policy::PolicyDecision,
};
use util::{
    maths::{clamp, lerp, step_towards},
    module::State,
};

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Command arbiter module state.
///
/// The only state kept between ticks is the previously issued command.
pub struct CommandArbiter {
    envelope: Arc<SafetyEnvelope>,

    confidence_floor: f64,

    previous: ActuationCommand,

    pub(crate) report: StatusReport,
}

/// Data required to initialise the arbiter.
pub struct InitData {
    pub envelope: Arc<SafetyEnvelope>,

    /// Confidence below which decisions are blended towards the fail-safe command.
    pub confidence_floor: f64,
}

/// Input data to the arbiter.
#[derive(Debug, Clone, Copy)]
pub struct InputData {
    /// The policy's decision, or `None` if no decision could be made this tick.
    pub decision: Option<PolicyDecision>,

    /// Snapshot of the loop health for this tick.
    pub health: LoopHealthState,
}

/// Status report for arbitration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct StatusReport {
    /// The fail-safe command was issued because the loop is in FAILSAFE mode.
    pub failsafe: bool,

    /// There was no decision so the previous command was held.
    pub held_previous: bool,

    /// Weight of the fail-safe command in the blend, zero if no blending happened.
    pub blend_weight: f64,

    /// Channels whose raw decision was outside of the envelope (or not a number).
    pub clamped: [bool; 3],

    /// Channels which were held back by the rate limiter.
    pub rate_limited: [bool; 3],
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl CommandArbiter {
    /// Create a new initialised arbiter.
    pub fn new(envelope: Arc<SafetyEnvelope>, confidence_floor: f64) -> Result<Self, ArbiterError> {
        let mut arbiter = Self::default();
        arbiter.init(InitData {
            envelope,
            confidence_floor,
        })?;
        Ok(arbiter)
    }

    /// The last command issued by the arbiter.
    pub fn previous(&self) -> ActuationCommand {
        self.previous
    }

    pub fn envelope(&self) -> &SafetyEnvelope {
        &self.envelope
    }
}

impl Default for CommandArbiter {
    fn default() -> Self {
        Self {
            envelope: Arc::new(SafetyEnvelope::default()),
            confidence_floor: 0.0,
            previous: ActuationCommand::default(),
            report: StatusReport::default(),
        }
    }
}

impl State for CommandArbiter {
    type InitData = InitData;
    type InitError = ArbiterError;

    type InputData = InputData;
    type OutputData = ActuationCommand;
    type StatusReport = StatusReport;
    type ProcError = Infallible;

    /// Initialise the arbiter.
    ///
    /// The previous command starts out as neutral, pulled into the envelope.
    fn init(&mut self, init_data: Self::InitData) -> Result<(), Self::InitError> {
        let floor = init_data.confidence_floor;
        if !(0.0..=1.0).contains(&floor) {
            return Err(ArbiterError::InvalidConfidenceFloor(floor));
        }

        self.previous = init_data.envelope.clamp(&ActuationCommand::default());
        self.envelope = init_data.envelope;
        self.confidence_floor = floor;
        self.report = StatusReport::default();

        Ok(())
    }

    /// Arbitrate this tick's command.
    ///
    /// Arbitration is total, it never fails.
    fn proc(
        &mut self,
        input_data: &Self::InputData,
    ) -> Result<(Self::OutputData, Self::StatusReport), Self::ProcError> {
        let (cmd, report) = arbitrate(
            input_data.decision.as_ref(),
            &self.previous,
            &input_data.health,
            &self.envelope,
            self.confidence_floor,
        );

        trace!("Arbitrated {:?} -> {:?} ({:?})", input_data.decision, cmd, report);

        self.previous = cmd;
        self.report = report;

        Ok((cmd, report))
    }
}

// ---------------------------------------------------------------------------
// FUNCTIONS
// ---------------------------------------------------------------------------

/// Produce the command for this tick from the policy's decision.
///
/// `previous` must be inside the envelope, which is always true for commands produced by this
/// function.
pub fn arbitrate(
    decision: Option<&PolicyDecision>,
    previous: &ActuationCommand,
    health: &LoopHealthState,
    envelope: &SafetyEnvelope,
    confidence_floor: f64,
) -> (ActuationCommand, StatusReport) {
    let mut report = StatusReport::default();

    if health.mode == Mode::FailSafe {
        report.failsafe = true;
        return (ActuationCommand::FAILSAFE, report);
    }

    let decision = match decision {
        Some(d) => d,
        None => {
            report.held_previous = true;
            return (envelope.clamp(previous), report);
        }
    };

    // Clamp the raw decision, unusable values fall back to the fail-safe value of their channel
    let raw = decision.as_command();
    let mut target = ActuationCommand::default();
    for &c in Channel::ALL.iter() {
        let value = raw.get(c);
        let clamped = match value.is_nan() {
            true => ActuationCommand::FAILSAFE.get(c),
            false => envelope.limits(c).clamp(value),
        };

        report.clamped[c.index()] = value.is_nan() || clamped != value;
        target.set(c, clamped);
    }

    // Blend towards the fail-safe command when not confident
    let weight = blend_weight(decision.confidence, confidence_floor);
    if weight > 0.0 {
        report.blend_weight = weight;
        for &c in Channel::ALL.iter() {
            target.set(c, lerp(target.get(c), ActuationCommand::FAILSAFE.get(c), weight));
        }
    }

    // Rate limit against the previous command
    let mut cmd = target;
    for &c in Channel::ALL.iter() {
        let limits = envelope.limits(c);
        let limited = step_towards(previous.get(c), target.get(c), limits.max_delta);

        report.rate_limited[c.index()] = limited != target.get(c);
        cmd.set(c, limits.clamp(limited));
    }

    (cmd, report)
}

/// Weight of the fail-safe command when blending a decision of the given confidence.
///
/// Zero at or above the floor, rising linearly to one at zero confidence.
pub fn blend_weight(confidence: f64, confidence_floor: f64) -> f64 {
    if confidence_floor <= 0.0 {
        return 0.0;
    }

    let confidence = clamp(confidence, 0.0, confidence_floor);

    (confidence_floor - confidence) / confidence_floor
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::arbiter::MaxDelta;

    fn envelope(delta: f64) -> Arc<SafetyEnvelope> {
        Arc::new(
            SafetyEnvelope::new([-1.0, 1.0], [0.0, 1.0], [0.0, 1.0], MaxDelta::Uniform(delta))
                .unwrap(),
        )
    }

    fn health(mode: Mode) -> LoopHealthState {
        LoopHealthState {
            mode,
            ..Default::default()
        }
    }

    fn decision(steering: f64, throttle: f64, brake: f64, confidence: f64) -> PolicyDecision {
        PolicyDecision {
            steering,
            throttle,
            brake,
            confidence,
        }
    }

    #[test]
    fn test_confident_decision_passes() {
        let mut arb = CommandArbiter::new(envelope(0.5), 0.5).unwrap();

        let (cmd, rpt) = arb
            .proc(&InputData {
                decision: Some(decision(0.05, 0.3, 0.0, 1.0)),
                health: health(Mode::Normal),
            })
            .unwrap();

        assert!((cmd.steering - 0.05).abs() < 1e-12);
        assert!((cmd.throttle - 0.3).abs() < 1e-12);
        assert_eq!(cmd.brake, 0.0);
        assert_eq!(rpt, StatusReport::default());
    }

    #[test]
    fn test_failsafe_ignores_decision() {
        let mut arb = CommandArbiter::new(envelope(0.05), 0.5).unwrap();

        let (cmd, rpt) = arb
            .proc(&InputData {
                decision: Some(decision(0.9, 1.0, 0.0, 1.0)),
                health: health(Mode::FailSafe),
            })
            .unwrap();

        assert_eq!(cmd, ActuationCommand::FAILSAFE);
        assert!(rpt.failsafe);
        assert_eq!(arb.previous(), ActuationCommand::FAILSAFE);
    }

    #[test]
    fn test_hold_previous() {
        let mut arb = CommandArbiter::new(envelope(0.5), 0.5).unwrap();

        let (first, _) = arb
            .proc(&InputData {
                decision: Some(decision(0.2, 0.4, 0.0, 1.0)),
                health: health(Mode::Normal),
            })
            .unwrap();

        let (held, rpt) = arb
            .proc(&InputData {
                decision: None,
                health: health(Mode::Degraded),
            })
            .unwrap();

        assert_eq!(first, held);
        assert!(rpt.held_previous);
    }

    #[test]
    fn test_clamp_and_rate_limit() {
        let mut arb = CommandArbiter::new(envelope(0.1), 0.0).unwrap();

        let (cmd, rpt) = arb
            .proc(&InputData {
                decision: Some(decision(-3.0, 0.05, 0.0, 1.0)),
                health: health(Mode::Normal),
            })
            .unwrap();

        assert_eq!(rpt.clamped, [true, false, false]);
        assert_eq!(rpt.rate_limited, [true, false, false]);
        assert!((cmd.steering + 0.1).abs() < 1e-12);
        assert!((cmd.throttle - 0.05).abs() < 1e-12);
    }

    #[test]
    fn test_rate_limit_is_exact() {
        let mut arb = CommandArbiter::new(envelope(0.2), 0.0).unwrap();

        let (first, _) = arb
            .proc(&InputData {
                decision: Some(decision(0.0, 0.1, 0.0, 1.0)),
                health: health(Mode::Normal),
            })
            .unwrap();
        assert_eq!(first.throttle, 0.1);

        // 0.1 + 0.2 would round to 0.30000000000000004
        let (second, rpt) = arb
            .proc(&InputData {
                decision: Some(decision(0.0, 0.9, 0.0, 1.0)),
                health: health(Mode::Normal),
            })
            .unwrap();
        assert!(rpt.rate_limited[Channel::Throttle.index()]);
        assert!((second.throttle - first.throttle).abs() <= 0.2);
        assert!(second.throttle > 0.29);
    }

    #[test]
    fn test_low_confidence_blend() {
        let mut arb = CommandArbiter::new(envelope(1.0), 0.5).unwrap();
        let raw = decision(0.4, 0.6, 0.0, 0.1);

        let (cmd, rpt) = arb
            .proc(&InputData {
                decision: Some(raw),
                health: health(Mode::Normal),
            })
            .unwrap();

        assert!((rpt.blend_weight - 0.8).abs() < 1e-12);
        assert!(cmd.steering > 0.0 && cmd.steering < raw.steering);
        assert!(cmd.throttle > 0.0 && cmd.throttle < raw.throttle);
        assert!(cmd.brake > raw.brake && cmd.brake < 1.0);
    }

    #[test]
    fn test_nan_channels_fall_back() {
        let mut arb = CommandArbiter::new(envelope(1.0), 0.0).unwrap();

        let (cmd, rpt) = arb
            .proc(&InputData {
                decision: Some(decision(std::f64::NAN, 0.2, std::f64::NAN, 1.0)),
                health: health(Mode::Normal),
            })
            .unwrap();

        assert_eq!(cmd, ActuationCommand::new(0.0, 0.2, 1.0));
        assert_eq!(rpt.clamped, [true, false, true]);
    }

    #[test]
    fn test_blend_weight() {
        assert_eq!(blend_weight(1.0, 0.5), 0.0);
        assert_eq!(blend_weight(0.0, 0.5), 1.0);
        assert_eq!(blend_weight(std::f64::NAN, 0.5), 1.0);
        assert_eq!(blend_weight(0.25, 0.5), 0.5);
        assert_eq!(blend_weight(0.0, 0.0), 0.0);
    }

    #[test]
    fn test_invalid_floor() {
        assert_eq!(
            CommandArbiter::new(envelope(0.1), 1.5).err(),
            Some(ArbiterError::InvalidConfidenceFloor(1.5))
        );
    }
}
