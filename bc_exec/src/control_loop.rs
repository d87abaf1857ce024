//! # Control loop
//!
//! Owns every component of the executive and runs the control tick:
//!
//! ```text
//! SensorAdapter -> FramePreprocessor -> PolicyInferenceEngine -> ObstacleGuard
//!     -> CommandArbiter -> ActuationDispatcher -> TelemetryRecorder
//! ```
//!
//! Failures at any stage are reported to the [`SupervisoryMonitor`] before arbitration so the
//! arbiter sees this tick's mode. A failed dispatch is reported once the write has failed. No
//! failure ends the tick early, a command is always arbitrated and dispatched.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use std::sync::Arc;

use comms_if::{
    eqpt::actuator::ActuatorDems,
    tc::{Tc, TcResponse},
};
use util::{module::State, session, time::duration_to_millis};

use crate::{
    arbiter::{self, ActuationCommand, ArbiterError, CommandArbiter},
    dispatcher::{ActuationDispatcher, ActuatorSink, DispatchError},
    monitor::{FailureKind, LoopHealthState, Mode, SupervisoryMonitor},
    obstacle::{Obstacle, ObstacleGuard},
    params::{ExecParams, ParamsError},
    policy::{InferenceError, ModelLoadError, Policy, PolicyDecision, PolicyInferenceEngine},
    preproc::FramePreprocessor,
    sensor_adapter::{SensorAdapter, SensorSource},
    telemetry::{TelemetryRecord, TelemetryRecorder},
};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// The external collaborators of the loop.
pub struct Components {
    pub sensor_source: Box<dyn SensorSource>,
    pub actuator_sink: Box<dyn ActuatorSink>,
    pub policy: Box<dyn Policy + Send>,
    pub telemetry: TelemetryRecorder,
}

/// The control loop.
pub struct ControlLoop {
    sensor: SensorAdapter,
    preproc: FramePreprocessor,
    engine: PolicyInferenceEngine,
    obstacle: ObstacleGuard,
    arbiter: CommandArbiter,
    dispatcher: ActuationDispatcher,
    monitor: SupervisoryMonitor,
    telemetry: TelemetryRecorder,

    num_ticks: u64,
}

/// Everything that happened during one tick.
#[derive(Debug, Clone)]
pub struct TickReport {
    /// Tick number, starting at 1.
    pub tick: u64,

    pub frame_timestamp: Option<DateTime<Utc>>,

    /// The decision given to the arbiter, after the obstacle guard.
    pub decision: Option<PolicyDecision>,

    pub obstacle: Obstacle,

    /// The arbitrated command.
    pub command: ActuationCommand,

    pub arbiter: arbiter::StatusReport,

    /// The demands written to the actuators, `None` if the dispatch failed.
    pub dems: Option<ActuatorDems>,

    /// The first failure of the sense to decide stages.
    pub failure: Option<FailureKind>,

    pub dispatch_error: Option<DispatchError>,

    /// Loop health at the end of the tick.
    pub health: LoopHealthState,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ControlLoopError {
    #[error("Invalid parameters: {0}")]
    ParamsError(ParamsError),

    #[error("Could not initialise the arbiter: {0}")]
    ArbiterInitError(ArbiterError),

    #[error("Could not start the inference engine: {0}")]
    EngineError(ModelLoadError),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl ControlLoop {
    /// Build the loop from validated parameters and its collaborators.
    pub fn new(params: &ExecParams, components: Components) -> Result<Self, ControlLoopError> {
        params.validate().map_err(ControlLoopError::ParamsError)?;

        let envelope = Arc::new(params.envelope().map_err(ControlLoopError::ParamsError)?);

        let preproc = FramePreprocessor::new(params.preproc.clone())
            .map_err(|e| ControlLoopError::ParamsError(ParamsError::Preproc(e)))?;

        let monitor = SupervisoryMonitor::new(params.monitor_config())
            .map_err(|e| ControlLoopError::ParamsError(ParamsError::Monitor(e)))?;

        let arbiter = CommandArbiter::new(envelope, params.confidence_floor)
            .map_err(ControlLoopError::ArbiterInitError)?;

        // The policy must take exactly the features the preprocessor produces
        if let Some(n) = components.policy.input_len() {
            if n != preproc.feature_len() {
                return Err(ControlLoopError::EngineError(ModelLoadError::InvalidShape(
                    format!(
                        "the policy expects {} features but the preprocessor produces {}",
                        n,
                        preproc.feature_len()
                    ),
                )));
            }
        }

        let engine = PolicyInferenceEngine::new(components.policy, params.inference_timeout())
            .map_err(ControlLoopError::EngineError)?;

        Ok(Self {
            sensor: SensorAdapter::new(components.sensor_source, params.sensor.clone()),
            preproc,
            engine,
            obstacle: ObstacleGuard::new(params.obstacle.clone()),
            arbiter,
            dispatcher: ActuationDispatcher::new(components.actuator_sink, params.actuator.clone()),
            monitor,
            telemetry: components.telemetry,
            num_ticks: 0,
        })
    }

    /// Run one control tick.
    pub fn tick(&mut self) -> TickReport {
        self.num_ticks += 1;
        let mut failure = None;

        // ---- SENSE ----
        let frame = match self.sensor.acquire() {
            Ok(f) => {
                self.monitor.record_frame(f.timestamp);
                Some(f)
            }
            Err(e) => {
                warn!("Tick {}: {}", self.num_ticks, e);
                failure = Some(self.fail(FailureKind::from(&e)));
                None
            }
        };

        // ---- PREPROCESS ----
        let features = match frame {
            Some(ref f) => match self.preproc.transform(f) {
                Ok(fv) => Some(fv),
                Err(e) => {
                    warn!("Tick {}: invalid frame: {}", self.num_ticks, e);
                    failure = Some(self.fail(FailureKind::InvalidFrameFormat));
                    None
                }
            },
            None => None,
        };

        // ---- DECIDE ----
        let mut latency_ms = None;
        let decision = match features {
            Some(ref fv) => match self.engine.infer(fv) {
                Ok(out) => {
                    self.monitor
                        .record_inference(out.latency, out.decision.confidence);
                    latency_ms = Some(duration_to_millis(out.latency));
                    Some(out.decision)
                }
                Err(e) => {
                    warn!("Tick {}: {}", self.num_ticks, e);
                    let kind = match e {
                        InferenceError::Timeout(_) => FailureKind::InferenceTimeout,
                        _ => FailureKind::InferenceError,
                    };
                    failure = Some(self.fail(kind));
                    None
                }
            },
            None => None,
        };

        let (decision, obstacle) = self.obstacle.apply(decision, frame.as_ref());

        // ---- ARBITRATE ----
        let input = arbiter::InputData {
            decision,
            health: self.monitor.snapshot(),
        };
        let (command, arbiter_report) = match self.arbiter.proc(&input) {
            Ok(out) => out,
            Err(never) => match never {},
        };

        // ---- ACT ----
        let (dems, dispatch_error) = match self.dispatcher.dispatch(&command) {
            Ok(d) => (Some(d), None),
            Err(e) => {
                warn!("Tick {}: {}", self.num_ticks, e);
                self.fail(FailureKind::ActuatorUnavailable);
                (None, Some(e))
            }
        };

        self.monitor.end_tick();
        let health = self.monitor.snapshot();

        debug!(
            "Tick {} [{}]: {:?} -> {:?}",
            self.num_ticks, health.mode, decision, command
        );

        // ---- RECORD ----
        let report = TickReport {
            tick: self.num_ticks,
            frame_timestamp: frame.as_ref().map(|f| f.timestamp),
            decision,
            obstacle,
            command,
            arbiter: arbiter_report,
            dems,
            failure,
            dispatch_error,
            health,
        };

        let record = TelemetryRecord {
            tick: report.tick,
            time_s: session::try_get_elapsed_seconds(),
            frame_timestamp_ms: report.frame_timestamp.map(|t| t.timestamp_millis()),
            speed_kmh: frame.as_ref().map(|f| f.speed_kmh),
            heading_rad: frame.as_ref().map(|f| f.heading_rad),
            nearest_proximity_m: frame.as_ref().and_then(|f| f.nearest_proximity_m()),
            obstacle: obstacle.label(),
            decision_steering: decision.map(|d| d.steering),
            decision_throttle: decision.map(|d| d.throttle),
            decision_brake: decision.map(|d| d.brake),
            decision_confidence: decision.map(|d| d.confidence),
            inference_latency_ms: latency_ms,
            cmd_steering: command.steering,
            cmd_throttle: command.throttle,
            cmd_brake: command.brake,
            blend_weight: arbiter_report.blend_weight,
            mode: health.mode,
            failure: failure.or_else(|| {
                report
                    .dispatch_error
                    .as_ref()
                    .map(|_| FailureKind::ActuatorUnavailable)
            }),
            dispatched: report.dems.is_some(),
            consecutive_failures: health.consecutive_failures,
            total_failures: health.total_failures,
        };
        self.telemetry.record(record);

        report
    }

    /// Execute an operator telecommand.
    pub fn handle_tc(&mut self, tc: &Tc) -> TcResponse {
        match tc {
            Tc::Heartbeat => TcResponse::Ok,
            Tc::MakeSafe => {
                self.monitor.force_failsafe("operator make safe");
                TcResponse::Ok
            }
            Tc::ResetFailsafe => match self.monitor.mode() {
                Mode::Normal => TcResponse::CannotExecute,
                _ => {
                    self.monitor.reset();
                    info!("Loop reset by the operator");
                    TcResponse::Ok
                }
            },
        }
    }

    /// Get a copy of the loop health.
    pub fn health(&self) -> LoopHealthState {
        self.monitor.snapshot()
    }

    /// Number of ticks run so far.
    pub fn num_ticks(&self) -> u64 {
        self.num_ticks
    }

    /// Number of telemetry records dropped so far.
    pub fn telemetry_dropped(&self) -> u64 {
        self.telemetry.dropped()
    }

    fn fail(&mut self, kind: FailureKind) -> FailureKind {
        self.monitor.record_failure(kind);
        kind
    }
}
