//! Integration tests of the full control loop, driven with in-memory sensors, actuators and
//! policies.

use chrono::{TimeZone, Utc};
use std::{
    cell::{Cell, RefCell},
    collections::VecDeque,
    rc::Rc,
    sync::{Arc, Mutex},
    thread,
    time::Duration,
};

use bc_lib::{
    arbiter::{ActuationCommand, Channel},
    control_loop::{Components, ControlLoop, ControlLoopError, TickReport},
    dispatcher::{ActuatorSink, DispatchError},
    monitor::{FailureKind, Mode},
    params::ExecParams,
    policy::{MlpPolicy, ModelLoadError, Policy, PolicyDecision, PolicyError},
    preproc::{FeatureVector, FramePreprocessor},
    sensor_adapter::SensorSource,
    telemetry::TelemetryRecorder,
};
use comms_if::{
    eqpt::{
        actuator::ActuatorDems,
        sensor::{FrameImage, SensorFrame},
    },
    tc::{Tc, TcResponse},
};

// ------------------------------------------------------------------------------------------------
// DOUBLES
// ------------------------------------------------------------------------------------------------

/// Produces a fresh frame on every call, unless told to miss some.
struct FakeSource {
    last_ms: i64,
    missing: Rc<Cell<u32>>,
    proximity: Rc<RefCell<Vec<f64>>>,
}

impl SensorSource for FakeSource {
    fn next_frame(&mut self, _timeout: Duration) -> Option<SensorFrame> {
        if self.missing.get() > 0 {
            self.missing.set(self.missing.get() - 1);
            return None;
        }

        self.last_ms = Utc::now().timestamp_millis().max(self.last_ms + 1);

        Some(SensorFrame {
            timestamp: Utc.timestamp_millis(self.last_ms),
            image: FrameImage {
                width: 8,
                height: 8,
                channels: 4,
                data: vec![128; 8 * 8 * 4],
            },
            speed_kmh: 25.0,
            heading_rad: 0.1,
            proximity_m: self.proximity.borrow().clone(),
        })
    }
}

struct FakeSink {
    written: Rc<RefCell<Vec<ActuatorDems>>>,
    fail: Rc<Cell<bool>>,
}

impl ActuatorSink for FakeSink {
    fn write(&mut self, dems: &ActuatorDems) -> Result<(), DispatchError> {
        if self.fail.get() {
            return Err(DispatchError::ActuatorUnavailable("link down".into()));
        }
        self.written.borrow_mut().push(*dems);
        Ok(())
    }
}

enum Step {
    Decide(PolicyDecision),
    Slow(Duration, PolicyDecision),
}

/// Plays through a script of steps, repeating the last decision once the script is empty.
struct ScriptedPolicy {
    script: Arc<Mutex<VecDeque<Step>>>,
    last: PolicyDecision,
}

impl Policy for ScriptedPolicy {
    fn infer(&mut self, _features: &FeatureVector) -> Result<PolicyDecision, PolicyError> {
        let step = self.script.lock().unwrap().pop_front();

        match step {
            Some(Step::Decide(d)) => self.last = d,
            Some(Step::Slow(delay, d)) => {
                thread::sleep(delay);
                self.last = d;
            }
            None => (),
        }

        Ok(self.last)
    }
}

struct Harness {
    cl: ControlLoop,
    missing: Rc<Cell<u32>>,
    proximity: Rc<RefCell<Vec<f64>>>,
    written: Rc<RefCell<Vec<ActuatorDems>>>,
    sink_fail: Rc<Cell<bool>>,
    script: Arc<Mutex<VecDeque<Step>>>,
}

// ------------------------------------------------------------------------------------------------
// HELPERS
// ------------------------------------------------------------------------------------------------

const TABLES: &str = r#"
    [monitor]
    recovery_tick_count = 3
    confidence_trigger_count = 5
    latency_soft_ms = 150.0
    latency_hard_ms = 190.0

    [sensor]
    acquire_timeout_ms = 10
    max_frame_age_ms = 0

    [preproc]
    output_width = 8
    output_height = 6
    crop_top = 2

    [policy]
    backend = "replay"
    model_path = "/unused.csv"

    [telemetry]
    enabled = false
"#;

const DEFAULT_ENVELOPE: &str = r#"
    steer_range = [-1.0, 1.0]
    throttle_range = [0.0, 1.0]
    brake_range = [0.0, 1.0]
    max_delta_per_tick = 1.0
    inference_timeout_ms = 200
    confidence_floor = 0.5
    failsafe_trigger_count = 2
"#;

fn params(top_level: &str) -> ExecParams {
    util::params::from_str(&format!("{}\n{}", top_level, TABLES)).unwrap()
}

/// A single layer steering network taking `input_len` features.
fn mlp(input_len: usize) -> MlpPolicy {
    let json = format!(
        r#"{{"input_len": {}, "layers": [{{"weights": [{:?}], "bias": [0.0]}}]}}"#,
        input_len,
        vec![0.0f32; input_len]
    );
    MlpPolicy::from_json(&json, 0.3).unwrap()
}

fn quiet_components(policy: Box<dyn Policy + Send>) -> Components {
    Components {
        sensor_source: Box::new(FakeSource {
            last_ms: 0,
            missing: Rc::new(Cell::new(0)),
            proximity: Rc::new(RefCell::new(vec![std::f64::INFINITY; 4])),
        }),
        actuator_sink: Box::new(FakeSink {
            written: Rc::new(RefCell::new(Vec::new())),
            fail: Rc::new(Cell::new(false)),
        }),
        policy,
        telemetry: TelemetryRecorder::disabled(),
    }
}

fn harness(top_level: &str, initial: PolicyDecision) -> Harness {
    let params = params(top_level);

    let missing = Rc::new(Cell::new(0));
    let proximity = Rc::new(RefCell::new(vec![std::f64::INFINITY; 4]));
    let written = Rc::new(RefCell::new(Vec::new()));
    let sink_fail = Rc::new(Cell::new(false));
    let script = Arc::new(Mutex::new(VecDeque::new()));

    let cl = ControlLoop::new(
        &params,
        Components {
            sensor_source: Box::new(FakeSource {
                last_ms: 0,
                missing: missing.clone(),
                proximity: proximity.clone(),
            }),
            actuator_sink: Box::new(FakeSink {
                written: written.clone(),
                fail: sink_fail.clone(),
            }),
            policy: Box::new(ScriptedPolicy {
                script: script.clone(),
                last: initial,
            }),
            telemetry: TelemetryRecorder::disabled(),
        },
    )
    .unwrap();

    Harness {
        cl,
        missing,
        proximity,
        written,
        sink_fail,
        script,
    }
}

fn assert_close(a: f64, b: f64) {
    assert!((a - b).abs() < 1e-9, "{} != {}", a, b);
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[test]
fn confident_decision_passes_through() {
    let mut h = harness(DEFAULT_ENVELOPE, PolicyDecision::new(0.05, 0.3, 0.0, 1.0));

    let report = h.cl.tick();

    assert_eq!(report.failure, None);
    assert_eq!(report.health.mode, Mode::Normal);
    assert_close(report.command.steering, 0.05);
    assert_close(report.command.throttle, 0.3);
    assert_close(report.command.brake, 0.0);

    let written = h.written.borrow();
    assert_eq!(written.len(), 1);
    assert_close(written[0].throttle, 0.3);
}

#[test]
fn forced_failsafe_brakes_regardless_of_decision() {
    let mut h = harness(DEFAULT_ENVELOPE, PolicyDecision::new(0.8, 1.0, 0.0, 1.0));

    h.cl.tick();
    assert_eq!(h.cl.handle_tc(&Tc::MakeSafe), TcResponse::Ok);

    for _ in 0..3 {
        let report = h.cl.tick();
        assert_eq!(report.health.mode, Mode::FailSafe);
        assert_eq!(report.command, ActuationCommand::FAILSAFE);
    }

    let last = *h.written.borrow().last().unwrap();
    assert_eq!(
        last,
        ActuatorDems {
            steering_angle_rad: 0.0,
            throttle: 0.0,
            brake: 1.0
        }
    );

    assert_eq!(h.cl.handle_tc(&Tc::ResetFailsafe), TcResponse::Ok);
    assert_eq!(h.cl.tick().health.mode, Mode::Normal);
    assert_eq!(h.cl.handle_tc(&Tc::ResetFailsafe), TcResponse::CannotExecute);
}

#[test]
fn low_confidence_blends_towards_failsafe() {
    let raw = PolicyDecision::new(0.4, 0.6, 0.0, 0.1);
    let mut h = harness(DEFAULT_ENVELOPE, raw);

    let report = h.cl.tick();
    let cmd = report.command;

    assert!(report.arbiter.blend_weight > 0.0);
    assert!(cmd.steering > 0.0 && cmd.steering < raw.steering);
    assert!(cmd.throttle > 0.0 && cmd.throttle < raw.throttle);
    assert!(cmd.brake > raw.brake && cmd.brake < 1.0);
}

#[test]
fn inference_timeout_holds_previous_command() {
    let decision = PolicyDecision::new(0.2, 0.4, 0.0, 1.0);
    let mut h = harness(DEFAULT_ENVELOPE, decision);

    let first = h.cl.tick();
    assert_eq!(first.failure, None);

    h.script.lock().unwrap().push_back(Step::Slow(
        Duration::from_millis(400),
        PolicyDecision::new(-0.9, 0.0, 0.8, 1.0),
    ));

    let before = h.cl.health();
    let timed_out = h.cl.tick();
    let after = timed_out.health;

    assert_eq!(timed_out.failure, Some(FailureKind::InferenceTimeout));
    assert_eq!(timed_out.command, first.command);
    assert!(timed_out.arbiter.held_previous);
    assert_eq!(after.total_failures, before.total_failures + 1);
    assert_eq!(after.consecutive_failures, before.consecutive_failures + 1);
    assert_eq!(after.mode, Mode::Degraded);

    // Let the abandoned inference finish before carrying on
    thread::sleep(Duration::from_millis(500));
    let next = h.cl.tick();
    assert_eq!(next.failure, None);
}

#[test]
fn two_consecutive_failures_latch_failsafe() {
    let mut h = harness(DEFAULT_ENVELOPE, PolicyDecision::new(0.1, 0.3, 0.0, 1.0));

    h.cl.tick();
    h.missing.set(2);

    let first = h.cl.tick();
    assert_eq!(first.failure, Some(FailureKind::SensorUnavailable));
    assert_eq!(first.health.mode, Mode::Degraded);

    let second = h.cl.tick();
    assert_eq!(second.health.mode, Mode::FailSafe);
    assert_eq!(second.command, ActuationCommand::FAILSAFE);

    // Healthy ticks never leave FAILSAFE on their own
    for _ in 0..10 {
        let report = h.cl.tick();
        assert_eq!(report.failure, None);
        assert_eq!(report.health.mode, Mode::FailSafe);
        assert_eq!(report.command, ActuationCommand::FAILSAFE);
    }

    assert_eq!(h.cl.handle_tc(&Tc::ResetFailsafe), TcResponse::Ok);
    assert_eq!(h.cl.tick().health.mode, Mode::Normal);
}

#[test]
fn degraded_loop_recovers() {
    let mut h = harness(DEFAULT_ENVELOPE, PolicyDecision::new(0.1, 0.3, 0.0, 1.0));

    h.missing.set(1);
    assert_eq!(h.cl.tick().health.mode, Mode::Degraded);

    let modes: Vec<Mode> = (0..3).map(|_| h.cl.tick().health.mode).collect();
    assert_eq!(modes, vec![Mode::Degraded, Mode::Degraded, Mode::Normal]);
}

#[test]
fn actuator_failures_escalate() {
    let mut h = harness(DEFAULT_ENVELOPE, PolicyDecision::new(0.1, 0.3, 0.0, 1.0));
    h.sink_fail.set(true);

    let first = h.cl.tick();
    assert!(first.dispatch_error.is_some());
    assert_eq!(first.dems, None);
    assert_eq!(first.health.mode, Mode::Degraded);

    let second = h.cl.tick();
    assert_eq!(second.health.mode, Mode::FailSafe);
    assert_eq!(h.cl.health().total_failures, 2);
}

#[test]
fn policy_must_match_preprocessor() {
    let params = params(DEFAULT_ENVELOPE);
    let feature_len = FramePreprocessor::new(params.preproc.clone())
        .unwrap()
        .feature_len();

    match ControlLoop::new(&params, quiet_components(Box::new(mlp(6)))) {
        Err(ControlLoopError::EngineError(ModelLoadError::InvalidShape(_))) => (),
        Err(e) => panic!("unexpected error: {}", e),
        Ok(_) => panic!("a policy taking 6 features was accepted"),
    }

    let mut cl = ControlLoop::new(&params, quiet_components(Box::new(mlp(feature_len)))).unwrap();
    let report = cl.tick();
    assert_eq!(report.failure, None);
    assert_close(report.command.throttle, 0.3);
}

#[test]
fn failed_tick_holds_despite_obstacle() {
    let mut h = harness(DEFAULT_ENVELOPE, PolicyDecision::new(0.1, 0.5, 0.0, 1.0));

    let first = h.cl.tick();
    assert_close(first.command.throttle, 0.5);

    // A pedestrian appears while the policy is too slow to answer
    *h.proximity.borrow_mut() = vec![std::f64::INFINITY, 12.0, 11.5, std::f64::INFINITY];
    h.script.lock().unwrap().push_back(Step::Slow(
        Duration::from_millis(400),
        PolicyDecision::new(0.1, 0.5, 0.0, 1.0),
    ));

    let timed_out = h.cl.tick();
    assert_eq!(timed_out.failure, Some(FailureKind::InferenceTimeout));
    assert_eq!(timed_out.decision, None);
    assert!(timed_out.arbiter.held_previous);
    assert_eq!(timed_out.command, first.command);

    // Once decisions flow again the guard stops the vehicle
    thread::sleep(Duration::from_millis(500));
    let report = h.cl.tick();
    assert_eq!(report.failure, None);
    assert_close(report.command.throttle, 0.0);
    assert_close(report.command.brake, 1.0);
}

#[test]
fn pedestrian_stops_vehicle() {
    let mut h = harness(DEFAULT_ENVELOPE, PolicyDecision::new(0.1, 0.5, 0.0, 1.0));

    assert_close(h.cl.tick().command.throttle, 0.5);

    *h.proximity.borrow_mut() = vec![std::f64::INFINITY, 12.0, 11.5, std::f64::INFINITY];
    let report = h.cl.tick();

    assert_close(report.command.throttle, 0.0);
    assert_close(report.command.brake, 1.0);
    assert_close(report.command.steering, 0.1);
}

#[test]
fn commands_stay_in_envelope_and_rate_limits() {
    let top_level = r#"
        steer_range = [-0.5, 0.5]
        throttle_range = [0.0, 0.7]
        brake_range = [0.0, 1.0]
        inference_timeout_ms = 200
        confidence_floor = 0.3
        failsafe_trigger_count = 2

        [max_delta_per_tick]
        steering = 0.05
        throttle = 0.1
        brake = 0.2
    "#;
    let mut h = harness(top_level, PolicyDecision::default());

    // Deterministic pseudo random decisions, many outside of the envelope
    let mut seed = 12345u64;
    let mut next = move || {
        seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        ((seed >> 33) as f64 / (1u64 << 31) as f64) * 4.0 - 2.0
    };

    {
        let mut script = h.script.lock().unwrap();
        for _ in 0..80 {
            let (s, t, b) = (next(), next(), next());
            let c = 0.35 + (next() + 2.0) / 4.0 * 0.65;
            script.push_back(Step::Decide(PolicyDecision::new(s, t, b, c)));
        }
    }

    let deltas = [0.05, 0.1, 0.2];
    let mut previous: Option<TickReport> = None;

    for i in 0..80 {
        // Throw in some sensor failures
        if i % 17 == 5 {
            h.missing.set(1);
        }
        if i == 60 {
            h.cl.handle_tc(&Tc::ResetFailsafe);
        }

        let report = h.cl.tick();
        let cmd = report.command;

        assert!((-0.5..=0.5).contains(&cmd.steering), "tick {}: {:?}", i, cmd);
        assert!((0.0..=0.7).contains(&cmd.throttle), "tick {}: {:?}", i, cmd);
        assert!((0.0..=1.0).contains(&cmd.brake), "tick {}: {:?}", i, cmd);

        if let Some(ref prev) = previous {
            if report.health.mode != Mode::FailSafe {
                for &c in Channel::ALL.iter() {
                    let delta = (cmd.get(c) - prev.command.get(c)).abs();
                    assert!(
                        delta <= deltas[c.index()],
                        "tick {}: {:?} moved by {}",
                        i,
                        c,
                        delta
                    );
                }
            }
        }

        previous = Some(report);
    }
}
