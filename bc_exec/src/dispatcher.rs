//! # Actuation dispatcher
//!
//! Maps arbitrated commands onto the vehicle's actuator demands and writes them to an
//! [`ActuatorSink`]. A failed write is reported back to the loop, it never ends it.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use log::trace;
use serde::{Deserialize, Serialize};

use comms_if::eqpt::actuator::ActuatorDems;

use crate::arbiter::ActuationCommand;

// ---------------------------------------------------------------------------
// TRAITS
// ---------------------------------------------------------------------------

/// A destination for actuator demands, such as the simulation's actuator server.
pub trait ActuatorSink {
    /// Write the demands to the actuators.
    fn write(&mut self, dems: &ActuatorDems) -> Result<(), DispatchError>;
}

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Parameters for the actuation dispatcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Params {
    /// Steering angle at a full steering command.
    ///
    /// Units: radians
    pub max_steering_angle_rad: f64,

    /// Steering commands with a magnitude at or below this are sent as straight ahead.
    pub steering_dead_zone: f64,
}

/// The actuation dispatcher.
pub struct ActuationDispatcher {
    sink: Box<dyn ActuatorSink>,
    params: Params,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error, Clone, PartialEq)]
pub enum DispatchError {
    #[error("The actuators are unavailable: {0}")]
    ActuatorUnavailable(String),
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl ActuationDispatcher {
    pub fn new(sink: Box<dyn ActuatorSink>, params: Params) -> Self {
        Self { sink, params }
    }

    /// Convert a command into actuator demands.
    pub fn demands(&self, cmd: &ActuationCommand) -> ActuatorDems {
        let steering = match cmd.steering.abs() > self.params.steering_dead_zone {
            true => cmd.steering,
            false => 0.0,
        };

        ActuatorDems {
            steering_angle_rad: steering * self.params.max_steering_angle_rad,
            throttle: cmd.throttle,
            brake: cmd.brake,
        }
    }

    /// Write the command to the actuators.
    pub fn dispatch(&mut self, cmd: &ActuationCommand) -> Result<ActuatorDems, DispatchError> {
        let dems = self.demands(cmd);
        trace!("Dispatching {:?}", dems);

        self.sink.write(&dems)?;

        Ok(dems)
    }
}

impl Default for Params {
    fn default() -> Self {
        Self {
            max_steering_angle_rad: 0.28,
            steering_dead_zone: 0.06,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::{cell::RefCell, rc::Rc};

    #[derive(Clone, Default)]
    struct RecordingSink {
        written: Rc<RefCell<Vec<ActuatorDems>>>,
        fail: bool,
    }

    impl ActuatorSink for RecordingSink {
        fn write(&mut self, dems: &ActuatorDems) -> Result<(), DispatchError> {
            if self.fail {
                return Err(DispatchError::ActuatorUnavailable("unplugged".into()));
            }
            self.written.borrow_mut().push(*dems);
            Ok(())
        }
    }

    #[test]
    fn test_dispatch() {
        let sink = RecordingSink::default();
        let mut disp = ActuationDispatcher::new(Box::new(sink.clone()), Params::default());

        disp.dispatch(&ActuationCommand::new(0.5, 0.3, 0.0)).unwrap();
        disp.dispatch(&ActuationCommand::new(-0.05, 0.3, 0.1)).unwrap();

        let written = sink.written.borrow();
        assert!((written[0].steering_angle_rad - 0.14).abs() < 1e-12);
        assert_eq!(written[0].throttle, 0.3);

        // Inside the dead zone
        assert_eq!(written[1].steering_angle_rad, 0.0);
        assert_eq!(written[1].brake, 0.1);
    }

    #[test]
    fn test_dispatch_fails() {
        let sink = RecordingSink {
            fail: true,
            ..Default::default()
        };
        let mut disp = ActuationDispatcher::new(Box::new(sink), Params::default());

        assert!(matches!(
            disp.dispatch(&ActuationCommand::FAILSAFE),
            Err(DispatchError::ActuatorUnavailable(_))
        ));
    }
}
