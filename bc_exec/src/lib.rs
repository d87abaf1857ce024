//! # Behavioural cloning drive library.
//!
//! This library holds the components of the perception-to-actuation control loop, so that the
//! executive, the integration tests and the benchmarks all drive the same code.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

/// Command arbiter - applies the safety envelope, confidence blending and rate limits
pub mod arbiter;

/// Control loop - runs one sense, decide, act tick over all components
pub mod control_loop;

/// Actuation dispatcher - writes final commands to the vehicle actuators
pub mod dispatcher;

/// Supervisory monitor - tracks loop health and owns the fail-safe state machine
pub mod monitor;

/// Obstacle guard - stops the vehicle for lidar detected pedestrians and vehicles
pub mod obstacle;

/// Executive parameters
pub mod params;

/// Policy inference engine - runs the trained policy with a bounded deadline
pub mod policy;

/// Frame preprocessor - turns sensor frames into policy feature vectors
pub mod preproc;

/// Sensor adapter - acquires ordered, fresh sensor frames
pub mod sensor_adapter;

/// Simulation clients - ZMQ sensor subscriber and actuator client for the simulation
pub mod sim_client;

/// Telecommand client - recieves telecommands from the operator console
pub mod tc_client;

/// Telemetry recorder - off critical path CSV log of every tick
pub mod telemetry;
