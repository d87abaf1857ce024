//! # Simulation Clients
//!
//! Clients for the driving simulation's network interface:
//!
//! - [`SimSensorClient`] subscribes to the sensor bundles published by the simulation once per
//!   simulation step, and provides them to the sensor adapter.
//! - [`SimActuatorClient`] sends actuator demands to the simulation and waits for the
//!   acknowledgement.
//!
//! Bundles are published as often as the simulation steps. Only the latest one matters, so the
//! subscriber conflates messages and the client keeps a single frame.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use log::{error, warn};
use std::{
    convert::TryFrom,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Condvar, Mutex,
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use comms_if::{
    eqpt::{
        actuator::{ActuatorDems, ActuatorDemsResponse},
        sensor::{SensorBundle, SensorFrame},
    },
    net::{zmq, MonitoredSocket, MonitoredSocketError, NetParams, SocketOptions},
};

use crate::{
    dispatcher::{ActuatorSink, DispatchError},
    sensor_adapter::SensorSource,
};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// The latest frame, taken by the reader, and the condition signalled when a new one arrives.
type FrameSlot = Arc<(Mutex<Option<SensorFrame>>, Condvar)>;

/// Subscriber to the simulation's sensor bundles.
pub struct SimSensorClient {
    bg_jh: Option<JoinHandle<()>>,
    bg_run: Arc<AtomicBool>,
    latest: FrameSlot,
}

/// Client for the simulation's actuator demands server.
pub struct SimActuatorClient {
    dems_socket: MonitoredSocket,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum SimClientError {
    #[error("Socket error: {0}")]
    SocketError(MonitoredSocketError),

    #[error("The client is not connected to the server")]
    NotConnected,

    #[error("Could not send demands to the server: {0}")]
    SendError(zmq::Error),

    #[error("Could not recieve a message from the server: {0}")]
    RecvError(zmq::Error),

    #[error("Could not serialize the data: {0}")]
    SerializationError(serde_json::Error),

    #[error("Could not deserialize the response from the server: {0}")]
    DeserializeError(serde_json::Error),

    #[error("Could not start the background thread: {0}")]
    ThreadSpawnError(std::io::Error),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl SimSensorClient {
    /// Connect to the simulation's sensor publisher and start recieving frames.
    pub fn new(ctx: &zmq::Context, params: &NetParams) -> Result<Self, SimClientError> {
        let socket_options = SocketOptions {
            block_on_first_connect: false,
            conflate: true,
            connect_timeout: 1000,
            heartbeat_ivl: 500,
            heartbeat_ttl: 1000,
            heartbeat_timeout: 1000,
            linger: 1,
            recv_timeout: 10,
            ..Default::default()
        };

        let socket = MonitoredSocket::new(ctx, zmq::SUB, socket_options, &params.sensor_endpoint)
            .map_err(SimClientError::SocketError)?;

        let bg_run = Arc::new(AtomicBool::new(true));
        let latest: FrameSlot = Arc::new((Mutex::new(None), Condvar::new()));

        let bg_run_clone = bg_run.clone();
        let latest_clone = latest.clone();

        let bg_jh = thread::Builder::new()
            .name("sim_sensor_client".into())
            .spawn(move || bg_thread(socket, bg_run_clone, latest_clone))
            .map_err(SimClientError::ThreadSpawnError)?;

        Ok(Self {
            bg_jh: Some(bg_jh),
            bg_run,
            latest,
        })
    }
}

impl SensorSource for SimSensorClient {
    fn next_frame(&mut self, timeout: Duration) -> Option<SensorFrame> {
        let (lock, cvar) = &*self.latest;

        let guard = match lock.lock() {
            Ok(g) => g,
            Err(_) => {
                error!("SimSensorClient: frame mutex poisoned");
                return None;
            }
        };

        match cvar.wait_timeout_while(guard, timeout, |f| f.is_none()) {
            Ok((mut guard, _)) => guard.take(),
            Err(_) => {
                error!("SimSensorClient: frame mutex poisoned");
                None
            }
        }
    }
}

impl Drop for SimSensorClient {
    fn drop(&mut self) {
        self.bg_run.store(false, Ordering::Relaxed);

        if let Some(jh) = self.bg_jh.take() {
            jh.join().ok();
        }
    }
}

impl SimActuatorClient {
    /// Connect to the simulation's actuator demands server.
    pub fn new(ctx: &zmq::Context, params: &NetParams) -> Result<Self, SimClientError> {
        let dems_socket_options = SocketOptions {
            connect_timeout: 1000,
            heartbeat_ivl: 500,
            heartbeat_ttl: 1000,
            heartbeat_timeout: 1000,
            linger: 1,
            recv_timeout: 10,
            send_timeout: 10,
            req_correlate: true,
            req_relaxed: true,
            ..Default::default()
        };

        let dems_socket = MonitoredSocket::new(
            ctx,
            zmq::REQ,
            dems_socket_options,
            &params.actuator_endpoint,
        )
        .map_err(SimClientError::SocketError)?;

        Ok(Self { dems_socket })
    }

    /// Send demands to the server.
    ///
    /// If the server responds within the configured timeout its response is returned, otherwise
    /// an `Err()` is returned.
    pub fn send_demands(
        &mut self,
        demands: &ActuatorDems,
    ) -> Result<ActuatorDemsResponse, SimClientError> {
        if !self.dems_socket.connected() {
            return Err(SimClientError::NotConnected);
        }

        let dems_str =
            serde_json::to_string(demands).map_err(SimClientError::SerializationError)?;

        self.dems_socket
            .send(&dems_str, 0)
            .map_err(SimClientError::SendError)?;

        let msg = self
            .dems_socket
            .recv_msg(0)
            .map_err(SimClientError::RecvError)?;

        serde_json::from_str(msg.as_str().unwrap_or("")).map_err(SimClientError::DeserializeError)
    }
}

impl ActuatorSink for SimActuatorClient {
    fn write(&mut self, dems: &ActuatorDems) -> Result<(), DispatchError> {
        match self.send_demands(dems) {
            Ok(ActuatorDemsResponse::DemsOk) => Ok(()),
            Ok(r) => Err(DispatchError::ActuatorUnavailable(format!(
                "simulation rejected the demands: {:?}",
                r
            ))),
            Err(e) => Err(DispatchError::ActuatorUnavailable(e.to_string())),
        }
    }
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Background thread, replaces the latest frame whenever the simulation publishes a bundle.
fn bg_thread(socket: MonitoredSocket, run: Arc<AtomicBool>, latest: FrameSlot) {
    while run.load(Ordering::Relaxed) {
        let msg = match socket.recv_string(0) {
            Ok(Ok(s)) => s,
            Ok(Err(_)) => {
                warn!("Non UTF-8 message from the simulation");
                continue;
            }
            Err(zmq::Error::EAGAIN) => continue,
            Err(e) => {
                error!("Error receiving message from the simulation: {:?}", e);
                break;
            }
        };

        let bundle: SensorBundle = match serde_json::from_str(&msg) {
            Ok(b) => b,
            Err(e) => {
                warn!("Error deserialising sensor bundle: {}", e);
                continue;
            }
        };

        let frame = match SensorFrame::try_from(bundle) {
            Ok(f) => f,
            Err(e) => {
                warn!("Invalid sensor bundle: {}", e);
                continue;
            }
        };

        let (lock, cvar) = &*latest;
        match lock.lock() {
            Ok(mut slot) => *slot = Some(frame),
            Err(_) => {
                error!("SimSensorClient: frame mutex poisoned");
                break;
            }
        }
        cvar.notify_one();
    }
}
