//! Behavioural cloning drive executive entry point.
//!
//! # Architecture
//!
//! The executive closes the loop between the simulation's sensors and its actuators:
//!
//!     - Initialise session, logging and parameters
//!     - Load the trained policy, which is fatal if it fails
//!     - Connect to the simulation and open the telecommand socket
//!     - Main loop:
//!         - Telecommand processing and handling
//!         - One control tick, paced by the simulation's sensor publication
//!
//! The loop runs until `--max-ticks` ticks have been run, or forever if not given.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use color_eyre::{eyre::WrapErr, Report};
use log::{info, warn};
use structopt::StructOpt;

// Internal
use bc_lib::{
    control_loop::{Components, ControlLoop},
    params::ExecParams,
    policy,
    sim_client::{SimActuatorClient, SimSensorClient},
    tc_client::{TcClient, TcClientError},
    telemetry::TelemetryRecorder,
};
use comms_if::net::{zmq, NetParams};
use util::{
    host,
    logger::{logger_init, LevelFilter},
    session::Session,
};

// ---------------------------------------------------------------------------
// STRUCTS
// ---------------------------------------------------------------------------

#[derive(Debug, StructOpt)]
#[structopt(name = "bc_exec", about = "Behavioural cloning drive executive")]
struct Opts {
    /// Executive parameter file, relative to the `params` directory of the software root.
    #[structopt(long, default_value = "bc_exec.toml")]
    params: String,

    /// Network parameter file, relative to the `params` directory of the software root.
    #[structopt(long, default_value = "net.toml")]
    net: String,

    /// Stop after this many control ticks.
    #[structopt(long)]
    max_ticks: Option<u64>,

    /// Minimum log level, `info`, `debug` or `trace`.
    #[structopt(long, default_value = "debug")]
    log_level: LevelFilter,
}

// ---------------------------------------------------------------------------
// FUNCTIONS
// ---------------------------------------------------------------------------

/// Executable main function, entry point.
fn main() -> Result<(), Report> {
    color_eyre::install()?;

    let opts = Opts::from_args();

    // ---- EARLY INITIALISATION ----

    let session = Session::new("bc_exec", "sessions").wrap_err("Failed to create the session")?;

    logger_init(opts.log_level, &session).wrap_err("Failed to initialise logging")?;

    info!("Behavioural Cloning Drive Executive\n");
    if let Some(hostname) = host::get_hostname() {
        info!("Running on: {}", hostname);
    }
    info!("Session directory: {:?}\n", session.session_root);

    // ---- LOAD PARAMETERS ----

    let params: ExecParams =
        util::params::load(&opts.params).wrap_err("Could not load exec params")?;
    params
        .validate()
        .wrap_err("The exec parameters are invalid")?;
    session.save("bc_exec_params.json", params.clone());

    let net_params: NetParams =
        util::params::load(&opts.net).wrap_err("Could not load net params")?;

    info!("Exec parameters loaded");

    // ---- LOAD POLICY ----

    let policy = policy::load(&params.policy).wrap_err("Failed to load the policy")?;
    info!("{:?} policy loaded", params.policy.backend);

    // ---- INITIALISE NETWORK ----

    info!("Initialising network");

    let zmq_ctx = zmq::Context::new();

    let sensor_client = SimSensorClient::new(&zmq_ctx, &net_params)
        .wrap_err("Failed to initialise SimSensorClient")?;
    info!("SimSensorClient initialised");

    let actuator_client = SimActuatorClient::new(&zmq_ctx, &net_params)
        .wrap_err("Failed to initialise SimActuatorClient")?;
    info!("SimActuatorClient initialised");

    let tc_client = match net_params.tc_endpoint {
        Some(ref endpoint) => {
            let c = TcClient::new(&zmq_ctx, endpoint).wrap_err("Failed to initialise TcClient")?;
            info!("TcClient listening on {}", endpoint);
            Some(c)
        }
        None => {
            warn!("No telecommand endpoint, a fail-safe can only be cleared by a restart");
            None
        }
    };

    info!("Network initialisation complete");

    // ---- INITIALISE CONTROL LOOP ----

    let telemetry = TelemetryRecorder::from_session(&session, &params.telemetry)
        .wrap_err("Failed to initialise the telemetry recorder")?;

    let mut control_loop = ControlLoop::new(
        &params,
        Components {
            sensor_source: Box::new(sensor_client),
            actuator_sink: Box::new(actuator_client),
            policy,
            telemetry,
        },
    )
    .wrap_err("Failed to initialise the control loop")?;

    // ---- MAIN LOOP ----

    info!("Begining main loop\n");

    loop {
        // ---- TELECOMMAND PROCESSING ----

        if let Some(ref client) = tc_client {
            loop {
                match client.recieve_tc() {
                    Ok(Some(tc)) => {
                        let response = control_loop.handle_tc(&tc);
                        info!("Telecommand {:?}: {:?}", tc, response);

                        if let Err(e) = client.send_response(response) {
                            warn!("Could not respond to TC: {}", e);
                        }
                    }
                    Ok(None) | Err(TcClientError::NotConnected) => break,
                    Err(TcClientError::TcParseError(e)) => {
                        warn!("Could not parse recieved TC: {}", e);
                        break;
                    }
                    Err(TcClientError::NonUtf8Tc) => {
                        warn!("Recieved a non UTF-8 TC");
                        break;
                    }
                    Err(e) => {
                        return Err(e).wrap_err("An error occured while receiving TCs")
                    }
                }
            }
        }

        // ---- CONTROL TICK ----

        control_loop.tick();

        if let Some(max) = opts.max_ticks {
            if control_loop.num_ticks() >= max {
                info!("Reached {} ticks, stopping", max);
                break;
            }
        }
    }

    // ---- SHUTDOWN ----

    let health = control_loop.health();
    info!(
        "Ran {} ticks, {} failures, ended in {} mode",
        control_loop.num_ticks(),
        health.total_failures,
        health.mode
    );
    if control_loop.telemetry_dropped() > 0 {
        warn!(
            "{} telemetry records were dropped",
            control_loop.telemetry_dropped()
        );
    }

    // Dropping the loop flushes the telemetry
    drop(control_loop);

    session.exit();

    Ok(())
}
