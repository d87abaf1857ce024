//! # Telecommand Client
//!
//! Recieves telecommands from the operator console. The executive binds a REP socket which the
//! console connects to, so that the console can come and go while the loop runs.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use comms_if::{
    net::{zmq, MonitoredSocket, MonitoredSocketError, SocketOptions},
    tc::{Tc, TcResponse},
};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Telecommand client
pub struct TcClient {
    socket: MonitoredSocket,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum TcClientError {
    #[error("Socket error: {0}")]
    SocketError(MonitoredSocketError),

    #[error("No operator is connected")]
    NotConnected,

    #[error("Could not send the response to the operator: {0}")]
    SendError(zmq::Error),

    #[error("Could not recieve a message from the operator: {0}")]
    RecvError(zmq::Error),

    #[error("Could not serialize the data: {0}")]
    SerializationError(serde_json::Error),

    #[error("Could not parse the recieved telecommand: {0}")]
    TcParseError(serde_json::Error),

    #[error("The operator sent a message which was not valid UTF-8")]
    NonUtf8Tc,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl TcClient {
    /// Create a new instance of the TC Client, listening on the given endpoint.
    ///
    /// This function will not block until an operator connects.
    pub fn new(ctx: &zmq::Context, endpoint: &str) -> Result<Self, TcClientError> {
        let socket_options = SocketOptions {
            bind: true,
            block_on_first_connect: false,
            heartbeat_ivl: 500,
            heartbeat_ttl: 1000,
            heartbeat_timeout: 1000,
            linger: 1,
            recv_timeout: 0,
            send_timeout: 10,
            ..Default::default()
        };

        let socket = MonitoredSocket::new(ctx, zmq::REP, socket_options, endpoint)
            .map_err(TcClientError::SocketError)?;

        Ok(Self { socket })
    }

    /// Recieve a single TC, without waiting.
    ///
    /// Returns `Ok(None)` if there is no pending TC. After recieving a valid TC a response must be
    /// sent using `.send_response()` before attempting to recieve another TC. If the TC is invalid
    /// the response is sent by this function.
    pub fn recieve_tc(&self) -> Result<Option<Tc>, TcClientError> {
        if !self.socket.connected() {
            return Err(TcClientError::NotConnected);
        }

        let tc_str = match self.socket.recv_string(0) {
            Ok(Ok(s)) => s,
            Ok(Err(_)) => {
                self.send_response(TcResponse::Invalid)?;
                return Err(TcClientError::NonUtf8Tc);
            }
            Err(zmq::Error::EAGAIN) => return Ok(None),
            Err(e) => return Err(TcClientError::RecvError(e)),
        };

        match Tc::from_json(&tc_str) {
            Ok(tc) => Ok(Some(tc)),
            Err(e) => {
                self.send_response(TcResponse::Invalid)?;
                Err(TcClientError::TcParseError(e))
            }
        }
    }

    /// Send the given response back to the operator.
    ///
    /// This function must be called after recieving a TC.
    pub fn send_response(&self, response: TcResponse) -> Result<(), TcClientError> {
        let response_str =
            serde_json::to_string(&response).map_err(TcClientError::SerializationError)?;

        self.socket
            .send(&response_str, 0)
            .map_err(TcClientError::SendError)
    }
}
