//! # Operator console
//!
//! Interactive prompt which sends telecommands to a running executive and prints its responses.
//!
//! ```text
//! bc $ heartbeat
//! Ok
//! bc $ reset
//! CannotExecute
//! ```

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use color_eyre::{eyre::WrapErr, Result};
use rustyline::{error::ReadlineError, DefaultEditor};
use structopt::{clap, StructOpt};

use comms_if::{
    net::{zmq, MonitoredSocket, SocketOptions},
    tc::{Tc, TcResponse},
};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

const PROMPT: &str = "bc $ ";
const HISTORY_PATH: &str = ".bc_operator_history";

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, StructOpt)]
#[structopt(name = "bc_operator", about = "Send telecommands to the control executive")]
struct Opts {
    /// Telecommand endpoint of the executive
    #[structopt(short, long, default_value = "tcp://localhost:5030")]
    endpoint: String,

    /// Time to wait for a response before giving up on a telecommand, in milliseconds
    #[structopt(long, default_value = "1000")]
    timeout_ms: i32,
}

// ------------------------------------------------------------------------------------------------
// MAIN
// ------------------------------------------------------------------------------------------------

fn main() -> Result<()> {
    color_eyre::install()?;
    let opts = Opts::from_args();

    let ctx = zmq::Context::new();
    let socket_options = SocketOptions {
        block_on_first_connect: false,
        connect_timeout: 1000,
        heartbeat_ivl: 500,
        heartbeat_ttl: 1000,
        heartbeat_timeout: 1000,
        linger: 1,
        recv_timeout: opts.timeout_ms,
        send_timeout: opts.timeout_ms,
        req_correlate: true,
        req_relaxed: true,
        ..Default::default()
    };
    let socket = MonitoredSocket::new(&ctx, zmq::REQ, socket_options, &opts.endpoint)
        .wrap_err("Could not create the telecommand socket")?;

    println!("Sending telecommands to {}", opts.endpoint);
    println!("Type `help` for the list of telecommands, `exit` to quit.");

    let mut rl = DefaultEditor::new().wrap_err("Could not start the prompt")?;
    if rl.load_history(HISTORY_PATH).is_err() {
        println!("No history detected");
    }

    loop {
        let line = match rl.readline(PROMPT) {
            Ok(l) => l,
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
            Err(e) => return Err(e).wrap_err("Could not read the prompt"),
        };

        let words: Vec<&str> = line.split_whitespace().collect();
        if words.is_empty() {
            continue;
        }
        rl.add_history_entry(line.as_str()).ok();

        match words[0] {
            "exit" | "quit" => break,
            "help" => {
                Tc::clap().print_long_help().ok();
                println!();
                continue;
            }
            _ => (),
        }

        let tc = match parse(&words) {
            Ok(tc) => tc,
            Err(e) => {
                println!("{}", e.message);
                continue;
            }
        };

        match send_tc(&socket, &tc) {
            Ok(response) => println!("{:?}", response),
            Err(e) => println!("{}", e),
        }
    }

    rl.save_history(HISTORY_PATH).ok();
    println!("Exiting...");

    Ok(())
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Parse the words of a prompt line into a telecommand.
fn parse(words: &[&str]) -> Result<Tc, clap::Error> {
    Tc::from_iter_safe(std::iter::once("tc").chain(words.iter().copied()))
}

/// Send a telecommand and wait for the executive's response.
fn send_tc(socket: &MonitoredSocket, tc: &Tc) -> Result<TcResponse> {
    if !socket.connected() {
        color_eyre::eyre::bail!("The executive is not connected");
    }

    let json = tc.to_json().wrap_err("Could not serialise the telecommand")?;
    socket
        .send(&json, 0)
        .wrap_err("Could not send the telecommand")?;

    let response = socket
        .recv_string(0)
        .wrap_err("No response from the executive")?
        .map_err(|_| color_eyre::eyre::eyre!("The response was not valid UTF-8"))?;

    serde_json::from_str(&response).wrap_err("Could not parse the response")
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_parse() {
        assert_eq!(parse(&["heartbeat"]).unwrap(), Tc::Heartbeat);
        assert_eq!(parse(&["safe"]).unwrap(), Tc::MakeSafe);
        assert_eq!(parse(&["reset"]).unwrap(), Tc::ResetFailsafe);
        assert!(parse(&["launch"]).is_err());
    }
}
