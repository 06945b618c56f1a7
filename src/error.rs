use std::{io, net::SocketAddr};

use thiserror::Error;

/// Errors that may occur in this library.
#[derive(Debug, Error)]
pub enum Error {
    /// The physical port could not be opened.
    #[error("Could not open `{port}` at {baud_rate} baud: {problem}")]
    Open {
        /// The port asked for.
        port: String,

        /// The baud rate asked for.
        baud_rate: u32,

        /// What went wrong.
        problem: String,
    },

    /// There is no open connection to the device.
    #[error("Serial port not open")]
    NotConnected,

    /// IO related errors.
    #[error("Underlying IO problem: {0}")]
    IO(#[from] io::Error),

    /// The server could not listen on the address.
    #[error("Could not listen on {address}: {problem}")]
    Bind {
        /// Where listening was attempted.
        address: SocketAddr,

        /// What went wrong.
        problem: String,
    },

    /// Listing available ports failed.
    #[error("Could not list serial ports: {0}")]
    PortListing(String),

    /// The configuration is not usable.
    #[error("Bad configuration: {0}")]
    BadConfig(String),

    /// The configuration file could not be read or parsed.
    #[error("Could not load configuration: {0}")]
    ConfigLoad(String),

    /// Websocket related problems.
    #[error("Websocket issue: {0}")]
    WebsocketIssue(String),
}

impl Error {
    /// The bad configuration explanation, if this is [`Error::BadConfig`].
    pub fn as_bad_config(&self) -> Option<&str> {
        if let Self::BadConfig(v) = self {
            Some(v)
        } else {
            None
        }
    }
}

impl From<tungstenite::Error> for Error {
    fn from(e: tungstenite::Error) -> Self {
        Self::WebsocketIssue(e.to_string())
    }
}
