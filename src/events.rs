//! What the server tells its clients.
//!
//! Everything sent to clients is plain text, one websocket text frame per [`Notice`].

use std::fmt::Display;

use itertools::Itertools;

use crate::{actions::Field, serial::InboundMessage, settings::ConnectionSettings};

/// Something to put in front of every connected client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    /// A line the device printed.
    Device(InboundMessage),

    /// A status report from the relay itself.
    Status(Status),
}

impl Notice {
    /// Where the notice came from, for logging.
    pub fn source(&self) -> &'static str {
        match self {
            Notice::Device(_) => "device",
            Notice::Status(_) => "status",
        }
    }
}

impl Display for Notice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Notice::Device(message) => write!(f, "{message}"),
            Notice::Status(status) => write!(f, "{status}"),
        }
    }
}

impl From<Status> for Notice {
    fn from(status: Status) -> Self {
        Self::Status(status)
    }
}

impl From<InboundMessage> for Notice {
    fn from(message: InboundMessage) -> Self {
        Self::Device(message)
    }
}

/// Status reports, rendered as human readable lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Status {
    /// New settings were accepted and will be applied.
    SettingsChanged(ConnectionSettings),

    /// The requested settings are the ones already in use.
    SettingsUnchanged,

    /// Opening was attempted without a port chosen.
    NoPortSelected,

    /// The port is open.
    Connected(ConnectionSettings),

    /// The port could not be opened.
    OpenFailed {
        /// What was attempted.
        settings: ConnectionSettings,

        /// Why it failed.
        problem: String,
    },

    /// Reading from the port failed; a reconnect will follow.
    ReadFailed(String),

    /// A command arrived while no port was open.
    NotConnected,

    /// A command could not be written.
    WriteFailed(String),

    /// A command was written. Holds the command without its delimiter.
    Sent(String),

    /// A request field had the wrong JSON type.
    InvalidType(Field),

    /// The baud rate was not a positive integer.
    BadBaudRate(String),

    /// A request matched neither the reconfigure nor the command shape.
    UnrecognizedRequest,

    /// The configured port disappeared, so the settings were cleared.
    PortRemoved,

    /// The ports currently available, human readable.
    PortsSummary(Vec<String>),

    /// The ports currently available, as a JSON array.
    PortsJson(Vec<String>),
}

impl Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Status::SettingsChanged(settings) => write!(
                f,
                "Settings changed: port {}, baud rate {}",
                settings.port, settings.baud_rate
            ),
            Status::SettingsUnchanged => write!(f, "Port and baud rate settings unchanged."),
            Status::NoPortSelected => write!(f, "No port selected."),
            Status::Connected(settings) => write!(
                f,
                "Connected to serial port {} at {} baud.",
                settings.port, settings.baud_rate
            ),
            Status::OpenFailed { settings, problem } => write!(
                f,
                "Error: unable to open serial port {}: {problem}. Check the settings and reconnect to the port.",
                settings.port
            ),
            Status::ReadFailed(problem) => write!(f, "Error reading from serial port: {problem}"),
            Status::NotConnected => write!(f, "Error: port not open. Message not sent."),
            Status::WriteFailed(problem) => write!(f, "Error writing to serial port: {problem}"),
            Status::Sent(command) => write!(f, "Sent to serial port: {command}"),
            Status::InvalidType(field) => write!(f, "Error: invalid data type for {field}."),
            Status::BadBaudRate(value) => write!(f, "Error converting baud rate: {value}"),
            Status::UnrecognizedRequest => write!(
                f,
                "Error: expected either `port` and `baudRate`, or `command`."
            ),
            Status::PortRemoved => {
                write!(f, "Current port is no longer available. Settings reset.")
            }
            Status::PortsSummary(ports) => {
                write!(f, "Available ports: [{}]", ports.iter().join(", "))
            }
            Status::PortsJson(ports) => {
                let json = serde_json::to_string(ports).map_err(|_| std::fmt::Error)?;
                write!(f, "{json}")
            }
        }
    }
}
