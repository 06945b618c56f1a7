use std::fmt::Display;

use serde::{Deserialize, Serialize};

/// Which port to attach to, and how fast to talk to it.
///
/// Replaced as a whole, never changed piecewise.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionSettings {
    /// The path to the port.
    /// Likely "/dev/ttyACMx" or "COMx".
    /// Empty means no port has been chosen yet.
    pub port: String,

    /// Symbols per second.
    pub baud_rate: u32,
}

impl ConnectionSettings {
    /// Settings for the given port and baud rate.
    pub fn new<S: AsRef<str>>(port: S, baud_rate: u32) -> Self {
        Self {
            port: port.as_ref().into(),
            baud_rate,
        }
    }

    /// No port has been chosen.
    pub fn unconfigured() -> Self {
        Self::default()
    }

    /// True if no port has been chosen.
    pub fn is_unconfigured(&self) -> bool {
        self.port.is_empty()
    }
}

impl Display for ConnectionSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_unconfigured() {
            write!(f, "<no port>")
        } else {
            write!(f, "{}@{}", self.port, self.baud_rate)
        }
    }
}
