use std::fmt::Display;

use serde::{Deserialize, Serialize};

/// Serial port related errors.
pub mod error;

/// Opening the physical serial port.
pub(crate) mod serial_port;

/// Codecs for decoding messages from wire.
pub mod codecs;

/// A complete line read from the device.
///
/// Always valid UTF-8, with surrounding whitespace (including the delimiter) trimmed.
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone, Deserialize, Serialize)]
pub struct InboundMessage(String);

impl InboundMessage {
    /// Borrowed form.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The owned text.
    pub fn into_string(self) -> String {
        self.0
    }
}

impl<T: AsRef<str>> From<T> for InboundMessage {
    fn from(string_like: T) -> Self {
        Self(string_like.as_ref().into())
    }
}

impl Display for InboundMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A command destined for the device.
///
/// The delimiter is appended on creation, so what is stored is exactly what goes on wire.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct OutboundRequest(String);

impl OutboundRequest {
    /// The delimiter appended to each command.
    pub const DELIMITER: char = '\n';

    /// Create a request from a command, appending the delimiter.
    pub fn new<S: AsRef<str>>(command: S) -> Self {
        let mut line = String::from(command.as_ref());
        line.push(Self::DELIMITER);

        Self(line)
    }

    /// The bytes to put on wire.
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }

    /// The command without its delimiter.
    pub fn command(&self) -> &str {
        self.0.strip_suffix(Self::DELIMITER).unwrap_or(&self.0)
    }
}

impl Display for OutboundRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = self.command().chars().take(48).collect::<String>();

        write!(f, "{s}")
    }
}
