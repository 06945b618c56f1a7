#![deny(missing_docs)]
#![doc = include_str!("../README.md")]

/// The requests a connecting user can send.
pub mod actions;

/// Code relating to setting up the server which accepts clients.
pub mod server;

/// Clients.
pub mod client;

/// The command line interface.
pub mod cli;

/// Fan-out of notices to every connected client.
pub mod broadcast;

/// The single connection to the device.
pub mod connection;

/// Reads lines from the device.
pub(crate) mod reader;

/// Writes client commands to the device, in order.
pub mod writer;

/// Decodes client requests and dispatches them.
pub mod router;

/// Listing ports and watching for changes.
pub mod ports;

/// Wires the parts of the relay together.
pub mod relay;

/// Handles incoming websockets.
pub(crate) mod websocket;

/// Mocked serial port driver.
pub mod mock;

/// Serial port driver.
pub mod serial;

/// Relates to config files.
pub mod config;

/// Which port to use, and at which speed.
pub mod settings;

/// An endpoint- i.e. something which can be opened to talk to the device, such as a serial port.
pub mod endpoint;

/// Possible errors in this library.
pub mod error;

/// Logging/tracing setup.
pub mod logging;

/// A connected user.
pub mod user;

/// Notices the server sends its clients.
pub mod events;

pub use serial::serial_port::SerialConnector;
