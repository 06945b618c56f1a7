use std::{net::SocketAddr, path::Path, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{error::Error, settings::ConnectionSettings};

/// The configuration used for running the server.
///
/// Every field has a default, so a configuration file only needs the fields it changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Where to listen for websocket clients.
    pub address: SocketAddr,

    /// The route clients connect to.
    pub path: String,

    /// The port to attach to when starting, if any.
    /// Clients may change this at runtime.
    pub initial: Option<ConnectionSettings>,

    /// How long to wait between automatic attempts at opening the port,
    /// and after a read failure before reconnecting.
    pub reconnect_backoff_ms: u64,

    /// How long to wait after closing the port before opening it again,
    /// so the OS has released it.
    pub settle_delay_ms: u64,

    /// Pause after each read from the device.
    /// Zero means read as fast as data arrives.
    pub read_throttle_ms: u64,

    /// How many bytes to read from the device at a time.
    pub read_buffer_size: usize,

    /// Whether to poll for ports appearing and disappearing.
    pub watch_ports: bool,

    /// How often to poll the available ports.
    pub port_scan_interval_ms: u64,

    /// How many undelivered messages a client may have before it is dropped.
    pub client_outbox_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            address: SocketAddr::from(([0, 0, 0, 0], 8080)),
            path: "/serialmonitor".into(),
            initial: None,
            reconnect_backoff_ms: 5000,
            settle_delay_ms: 1000,
            read_throttle_ms: 0,
            read_buffer_size: 128,
            watch_ports: true,
            port_scan_interval_ms: 2000,
            client_outbox_capacity: 1024,
        }
    }
}

impl Config {
    fn ron() -> ron::Options {
        ron::Options::default()
            .with_default_extension(ron::extensions::Extensions::IMPLICIT_SOME)
            .with_default_extension(ron::extensions::Extensions::UNWRAP_NEWTYPES)
    }

    /// Deserialize a .ron file's contents.
    pub fn deserialize(input: &str) -> Result<Self, Error> {
        Self::ron()
            .from_str::<Config>(input)
            .map_err(|e| Error::ConfigLoad(e.to_string()))
    }

    /// An example configuration with some fields filled in.
    pub fn example() -> Self {
        Self {
            initial: Some(ConnectionSettings::new("/dev/ttyACM0", 115_200)),
            read_throttle_ms: 100,
            ..Default::default()
        }
    }

    /// Serialize the configuration in a "pretty" (i.e. non-compact) fashion.
    pub fn serialize_pretty(&self) -> Result<String, Error> {
        Self::ron()
            .to_string_pretty(self, ron::ser::PrettyConfig::default())
            .map_err(|e| Error::ConfigLoad(e.to_string()))
    }

    /// Setup a new configuration from a RON file.
    pub fn new_from_path<P: AsRef<Path>>(p: P) -> Result<Self, Error> {
        let s = std::fs::read_to_string(p.as_ref()).map_err(|e| {
            Error::ConfigLoad(format!("Could not read {:?}: {e}", p.as_ref()))
        })?;

        Self::deserialize(&s)
    }

    /// See [`Config::reconnect_backoff_ms`].
    pub fn reconnect_backoff(&self) -> Duration {
        Duration::from_millis(self.reconnect_backoff_ms)
    }

    /// See [`Config::settle_delay_ms`].
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    /// See [`Config::read_throttle_ms`].
    pub fn read_throttle(&self) -> Option<Duration> {
        (self.read_throttle_ms > 0).then(|| Duration::from_millis(self.read_throttle_ms))
    }

    /// See [`Config::port_scan_interval_ms`].
    pub fn port_scan_interval(&self) -> Duration {
        Duration::from_millis(self.port_scan_interval_ms)
    }

    pub(crate) fn validate(&self) -> Result<(), Error> {
        if !self.path.starts_with('/') {
            return Err(Error::BadConfig(format!(
                "The path `{}` must start with `/`, for example `/serialmonitor`.",
                self.path
            )));
        }

        if self.reconnect_backoff_ms == 0 {
            return Err(Error::BadConfig(
                "`reconnect_backoff_ms` must be above zero, otherwise a missing device is retried in a busy loop.".into(),
            ));
        }

        if self.read_buffer_size == 0 {
            return Err(Error::BadConfig(
                "`read_buffer_size` must be above zero.".into(),
            ));
        }

        if self.client_outbox_capacity == 0 {
            return Err(Error::BadConfig(
                "`client_outbox_capacity` must be above zero.".into(),
            ));
        }

        if self.watch_ports && self.port_scan_interval_ms == 0 {
            return Err(Error::BadConfig(
                "`port_scan_interval_ms` must be above zero when `watch_ports` is enabled.".into(),
            ));
        }

        if let Some(initial) = &self.initial {
            if initial.baud_rate == 0 {
                return Err(Error::BadConfig(format!(
                    "The initial port `{}` has baud rate zero.",
                    initial.port
                )));
            }
        }

        Ok(())
    }
}
