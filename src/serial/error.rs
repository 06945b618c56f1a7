use std::{io, str};

use thiserror::Error;

/// Problems reading from the device.
#[derive(Debug, Error)]
pub enum SerialPortError {
    /// IO related errors.
    #[error("Underlying IO problem: {0}")]
    IO(#[from] io::Error),

    /// A chunk of bytes was not valid UTF-8 and was dropped.
    #[error("Discarded {discarded} byte(s) which were not valid UTF8: {source}")]
    Utf8 {
        /// How many bytes were dropped.
        discarded: usize,

        /// The validation problem.
        source: str::Utf8Error,
    },

    /// Serial port disconnected.
    #[error("Serial port disconnected")]
    Disconnected,
}
