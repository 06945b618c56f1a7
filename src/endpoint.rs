use tokio::io::{AsyncRead, AsyncWrite};

use crate::{error::Error, settings::ConnectionSettings};

pub(crate) mod mock;
pub(crate) mod serial;

/// An open link to the device.
///
/// Dropping it closes the port.
pub trait PhysicalConnection: AsyncRead + AsyncWrite + Send + Unpin {}

/// Automatically provide [`PhysicalConnection`] for anything which can be read from and written to.
impl<T> PhysicalConnection for T where T: AsyncRead + AsyncWrite + Send + Unpin {}

/// Something able to open a [`PhysicalConnection`], such as a serial port driver.
pub trait Connector: Send + Sync {
    /// Open the device described by the settings.
    ///
    /// The settings are never unconfigured when this is called.
    fn open(&self, settings: &ConnectionSettings) -> Result<Box<dyn PhysicalConnection>, Error>;
}
