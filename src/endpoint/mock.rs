//! A mock endpoint.
//! Each open produces an in-memory link instead of a serial port.
//!
//! Useful for testing implementations which would use
//! regular serial ports- but faster and more reliable.

use super::{Connector, PhysicalConnection};
use crate::{error::Error, mock::MockConnector, settings::ConnectionSettings};

impl Connector for MockConnector {
    fn open(&self, settings: &ConnectionSettings) -> Result<Box<dyn PhysicalConnection>, Error> {
        Ok(Box::new(self.open_mock(settings)?))
    }
}
