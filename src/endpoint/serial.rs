//! A serial port endpoint.

use super::{Connector, PhysicalConnection};
use crate::{error::Error, serial::serial_port::SerialConnector, settings::ConnectionSettings};

impl Connector for SerialConnector {
    fn open(&self, settings: &ConnectionSettings) -> Result<Box<dyn PhysicalConnection>, Error> {
        Ok(Box::new(self.open_stream(settings)?))
    }
}
