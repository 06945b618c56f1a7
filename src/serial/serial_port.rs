use tokio_serial::{SerialPortBuilderExt, SerialStream};
use tracing::{debug, info};

use crate::{error::Error, settings::ConnectionSettings};

/// Opens serial ports via the native async driver, 8N1 without flow control.
#[derive(Debug, Clone, Default)]
pub struct SerialConnector;

impl SerialConnector {
    pub(crate) fn open_stream(&self, settings: &ConnectionSettings) -> Result<SerialStream, Error> {
        let ConnectionSettings { port, baud_rate } = settings;
        debug!(%port, %baud_rate, "Opening port");

        let stream = tokio_serial::new(port, *baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()
            .map_err(|e| Error::Open {
                port: port.clone(),
                baud_rate: *baud_rate,
                problem: e.to_string(),
            })?;

        info!(%port, %baud_rate, "Opened serial port");

        Ok(stream)
    }
}
