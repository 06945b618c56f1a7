use std::time::Duration;

use tokio::{
    io::{AsyncReadExt, ReadHalf},
    sync::mpsc,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::{
    broadcast::BroadcastHandle,
    endpoint::PhysicalConnection,
    events::Status,
    serial::{codecs::lines::Framer, error::SerialPortError},
};

/// Sent when a reader stops because the device failed.
#[derive(Debug)]
pub(crate) struct ReaderExit {
    /// Which connection the reader was reading from.
    pub(crate) generation: u64,

    pub(crate) problem: String,
}

/// Drains one connection, publishing every line it frames.
///
/// Lives exactly as long as the connection it was started for:
/// it stops as soon as `cancel` fires, and never touches a connection opened after it.
pub(crate) struct InboundReader {
    pub(crate) connection: ReadHalf<Box<dyn PhysicalConnection>>,
    pub(crate) generation: u64,
    pub(crate) framer: Framer,
    pub(crate) broadcast: BroadcastHandle,
    pub(crate) exits: mpsc::UnboundedSender<ReaderExit>,
    pub(crate) cancel: CancellationToken,
    pub(crate) buffer_size: usize,
    pub(crate) throttle: Option<Duration>,
}

impl InboundReader {
    pub(crate) async fn run(mut self) {
        let mut buffer = vec![0; self.buffer_size];

        let problem = loop {
            let read = tokio::select! {
                biased;

                _ = self.cancel.cancelled() => {
                    debug!("Connection closed, reader stopping");
                    return;
                }
                read = self.connection.read(&mut buffer) => read,
            };

            match read {
                Ok(0) => break SerialPortError::Disconnected,
                Ok(n) => self.forward(&buffer[..n]),
                Err(e) => break SerialPortError::IO(e),
            }

            if let Some(throttle) = self.throttle {
                tokio::select! {
                    _ = self.cancel.cancelled() => return,
                    _ = tokio::time::sleep(throttle) => {}
                }
            }
        };

        warn!(%problem, "Read failed, reader stopping");
        self.broadcast
            .publish(Status::ReadFailed(problem.to_string()));

        if self
            .exits
            .send(ReaderExit {
                generation: self.generation,
                problem: problem.to_string(),
            })
            .is_err()
        {
            debug!("Supervisor is gone");
        }
    }

    fn forward(&mut self, chunk: &[u8]) {
        match self.framer.feed(chunk) {
            Ok(messages) => {
                for message in messages {
                    trace!(%message, "Message from port");
                    self.broadcast.publish(message);
                }
            }
            Err(e) => warn!(%e, "Dropping chunk from port"),
        }
    }
}
