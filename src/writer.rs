use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info_span, warn, Instrument};

use crate::{
    broadcast::BroadcastHandle, connection::ConnectionManager, error::Error, events::Status,
    serial::OutboundRequest,
};

/// Queues requests for the device.
///
/// Requests are written one at a time in the order they were submitted,
/// and the outcome of each is broadcast.
#[derive(Debug, Clone)]
pub struct WriterHandle(mpsc::UnboundedSender<OutboundRequest>);

impl WriterHandle {
    /// Spawn the writer task.
    pub fn new(
        manager: Arc<ConnectionManager>,
        broadcast: BroadcastHandle,
        shutdown: CancellationToken,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();

        tokio::spawn(run(rx, manager, broadcast, shutdown).instrument(info_span!("Writer")));

        Self(tx)
    }

    /// Queue a request. Never waits on the device.
    pub fn submit(&self, request: OutboundRequest) {
        if self.0.send(request).is_err() {
            debug!("Writer has stopped, request dropped");
        }
    }
}

async fn run(
    mut requests: mpsc::UnboundedReceiver<OutboundRequest>,
    manager: Arc<ConnectionManager>,
    broadcast: BroadcastHandle,
    shutdown: CancellationToken,
) {
    loop {
        let request = tokio::select! {
            _ = shutdown.cancelled() => break,
            request = requests.recv() => match request {
                Some(request) => request,
                None => break,
            },
        };

        let status = match manager.write(&request).await {
            Ok(()) => Status::Sent(request.command().into()),
            Err(Error::NotConnected) => {
                debug!(%request, "Not connected, request dropped");
                Status::NotConnected
            }
            Err(e) => {
                warn!(%request, %e, "Write failed");

                let problem = match e {
                    Error::IO(e) => e.to_string(),
                    other => other.to_string(),
                };
                Status::WriteFailed(problem)
            }
        };

        broadcast.publish(status);
    }

    debug!("Writer stopped");
}
