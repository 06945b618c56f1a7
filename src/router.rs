use std::sync::Arc;

use tracing::{info, warn};

use crate::{
    actions::Action, broadcast::BroadcastHandle, connection::ConnectionManager,
    writer::WriterHandle,
};

/// Turns client requests into work for the connection manager and the writer.
///
/// Each client's requests are handled in the order that client sent them.
#[derive(Debug, Clone)]
pub struct RequestRouter {
    manager: Arc<ConnectionManager>,
    writer: WriterHandle,
    broadcast: BroadcastHandle,
}

impl RequestRouter {
    /// Route requests to the given manager and writer, reporting problems on the broadcast.
    pub fn new(
        manager: Arc<ConnectionManager>,
        writer: WriterHandle,
        broadcast: BroadcastHandle,
    ) -> Self {
        Self {
            manager,
            writer,
            broadcast,
        }
    }

    /// Handle one request, as sent by a client.
    ///
    /// Malformed requests are reported to every client, but never end the session.
    pub async fn handle(&self, request: &str) {
        match Action::parse(request) {
            Ok(action) => {
                info!(%action, "Client requested action");
                self.perform(action).await;
            }
            Err(e) => {
                let statuses = e.statuses();

                if statuses.is_empty() {
                    warn!(%e, "Ignoring request");
                }

                for status in statuses {
                    info!(%status, "Rejecting request");
                    self.broadcast.publish(status);
                }
            }
        }
    }

    /// Carry out an already decoded action.
    pub async fn perform(&self, action: Action) {
        match action {
            Action::Reconfigure(settings) => {
                self.manager.configure(settings).await;
            }
            Action::Command(request) => self.writer.submit(request),
        }
    }
}
