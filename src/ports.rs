//! Finding out which serial ports exist, and noticing when that changes.

use std::{sync::Arc, time::Duration};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    broadcast::BroadcastHandle, connection::ConnectionManager, error::Error, events::Status,
};

/// Something able to list the ports a device could be attached to.
pub trait PortLister: Send + Sync {
    /// The names of the ports available right now.
    fn available_ports(&self) -> Result<Vec<String>, Error>;
}

/// The serial ports of this machine.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemPorts;

impl PortLister for SystemPorts {
    fn available_ports(&self) -> Result<Vec<String>, Error> {
        let ports = serialport::available_ports().map_err(|e| Error::PortListing(e.to_string()))?;

        Ok(ports.into_iter().map(|port| port.port_name).collect())
    }
}

/// List the ports, sorted so lists taken at different times compare equal.
pub(crate) fn list(lister: &dyn PortLister) -> Result<Vec<String>, Error> {
    let mut ports = lister.available_ports()?;
    ports.sort();

    Ok(ports)
}

/// Tell every client which ports exist.
pub(crate) fn announce(broadcast: &BroadcastHandle, ports: &[String]) {
    broadcast.publish(Status::PortsSummary(ports.to_vec()));
    broadcast.publish(Status::PortsJson(ports.to_vec()));
}

/// Polls the port list and reacts to changes.
pub(crate) struct PortWatcher {
    pub(crate) lister: Arc<dyn PortLister>,
    pub(crate) manager: Arc<ConnectionManager>,
    pub(crate) broadcast: BroadcastHandle,
    pub(crate) interval: Duration,
    pub(crate) shutdown: CancellationToken,
}

impl PortWatcher {
    pub(crate) async fn run(self) {
        let mut known = match list(self.lister.as_ref()) {
            Ok(ports) => ports,
            Err(e) => {
                warn!(%e, "Could not list ports");
                vec![]
            }
        };
        debug!(?known, "Watching ports");

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }

            let current = match list(self.lister.as_ref()) {
                Ok(ports) => ports,
                Err(e) => {
                    warn!(%e, "Could not list ports");
                    continue;
                }
            };

            if current == known {
                continue;
            }

            info!(?current, "Available ports changed");
            announce(&self.broadcast, &current);

            let shrank = current.len() < known.len();
            self.manager.ports_changed(&current, shrank).await;

            known = current;
        }

        debug!("Port watcher stopped");
    }
}
