use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info_span, warn, Instrument};

use crate::{
    broadcast::BroadcastHandle,
    config::Config,
    connection::{ConnectionManager, ConnectionOptions},
    endpoint::Connector,
    ports::{self, PortLister, PortWatcher},
    router::RequestRouter,
    writer::WriterHandle,
};

/// Every long lived part of the relay, wired together.
///
/// Cheap to clone; clones share the same parts.
#[derive(Clone)]
pub struct Relay {
    broadcast: BroadcastHandle,
    manager: Arc<ConnectionManager>,
    router: RequestRouter,
    ports: Option<Arc<dyn PortLister>>,
    shutdown: CancellationToken,
}

impl Relay {
    /// Spawn the broadcaster, connection manager, writer and (if enabled) port watcher.
    ///
    /// Everything stops when `shutdown` is cancelled.
    pub fn start(
        config: &Config,
        connector: Arc<dyn Connector>,
        ports: Option<Arc<dyn PortLister>>,
        shutdown: CancellationToken,
    ) -> Self {
        let broadcast = BroadcastHandle::new(config.client_outbox_capacity, shutdown.clone());

        let manager = ConnectionManager::start(
            connector,
            broadcast.clone(),
            ConnectionOptions::from(config),
            config.initial.clone().unwrap_or_default(),
            shutdown.clone(),
        );

        let writer = WriterHandle::new(manager.clone(), broadcast.clone(), shutdown.clone());
        let router = RequestRouter::new(manager.clone(), writer, broadcast.clone());

        if let (true, Some(lister)) = (config.watch_ports, &ports) {
            let watcher = PortWatcher {
                lister: lister.clone(),
                manager: manager.clone(),
                broadcast: broadcast.clone(),
                interval: config.port_scan_interval(),
                shutdown: shutdown.clone(),
            };
            tokio::spawn(watcher.run().instrument(info_span!("PortWatcher")));
        }

        Self {
            broadcast,
            manager,
            router,
            ports,
            shutdown,
        }
    }

    /// Where notices go out.
    pub fn broadcast(&self) -> &BroadcastHandle {
        &self.broadcast
    }

    /// The owner of the device connection.
    pub fn manager(&self) -> &Arc<ConnectionManager> {
        &self.manager
    }

    /// Where client requests go in.
    pub fn router(&self) -> &RequestRouter {
        &self.router
    }

    /// Broadcast the available ports, if ports can be listed.
    pub fn announce_ports(&self) {
        let Some(lister) = &self.ports else {
            return;
        };

        match ports::list(lister.as_ref()) {
            Ok(available) => ports::announce(&self.broadcast, &available),
            Err(e) => warn!(%e, "Could not list ports"),
        }
    }

    /// Stop everything.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}
