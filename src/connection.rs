//! Owns the single connection to the device.
//!
//! All access to the connection and the settings it was opened with goes through one lock,
//! so replacing the connection, checking whether it is open, and writing to it never interleave.
//! At most one connection exists at any time: a new one is only opened after the old one is closed
//! and its reader has stopped.
//!
//! The supervisor task is what brings the device back after it was unplugged,
//! or keeps trying while it cannot be opened.

use std::{sync::Arc, time::Duration};

use tokio::{
    io::{AsyncWriteExt, WriteHalf},
    sync::{mpsc, watch, Mutex},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, trace, warn, Instrument};

use crate::{
    broadcast::BroadcastHandle,
    config::Config,
    endpoint::{Connector, PhysicalConnection},
    error::Error,
    events::Status,
    reader::{InboundReader, ReaderExit},
    serial::{codecs::lines::Framer, OutboundRequest},
    settings::ConnectionSettings,
};

/// Timings and sizes the manager works with.
#[derive(Debug, Clone)]
pub struct ConnectionOptions {
    /// Wait between automatic open attempts, and before reconnecting after a read failure.
    pub backoff: Duration,

    /// Wait between closing and re-opening.
    pub settle_delay: Duration,

    /// Pause after each read.
    pub read_throttle: Option<Duration>,

    /// Bytes per read.
    pub read_buffer_size: usize,
}

impl From<&Config> for ConnectionOptions {
    fn from(config: &Config) -> Self {
        Self {
            backoff: config.reconnect_backoff(),
            settle_delay: config.settle_delay(),
            read_throttle: config.read_throttle(),
            read_buffer_size: config.read_buffer_size,
        }
    }
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

/// What [`ConnectionManager::configure`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Configured {
    /// The settings were new; the connection was replaced.
    Changed,

    /// The settings were already in use; nothing happened.
    Unchanged,
}

struct Link {
    generation: u64,
    writer: WriteHalf<Box<dyn PhysicalConnection>>,
    cancel: CancellationToken,
    reader: JoinHandle<()>,
}

#[derive(Default)]
struct Slot {
    settings: ConnectionSettings,
    link: Option<Link>,

    // Bumped for each opened connection.
    generation: u64,
}

/// The single owner of the device connection.
pub struct ConnectionManager {
    slot: Mutex<Slot>,
    connector: Arc<dyn Connector>,
    broadcast: BroadcastHandle,
    options: ConnectionOptions,

    // The generation of the open connection, if one is open.
    state: watch::Sender<Option<u64>>,

    exits: mpsc::UnboundedSender<ReaderExit>,
    shutdown: CancellationToken,
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("open", &*self.state.borrow())
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl ConnectionManager {
    /// Create the manager and spawn its supervisor.
    ///
    /// If `initial` names a port it is opened right away.
    pub fn start(
        connector: Arc<dyn Connector>,
        broadcast: BroadcastHandle,
        options: ConnectionOptions,
        initial: ConnectionSettings,
        shutdown: CancellationToken,
    ) -> Arc<Self> {
        let (exits_tx, exits_rx) = mpsc::unbounded_channel();
        let (state, _) = watch::channel(None);

        let manager = Arc::new(Self {
            slot: Mutex::new(Slot {
                settings: initial,
                ..Default::default()
            }),
            connector,
            broadcast,
            options,
            state,
            exits: exits_tx,
            shutdown,
        });

        tokio::spawn(
            manager
                .clone()
                .supervise(exits_rx)
                .instrument(info_span!("Supervisor")),
        );

        manager
    }

    /// The settings currently in use.
    pub async fn settings(&self) -> ConnectionSettings {
        self.slot.lock().await.settings.clone()
    }

    /// Whether a connection is open right now.
    pub fn is_open(&self) -> bool {
        self.state.borrow().is_some()
    }

    /// Follow the connection state: the generation of the open connection, or `None`.
    pub fn watch(&self) -> watch::Receiver<Option<u64>> {
        self.state.subscribe()
    }

    /// Use new settings.
    ///
    /// If they differ from the current ones the connection is replaced.
    /// Either way the outcome is broadcast.
    pub async fn configure(&self, settings: ConnectionSettings) -> Configured {
        let mut slot = self.slot.lock().await;

        if slot.settings == settings {
            debug!(%settings, "Settings unchanged");
            self.broadcast.publish(Status::SettingsUnchanged);
            return Configured::Unchanged;
        }

        info!(old = %slot.settings, new = %settings, "Settings changed");
        slot.settings = settings.clone();
        self.broadcast.publish(Status::SettingsChanged(settings));

        self.reconnect_locked(&mut slot).await;

        Configured::Changed
    }

    /// Close the connection if any, wait for the port to settle, and open it again.
    pub async fn reconnect(&self) {
        let mut slot = self.slot.lock().await;
        self.reconnect_locked(&mut slot).await;
    }

    /// Open the connection unless it already is.
    /// Returns whether a connection is open afterwards.
    pub async fn open(&self) -> bool {
        let mut slot = self.slot.lock().await;

        if slot.link.is_some() {
            return true;
        }

        self.open_locked(&mut slot)
    }

    /// Close the connection, if open.
    pub async fn close(&self) {
        let mut slot = self.slot.lock().await;
        self.close_locked(&mut slot).await;
    }

    /// Write a request to the device.
    pub async fn write(&self, request: &OutboundRequest) -> Result<(), Error> {
        let mut slot = self.slot.lock().await;
        let link = slot.link.as_mut().ok_or(Error::NotConnected)?;

        link.writer.write_all(request.as_bytes()).await?;
        link.writer.flush().await?;

        trace!(generation = link.generation, %request, "Wrote to port");

        Ok(())
    }

    /// React to the available ports changing.
    ///
    /// If the configured port is missing from `available` the connection is replaced.
    /// If additionally the list `shrank`, the port is considered gone for good
    /// and the settings are cleared first.
    pub async fn ports_changed(&self, available: &[String], shrank: bool) {
        let mut slot = self.slot.lock().await;

        if slot.settings.is_unconfigured() || available.contains(&slot.settings.port) {
            return;
        }

        if shrank {
            info!(port = %slot.settings.port, "Port disappeared, clearing settings");
            slot.settings = ConnectionSettings::unconfigured();
            self.broadcast.publish(Status::PortRemoved);
        }

        self.reconnect_locked(&mut slot).await;
    }

    async fn reconnect_locked(&self, slot: &mut Slot) {
        self.close_locked(slot).await;

        tokio::time::sleep(self.options.settle_delay).await;

        self.open_locked(slot);
    }

    async fn close_locked(&self, slot: &mut Slot) {
        let Some(link) = slot.link.take() else {
            return;
        };

        debug!(generation = link.generation, "Closing connection");

        link.cancel.cancel();

        let mut writer = link.writer;
        if let Err(e) = writer.shutdown().await {
            debug!(?e, "Problem shutting down writer, closing anyway");
        }
        drop(writer);

        if let Err(e) = link.reader.await {
            warn!(?e, "Reader task did not finish cleanly");
        }

        self.state.send_replace(None);
    }

    fn open_locked(&self, slot: &mut Slot) -> bool {
        if slot.settings.is_unconfigured() {
            debug!("Not opening, no port selected");
            self.broadcast.publish(Status::NoPortSelected);
            return false;
        }

        let settings = slot.settings.clone();

        let connection = match self.connector.open(&settings) {
            Ok(connection) => connection,
            Err(e) => {
                warn!(%settings, %e, "Could not open port");

                let problem = match e {
                    Error::Open { problem, .. } => problem,
                    other => other.to_string(),
                };
                self.broadcast
                    .publish(Status::OpenFailed { settings, problem });

                return false;
            }
        };

        slot.generation += 1;
        let generation = slot.generation;

        info!(%settings, generation, "Connected");
        self.broadcast.publish(Status::Connected(settings.clone()));

        let (read_half, write_half) = tokio::io::split(connection);
        let cancel = self.shutdown.child_token();

        let reader = InboundReader {
            connection: read_half,
            generation,
            framer: Framer::default(),
            broadcast: self.broadcast.clone(),
            exits: self.exits.clone(),
            cancel: cancel.clone(),
            buffer_size: self.options.read_buffer_size,
            throttle: self.options.read_throttle,
        };

        let reader = tokio::spawn(
            reader
                .run()
                .instrument(info_span!("Reader", port = %settings.port, generation)),
        );

        slot.link = Some(Link {
            generation,
            writer: write_half,
            cancel,
            reader,
        });
        self.state.send_replace(Some(generation));

        true
    }

    /// Open the port if it is closed and one is selected.
    async fn open_if_configured(&self) {
        let mut slot = self.slot.lock().await;

        if slot.link.is_some() || slot.settings.is_unconfigured() {
            return;
        }

        self.open_locked(&mut slot);
    }

    /// Reconnect after the connection with the given generation failed,
    /// unless it was already replaced by a newer one.
    async fn recover(&self, generation: u64) {
        let mut slot = self.slot.lock().await;

        if let Some(link) = &slot.link {
            if link.generation != generation {
                debug!(failed = generation, current = link.generation, "Already replaced");
                return;
            }
        }

        self.reconnect_locked(&mut slot).await;
    }

    /// Sleep, unless shutting down. Returns false if shutting down.
    async fn pause(&self, duration: Duration) -> bool {
        tokio::select! {
            _ = self.shutdown.cancelled() => false,
            _ = tokio::time::sleep(duration) => true,
        }
    }

    async fn supervise(self: Arc<Self>, mut exits: mpsc::UnboundedReceiver<ReaderExit>) {
        let mut state = self.state.subscribe();

        self.open_if_configured().await;

        loop {
            let current = *state.borrow_and_update();

            match current {
                Some(generation) => {
                    tokio::select! {
                        _ = self.shutdown.cancelled() => break,
                        _ = state.changed() => continue,
                        exit = exits.recv() => {
                            let Some(exit) = exit else { break };

                            if exit.generation != generation {
                                trace!(?exit, "Ignoring exit of an old reader");
                                continue;
                            }

                            warn!(generation, problem = %exit.problem, "Lost the device, reconnecting after backoff");

                            if !self.pause(self.options.backoff).await {
                                break;
                            }
                            self.recover(generation).await;
                        }
                    }
                }
                None => {
                    tokio::select! {
                        _ = self.shutdown.cancelled() => break,
                        _ = state.changed() => continue,
                        _ = tokio::time::sleep(self.options.backoff) => {
                            self.open_if_configured().await;
                        }
                    }
                }
            }
        }

        debug!("Supervisor stopping, closing connection");
        self.close().await;
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use pretty_assertions::assert_eq;
    use tokio::time::timeout;

    use super::*;
    use crate::{
        mock::{MockConnector, MockDevices},
        user::User,
    };

    fn quick() -> ConnectionOptions {
        ConnectionOptions {
            backoff: Duration::from_millis(50),
            settle_delay: Duration::from_millis(5),
            read_throttle: None,
            read_buffer_size: 128,
        }
    }

    struct Harness {
        manager: Arc<ConnectionManager>,
        connector: MockConnector,
        devices: MockDevices,
        inbox: mpsc::Receiver<String>,
        shutdown: CancellationToken,
    }

    impl Harness {
        async fn new(options: ConnectionOptions) -> Self {
            let shutdown = CancellationToken::new();
            let broadcast = BroadcastHandle::new(1024, shutdown.clone());
            let inbox = broadcast.join(User::new("observer"));
            assert_eq!(broadcast.client_count().await, 1);

            let (connector, devices) = MockConnector::new();

            let manager = ConnectionManager::start(
                Arc::new(connector.clone()),
                broadcast,
                options,
                ConnectionSettings::unconfigured(),
                shutdown.clone(),
            );

            Self {
                manager,
                connector,
                devices,
                inbox,
                shutdown,
            }
        }

        async fn next_text(&mut self) -> String {
            timeout(Duration::from_secs(5), self.inbox.recv())
                .await
                .expect("Should get a notice in time")
                .expect("Broadcast should be alive")
        }

        async fn expect(&mut self, status: Status) {
            assert_eq!(self.next_text().await, status.to_string());
        }
    }

    impl Drop for Harness {
        fn drop(&mut self) {
            self.shutdown.cancel();
        }
    }

    #[tokio::test]
    async fn same_settings_twice_reconnects_once() {
        let mut h = Harness::new(quick()).await;
        let settings = ConnectionSettings::new("COM3", 9600);

        assert_eq!(
            h.manager.configure(settings.clone()).await,
            Configured::Changed
        );
        assert_eq!(
            h.manager.configure(settings.clone()).await,
            Configured::Unchanged
        );

        h.expect(Status::SettingsChanged(settings.clone())).await;
        h.expect(Status::Connected(settings.clone())).await;
        h.expect(Status::SettingsUnchanged).await;

        assert_eq!(h.connector.open_attempts(), vec![settings]);
        assert_eq!(h.connector.live_connections(), 1);
    }

    #[tokio::test]
    async fn open_without_port_reports_it() {
        let mut h = Harness::new(quick()).await;

        assert!(!h.manager.open().await);
        h.expect(Status::NoPortSelected).await;

        assert!(h.connector.open_attempts().is_empty());
    }

    #[tokio::test]
    async fn at_most_one_connection_after_concurrent_changes() {
        let h = Harness::new(quick()).await;

        let mut tasks = vec![];
        for i in 0..8 {
            let manager = h.manager.clone();
            tasks.push(tokio::spawn(async move {
                if i % 2 == 0 {
                    manager
                        .configure(ConnectionSettings::new(format!("COM{i}"), 9600))
                        .await;
                } else {
                    manager.reconnect().await;
                }
            }));
        }

        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(h.connector.live_connections(), 1);
        assert!(h.manager.is_open());
    }

    #[tokio::test]
    async fn device_lines_are_broadcast() {
        let mut h = Harness::new(quick()).await;
        let settings = ConnectionSettings::new("/dev/ttyACM0", 115_200);

        h.manager.configure(settings.clone()).await;
        h.expect(Status::SettingsChanged(settings.clone())).await;
        h.expect(Status::Connected(settings)).await;

        let mut device = h.devices.next().await.unwrap();
        device.emit(b"O").await.unwrap();
        device.emit(b"K\n").await.unwrap();

        assert_eq!(h.next_text().await, "OK");
    }

    #[tokio::test]
    async fn writes_keep_their_order() {
        let mut h = Harness::new(quick()).await;

        h.manager
            .configure(ConnectionSettings::new("COM1", 9600))
            .await;
        let mut device = h.devices.next().await.unwrap();

        for i in 0..20 {
            h.manager
                .write(&OutboundRequest::new(format!("cmd {i}")))
                .await
                .unwrap();
        }

        for i in 0..20 {
            assert_eq!(device.read_line().await.unwrap(), format!("cmd {i}\n"));
        }
    }

    #[tokio::test]
    async fn write_without_connection_is_an_error() {
        let h = Harness::new(quick()).await;

        let err = h
            .manager
            .write(&OutboundRequest::new("PING"))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::NotConnected));
    }

    #[tokio::test]
    async fn unplugged_device_is_reopened_with_same_settings() {
        let mut h = Harness::new(quick()).await;
        let settings = ConnectionSettings::new("COM7", 57_600);

        h.manager.configure(settings.clone()).await;
        let device = h.devices.next().await.unwrap();

        let mut state = h.manager.watch();
        let first = (*state.borrow_and_update()).unwrap();

        device.unplug();

        // A new device shows up once the supervisor has reconnected.
        let device = timeout(Duration::from_secs(5), h.devices.next())
            .await
            .expect("Should reconnect in time")
            .unwrap();
        assert_eq!(device.settings(), &settings);

        assert_eq!(h.connector.open_attempts(), vec![settings.clone(), settings]);

        let second = loop {
            if let Some(generation) = *state.borrow_and_update() {
                if generation != first {
                    break generation;
                }
            }
            state.changed().await.unwrap();
        };
        assert!(second > first);
        assert_eq!(h.connector.live_connections(), 1);
    }

    #[tokio::test]
    async fn failed_open_is_retried() {
        let mut h = Harness::new(quick()).await;
        let settings = ConnectionSettings::new("COM3", 9600);

        h.connector.refuse(Some("device not found"));
        h.manager.configure(settings.clone()).await;

        h.expect(Status::SettingsChanged(settings.clone())).await;
        h.expect(Status::OpenFailed {
            settings: settings.clone(),
            problem: "device not found".into(),
        })
        .await;
        assert!(!h.manager.is_open());

        h.connector.refuse(None);

        let device = timeout(Duration::from_secs(5), h.devices.next())
            .await
            .expect("Supervisor should retry")
            .unwrap();
        assert_eq!(device.settings(), &settings);
        assert!(h.connector.open_attempts().len() >= 2);
    }

    #[tokio::test]
    async fn vanished_port_clears_settings() {
        let mut h = Harness::new(quick()).await;
        let settings = ConnectionSettings::new("COM4", 9600);

        h.manager.configure(settings.clone()).await;
        h.expect(Status::SettingsChanged(settings.clone())).await;
        h.expect(Status::Connected(settings)).await;

        h.manager.ports_changed(&["COM1".to_string()], true).await;

        h.expect(Status::PortRemoved).await;
        h.expect(Status::NoPortSelected).await;

        assert!(h.manager.settings().await.is_unconfigured());
        assert_eq!(h.connector.live_connections(), 0);
    }

    #[tokio::test]
    async fn present_port_is_left_alone() {
        let h = Harness::new(quick()).await;
        let settings = ConnectionSettings::new("COM4", 9600);

        h.manager.configure(settings.clone()).await;
        h.manager
            .ports_changed(&["COM1".to_string(), "COM4".to_string()], true)
            .await;

        assert_eq!(h.manager.settings().await, settings);
        assert_eq!(h.connector.open_attempts().len(), 1);
    }

    #[tokio::test]
    async fn shutdown_closes_connection() {
        let h = Harness::new(quick()).await;

        h.manager
            .configure(ConnectionSettings::new("COM2", 9600))
            .await;
        assert_eq!(h.connector.live_connections(), 1);

        let mut state = h.manager.watch();
        h.shutdown.cancel();

        timeout(Duration::from_secs(5), async {
            while state.borrow_and_update().is_some() {
                state.changed().await.unwrap();
            }
        })
        .await
        .expect("Should close on shutdown");

        assert_eq!(h.connector.live_connections(), 0);
    }
}
