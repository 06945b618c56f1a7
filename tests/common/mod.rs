#![allow(dead_code)]

use std::{net::SocketAddr, sync::Arc, time::Duration};

use axum::http::StatusCode;
use color_eyre::{eyre::eyre, Result};
use futures::{SinkExt, StreamExt};
use serial_monitor::{
    config::Config,
    mock::{MockConnector, MockDevice, MockDevices, MockPorts},
    settings::ConnectionSettings,
};
use tokio::{net::TcpStream, sync::oneshot, time::timeout};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{info, Level};

pub type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub const TIMEOUT: Duration = Duration::from_secs(10);

/// A relay backed by mocks, running on a random localhost port.
pub struct Setup {
    pub addr: SocketAddr,
    pub path: String,
    pub connector: MockConnector,
    pub devices: MockDevices,
    pub ports: MockPorts,
    shutdown: CancellationToken,
}

impl Drop for Setup {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Short timings, so recovery happens quickly.
pub fn quick_config() -> Config {
    Config {
        reconnect_backoff_ms: 100,
        settle_delay_ms: 10,
        watch_ports: false,
        port_scan_interval_ms: 20,
        ..Default::default()
    }
}

pub fn quick_config_with(port: &str, baud_rate: u32) -> Config {
    Config {
        initial: Some(ConnectionSettings::new(port, baud_rate)),
        ..quick_config()
    }
}

pub async fn start(config: Config) -> Result<Setup> {
    serial_monitor::logging::init(Level::INFO, None).await;

    let (connector, devices) = MockConnector::new();
    let ports = MockPorts::new(&["COM1", "COM3"]);
    let shutdown = CancellationToken::new();
    let path = config.path.clone();

    let (addr_tx, addr_rx) = oneshot::channel();

    let server_connector = Arc::new(connector.clone());
    let server_ports = Arc::new(ports.clone());
    let server_shutdown = shutdown.clone();
    tokio::spawn(async move {
        serial_monitor::server::run_any_port(
            config,
            server_connector,
            Some(server_ports),
            server_shutdown,
            addr_tx,
        )
        .await
    });

    let addr = addr_rx
        .await
        .expect("Server should reply with allocated address");

    Ok(Setup {
        addr,
        path,
        connector,
        devices,
        ports,
        shutdown,
    })
}

impl Setup {
    pub fn url(&self) -> String {
        format!("ws://{}{}", self.addr, self.path)
    }

    /// Connect a client, and wait until the relay has it joined.
    pub async fn connect(&self) -> Result<Client> {
        info!("Connecting to server on {}", self.url());
        let (mut client, http_response) = tokio_tungstenite::connect_async(self.url()).await?;

        assert_eq!(http_response.status(), StatusCode::SWITCHING_PROTOCOLS);

        // Each client joining makes the relay announce the ports,
        // which this client only sees once it has joined.
        receive_until(&mut client, "Available ports: [COM1, COM3]").await?;

        Ok(client)
    }

    /// The next device the relay opens.
    pub async fn next_device(&mut self) -> Result<MockDevice> {
        timeout(TIMEOUT, self.devices.next())
            .await?
            .ok_or_else(|| eyre!("No more devices"))
    }
}

pub async fn receive(client: &mut Client) -> Result<String> {
    loop {
        let message = timeout(TIMEOUT, client.next())
            .await?
            .ok_or_else(|| eyre!("Stream closed"))??;

        if let tungstenite::Message::Text(text) = message {
            return Ok(text);
        }
    }
}

/// Receive until the expected text arrives.
/// Returns everything received before it.
pub async fn receive_until(client: &mut Client, expected: &str) -> Result<Vec<String>> {
    let mut before = vec![];

    loop {
        let text = receive(client).await?;

        if text == expected {
            return Ok(before);
        }

        before.push(text);
    }
}

pub async fn send(client: &mut Client, text: &str) -> Result<()> {
    client
        .send(tungstenite::Message::Text(text.to_string()))
        .await?;

    Ok(())
}

/// Wait for the relay to end the session, skipping whatever is sent before that.
pub async fn closed(client: &mut Client) -> Result<()> {
    loop {
        match timeout(TIMEOUT, client.next()).await? {
            None | Some(Ok(tungstenite::Message::Close(_))) | Some(Err(_)) => return Ok(()),
            Some(Ok(_)) => continue,
        }
    }
}
