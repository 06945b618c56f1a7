//! In-memory stand-ins for serial hardware, useful to test the relay without actual serial ports.
//!
//! A [`MockConnector`] hands out one in-memory link per successful open.
//! The far end of that link is a [`MockDevice`], which plays the part of the hardware:
//! it can print lines, read what was written to it, and be unplugged by dropping it.

use std::{
    io,
    pin::Pin,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    task::{Context, Poll},
};

use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, DuplexStream, ReadBuf},
    sync::mpsc,
};

use crate::{error::Error, ports::PortLister, settings::ConnectionSettings};

const MOCK_BUFFER_SIZE: usize = 4096;

#[derive(Debug, Default)]
struct MockState {
    refusal: Option<String>,
    attempts: Vec<ConnectionSettings>,
}

/// Opens in-memory devices instead of serial ports.
///
/// Clones share state, so a test can keep one clone for inspection
/// while the relay owns another.
#[derive(Debug, Clone)]
pub struct MockConnector {
    state: Arc<Mutex<MockState>>,
    live: Arc<AtomicUsize>,
    devices: mpsc::UnboundedSender<MockDevice>,
}

impl MockConnector {
    /// A connector which opens successfully, and the receiver of the devices it opens.
    pub fn new() -> (Self, MockDevices) {
        let (devices, devices_rx) = mpsc::unbounded_channel();

        (
            Self {
                state: Arc::default(),
                live: Arc::default(),
                devices,
            },
            MockDevices(devices_rx),
        )
    }

    /// Make future opens fail with this problem, or succeed again if `None`.
    pub fn refuse(&self, problem: Option<&str>) {
        self.lock().refusal = problem.map(Into::into);
    }

    /// Every open attempted so far, in order.
    pub fn open_attempts(&self) -> Vec<ConnectionSettings> {
        self.lock().attempts.clone()
    }

    /// How many opened connections have not been dropped yet.
    pub fn live_connections(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().expect("Mock state lock should not be poisoned")
    }

    pub(crate) fn open_mock(&self, settings: &ConnectionSettings) -> Result<MockConnection, Error> {
        let refusal = {
            let mut state = self.lock();
            state.attempts.push(settings.clone());
            state.refusal.clone()
        };

        if let Some(problem) = refusal {
            return Err(Error::Open {
                port: settings.port.clone(),
                baud_rate: settings.baud_rate,
                problem,
            });
        }

        let (ours, theirs) = tokio::io::duplex(MOCK_BUFFER_SIZE);

        self.live.fetch_add(1, Ordering::SeqCst);
        let connection = MockConnection {
            stream: ours,
            _live: LiveGuard(self.live.clone()),
        };

        // Nobody listening for devices is fine, the device then stays plugged in forever.
        let _ = self.devices.send(MockDevice {
            settings: settings.clone(),
            stream: theirs,
            received: vec![],
        });

        Ok(connection)
    }
}

/// Devices opened by a [`MockConnector`], in the order they were opened.
#[derive(Debug)]
pub struct MockDevices(mpsc::UnboundedReceiver<MockDevice>);

impl MockDevices {
    /// Wait for the next device to be opened.
    pub async fn next(&mut self) -> Option<MockDevice> {
        self.0.recv().await
    }
}

/// The hardware side of a mocked connection.
///
/// Dropping it is the same as pulling the cable.
#[derive(Debug)]
pub struct MockDevice {
    settings: ConnectionSettings,
    stream: DuplexStream,
    received: Vec<u8>,
}

impl MockDevice {
    /// The settings this device was opened with.
    pub fn settings(&self) -> &ConnectionSettings {
        &self.settings
    }

    /// Send bytes towards the relay, as if the device printed them.
    pub async fn emit(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.stream.write_all(bytes).await?;
        self.stream.flush().await
    }

    /// Wait for the next newline terminated line the relay wrote to the device.
    /// The newline is included.
    pub async fn read_line(&mut self) -> io::Result<String> {
        loop {
            if let Some(position) = self.received.iter().position(|&byte| byte == b'\n') {
                let line = self.received.drain(..=position).collect::<Vec<_>>();

                return String::from_utf8(line)
                    .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e));
            }

            let mut buffer = [0; 256];
            let read = self.stream.read(&mut buffer).await?;
            if read == 0 {
                return Err(io::ErrorKind::UnexpectedEof.into());
            }
            self.received.extend_from_slice(&buffer[..read]);
        }
    }

    /// Pull the cable.
    pub fn unplug(self) {}
}

struct LiveGuard(Arc<AtomicUsize>);

impl Drop for LiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// The relay side of a mocked connection.
pub(crate) struct MockConnection {
    stream: DuplexStream,
    _live: LiveGuard,
}

impl AsyncRead for MockConnection {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stream).poll_read(cx, buf)
    }
}

impl AsyncWrite for MockConnection {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.stream).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stream).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stream).poll_shutdown(cx)
    }
}

/// A port list which only changes when told to.
#[derive(Debug, Clone, Default)]
pub struct MockPorts(Arc<Mutex<Vec<String>>>);

impl MockPorts {
    /// Start out with these ports available.
    pub fn new<S: AsRef<str>>(ports: &[S]) -> Self {
        let mocked = Self::default();
        mocked.set(ports);
        mocked
    }

    /// Replace the available ports.
    pub fn set<S: AsRef<str>>(&self, ports: &[S]) {
        *self.0.lock().expect("Mock ports lock should not be poisoned") =
            ports.iter().map(|port| port.as_ref().to_string()).collect();
    }
}

impl PortLister for MockPorts {
    fn available_ports(&self) -> Result<Vec<String>, Error> {
        Ok(self
            .0
            .lock()
            .expect("Mock ports lock should not be poisoned")
            .clone())
    }
}
