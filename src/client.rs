use std::{
    pin::Pin,
    task::{Context, Poll},
};

use futures::{channel::mpsc, Sink, SinkExt, Stream, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, error};
use tungstenite::Message;

use crate::{actions::Action, error::Error};

/// A websocket client of the relay.
///
/// Actions go out through [`ClientHandleTx`], every line the relay broadcasts
/// comes back through [`ClientHandleRx`].
pub struct ClientHandle {
    tx: ClientHandleTx,
    rx: ClientHandleRx,
}

struct Client {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    notices: mpsc::UnboundedSender<String>,
    actions: mpsc::UnboundedReceiver<Action>,
}

impl Client {
    async fn run(self) {
        let (mut ws_tx, mut ws_rx) = self.stream.split();

        let mut actions_rx = self.actions;
        let mut notices_tx = self.notices;

        let actions_handle = tokio::spawn(async move {
            while let Some(action) = actions_rx.next().await {
                if let Err(e) = ws_tx.send(Message::Text(action.serialize())).await {
                    error!(?e, "Could not send message to server");
                    break;
                }
            }
        });

        let notices_handle = tokio::spawn(async move {
            while let Some(message) = ws_rx.next().await {
                let text = match message {
                    Ok(Message::Text(text)) => text,
                    Ok(Message::Close(_)) => break,
                    Ok(_) => continue,
                    Err(e) => {
                        debug!(?e, "Websocket closed");
                        break;
                    }
                };

                if notices_tx.send(text).await.is_err() {
                    debug!("Nobody is listening for notices");
                    break;
                }
            }
        });

        tokio::select! {
            _ = actions_handle => {
                debug!("Actions loop returned");
            },
            _ = notices_handle => {
                debug!("Notices loop returned");
            },
        }
    }
}

/// The clonable sender the client can use to ask actions of the server.
#[derive(Debug, Clone)]
pub struct ClientHandleTx(mpsc::UnboundedSender<Action>);

impl ClientHandleTx {
    async fn send_or_ws_issue(&mut self, action: Action) -> Result<(), Error> {
        self.send(action)
            .await
            .map_err(|e| Error::WebsocketIssue(e.to_string()))
    }

    /// Ask the relay to use the given port and baud rate.
    pub async fn reconfigure(&mut self, port: &str, baud_rate: u32) -> Result<(), Error> {
        self.send_or_ws_issue(Action::reconfigure(port, baud_rate))
            .await
    }

    /// Ask the relay to write a command to the device.
    pub async fn command(&mut self, command: &str) -> Result<(), Error> {
        self.send_or_ws_issue(Action::command(command)).await
    }
}

impl Sink<Action> for ClientHandleTx {
    type Error = mpsc::SendError;

    fn poll_ready(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.0.poll_ready(cx)
    }

    fn start_send(mut self: Pin<&mut Self>, item: Action) -> Result<(), Self::Error> {
        self.0.start_send_unpin(item)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.0.poll_flush_unpin(cx)
    }

    fn poll_close(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.0.poll_close_unpin(cx)
    }
}

/// The single receiver a client has for lines broadcast by the relay.
#[derive(Debug)]
pub struct ClientHandleRx(mpsc::UnboundedReceiver<String>);

impl ClientHandleRx {
    /// Await the next line from the relay.
    pub async fn next_text(&mut self) -> Result<String, Error> {
        self.next()
            .await
            .ok_or_else(|| Error::WebsocketIssue("Connection to relay closed".into()))
    }
}

impl Stream for ClientHandleRx {
    type Item = String;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.0.poll_next_unpin(cx)
    }
}

impl ClientHandle {
    /// Connect to a relay, given a URL such as `ws://127.0.0.1:8080/serialmonitor`.
    pub async fn new(url: &str) -> Result<Self, Error> {
        let (stream, _) = tokio_tungstenite::connect_async(url).await?;

        let (action_tx, action_rx) = mpsc::unbounded();
        let (notice_tx, notice_rx) = mpsc::unbounded();

        let client = Client {
            stream,
            notices: notice_tx,
            actions: action_rx,
        };

        tokio::spawn(async move { client.run().await });

        Ok(Self {
            tx: ClientHandleTx(action_tx),
            rx: ClientHandleRx(notice_rx),
        })
    }

    /// Split into sender and receiver parts of the client handle.
    pub fn split(self) -> (ClientHandleTx, ClientHandleRx) {
        (self.tx, self.rx)
    }

    /// See [`ClientHandleTx::reconfigure`].
    pub async fn reconfigure(&mut self, port: &str, baud_rate: u32) -> Result<(), Error> {
        self.tx.reconfigure(port, baud_rate).await
    }

    /// See [`ClientHandleTx::command`].
    pub async fn command(&mut self, command: &str) -> Result<(), Error> {
        self.tx.command(command).await
    }

    /// See [`ClientHandleRx::next_text`].
    pub async fn next_text(&mut self) -> Result<String, Error> {
        self.rx.next_text().await
    }
}
