use std::net::SocketAddr;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        ConnectInfo, WebSocketUpgrade,
    },
    response::IntoResponse,
    Extension, TypedHeader,
};
use futures::{sink::Sink, stream::Stream, SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, info_span, trace, Instrument};

use crate::{relay::Relay, router::RequestRouter, user::User};

// Any origin may connect, the relay is meant for local tooling.
pub(crate) async fn ws_handler(
    ws: WebSocketUpgrade,
    user_agent: Option<TypedHeader<headers::UserAgent>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Extension(relay): Extension<Relay>,
) -> impl IntoResponse {
    if let Some(TypedHeader(user_agent)) = user_agent {
        info!("`{}`@`{addr}` connected", user_agent.as_str());
    }

    ws.on_upgrade(move |socket| {
        let user = User::new(&addr.to_string());

        let span = info_span!("User", %user);

        handle_websocket(socket, user, relay).instrument(span)
    })
}

pub(crate) async fn read<S>(mut receiver: S, router: RequestRouter)
where
    S: Unpin,
    S: Stream<Item = Result<Message, axum::Error>>,
{
    while let Some(message) = receiver.next().await {
        match message {
            Ok(Message::Text(request)) => {
                trace!(%request, "client request");
                router.handle(&request).await;
            }
            Ok(Message::Binary(_)) => {
                debug!("client sent binary data, ignoring");
            }
            Ok(Message::Ping(_)) => {
                trace!("socket ping");
            }
            Ok(Message::Pong(_)) => {
                trace!("socket pong");
            }
            Ok(Message::Close(_)) => {
                debug!("client disconnected");
                break;
            }
            Err(e) => {
                debug!(%e, "client read problem");
                break;
            }
        }
    }
}

pub(crate) async fn write(
    mut sender: impl Sink<Message> + Unpin,
    mut inbox: mpsc::Receiver<String>,
) {
    while let Some(text) = inbox.recv().await {
        if sender.send(Message::Text(text)).await.is_err() {
            debug!("client disconnected");
            return;
        }
        trace!("Notice flushed");
    }

    // The broadcaster gave up on this client, so tell it the session is over.
    debug!("No more notices for this client, closing");
    if sender.send(Message::Close(None)).await.is_err() {
        debug!("client already gone");
    }
}

pub(crate) async fn handle_websocket(websocket: WebSocket, user: User, relay: Relay) {
    let (stream_sender, stream_receiver) = websocket.split();

    let inbox = relay.broadcast().join(user.clone());

    // Joined first, so the new client sees the list too.
    relay.announce_ports();

    let mut write_handle = tokio::spawn(write(stream_sender, inbox).in_current_span());

    // Either side ending ends the session.
    tokio::select! {
        _ = read(stream_receiver, relay.router().clone()) => debug!("Read side done"),
        _ = &mut write_handle => debug!("Write side done"),
    }

    debug!("Leaving broadcast");
    relay.broadcast().leave(user);

    // This ensures the underlying TCP connection gets closed,
    // which signals the peer that the session is over.
    write_handle.abort();
}
