//! Fan-out of [`Notice`]s to every connected client.
//!
//! The broadcaster is a task owning the set of clients.
//! Publishing, joining and leaving are all messages on one queue,
//! so a client only sees notices published after it joined and before it left.
//!
//! Each client has its own bounded outbox, drained by that client's websocket writer.
//! A full or closed outbox counts as a failed delivery and removes the client,
//! so one stuck client never holds up the others.

use std::collections::HashMap;

use tokio::sync::{
    mpsc::{self, error::TrySendError},
    oneshot,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, trace, warn, Instrument};

use crate::{events::Notice, user::User};

/// The clients currently connected, and where to put their messages.
#[derive(Debug, Default)]
pub(crate) struct ClientSet(HashMap<User, mpsc::Sender<String>>);

impl ClientSet {
    pub(crate) fn insert(&mut self, user: User, outbox: mpsc::Sender<String>) {
        self.0.insert(user, outbox);
    }

    pub(crate) fn remove(&mut self, user: &User) -> bool {
        self.0.remove(user).is_some()
    }

    pub(crate) fn len(&self) -> usize {
        self.0.len()
    }

    /// Give the text to every client.
    /// Clients which could not take it are removed and returned.
    pub(crate) fn deliver(&mut self, text: &str) -> Vec<User> {
        let mut failed = vec![];

        for (user, outbox) in &self.0 {
            match outbox.try_send(text.to_string()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    warn!(%user, "Client is not keeping up, removing it");
                    failed.push(user.clone());
                }
                Err(TrySendError::Closed(_)) => {
                    debug!(%user, "Client went away, removing it");
                    failed.push(user.clone());
                }
            }
        }

        for user in &failed {
            self.0.remove(user);
        }

        failed
    }
}

#[derive(Debug)]
pub(crate) enum BroadcastMessage {
    Publish(Notice),
    Join {
        user: User,
        outbox: mpsc::Sender<String>,
    },
    Leave(User),
    Count(oneshot::Sender<usize>),
}

struct Broadcaster {
    messages: mpsc::UnboundedReceiver<BroadcastMessage>,
    clients: ClientSet,
    shutdown: CancellationToken,
}

impl Broadcaster {
    async fn run(mut self) {
        loop {
            let message = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                message = self.messages.recv() => match message {
                    Some(message) => message,
                    None => break,
                },
            };

            match message {
                BroadcastMessage::Publish(notice) => {
                    let text = notice.to_string();
                    trace!(source = notice.source(), %text, clients = self.clients.len(), "Broadcasting");

                    let failed = self.clients.deliver(&text);
                    if !failed.is_empty() {
                        info!(removed = failed.len(), "Dropped client(s) after failed delivery");
                    }
                }
                BroadcastMessage::Join { user, outbox } => {
                    debug!(%user, "Client joined");
                    self.clients.insert(user, outbox);
                }
                BroadcastMessage::Leave(user) => {
                    if self.clients.remove(&user) {
                        debug!(%user, "Client left");
                    }
                }
                BroadcastMessage::Count(reply) => {
                    let _ = reply.send(self.clients.len());
                }
            }
        }

        debug!("Broadcaster stopped");
    }
}

/// A handle for publishing to, and joining, the broadcast.
#[derive(Debug, Clone)]
pub struct BroadcastHandle {
    messages: mpsc::UnboundedSender<BroadcastMessage>,
    outbox_capacity: usize,
}

impl BroadcastHandle {
    /// Spawn the broadcaster.
    /// Each client may have at most `outbox_capacity` undelivered messages.
    pub fn new(outbox_capacity: usize, shutdown: CancellationToken) -> Self {
        let (messages_tx, messages_rx) = mpsc::unbounded_channel();

        let broadcaster = Broadcaster {
            messages: messages_rx,
            clients: ClientSet::default(),
            shutdown,
        };

        tokio::spawn(broadcaster.run().instrument(info_span!("Broadcaster")));

        Self {
            messages: messages_tx,
            outbox_capacity,
        }
    }

    fn send(&self, message: BroadcastMessage) {
        if self.messages.send(message).is_err() {
            debug!("Broadcaster has stopped, message dropped");
        }
    }

    /// Queue a notice for every client connected when it is dispatched.
    pub fn publish<N: Into<Notice>>(&self, notice: N) {
        self.send(BroadcastMessage::Publish(notice.into()))
    }

    /// Start receiving notices as the given user.
    pub fn join(&self, user: User) -> mpsc::Receiver<String> {
        let (outbox, inbox) = mpsc::channel(self.outbox_capacity);
        self.send(BroadcastMessage::Join { user, outbox });

        inbox
    }

    /// Stop sending notices to the given user.
    pub fn leave(&self, user: User) {
        self.send(BroadcastMessage::Leave(user))
    }

    /// How many clients are joined, once every message queued before this call is handled.
    pub async fn client_count(&self) -> usize {
        let (tx, rx) = oneshot::channel();
        self.send(BroadcastMessage::Count(tx));

        rx.await.unwrap_or_default()
    }
}
