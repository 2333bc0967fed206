//! Live-observer registry.
//!
//! Owns the set of currently connected observers and fans out updates to
//! them. An explicit object owned by the server — not a singleton — per-
//! connection delivery happens over bounded channels, and a failed send
//! prunes only the failing connection.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{mpsc, RwLock};
use tracing::debug;

use crate::groups::Group;
use crate::watcher::ChangeKind;

/// Outbound queue depth per connection. A client that falls this far behind
/// is treated as dead.
const CLIENT_QUEUE_CAPACITY: usize = 64;

/// Message shapes pushed over the live channel.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerMessage {
    Files {
        files: Vec<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        event: Option<ChangeKind>,
        #[serde(skip_serializing_if = "Option::is_none")]
        path: Option<String>,
    },
    Groups {
        groups: Vec<Group>,
    },
}

impl ServerMessage {
    /// Initial-connect file list (no triggering event).
    pub fn file_list(files: Vec<String>) -> Self {
        ServerMessage::Files {
            files,
            event: None,
            path: None,
        }
    }

    /// File list refreshed by a watch event.
    pub fn file_update(event: ChangeKind, path: String, files: Vec<String>) -> Self {
        ServerMessage::Files {
            files,
            event: Some(event),
            path: Some(path),
        }
    }
}

/// What a connection's socket task receives from the hub.
#[derive(Debug, Clone)]
pub enum Outbound {
    Message(ServerMessage),
    Close,
}

/// Registry of live observer connections.
#[derive(Debug, Default)]
pub struct SyncHub {
    clients: RwLock<HashMap<u64, mpsc::Sender<Outbound>>>,
    next_id: AtomicU64,
}

impl SyncHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the outbound channel for a new connection and register it.
    /// Returns the connection id and the receiving half for the socket task.
    pub async fn register(&self) -> (u64, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(CLIENT_QUEUE_CAPACITY);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.clients.write().await.insert(id, tx);
        debug!(client_id = id, "Client registered");
        (id, rx)
    }

    pub async fn unregister(&self, id: u64) {
        if self.clients.write().await.remove(&id).is_some() {
            debug!(client_id = id, "Client unregistered");
        }
    }

    pub async fn client_count(&self) -> usize {
        self.clients.read().await.len()
    }

    /// Send `message` to every live connection.
    ///
    /// A connection whose queue is closed or full is removed; delivery to
    /// the others is unaffected.
    pub async fn broadcast(&self, message: ServerMessage) {
        let mut stale = Vec::new();
        {
            let clients = self.clients.read().await;
            for (id, tx) in clients.iter() {
                if tx.try_send(Outbound::Message(message.clone())).is_err() {
                    stale.push(*id);
                }
            }
        }

        if !stale.is_empty() {
            let mut clients = self.clients.write().await;
            for id in stale {
                clients.remove(&id);
                debug!(client_id = id, "Dropped unreachable client");
            }
        }
    }

    /// Ask every connection to close and clear the registry. Used on
    /// shutdown so the server's graceful drain can complete.
    pub async fn shutdown(&self) {
        let mut clients = self.clients.write().await;
        for (_, tx) in clients.drain() {
            let _ = tx.try_send(Outbound::Close);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn broadcast_reaches_all_and_prunes_dead() {
        let hub = SyncHub::new();
        let (_a, mut rx_a) = hub.register().await;
        let (_b, rx_b) = hub.register().await;
        drop(rx_b); // dead client

        hub.broadcast(ServerMessage::file_list(vec!["a.txt".to_string()]))
            .await;

        assert!(matches!(
            rx_a.recv().await,
            Some(Outbound::Message(ServerMessage::Files { .. }))
        ));
        assert_eq!(hub.client_count().await, 1);
    }

    #[tokio::test]
    async fn shutdown_sends_close_and_clears() {
        let hub = SyncHub::new();
        let (_id, mut rx) = hub.register().await;

        hub.shutdown().await;

        assert!(matches!(rx.recv().await, Some(Outbound::Close)));
        assert_eq!(hub.client_count().await, 0);
    }

    #[tokio::test]
    async fn files_message_shape() {
        let msg = ServerMessage::file_update(
            ChangeKind::Add,
            "notes.md".to_string(),
            vec!["notes.md".to_string()],
        );
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "files");
        assert_eq!(json["event"], "add");
        assert_eq!(json["path"], "notes.md");

        let initial = serde_json::to_value(ServerMessage::file_list(vec![])).unwrap();
        assert!(initial.get("event").is_none());
    }
}
