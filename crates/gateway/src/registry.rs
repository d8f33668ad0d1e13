// Connection Registry
//
// Maps a session's user identifier to its one live push channel. This is the
// only shared mutable structure between the fetch triggers and the socket
// tasks; every mutation goes through the one lock below.

use crate::protocol::PushFrame;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

/// Sending half of a push channel. The socket task owns the receiver;
/// dropping this handle closes the channel and makes that task disconnect.
#[derive(Debug)]
pub struct PushConnection {
    id: String,
    tx: mpsc::UnboundedSender<PushFrame>,
    connected_at: DateTime<Utc>,
}

impl PushConnection {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<PushFrame>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let connection = Self {
            id: Uuid::new_v4().to_string(),
            tx,
            connected_at: Utc::now(),
        };
        (connection, rx)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    fn is_open(&self) -> bool {
        !self.tx.is_closed()
    }
}

/// Outcome of a best-effort push
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Handed to a live channel; the socket write may still fail later
    Delivered,
    /// Nothing registered (or the channel was already gone); frame dropped
    NoRecipient,
}

#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    connections: Arc<RwLock<HashMap<String, PushConnection>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            connections: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Bind `user_id` to `connection`, returning the id of the connection it
    /// replaced. The replaced handle is dropped here, which closes its socket.
    pub async fn register(&self, user_id: &str, connection: PushConnection) -> Option<String> {
        let new_id = connection.id.clone();
        let previous = self
            .connections
            .write()
            .await
            .insert(user_id.to_string(), connection);

        match previous {
            Some(old) => {
                tracing::info!(
                    "Push channel {} for user {} superseded by {}",
                    old.id,
                    user_id,
                    new_id
                );
                Some(old.id)
            }
            None => {
                tracing::info!("Push channel {} registered for user {}", new_id, user_id);
                None
            }
        }
    }

    /// Remove whatever is bound to `user_id`.
    pub async fn unregister(&self, user_id: &str) -> bool {
        self.connections.write().await.remove(user_id).is_some()
    }

    /// Remove the binding only if it is still `connection_id`.
    ///
    /// A superseded socket calls this on its way out and must not evict the
    /// connection that replaced it.
    pub async fn unregister_connection(&self, user_id: &str, connection_id: &str) -> bool {
        let mut connections = self.connections.write().await;
        match connections.get(user_id) {
            Some(current) if current.id == connection_id => {
                connections.remove(user_id);
                tracing::info!("Push channel {} unregistered for user {}", connection_id, user_id);
                true
            }
            _ => false,
        }
    }

    /// Fire-and-forget push. Never blocks on the socket and never errors.
    pub async fn send_to(&self, user_id: &str, frame: PushFrame) -> Delivery {
        let stale_id = {
            let connections = self.connections.read().await;
            let Some(connection) = connections.get(user_id) else {
                return Delivery::NoRecipient;
            };
            match connection.tx.send(frame) {
                Ok(()) => return Delivery::Delivered,
                Err(_) => connection.id.clone(),
            }
        };

        tracing::debug!("Pruning closed push channel {} for user {}", stale_id, user_id);
        self.unregister_connection(user_id, &stale_id).await;
        Delivery::NoRecipient
    }

    pub async fn is_connected(&self, user_id: &str) -> bool {
        self.connections
            .read()
            .await
            .get(user_id)
            .is_some_and(PushConnection::is_open)
    }

    pub async fn connection_id(&self, user_id: &str) -> Option<String> {
        self.connections
            .read()
            .await
            .get(user_id)
            .map(|c| c.id.clone())
    }

    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc::error::TryRecvError;

    fn is_closed(rx: &mut mpsc::UnboundedReceiver<PushFrame>) -> bool {
        loop {
            match rx.try_recv() {
                Ok(_) => continue,
                Err(TryRecvError::Disconnected) => return true,
                Err(TryRecvError::Empty) => return false,
            }
        }
    }

    #[tokio::test]
    async fn test_send_without_recipient_is_silent() {
        let registry = ConnectionRegistry::new();
        let delivery = registry.send_to("nobody", PushFrame::hello(0)).await;
        assert_eq!(delivery, Delivery::NoRecipient);
    }

    #[tokio::test]
    async fn test_register_and_send() {
        let registry = ConnectionRegistry::new();
        let (conn, mut rx) = PushConnection::new();
        assert!(registry.register("user-1", conn).await.is_none());

        assert_eq!(
            registry.send_to("user-1", PushFrame::hello(5)).await,
            Delivery::Delivered
        );
        assert_eq!(rx.recv().await, Some(PushFrame::hello(5)));
    }

    #[tokio::test]
    async fn test_replacement_closes_old_channel() {
        let registry = ConnectionRegistry::new();
        let (first, mut first_rx) = PushConnection::new();
        let first_id = first.id().to_string();
        let (second, mut second_rx) = PushConnection::new();

        registry.register("user-1", first).await;
        let replaced = registry.register("user-1", second).await;
        assert_eq!(replaced.as_deref(), Some(first_id.as_str()));
        assert_eq!(registry.connection_count().await, 1);

        // old receiver sees the sender dropped
        assert!(is_closed(&mut first_rx));

        registry.send_to("user-1", PushFrame::hello(1)).await;
        assert_eq!(second_rx.recv().await, Some(PushFrame::hello(1)));
    }

    #[tokio::test]
    async fn test_late_unregister_of_superseded_connection_is_noop() {
        let registry = ConnectionRegistry::new();
        let (first, _first_rx) = PushConnection::new();
        let first_id = first.id().to_string();
        let (second, _second_rx) = PushConnection::new();
        let second_id = second.id().to_string();

        registry.register("user-1", first).await;
        registry.register("user-1", second).await;

        assert!(!registry.unregister_connection("user-1", &first_id).await);
        assert_eq!(
            registry.connection_id("user-1").await.as_deref(),
            Some(second_id.as_str())
        );
        assert!(registry.unregister_connection("user-1", &second_id).await);
        assert!(!registry.is_connected("user-1").await);
    }

    #[tokio::test]
    async fn test_unregister_absent_is_noop() {
        let registry = ConnectionRegistry::new();
        assert!(!registry.unregister("ghost").await);
    }

    #[tokio::test]
    async fn test_dead_channel_is_pruned_on_send() {
        let registry = ConnectionRegistry::new();
        let (conn, rx) = PushConnection::new();
        registry.register("user-1", conn).await;
        drop(rx);

        assert!(!registry.is_connected("user-1").await);
        assert_eq!(
            registry.send_to("user-1", PushFrame::hello(0)).await,
            Delivery::NoRecipient
        );
        assert_eq!(registry.connection_count().await, 0);
    }

    #[tokio::test]
    async fn test_at_most_one_binding_under_concurrency() {
        let registry = ConnectionRegistry::new();
        let mut receivers = Vec::new();
        let mut tasks = Vec::new();

        for _ in 0..32 {
            let (conn, rx) = PushConnection::new();
            receivers.push(rx);
            let registry = registry.clone();
            tasks.push(tokio::spawn(async move {
                registry.register("shared", conn).await;
                registry.send_to("shared", PushFrame::hello(0)).await
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(registry.connection_count().await, 1);
        let open = receivers
            .iter_mut()
            .map(|rx| is_closed(rx))
            .filter(|closed| !closed)
            .count();
        assert_eq!(open, 1);
    }
}
