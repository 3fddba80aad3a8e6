//! Connection registry and broadcaster
//!
//! The registry is the single source of truth for which connections are
//! reachable. All mutation and snapshotting happens under one mutex; sends
//! never do. A connection whose send fails during a broadcast is removed
//! and its departure is announced to everyone that is left.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, info};

use crate::chat_log::ChatLog;
use crate::client::Client;
use crate::message::ServerMessage;
use crate::types::ConnectionId;

/// Live connections keyed by handle
#[derive(Debug)]
pub struct ConnectionRegistry {
    clients: Mutex<HashMap<ConnectionId, Client>>,
    chat_log: Arc<ChatLog>,
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new(Arc::new(ChatLog::disabled()))
    }
}

impl ConnectionRegistry {
    /// Create an empty registry reporting departures to `chat_log`
    pub fn new(chat_log: Arc<ChatLog>) -> Self {
        Self {
            clients: Mutex::new(HashMap::new()),
            chat_log,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ConnectionId, Client>> {
        self.clients.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add a client; it becomes a broadcast target immediately
    pub fn register(&self, client: Client) {
        let mut clients = self.lock();
        clients.insert(client.id, client);
        debug!("Total clients: {}", clients.len());
    }

    /// Remove a client, returning its name if it was still registered
    ///
    /// Only the first caller for a given handle gets `Some`, so exactly one
    /// party announces the departure.
    pub fn unregister(&self, id: ConnectionId) -> Option<String> {
        self.lock().remove(&id).map(|client| client.name)
    }

    /// Whether `id` is currently registered
    pub fn contains(&self, id: ConnectionId) -> bool {
        self.lock().contains_key(&id)
    }

    /// Number of registered clients
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// True when nobody is registered
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Display names of everyone registered, in no particular order
    pub fn names(&self) -> Vec<String> {
        self.lock().values().map(|c| c.name.clone()).collect()
    }

    /// Copy of the live client list, taken under the lock
    pub fn snapshot(&self) -> Vec<Client> {
        self.lock().values().cloned().collect()
    }

    /// Send `msg` to every registered client except `exclude`
    ///
    /// Delivery happens on a snapshot outside the lock. A client removed
    /// concurrently may see one extra attempt, which fails and is handled
    /// like any other failure. Departure notices for failed clients are
    /// queued and sent to everyone left, with nobody excluded.
    pub fn broadcast(&self, msg: ServerMessage, exclude: Option<ConnectionId>) {
        let mut pending = VecDeque::from([(msg, exclude)]);

        while let Some((msg, exclude)) = pending.pop_front() {
            for client in self.snapshot() {
                if Some(client.id) == exclude {
                    continue;
                }
                if let Err(e) = client.send(msg.clone()) {
                    debug!("Send to {} failed: {}", client.id, e);
                    if let Some(name) = self.unregister(client.id) {
                        info!("Client {} ({}) unreachable, removed", client.id, name);
                        self.chat_log.record(format!("{} disconnected", name));
                        pending.push_back((ServerMessage::Left { name }, None));
                    }
                }
            }
        }
    }

    /// Remove every client, returning what was registered
    ///
    /// Dropping the returned clients releases their senders, which lets
    /// each writer task flush and close its socket.
    pub fn close_all(&self) -> Vec<Client> {
        self.lock().drain().map(|(_, client)| client).collect()
    }
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;

    use tokio::sync::mpsc;

    use super::*;

    fn addr() -> SocketAddr {
        "127.0.0.1:40000".parse().unwrap()
    }

    fn join(
        registry: &ConnectionRegistry,
        name: &str,
        capacity: usize,
    ) -> (ConnectionId, mpsc::Receiver<ServerMessage>) {
        let (tx, rx) = mpsc::channel(capacity);
        let id = ConnectionId::new();
        registry.register(Client::new(id, name.to_string(), addr(), tx));
        (id, rx)
    }

    fn drain(rx: &mut mpsc::Receiver<ServerMessage>) -> Vec<ServerMessage> {
        let mut out = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            out.push(msg);
        }
        out
    }

    fn chat(text: &str) -> ServerMessage {
        ServerMessage::Chat {
            from: "A".into(),
            text: text.into(),
        }
    }

    #[tokio::test]
    async fn test_broadcast_skips_excluded() {
        let registry = ConnectionRegistry::default();
        let (a, mut rx_a) = join(&registry, "A", 8);
        let (_b, mut rx_b) = join(&registry, "B", 8);
        let (_c, mut rx_c) = join(&registry, "C", 8);

        registry.broadcast(chat("hi"), Some(a));

        assert!(drain(&mut rx_a).is_empty());
        assert_eq!(drain(&mut rx_b), vec![chat("hi")]);
        assert_eq!(drain(&mut rx_c), vec![chat("hi")]);
    }

    #[tokio::test]
    async fn test_broadcast_skips_unregistered() {
        let registry = ConnectionRegistry::default();
        let (_a, mut rx_a) = join(&registry, "A", 8);
        let (b, mut rx_b) = join(&registry, "B", 8);

        assert_eq!(registry.unregister(b), Some("B".to_string()));
        registry.broadcast(chat("hi"), None);

        assert_eq!(drain(&mut rx_a), vec![chat("hi")]);
        assert!(drain(&mut rx_b).is_empty());
    }

    #[tokio::test]
    async fn test_unregister_is_idempotent() {
        let registry = ConnectionRegistry::default();
        let (a, _rx) = join(&registry, "A", 8);

        assert_eq!(registry.unregister(a), Some("A".to_string()));
        assert_eq!(registry.unregister(a), None);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_failed_client_removed_and_announced_once() {
        let registry = ConnectionRegistry::default();
        let (a, mut rx_a) = join(&registry, "A", 8);
        let (_b, mut rx_b) = join(&registry, "B", 8);
        let (dead, rx_dead) = join(&registry, "Dead", 8);
        drop(rx_dead);

        registry.broadcast(chat("one"), Some(a));
        registry.broadcast(chat("two"), Some(a));

        assert!(!registry.contains(dead));
        assert_eq!(registry.len(), 2);

        let left = ServerMessage::Left { name: "Dead".into() };
        assert_eq!(drain(&mut rx_a), vec![left.clone()]);
        let b_msgs = drain(&mut rx_b);
        assert_eq!(b_msgs.iter().filter(|m| **m == left).count(), 1);
        assert!(b_msgs.contains(&chat("one")));
        assert!(b_msgs.contains(&chat("two")));
    }

    #[tokio::test]
    async fn test_full_queue_counts_as_failure() {
        let registry = ConnectionRegistry::default();
        let (_slow, _rx_slow) = join(&registry, "Slow", 1);
        let (_b, mut rx_b) = join(&registry, "B", 8);

        registry.broadcast(chat("one"), None);
        registry.broadcast(chat("two"), None);

        assert_eq!(registry.names(), vec!["B".to_string()]);
        assert_eq!(
            drain(&mut rx_b),
            vec![
                chat("one"),
                chat("two"),
                ServerMessage::Left { name: "Slow".into() }
            ]
        );
    }

    #[tokio::test]
    async fn test_concurrent_failures_announce_once() {
        let registry = Arc::new(ConnectionRegistry::default());
        let (_dead, rx_dead) = join(&registry, "Dead", 8);
        let (_b, mut rx_b) = join(&registry, "B", 256);
        drop(rx_dead);

        let mut handles = Vec::new();
        for i in 0..8 {
            let registry = Arc::clone(&registry);
            handles.push(tokio::spawn(async move {
                registry.broadcast(chat(&i.to_string()), None);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let left = ServerMessage::Left { name: "Dead".into() };
        let departures = drain(&mut rx_b).into_iter().filter(|m| *m == left).count();
        assert_eq!(departures, 1);
    }

    #[tokio::test]
    async fn test_close_all_empties_registry() {
        let registry = ConnectionRegistry::default();
        let (_a, mut rx_a) = join(&registry, "A", 8);
        let (_b, _rx_b) = join(&registry, "B", 8);

        let closed = registry.close_all();
        assert_eq!(closed.len(), 2);
        drop(closed);

        assert!(registry.is_empty());
        assert_eq!(rx_a.recv().await, None);
    }
}
