//! Client struct definition
//!
//! Server-side view of a connected client: its handle, display name and the
//! channel feeding its writer task.

use std::net::SocketAddr;

use tokio::sync::mpsc;

use crate::error::SendError;
use crate::message::ServerMessage;
use crate::types::ConnectionId;

/// Registered client information
///
/// Cloned out of the registry for broadcast so that no send happens while
/// the registry lock is held.
#[derive(Debug, Clone)]
pub struct Client {
    /// Unique handle for this connection
    pub id: ConnectionId,
    /// Display name, fixed at handshake
    pub name: String,
    /// Transport address of the peer
    pub addr: SocketAddr,
    /// Server → Client message channel
    pub sender: mpsc::Sender<ServerMessage>,
}

impl Client {
    /// Create a new client with the given ID, name and sender channel
    pub fn new(
        id: ConnectionId,
        name: String,
        addr: SocketAddr,
        sender: mpsc::Sender<ServerMessage>,
    ) -> Self {
        Self {
            id,
            name,
            addr,
            sender,
        }
    }

    /// Queue a message for this client without waiting
    ///
    /// Fails if the writer task is gone or the client stopped draining its
    /// queue; either way the client is no longer reachable.
    pub fn send(&self, msg: ServerMessage) -> Result<(), SendError> {
        self.sender.try_send(msg).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SendError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => SendError::ChannelClosed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr() -> SocketAddr {
        "127.0.0.1:40000".parse().unwrap()
    }

    #[tokio::test]
    async fn test_client_send() {
        let (tx, mut rx) = mpsc::channel(4);
        let client = Client::new(ConnectionId::new(), "Alice".into(), addr(), tx);

        client.send(ServerMessage::ExitAck).unwrap();
        assert_eq!(rx.recv().await, Some(ServerMessage::ExitAck));
    }

    #[tokio::test]
    async fn test_client_send_closed() {
        let (tx, rx) = mpsc::channel(4);
        let client = Client::new(ConnectionId::new(), "Alice".into(), addr(), tx);
        drop(rx);

        assert_eq!(client.send(ServerMessage::Prompt), Err(SendError::ChannelClosed));
    }

    #[tokio::test]
    async fn test_client_send_full() {
        let (tx, _rx) = mpsc::channel(1);
        let client = Client::new(ConnectionId::new(), "Alice".into(), addr(), tx);

        client.send(ServerMessage::Prompt).unwrap();
        assert_eq!(client.send(ServerMessage::Prompt), Err(SendError::QueueFull));
    }
}
