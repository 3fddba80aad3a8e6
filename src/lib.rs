//! Line-based TCP Chat Relay Library
//!
//! A relay server that fans every participant's lines out to everyone else,
//! plus a client session that reconnects with bounded retries and queues
//! messages offline when the relay is unreachable.
//!
//! # Features
//! - Newline-delimited plaintext protocol (`/name`, `/exit`, `/exit_ack`)
//! - Handshake with address-derived default names
//! - Broadcast to all but the sender, with eviction of unreachable peers
//! - Connection cap with refusal when saturated
//! - Daily append-only chat event log
//! - Client sessions with offline store-and-forward delivery
//!
//! # Architecture
//! - `ChatServer` accepts connections and spawns one `handle_connection`
//!   task per peer
//! - `ConnectionRegistry` is the only shared server state: one mutex, held
//!   for mutation and snapshots, never across a send
//! - Every peer has a writer task fed by a bounded `mpsc` channel
//! - `ClientSession` guards its socket with an async mutex; `receive` runs
//!   on its own task
//!
//! # Example
//! ```ignore
//! use chat_relay::{ChatServer, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), chat_relay::AppError> {
//!     let server = ChatServer::bind(&ServerConfig::default()).await?;
//!     server.run_until_ctrl_c().await
//! }
//! ```

pub mod chat_log;
pub mod client;
pub mod config;
pub mod error;
pub mod handler;
pub mod message;
pub mod registry;
pub mod server;
pub mod session;
pub mod store;
pub mod types;

// Re-export main types for convenience
pub use chat_log::ChatLog;
pub use client::Client;
pub use config::{ClientConfig, ServerConfig};
pub use error::{AppError, SendError, StoreError};
pub use handler::{handle_connection, ConnectionState};
pub use message::{ClientMessage, ServerMessage, EXIT_ACK, EXIT_COMMAND, NAME_COMMAND};
pub use registry::ConnectionRegistry;
pub use server::{ChatServer, ServerState};
pub use session::{ClientSession, SessionRegistry, CONNECT_FAILED};
pub use store::{OfflineQueueStore, QueuedMessage};
pub use types::ConnectionId;
