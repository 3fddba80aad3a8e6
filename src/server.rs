//! ChatServer acceptor
//!
//! Owns the listener and the shared state every handler works against.
//! Each accepted connection gets its own task; a semaphore caps how many run
//! at once, and connections beyond the cap are told the server is full and
//! closed.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::SinkExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tokio::time::timeout;
use tokio_util::codec::Framed;
use tracing::{debug, error, info, warn};

use crate::chat_log::ChatLog;
use crate::config::ServerConfig;
use crate::error::AppError;
use crate::handler::handle_connection;
use crate::message::{lines_codec, ServerMessage};
use crate::registry::ConnectionRegistry;

/// How long a rejected connection gets to receive the refusal line
const REJECT_TIMEOUT: Duration = Duration::from_secs(5);

/// State shared by every connection handler
#[derive(Debug)]
pub struct ServerState {
    /// Live connections
    pub registry: Arc<ConnectionRegistry>,
    /// Daily event log
    pub chat_log: Arc<ChatLog>,
    /// Per-connection outbound queue length
    pub outbound_buffer: usize,
    /// Deadline for the first line of a new connection
    pub handshake_timeout: Duration,
}

/// The relay server
pub struct ChatServer {
    listener: TcpListener,
    state: Arc<ServerState>,
    limiter: Arc<Semaphore>,
}

impl ChatServer {
    /// Bind the listener and open the chat log described by `config`
    pub async fn bind(config: &ServerConfig) -> Result<Self, AppError> {
        let listener = TcpListener::bind(&config.addr).await?;
        let chat_log = match &config.log_dir {
            Some(dir) => ChatLog::new(dir)?,
            None => ChatLog::disabled(),
        };
        Ok(Self::from_listener(listener, chat_log, config))
    }

    /// Build a server around an already bound listener
    pub fn from_listener(listener: TcpListener, chat_log: ChatLog, config: &ServerConfig) -> Self {
        let chat_log = Arc::new(chat_log);
        let state = ServerState {
            registry: Arc::new(ConnectionRegistry::new(Arc::clone(&chat_log))),
            chat_log,
            outbound_buffer: config.outbound_buffer.max(1),
            handshake_timeout: config.handshake_timeout,
        };
        Self {
            listener,
            state: Arc::new(state),
            limiter: Arc::new(Semaphore::new(config.connection_limit())),
        }
    }

    /// Address the listener is bound to
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Handle to the live connection registry
    pub fn registry(&self) -> Arc<ConnectionRegistry> {
        Arc::clone(&self.state.registry)
    }

    /// Accept connections until `shutdown` resolves
    ///
    /// On shutdown every registered connection is closed and the listener
    /// is dropped.
    pub async fn run_until<F>(self, shutdown: F) -> Result<(), AppError>
    where
        F: Future<Output = ()> + Send,
    {
        let addr = self.local_addr()?;
        self.state
            .chat_log
            .record(format!("Server listening on {}", addr));
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                accepted = self.listener.accept() => self.handle_accept(accepted),
            }
        }

        self.state.chat_log.record("Server shutting down...");
        let closed = self.state.registry.close_all();
        info!("Closed {} connections", closed.len());

        Ok(())
    }

    /// Accept connections until Ctrl-C
    pub async fn run_until_ctrl_c(self) -> Result<(), AppError> {
        self.run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Failed to install Ctrl-C handler: {}", e);
            }
        })
        .await
    }

    fn handle_accept(&self, accepted: std::io::Result<(TcpStream, SocketAddr)>) {
        let (stream, addr) = match accepted {
            Ok(accepted) => accepted,
            Err(e) => {
                error!("Failed to accept connection: {}", e);
                return;
            }
        };

        let Ok(permit) = Arc::clone(&self.limiter).try_acquire_owned() else {
            warn!("Rejecting {}: connection limit reached", addr);
            tokio::spawn(reject(stream));
            return;
        };

        info!("New connection from {}", addr);
        let state = Arc::clone(&self.state);

        // Spawn handler task for each connection
        tokio::spawn(async move {
            let _permit = permit;
            if let Err(e) = handle_connection(stream, addr, state).await {
                error!("Connection handler error for {}: {}", addr, e);
            }
        });
    }
}

/// Tell an over-limit peer to come back later, then hang up
async fn reject(stream: TcpStream) {
    let mut framed = Framed::new(stream, lines_codec());
    let result = timeout(REJECT_TIMEOUT, async {
        framed.send(ServerMessage::ServerFull.to_string()).await?;
        SinkExt::<String>::close(&mut framed).await
    })
    .await;
    if !matches!(result, Ok(Ok(()))) {
        debug!("Could not deliver refusal to rejected peer");
    }
}
