//! Client-side session
//!
//! A `ClientSession` owns at most one connection to the relay for its
//! identity. It connects with bounded retries, falls back to the offline
//! queue when the relay cannot be reached and the recipient is known, and
//! runs a receive loop that first replays queued messages and then hands
//! every live line to a callback.
//!
//! Sessions are shared (`Arc<ClientSession>`): `receive` runs on its own
//! task while `send` and `close` are called from elsewhere. One async mutex
//! guards the socket so `send` and `close` never race on it.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{oneshot, Mutex};
use tokio::time::sleep;
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec};
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::error::AppError;
use crate::message::{
    fits_one_line, lines_codec, relay_codec, ClientMessage, EXIT_ACK, MAX_LINE_LENGTH,
};
use crate::store::{OfflineQueueStore, QueuedMessage};

/// Delivered to the receive callback when the relay cannot be reached
pub const CONNECT_FAILED: &str = "ERROR: could not connect to server";

type LineReader = FramedRead<OwnedReadHalf, LinesCodec>;
type LineWriter = FramedWrite<OwnedWriteHalf, LinesCodec>;

/// One established connection
struct Link {
    id: u64,
    writer: LineWriter,
    /// Taken by the receive loop while it runs
    reader: Option<(LineReader, oneshot::Receiver<()>)>,
    /// Dropping this wakes the receive loop
    _closed: oneshot::Sender<()>,
}

/// A participant's connection to the relay
pub struct ClientSession {
    identity: String,
    config: ClientConfig,
    store: Arc<OfflineQueueStore>,
    link: Mutex<Option<Link>>,
    next_link_id: AtomicU64,
}

impl ClientSession {
    /// Create a disconnected session for `identity`
    pub fn new(
        identity: impl Into<String>,
        config: ClientConfig,
        store: Arc<OfflineQueueStore>,
    ) -> Self {
        Self {
            identity: identity.into(),
            config,
            store,
            link: Mutex::new(None),
            next_link_id: AtomicU64::new(1),
        }
    }

    /// Identity this session announces with the name command
    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Whether a connection is currently held
    pub async fn is_connected(&self) -> bool {
        self.link.lock().await.is_some()
    }

    /// Connect with the configured default retry budget
    pub async fn connect_default(&self) -> bool {
        self.connect(self.config.connect_retries, self.config.retry_delay)
            .await
    }

    /// Connect to the relay, trying up to `retries` times
    ///
    /// Succeeds immediately when already connected. After a failed attempt
    /// the session waits `delay` before the next one. Returns false once
    /// every attempt has failed.
    pub async fn connect(&self, retries: u32, delay: Duration) -> bool {
        let mut link = self.link.lock().await;
        if link.is_some() {
            return true;
        }

        for attempt in 1..=retries {
            match self.open().await {
                Ok(new_link) => {
                    info!("'{}' connected to {}", self.identity, self.config.server_addr);
                    *link = Some(new_link);
                    return true;
                }
                Err(e) => {
                    warn!(
                        "Connect attempt {}/{} for '{}' failed: {}",
                        attempt, retries, self.identity, e
                    );
                    if attempt < retries {
                        sleep(delay).await;
                    }
                }
            }
        }
        false
    }

    /// Send one message
    ///
    /// A message that would not arrive as exactly one line (it holds a
    /// line break or exceeds `MAX_LINE_LENGTH`) is refused and reports
    /// failure. Without a connection and with a known `recipient`, the
    /// message is queued offline and the call reports success. Without a
    /// connection
    /// and no recipient, a connect is attempted first. A failed write drops
    /// the connection, queues the message if the recipient is known, and
    /// reports failure.
    pub async fn send(&self, message: &str, recipient: Option<&str>) -> bool {
        if !fits_one_line(message) {
            warn!(
                "Refusing message from '{}': line break or over {} bytes",
                self.identity, MAX_LINE_LENGTH
            );
            return false;
        }

        let mut link = self.link.lock().await;

        if link.is_none() {
            if let Some(recipient) = recipient {
                return self.queue_offline(recipient, message);
            }
            drop(link);
            if !self.connect_default().await {
                return false;
            }
            link = self.link.lock().await;
        }

        let Some(active) = link.as_mut() else {
            debug!("Connection for '{}' closed before send", self.identity);
            return false;
        };

        let result = active.writer.send(message).await;
        match result {
            Ok(()) => true,
            Err(e) => {
                warn!("Send from '{}' failed: {}", self.identity, e);
                if let Some(dead) = link.take() {
                    shutdown(dead).await;
                }
                if let Some(recipient) = recipient {
                    self.queue_offline(recipient, message);
                }
                false
            }
        }
    }

    /// Run the receive loop until the connection ends
    ///
    /// Connects first (with the larger receive retry budget) if needed; if
    /// that fails, `callback` gets [`CONNECT_FAILED`] once. Otherwise every
    /// offline message queued for this identity is delivered first, in
    /// queue order, followed by live lines. Blank lines are skipped and the
    /// exit acknowledgment closes the connection. A panicking callback is
    /// logged and the loop carries on.
    pub async fn receive<F>(&self, mut callback: F)
    where
        F: FnMut(&str),
    {
        if !self
            .connect(self.config.receive_retries, self.config.retry_delay)
            .await
        {
            deliver(&mut callback, CONNECT_FAILED);
            return;
        }

        match self.store.drain(&self.identity) {
            Ok(pending) => {
                for queued in pending {
                    deliver(&mut callback, &queued.to_line());
                }
            }
            Err(e) => warn!("Could not load offline messages for '{}': {}", self.identity, e),
        }

        let (link_id, mut reader, mut closed) = {
            let mut link = self.link.lock().await;
            let Some(active) = link.as_mut() else {
                debug!("Connection for '{}' closed before receive", self.identity);
                return;
            };
            let Some((reader, closed)) = active.reader.take() else {
                warn!("'{}' is already receiving", self.identity);
                return;
            };
            (active.id, reader, closed)
        };

        loop {
            let line = tokio::select! {
                _ = &mut closed => {
                    debug!("Receive loop for '{}' stopped by close", self.identity);
                    return;
                }
                line = reader.next() => line,
            };

            match line {
                Some(Ok(line)) => {
                    let text = line.trim();
                    if text.is_empty() {
                        continue;
                    }
                    if text == EXIT_ACK {
                        debug!("'{}' got exit acknowledgment", self.identity);
                        break;
                    }
                    deliver(&mut callback, text);
                }
                Some(Err(e)) => {
                    debug!("Read for '{}' failed: {}", self.identity, e);
                    break;
                }
                None => {
                    debug!("Relay closed the connection for '{}'", self.identity);
                    break;
                }
            }
        }

        drop(reader);
        self.close_link(link_id).await;
    }

    /// Close the connection if there is one
    pub async fn close(&self) {
        if let Some(link) = self.link.lock().await.take() {
            shutdown(link).await;
            info!("'{}' disconnected", self.identity);
        }
    }

    /// Close only if the held connection is still `link_id`
    async fn close_link(&self, link_id: u64) {
        let mut link = self.link.lock().await;
        if link.as_ref().map(|l| l.id) == Some(link_id) {
            if let Some(old) = link.take() {
                shutdown(old).await;
            }
        }
    }

    async fn open(&self) -> Result<Link, AppError> {
        let stream = TcpStream::connect(&self.config.server_addr).await?;
        let (read_half, write_half) = stream.into_split();
        let mut writer = FramedWrite::new(write_half, lines_codec());
        writer
            .send(ClientMessage::SetName(Some(self.identity.clone())).to_line())
            .await?;

        let (closed_tx, closed_rx) = oneshot::channel();
        Ok(Link {
            id: self.next_link_id.fetch_add(1, Ordering::Relaxed),
            writer,
            reader: Some((FramedRead::new(read_half, relay_codec()), closed_rx)),
            _closed: closed_tx,
        })
    }

    fn queue_offline(&self, recipient: &str, message: &str) -> bool {
        match self
            .store
            .enqueue(recipient, QueuedMessage::new(self.identity.as_str(), message))
        {
            Ok(()) => {
                info!("Queued message from '{}' for offline '{}'", self.identity, recipient);
                true
            }
            Err(e) => {
                warn!("Could not queue message for '{}': {}", recipient, e);
                false
            }
        }
    }
}

async fn shutdown(link: Link) {
    let mut writer = link.writer;
    if let Err(e) = SinkExt::<String>::close(&mut writer).await {
        debug!("Error closing connection: {}", e);
    }
}

fn deliver<F>(callback: &mut F, line: &str)
where
    F: FnMut(&str),
{
    if catch_unwind(AssertUnwindSafe(|| callback(line))).is_err() {
        warn!("Receive callback panicked; continuing");
    }
}

/// Owned per-identity session map
///
/// Hands out one shared session per identity, so an identity never holds
/// two connections at once.
pub struct SessionRegistry {
    config: ClientConfig,
    store: Arc<OfflineQueueStore>,
    sessions: std::sync::Mutex<HashMap<String, Arc<ClientSession>>>,
}

impl SessionRegistry {
    /// Create a registry whose sessions share the offline store at
    /// `config.queue_path`
    pub fn new(config: ClientConfig) -> Self {
        let store = Arc::new(OfflineQueueStore::new(config.queue_path.clone()));
        Self {
            config,
            store,
            sessions: std::sync::Mutex::new(HashMap::new()),
        }
    }

    /// The session for `identity`, created on first use
    pub fn get_or_create(&self, identity: &str) -> Arc<ClientSession> {
        let mut sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        let session = sessions.entry(identity.to_string()).or_insert_with(|| {
            Arc::new(ClientSession::new(
                identity,
                self.config.clone(),
                Arc::clone(&self.store),
            ))
        });
        Arc::clone(session)
    }

    /// The session for `identity`, if one was created
    pub fn get(&self, identity: &str) -> Option<Arc<ClientSession>> {
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(identity)
            .cloned()
    }

    /// Close every session's connection
    pub async fn close_all(&self) {
        let sessions: Vec<_> = self
            .sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        for session in sessions {
            session.close().await;
        }
    }
}
