//! Per-connection handler
//!
//! Drives one accepted TCP connection through
//! `AwaitingName → Active → Closing → Closed`: handshake, relay loop,
//! cleanup. Reads happen inline; writes go through a dedicated writer task
//! fed by the channel the registry holds for this client.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, Stream, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::codec::{Framed, LinesCodec, LinesCodecError};
use tracing::{debug, info, warn};

use crate::client::Client;
use crate::error::AppError;
use crate::message::{clamp_name, default_name, lines_codec, ClientMessage, ServerMessage};
use crate::server::ServerState;
use crate::types::ConnectionId;

/// Longest a single write may block before the peer is considered stalled
const WRITE_TIMEOUT: Duration = Duration::from_secs(30);

type LineSink = SplitSink<Framed<TcpStream, LinesCodec>, String>;

/// Lifecycle of a server-side connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    AwaitingName,
    Active,
    Closing,
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::AwaitingName => "awaiting_name",
            Self::Active => "active",
            Self::Closing => "closing",
            Self::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// Resolve the display name from the first line a client sends
///
/// Anything but a non-empty name command falls back to the address-derived
/// default; the line itself is not relayed. Over-long names are cut to
/// `MAX_NAME_LENGTH` so every line carrying them stays within the relay
/// line limit.
pub fn handshake_name(first_line: &str, addr: SocketAddr) -> String {
    match ClientMessage::parse(first_line) {
        Some(ClientMessage::SetName(Some(name))) => clamp_name(&name).to_string(),
        _ => default_name(addr),
    }
}

/// Handle a new TCP connection
///
/// Runs the handshake, registers the client, relays its lines until it
/// leaves or its stream fails, then unregisters it. Transport errors end
/// the connection; they are never retried.
pub async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    state: Arc<ServerState>,
) -> Result<(), AppError> {
    let id = ConnectionId::new();
    let mut conn_state = ConnectionState::AwaitingName;
    debug!("Connection {} from {} is {}", id, addr, conn_state);

    let (sink, mut lines) = Framed::new(stream, lines_codec()).split();

    // Create channel for server -> client messages
    let (msg_tx, msg_rx) = mpsc::channel::<ServerMessage>(state.outbound_buffer);
    let mut write_task = tokio::spawn(write_loop(id, sink, msg_rx));

    msg_tx
        .send(ServerMessage::Prompt)
        .await
        .map_err(|_| AppError::ChannelSend)?;

    let first_line = match timeout(state.handshake_timeout, lines.next()).await {
        Ok(Some(line)) => line?,
        Ok(None) => {
            debug!("Connection {} closed before handshake", id);
            return Ok(());
        }
        Err(_) => {
            info!("Connection {} from {} sent no name in time", id, addr);
            return Ok(());
        }
    };
    let name = handshake_name(&first_line, addr);

    // From here on the registry owns the only strong sender; once it lets
    // go, the writer drains what is queued and closes the socket.
    let weak_tx = msg_tx.downgrade();
    state
        .registry
        .register(Client::new(id, name.clone(), addr, msg_tx));
    conn_state = transition(id, conn_state, ConnectionState::Active);

    info!("Client {} joined as '{}'", id, name);
    state
        .chat_log
        .record(format!("{} connected from {}", name, addr));
    state
        .registry
        .broadcast(ServerMessage::Joined { name: name.clone() }, Some(id));
    send_direct(&weak_tx, ServerMessage::Welcome { name: name.clone() }).await;

    let writer_done = tokio::select! {
        result = relay_loop(id, &name, &mut lines, &weak_tx, &state) => {
            if let Err(e) = result {
                debug!("Read error for {}: {}", id, e);
            }
            false
        }
        _ = &mut write_task => {
            debug!("Writer for {} finished first", id);
            true
        }
    };

    conn_state = transition(id, conn_state, ConnectionState::Closing);
    if let Some(name) = state.registry.unregister(id) {
        state.chat_log.record(format!("{} disconnected", name));
        state
            .registry
            .broadcast(ServerMessage::Left { name }, None);
    }

    if !writer_done {
        if let Err(e) = write_task.await {
            warn!("Writer task for {} failed: {}", id, e);
        }
    }

    transition(id, conn_state, ConnectionState::Closed);
    info!("Client {} disconnected", id);

    Ok(())
}

/// Read and relay lines until exit, closure or a read error
async fn relay_loop<S>(
    id: ConnectionId,
    name: &str,
    lines: &mut S,
    tx: &mpsc::WeakSender<ServerMessage>,
    state: &ServerState,
) -> Result<(), AppError>
where
    S: Stream<Item = Result<String, LinesCodecError>> + Unpin,
{
    while let Some(line) = lines.next().await {
        let line = line?;
        match ClientMessage::parse(&line) {
            None => continue,
            Some(ClientMessage::Exit) => {
                debug!("Client {} requested exit", id);
                send_direct(tx, ServerMessage::ExitAck).await;
                return Ok(());
            }
            Some(_) => {
                let text = line.trim().to_string();
                state.chat_log.record(format!("{}: {}", name, text));
                state.registry.broadcast(
                    ServerMessage::Chat {
                        from: name.to_string(),
                        text,
                    },
                    Some(id),
                );
            }
        }
    }
    Ok(())
}

/// Drain the outbound channel onto the socket, then close it
async fn write_loop(id: ConnectionId, mut sink: LineSink, mut rx: mpsc::Receiver<ServerMessage>) {
    while let Some(msg) = rx.recv().await {
        match timeout(WRITE_TIMEOUT, sink.send(msg.to_string())).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                debug!("Write to {} failed: {}", id, e);
                break;
            }
            Err(_) => {
                warn!("Write to {} timed out", id);
                break;
            }
        }
    }
    debug!("Write task ended for {}", id);

    let _ = timeout(WRITE_TIMEOUT, sink.close()).await;
}

/// Queue a message for this connection only
///
/// Waits for queue space instead of dropping the message, bounded by
/// `WRITE_TIMEOUT`. Does nothing once the registry has let go of the
/// connection.
async fn send_direct(tx: &mpsc::WeakSender<ServerMessage>, msg: ServerMessage) {
    let Some(tx) = tx.upgrade() else {
        return;
    };
    match timeout(WRITE_TIMEOUT, tx.send(msg)).await {
        Ok(Ok(())) => {}
        Ok(Err(_)) => debug!("Direct send dropped: writer gone"),
        Err(_) => warn!("Direct send timed out: outbound queue stayed full"),
    }
}

fn transition(id: ConnectionId, from: ConnectionState, to: ConnectionState) -> ConnectionState {
    debug!("Connection {}: {} -> {}", id, from, to);
    to
}
