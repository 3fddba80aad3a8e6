//! Offline message queue store
//!
//! A single JSON document maps each recipient to the messages waiting for
//! them, in the order they were queued:
//!
//! ```json
//! { "bob": [ { "from": "alice", "message": "hi", "timestamp": "..." } ] }
//! ```
//!
//! Every operation is a read-modify-write of the whole document. A mutex per
//! store instance serializes them, and rewrites go through a temporary file
//! plus rename so a crash never leaves a half-written document behind.
//! Separate processes sharing one file are not coordinated.

use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::StoreError;

type QueueDocument = BTreeMap<String, Vec<QueuedMessage>>;

/// A message waiting for an offline recipient
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedMessage {
    /// Sender identity
    pub from: String,
    /// Message text
    pub message: String,
    /// When the message was queued
    pub timestamp: DateTime<Utc>,
}

impl QueuedMessage {
    /// Create a message stamped with the current time
    pub fn new(from: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            message: message.into(),
            timestamp: Utc::now(),
        }
    }

    /// Line delivered to the recipient's receive callback
    pub fn to_line(&self) -> String {
        format!("{}: {}", self.from, self.message)
    }
}

/// Durable recipient → messages map backed by one JSON file
#[derive(Debug)]
pub struct OfflineQueueStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl OfflineQueueStore {
    /// Use the document at `path`; it is created on the first enqueue
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    /// Location of the backing document
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append `item` to `recipient`'s queue
    pub fn enqueue(&self, recipient: &str, item: QueuedMessage) -> Result<(), StoreError> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut document = self.load()?;
        document.entry(recipient.to_string()).or_default().push(item);
        self.save(&document)?;
        debug!("Queued offline message for '{}'", recipient);
        Ok(())
    }

    /// Remove and return everything queued for `identity`, oldest first
    pub fn drain(&self, identity: &str) -> Result<Vec<QueuedMessage>, StoreError> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut document = self.load()?;
        let Some(messages) = document.remove(identity) else {
            return Ok(Vec::new());
        };
        self.save(&document)?;
        debug!("Drained {} offline messages for '{}'", messages.len(), identity);
        Ok(messages)
    }

    /// Number of messages waiting for `identity`
    pub fn pending(&self, identity: &str) -> Result<usize, StoreError> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(self.load()?.get(identity).map_or(0, Vec::len))
    }

    fn load(&self) -> Result<QueueDocument, StoreError> {
        match fs::read(&self.path) {
            Ok(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => Ok(QueueDocument::new()),
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(QueueDocument::new()),
            Err(e) => Err(e.into()),
        }
    }

    fn save(&self, document: &QueueDocument) -> Result<(), StoreError> {
        let json = serde_json::to_vec_pretty(document)?;
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}
