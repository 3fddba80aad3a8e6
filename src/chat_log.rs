//! Daily append-only chat event log
//!
//! Every event (connect, disconnect, relayed text) becomes one
//! `[YYYY-MM-DD HH:MM:SS] event` line in `chat_log_<date>.txt`. The file
//! name is derived per write, so a long-running server rolls over to a new
//! file at local midnight.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use chrono::{Local, NaiveDate};
use tracing::{info, warn};

/// Append-only event log, one file per calendar day
#[derive(Debug)]
pub struct ChatLog {
    /// Target directory; `None` keeps events in tracing output only
    dir: Option<PathBuf>,
    /// Serializes appends so concurrent handlers never interleave lines
    write_lock: Mutex<()>,
}

impl ChatLog {
    /// Open a log writing into `dir`, creating the directory if needed
    pub fn new(dir: impl Into<PathBuf>) -> std::io::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir: Some(dir),
            write_lock: Mutex::new(()),
        })
    }

    /// A log that only forwards events to tracing
    pub fn disabled() -> Self {
        Self {
            dir: None,
            write_lock: Mutex::new(()),
        }
    }

    /// Directory the log writes into, if any
    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    /// File holding the events of `date`
    pub fn path_for(&self, date: NaiveDate) -> Option<PathBuf> {
        self.dir
            .as_ref()
            .map(|dir| dir.join(format!("chat_log_{}.txt", date.format("%Y-%m-%d"))))
    }

    /// Record one event
    ///
    /// Write failures are reported through tracing and otherwise ignored;
    /// the relay keeps running without its log.
    pub fn record(&self, event: impl AsRef<str>) {
        let event = event.as_ref();
        info!(target: "chat_relay::events", "{}", event);

        let now = Local::now();
        let Some(path) = self.path_for(now.date_naive()) else {
            return;
        };
        let line = format!("[{}] {}\n", now.format("%Y-%m-%d %H:%M:%S"), event);

        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let result = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .and_then(|mut file| file.write_all(line.as_bytes()));
        if let Err(e) = result {
            warn!("Failed to append to chat log {}: {}", path.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_appends_timestamped_lines() {
        let dir = tempfile::tempdir().unwrap();
        let log = ChatLog::new(dir.path().join("logs")).unwrap();

        log.record("Alice connected from 127.0.0.1:4000");
        log.record("Alice: hello");

        let path = log.path_for(Local::now().date_naive()).unwrap();
        let contents = fs::read_to_string(path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();

        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with('['));
        assert!(lines[0].ends_with("] Alice connected from 127.0.0.1:4000"));
        assert!(lines[1].ends_with("] Alice: hello"));
    }

    #[test]
    fn test_path_is_per_day() {
        let dir = tempfile::tempdir().unwrap();
        let log = ChatLog::new(dir.path()).unwrap();
        let date = NaiveDate::from_ymd_opt(2024, 3, 9).unwrap();

        assert_eq!(
            log.path_for(date).unwrap(),
            dir.path().join("chat_log_2024-03-09.txt")
        );
    }

    #[test]
    fn test_disabled_log_writes_nothing() {
        let log = ChatLog::disabled();
        log.record("ignored");
        assert!(log.dir().is_none());
        assert!(log.path_for(Local::now().date_naive()).is_none());
    }
}
