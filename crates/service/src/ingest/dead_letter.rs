//! Dead-letter sinks for messages the loop gives up on.
//!
//! [`DiscardSink`] logs and drops, which keeps the baseline behavior.
//! [`JsonLinesSink`] appends one JSON record per message to a file so nothing
//! is lost silently.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::warn;

use super::source::Message;

/// Why a message was dead-lettered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeadLetterReason {
    /// The payload did not parse as an order.
    Malformed,
    /// The order parsed but its identifier is empty or too long.
    InvalidUid,
    /// Every persistence attempt failed.
    PersistenceFailed,
}

/// A message the ingestion loop gave up on.
#[derive(Debug, Clone, Serialize)]
pub struct DeadLetter {
    pub reason: DeadLetterReason,
    pub error: String,
    pub attempts: u32,
    pub order_uid: Option<String>,
    /// The payload, lossily decoded as UTF-8.
    pub payload: String,
    pub partition: Option<i32>,
    pub offset: Option<i64>,
    pub dead_at: DateTime<Utc>,
}

impl DeadLetter {
    /// Build a dead letter for `message`.
    #[must_use]
    pub fn new(
        message: &Message,
        reason: DeadLetterReason,
        error: impl ToString,
        attempts: u32,
        order_uid: Option<String>,
    ) -> Self {
        Self {
            reason,
            error: error.to_string(),
            attempts,
            order_uid,
            payload: String::from_utf8_lossy(&message.payload).into_owned(),
            partition: message.partition,
            offset: message.offset,
            dead_at: Utc::now(),
        }
    }
}

/// Errors that can occur while recording a dead letter.
#[derive(Debug, Error)]
pub enum DeadLetterError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Destination for messages the loop gives up on.
#[async_trait]
pub trait DeadLetterSink: Send + Sync {
    /// Record `letter`.
    ///
    /// # Errors
    ///
    /// Returns an error if the letter could not be recorded.
    async fn publish(&self, letter: DeadLetter) -> Result<(), DeadLetterError>;
}

/// Sink that logs and drops every letter.
#[derive(Debug, Clone, Copy, Default)]
pub struct DiscardSink;

#[async_trait]
impl DeadLetterSink for DiscardSink {
    async fn publish(&self, letter: DeadLetter) -> Result<(), DeadLetterError> {
        warn!(
            reason = ?letter.reason,
            order_uid = letter.order_uid.as_deref().unwrap_or(""),
            attempts = letter.attempts,
            error = %letter.error,
            "Message dropped"
        );
        Ok(())
    }
}

/// Sink appending newline-delimited JSON records to a file.
#[derive(Debug)]
pub struct JsonLinesSink {
    path: PathBuf,
    file: Mutex<File>,
}

impl JsonLinesSink {
    /// Open (or create) `path` for appending.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, DeadLetterError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;

        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    /// The file this sink writes to.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl DeadLetterSink for JsonLinesSink {
    async fn publish(&self, letter: DeadLetter) -> Result<(), DeadLetterError> {
        let mut line = serde_json::to_vec(&letter)?;
        line.push(b'\n');

        let mut file = self.file.lock().await;
        file.write_all(&line).await?;
        file.flush().await?;

        warn!(
            reason = ?letter.reason,
            order_uid = letter.order_uid.as_deref().unwrap_or(""),
            path = %self.path.display(),
            "Message dead-lettered"
        );
        Ok(())
    }
}
