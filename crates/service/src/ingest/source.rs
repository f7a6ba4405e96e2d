//! Message sources feeding the ingestion loop.
//!
//! The transport owns delivery guarantees (at-least-once, ordered per
//! partition) and its own reconnect/backoff. A source only hands the loop one
//! message at a time.

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, Lines};
use tokio::sync::mpsc;

/// One raw message read from the stream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Message {
    pub payload: Vec<u8>,
    pub partition: Option<i32>,
    pub offset: Option<i64>,
}

impl Message {
    /// Create a message carrying only a payload.
    #[must_use]
    pub fn new(payload: impl Into<Vec<u8>>) -> Self {
        Self {
            payload: payload.into(),
            partition: None,
            offset: None,
        }
    }
}

/// A read from the transport failed. The loop logs it and reads again.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[cfg(feature = "kafka")]
    #[error("kafka error: {0}")]
    Kafka(#[from] rdkafka::error::KafkaError),

    #[error("transport error: {0}")]
    Other(String),
}

/// A stream of inbound messages.
#[async_trait]
pub trait MessageSource: Send {
    /// Wait for the next message.
    ///
    /// Returns `None` once the stream is closed and will yield nothing more.
    async fn recv(&mut self) -> Option<Result<Message, TransportError>>;
}

#[async_trait]
impl<S: MessageSource + ?Sized> MessageSource for Box<S> {
    async fn recv(&mut self) -> Option<Result<Message, TransportError>> {
        (**self).recv().await
    }
}

/// Source fed through a tokio channel.
///
/// The stream closes when every sender is dropped.
#[derive(Debug)]
pub struct ChannelSource {
    rx: mpsc::Receiver<Result<Message, TransportError>>,
}

impl ChannelSource {
    /// Create a source and the sender that feeds it.
    #[must_use]
    pub fn new(buffer: usize) -> (mpsc::Sender<Result<Message, TransportError>>, Self) {
        let (tx, rx) = mpsc::channel(buffer);
        (tx, Self { rx })
    }
}

#[async_trait]
impl MessageSource for ChannelSource {
    async fn recv(&mut self) -> Option<Result<Message, TransportError>> {
        self.rx.recv().await
    }
}

/// Source reading newline-delimited messages, one message per line.
///
/// Blank lines are delivered as empty payloads.
#[derive(Debug)]
pub struct LineSource<R> {
    lines: Lines<R>,
    line: i64,
}

impl<R: AsyncBufRead + Unpin> LineSource<R> {
    /// Create a source over `reader`.
    #[must_use]
    pub fn new(reader: R) -> Self {
        Self {
            lines: reader.lines(),
            line: 0,
        }
    }
}

#[async_trait]
impl<R: AsyncBufRead + Unpin + Send> MessageSource for LineSource<R> {
    async fn recv(&mut self) -> Option<Result<Message, TransportError>> {
        match self.lines.next_line().await {
            Ok(Some(line)) => {
                self.line += 1;
                Some(Ok(Message {
                    payload: line.trim().as_bytes().to_vec(),
                    partition: None,
                    offset: Some(self.line),
                }))
            }
            Ok(None) => None,
            Err(e) => Some(Err(TransportError::Io(e))),
        }
    }
}
