//! Ingestion loop: turns raw messages into persisted orders.
//!
//! Each message is decoded, validated, deduplicated, and handed to the
//! [`OrderStore`]. The loop never stops on a bad message. It stops when the
//! source closes or shutdown is signalled.

pub mod dead_letter;
#[cfg(feature = "kafka")]
pub mod kafka;
pub mod policy;
pub mod source;

use std::sync::Arc;

use orderline_core::Order;
use tokio::sync::watch;
use tracing::{debug, error, info, instrument, warn};

pub use dead_letter::{
    DeadLetter, DeadLetterError, DeadLetterReason, DeadLetterSink, DiscardSink, JsonLinesSink,
};
#[cfg(feature = "kafka")]
pub use kafka::KafkaSource;
pub use policy::RetryPolicy;
pub use source::{ChannelSource, LineSource, Message, MessageSource, TransportError};

use crate::store::{OrderStore, StoreError};

/// What happened to one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Persisted and published into the cache.
    Stored,
    /// The payload was empty.
    SkippedEmpty,
    /// The payload did not decode as an order.
    Malformed,
    /// The order has an empty or oversized identifier.
    MissingUid,
    /// The identifier was already in the cache.
    DuplicateCached,
    /// The store rejected the identifier as already persisted.
    DuplicateStored,
    /// Every attempt to persist failed.
    Failed,
    /// Shutdown arrived while waiting to retry.
    Interrupted,
}

/// Counters kept by a running loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestStats {
    pub stored: u64,
    pub skipped_empty: u64,
    pub malformed: u64,
    pub missing_uid: u64,
    pub duplicate_cached: u64,
    pub duplicate_stored: u64,
    pub failed: u64,
    pub interrupted: u64,
    pub transport_errors: u64,
}

impl IngestStats {
    /// Count one message outcome.
    pub const fn record(&mut self, outcome: Outcome) {
        let counter = match outcome {
            Outcome::Stored => &mut self.stored,
            Outcome::SkippedEmpty => &mut self.skipped_empty,
            Outcome::Malformed => &mut self.malformed,
            Outcome::MissingUid => &mut self.missing_uid,
            Outcome::DuplicateCached => &mut self.duplicate_cached,
            Outcome::DuplicateStored => &mut self.duplicate_stored,
            Outcome::Failed => &mut self.failed,
            Outcome::Interrupted => &mut self.interrupted,
        };
        *counter += 1;
    }

    /// Number of messages seen, excluding transport errors.
    #[must_use]
    pub const fn messages(&self) -> u64 {
        self.stored
            + self.skipped_empty
            + self.malformed
            + self.missing_uid
            + self.duplicate_cached
            + self.duplicate_stored
            + self.failed
            + self.interrupted
    }
}

/// Consumes a [`MessageSource`] until it closes or shutdown is signalled.
pub struct IngestionLoop<S> {
    source: S,
    handler: MessageHandler,
    stats: IngestStats,
}

impl<S: MessageSource> IngestionLoop<S> {
    /// Create a loop feeding `store` from `source`.
    #[must_use]
    pub fn new(
        source: S,
        store: OrderStore,
        policy: RetryPolicy,
        dead_letters: Arc<dyn DeadLetterSink>,
    ) -> Self {
        Self {
            source,
            handler: MessageHandler {
                store,
                policy,
                dead_letters,
            },
            stats: IngestStats::default(),
        }
    }

    /// Handle a single message outside the loop.
    ///
    /// Retry backoff is not interruptible here.
    pub async fn process(&self, message: &Message) -> Outcome {
        let (_keep_open, mut never) = watch::channel(false);
        self.handler.handle(message, &mut never).await
    }

    /// Run until the source closes or `shutdown` turns `true`.
    ///
    /// Shutdown is observed between messages and during retry backoff. A
    /// message whose persist call has started runs to completion.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> IngestStats {
        info!("Ingestion loop started");

        loop {
            if *shutdown.borrow() {
                break;
            }

            let next = tokio::select! {
                biased;
                () = shutdown_requested(&mut shutdown) => break,
                next = self.source.recv() => next,
            };

            match next {
                None => {
                    info!("Message stream closed");
                    break;
                }
                Some(Err(e)) => {
                    warn!(error = %e, "Failed to read message");
                    self.stats.transport_errors += 1;
                }
                Some(Ok(message)) => {
                    let outcome = self.handler.handle(&message, &mut shutdown).await;
                    debug!(?outcome, "Message handled");
                    self.stats.record(outcome);
                }
            }
        }

        let stats = self.stats;
        info!(
            messages = stats.messages(),
            stored = stats.stored,
            failed = stats.failed,
            transport_errors = stats.transport_errors,
            "Ingestion loop stopped"
        );
        stats
    }
}

/// Resolves once shutdown is signalled. Never resolves if the sender is gone.
async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    let signalled = shutdown.wait_for(|stop| *stop).await.is_ok();
    if !signalled {
        std::future::pending::<()>().await;
    }
}

struct MessageHandler {
    store: OrderStore,
    policy: RetryPolicy,
    dead_letters: Arc<dyn DeadLetterSink>,
}

impl MessageHandler {
    #[instrument(skip_all, fields(partition = message.partition, offset = message.offset))]
    async fn handle(&self, message: &Message, shutdown: &mut watch::Receiver<bool>) -> Outcome {
        if message.payload.trim_ascii().is_empty() {
            debug!("Skipping empty message");
            return Outcome::SkippedEmpty;
        }

        let order: Order = match serde_json::from_slice(&message.payload) {
            Ok(order) => order,
            Err(e) => {
                warn!(error = %e, "Failed to decode order");
                self.dead_letter(DeadLetter::new(
                    message,
                    DeadLetterReason::Malformed,
                    &e,
                    0,
                    None,
                ))
                .await;
                return Outcome::Malformed;
            }
        };

        let uid = match order.uid() {
            Ok(uid) => uid,
            Err(e) => {
                warn!(error = %e, "Order has no usable identifier");
                self.dead_letter(DeadLetter::new(
                    message,
                    DeadLetterReason::InvalidUid,
                    &e,
                    0,
                    None,
                ))
                .await;
                return Outcome::MissingUid;
            }
        };

        if self.store.cache().contains(uid.as_str()) {
            info!(order_uid = %uid, "Order already cached, skipping");
            return Outcome::DuplicateCached;
        }

        let mut attempt = 1;
        loop {
            let err = match self.store.insert_order(order.clone()).await {
                Ok(_) => return Outcome::Stored,
                Err(StoreError::AlreadyExists(_)) => {
                    warn!(order_uid = %uid, "Order already stored, skipping");
                    return Outcome::DuplicateStored;
                }
                Err(e) => e,
            };

            if !self.policy.should_retry(attempt) {
                error!(order_uid = %uid, attempts = attempt, error = %err, "Failed to store order");
                self.dead_letter(DeadLetter::new(
                    message,
                    DeadLetterReason::PersistenceFailed,
                    &err,
                    attempt,
                    Some(uid.into_inner()),
                ))
                .await;
                return Outcome::Failed;
            }

            let delay = self.policy.backoff_after(attempt);
            warn!(
                order_uid = %uid,
                attempt,
                retry_in_ms = delay.as_millis(),
                error = %err,
                "Failed to store order, retrying"
            );

            tokio::select! {
                biased;
                () = shutdown_requested(shutdown) => {
                    warn!(order_uid = %uid, "Shutdown during retry backoff, order not stored");
                    return Outcome::Interrupted;
                }
                () = tokio::time::sleep(delay) => {}
            }
            attempt += 1;
        }
    }

    async fn dead_letter(&self, letter: DeadLetter) {
        if let Err(e) = self.dead_letters.publish(letter).await {
            error!(error = %e, "Failed to record dead letter");
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::num::NonZeroU32;
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;
    use tokio::sync::mpsc;

    use super::*;
    use crate::cache::OrderCache;
    use crate::db::{FailurePoint, InMemoryOrderRepository, OrderRepository};

    #[derive(Default)]
    struct RecordingSink {
        letters: Mutex<Vec<DeadLetter>>,
    }

    impl RecordingSink {
        fn reasons(&self) -> Vec<DeadLetterReason> {
            self.letters.lock().unwrap().iter().map(|l| l.reason).collect()
        }
    }

    #[async_trait]
    impl DeadLetterSink for RecordingSink {
        async fn publish(&self, letter: DeadLetter) -> Result<(), DeadLetterError> {
            self.letters.lock().unwrap().push(letter);
            Ok(())
        }
    }

    struct Fixture {
        repo: Arc<InMemoryOrderRepository>,
        store: OrderStore,
        sink: Arc<RecordingSink>,
    }

    fn fixture() -> Fixture {
        let repo = Arc::new(InMemoryOrderRepository::new());
        let store = OrderStore::new(repo.clone(), Arc::new(OrderCache::unbounded()));
        Fixture {
            repo,
            store,
            sink: Arc::new(RecordingSink::default()),
        }
    }

    fn payload(uid: &str) -> Message {
        Message::new(format!(
            r#"{{"order_uid":"{uid}","track_number":"T","entry":"WBIL",
                "delivery":{{"name":"Jane"}},"payment":{{"amount":10}},
                "items":[{{"chrt_id":1}}],"date_created":"2021-11-26T06:22:19Z"}}"#
        ))
    }

    fn ingestion(
        f: &Fixture,
        policy: RetryPolicy,
    ) -> (
        mpsc::Sender<Result<Message, TransportError>>,
        IngestionLoop<ChannelSource>,
    ) {
        let (tx, source) = ChannelSource::new(16);
        let sink: Arc<dyn DeadLetterSink> = f.sink.clone();
        (tx, IngestionLoop::new(source, f.store.clone(), policy, sink))
    }

    #[tokio::test]
    async fn test_valid_message_is_stored() {
        let f = fixture();
        let (_tx, ingest) = ingestion(&f, RetryPolicy::default());

        assert_eq!(ingest.process(&payload("A1")).await, Outcome::Stored);
        assert!(f.store.cache().contains("A1"));
        assert_eq!(f.repo.row_counts("A1"), (1, 1, 1, 1));
    }

    #[tokio::test]
    async fn test_empty_payload_is_skipped() {
        let f = fixture();
        let (_tx, ingest) = ingestion(&f, RetryPolicy::default());

        assert_eq!(ingest.process(&Message::new("")).await, Outcome::SkippedEmpty);
        assert_eq!(ingest.process(&Message::new("  \n")).await, Outcome::SkippedEmpty);
        assert!(f.sink.reasons().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_payload_is_dead_lettered() {
        let f = fixture();
        let (_tx, ingest) = ingestion(&f, RetryPolicy::default());

        assert_eq!(ingest.process(&Message::new("{not json")).await, Outcome::Malformed);
        assert_eq!(f.sink.reasons(), vec![DeadLetterReason::Malformed]);
        assert_eq!(f.repo.order_count(), 0);
    }

    #[tokio::test]
    async fn test_missing_uid_is_dead_lettered() {
        let f = fixture();
        let (_tx, ingest) = ingestion(&f, RetryPolicy::default());

        assert_eq!(ingest.process(&payload("")).await, Outcome::MissingUid);
        assert_eq!(f.sink.reasons(), vec![DeadLetterReason::InvalidUid]);
        assert!(f.store.cache().is_empty());
    }

    #[tokio::test]
    async fn test_cached_duplicate_is_skipped() {
        let f = fixture();
        let (_tx, ingest) = ingestion(&f, RetryPolicy::default());

        assert_eq!(ingest.process(&payload("A1")).await, Outcome::Stored);
        assert_eq!(ingest.process(&payload("A1")).await, Outcome::DuplicateCached);
        assert_eq!(f.repo.row_counts("A1"), (1, 1, 1, 1));
    }

    #[tokio::test]
    async fn test_stored_duplicate_is_not_retried_or_dead_lettered() {
        let f = fixture();
        let policy = RetryPolicy {
            max_attempts: NonZeroU32::new(3).unwrap(),
            ..RetryPolicy::default()
        };
        let (_tx, ingest) = ingestion(&f, policy);

        // Persisted by another writer, so the cache has not seen it.
        let order: Order = serde_json::from_slice(&payload("A1").payload).unwrap();
        f.repo.insert(&order).await.unwrap();

        assert_eq!(ingest.process(&payload("A1")).await, Outcome::DuplicateStored);
        assert!(f.sink.reasons().is_empty());
        assert!(!f.store.cache().contains("A1"));
    }

    #[tokio::test]
    async fn test_failure_is_dead_lettered_after_single_attempt() {
        let f = fixture();
        let (_tx, ingest) = ingestion(&f, RetryPolicy::default());
        f.repo.fail_next_insert(FailurePoint::Item(0));

        assert_eq!(ingest.process(&payload("A1")).await, Outcome::Failed);
        assert_eq!(f.sink.reasons(), vec![DeadLetterReason::PersistenceFailed]);
        let letter = f.sink.letters.lock().unwrap()[0].clone();
        assert_eq!(letter.attempts, 1);
        assert_eq!(letter.order_uid.as_deref(), Some("A1"));
        assert_eq!(f.repo.row_counts("A1"), (0, 0, 0, 0));
        assert!(!f.store.cache().contains("A1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failure_is_retried() {
        let f = fixture();
        let policy = RetryPolicy {
            max_attempts: NonZeroU32::new(3).unwrap(),
            initial_backoff: Duration::from_millis(50),
            max_backoff: Duration::from_secs(1),
        };
        let (_tx, ingest) = ingestion(&f, policy);
        f.repo.fail_next_insert(FailurePoint::Commit);

        assert_eq!(ingest.process(&payload("A1")).await, Outcome::Stored);
        assert!(f.sink.reasons().is_empty());
        assert_eq!(f.repo.row_counts("A1"), (1, 1, 1, 1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_counts_outcomes_until_source_closes() {
        let f = fixture();
        let (tx, ingest) = ingestion(&f, RetryPolicy::default());
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);

        tx.send(Ok(payload("A1"))).await.unwrap();
        tx.send(Ok(Message::new(""))).await.unwrap();
        tx.send(Err(TransportError::Other("broker hiccup".to_owned())))
            .await
            .unwrap();
        tx.send(Ok(Message::new("garbage"))).await.unwrap();
        tx.send(Ok(payload("A1"))).await.unwrap();
        tx.send(Ok(payload("A2"))).await.unwrap();
        drop(tx);

        let stats = ingest.run(shutdown_rx).await;
        assert_eq!(stats.stored, 2);
        assert_eq!(stats.skipped_empty, 1);
        assert_eq!(stats.malformed, 1);
        assert_eq!(stats.duplicate_cached, 1);
        assert_eq!(stats.transport_errors, 1);
        assert_eq!(stats.messages(), 5);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let f = fixture();
        let (_tx, ingest) = ingestion(&f, RetryPolicy::default());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(ingest.run(shutdown_rx));
        shutdown_tx.send(true).unwrap();

        let stats = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stats.messages(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_interrupts_backoff() {
        let f = fixture();
        let policy = RetryPolicy {
            max_attempts: NonZeroU32::new(5).unwrap(),
            initial_backoff: Duration::from_secs(60),
            max_backoff: Duration::from_secs(60),
        };
        let (tx, ingest) = ingestion(&f, policy);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        f.repo.set_unavailable(true);

        tx.send(Ok(payload("A1"))).await.unwrap();
        let handle = tokio::spawn(ingest.run(shutdown_rx));
        tokio::time::sleep(Duration::from_secs(1)).await;
        shutdown_tx.send(true).unwrap();

        let stats = handle.await.unwrap();
        assert_eq!(stats.interrupted, 1);
        assert!(f.sink.reasons().is_empty());
    }

    #[test]
    fn test_stats_record() {
        let mut stats = IngestStats::default();
        stats.record(Outcome::Stored);
        stats.record(Outcome::Stored);
        stats.record(Outcome::Failed);
        assert_eq!(stats.stored, 2);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.messages(), 3);
    }
}
