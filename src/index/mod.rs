//! Batched, at-least-once delivery of events into a remote search index.
//!
//! Producers hand events to [`IndexDeliveryClient::enqueue`], which appends them to a bounded
//! [`BatchBuffer`] and returns immediately. A background worker flushes the buffer whenever a
//! full batch is available or the batch interval elapses, whichever happens first.
//!
//! Each batch is sent as a bulk "create" request. Documents carry no ID, so a retry after an
//! ambiguous failure may store a document twice. Documents rejected with a retryable status are
//! retried with exponential backoff, permanently rejected ones are dropped right away. Every
//! drop is reported as a self-diagnostic event to the local sinks.

use crate::event::{EventRecord, Level};
use crate::sink::SinkRouter;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

pub mod backoff;
pub mod buffer;
pub mod document;
#[cfg(feature = "open_search")]
pub mod opensearch;
pub mod transport;

pub use buffer::{Appended, BatchBuffer, OverflowPolicy};
pub use transport::{IndexTransport, ItemOutcome, TransportError};

/// Tuning knobs of the delivery client.
#[derive(Clone, Debug)]
pub struct DeliveryOptions {
    /// Fixed name of the target index.
    pub index_name: String,
    /// Number of events which trigger an immediate flush and the maximum size of one request.
    pub batch_size: usize,
    /// Maximum time an event waits in the buffer before it is flushed.
    pub batch_interval: Duration,
    /// Maximum number of buffered events.
    pub buffer_capacity: usize,
    pub overflow_policy: OverflowPolicy,
    /// Number of retries after the first attempt of a batch.
    pub max_retries: u32,
    /// Timeout of a single bulk request.
    pub request_timeout: Duration,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
    /// Upper bound for the final flush on shutdown.
    pub shutdown_timeout: Duration,
}

impl Default for DeliveryOptions {
    fn default() -> Self {
        DeliveryOptions {
            index_name: "timeseries".to_string(),
            batch_size: 50,
            batch_interval: Duration::from_secs(2),
            buffer_capacity: 100_000,
            overflow_policy: OverflowPolicy::DropOldest,
            max_retries: 5,
            request_timeout: Duration::from_secs(10),
            backoff_base: Duration::from_millis(500),
            backoff_max: Duration::from_secs(30),
            shutdown_timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Default)]
struct DeliveryStats {
    delivered: AtomicU64,
    retried: AtomicU64,
    dropped: AtomicU64,
    overflowed: AtomicU64,
}

/// A snapshot of the delivery counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DeliveryCounts {
    /// Events acknowledged by the index.
    pub delivered: u64,
    /// Event transmissions which had to be repeated.
    pub retried: u64,
    /// Events given up on after a permanent rejection, exhausted retries, an unfinished final
    /// flush or because they arrived after shutdown.
    pub dropped: u64,
    /// Events discarded because the buffer was full.
    pub overflowed: u64,
}

struct Shared {
    index_name: String,
    buffer: BatchBuffer,
    batch_ready: Notify,
    stats: DeliveryStats,
    diagnostics: SinkRouter,
    shutdown: CancellationToken,
    worker: Mutex<Option<JoinHandle<()>>>,
    shutdown_timeout: Duration,
}

impl Shared {
    fn drop_events(&self, count: usize, reason: &str) {
        if count == 0 {
            return;
        }

        self.stats.dropped.fetch_add(count as u64, Ordering::Relaxed);
        self.report(
            EventRecord::diagnostic(
                Level::Error,
                "Dropped {DroppedCount} events destined for index {IndexName}: {Reason}",
            )
            .with_property("DroppedCount", count)
            .with_property("IndexName", self.index_name.as_str())
            .with_property("Reason", reason),
        );
    }

    /// Self-diagnostics go to the local sinks only. They are mirrored into `tracing` at debug
    /// level, as the console sink already prints them.
    fn report(&self, diagnostic: EventRecord) {
        tracing::debug!("{}", diagnostic.render_message());
        self.diagnostics.route(&diagnostic);
    }
}

/// Handle on the delivery pipeline into the remote index. Clones share the same buffer and
/// background worker.
#[derive(Clone)]
pub struct IndexDeliveryClient {
    shared: Arc<Shared>,
}

impl IndexDeliveryClient {
    /// Creates the client and spawns its background worker onto the current tokio runtime.
    ///
    /// `diagnostics` receives self-diagnostic events and must only contain local sinks.
    pub fn start(
        transport: Arc<dyn IndexTransport>,
        options: DeliveryOptions,
        diagnostics: SinkRouter,
    ) -> Self {
        let shared = Arc::new(Shared {
            index_name: options.index_name.clone(),
            buffer: BatchBuffer::new(
                options.buffer_capacity,
                options.batch_size,
                options.overflow_policy,
            ),
            batch_ready: Notify::new(),
            stats: DeliveryStats::default(),
            diagnostics,
            shutdown: CancellationToken::new(),
            worker: Mutex::new(None),
            shutdown_timeout: options.shutdown_timeout,
        });

        tracing::debug!(
            "Delivering events into index '{}' in batches of {} (every {:?} at the latest)",
            options.index_name,
            options.batch_size,
            options.batch_interval
        );

        let worker = DeliveryWorker {
            shared: shared.clone(),
            transport,
            options,
            in_flight: Vec::new(),
            reported_overflows: 0,
        };
        let handle = tokio::spawn(worker.run());
        *lock(&shared.worker) = Some(handle);

        IndexDeliveryClient { shared }
    }

    /// Buffers an event for delivery. Never blocks on I/O.
    ///
    /// Once [`shutdown`](Self::shutdown) has been called, events are counted as dropped and
    /// each of them is reported to the local sinks.
    pub fn enqueue(&self, record: EventRecord) {
        if self.shared.shutdown.is_cancelled() {
            self.shared
                .drop_events(1, "Index delivery has already been shut down");
            return;
        }

        match self.shared.buffer.append(record) {
            Appended::Queued => {}
            Appended::BatchReady => self.shared.batch_ready.notify_one(),
            Appended::Overflowed => {
                self.shared.stats.overflowed.fetch_add(1, Ordering::Relaxed);
                self.shared.batch_ready.notify_one();
            }
        }
    }

    /// Number of events currently waiting in the buffer.
    pub fn pending(&self) -> usize {
        self.shared.buffer.len()
    }

    pub fn stats(&self) -> DeliveryCounts {
        let stats = &self.shared.stats;
        DeliveryCounts {
            delivered: stats.delivered.load(Ordering::Relaxed),
            retried: stats.retried.load(Ordering::Relaxed),
            dropped: stats.dropped.load(Ordering::Relaxed),
            overflowed: stats.overflowed.load(Ordering::Relaxed),
        }
    }

    /// Stops the worker after one final flush of the buffer.
    ///
    /// A batch which is currently being retried joins the final flush right away. The flush is
    /// bounded by the configured shutdown timeout, whatever is still undelivered after that is
    /// counted and reported as dropped. Calling this more than once is harmless.
    pub async fn shutdown(&self) {
        self.shared.shutdown.cancel();

        let handle = lock(&self.shared.worker).take();
        if let Some(handle) = handle {
            // The worker bounds its final flush by the same timeout, the margin covers the
            // reporting which follows it.
            let grace = self.shared.shutdown_timeout + Duration::from_secs(1);
            if tokio::time::timeout(grace, handle).await.is_err() {
                tracing::warn!("Index delivery worker did not stop within {:?}", grace);
            }
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

struct DeliveryWorker {
    shared: Arc<Shared>,
    transport: Arc<dyn IndexTransport>,
    options: DeliveryOptions,
    /// Documents of the batch being delivered. Kept here so that an interrupted delivery
    /// leaves them behind for the final flush.
    in_flight: Vec<Value>,
    reported_overflows: u64,
}

impl DeliveryWorker {
    async fn run(mut self) {
        let shutdown = self.shared.shutdown.clone();
        let mut interval = tokio::time::interval(self.options.batch_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        interval.tick().await;

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = self.shared.batch_ready.notified() => {
                    tokio::select! {
                        biased;
                        _ = shutdown.cancelled() => break,
                        _ = self.flush_full_batches() => interval.reset(),
                    }
                },
                _ = interval.tick() => {
                    tokio::select! {
                        biased;
                        _ = shutdown.cancelled() => break,
                        _ = self.flush_everything() => {},
                    }
                },
            }
        }

        self.final_flush().await;
        tracing::debug!("Index delivery worker stopped");
    }

    async fn final_flush(&mut self) {
        let timeout = self.options.shutdown_timeout;
        if tokio::time::timeout(timeout, self.flush_everything())
            .await
            .is_ok()
        {
            return;
        }

        let mut abandoned = std::mem::take(&mut self.in_flight).len();
        loop {
            let batch = self.shared.buffer.take_batch();
            if batch.is_empty() {
                break;
            }
            abandoned += batch.len();
        }

        self.shared.drop_events(
            abandoned,
            &format!("The final flush did not finish within {:?}", timeout),
        );
        self.report_overflows();
    }

    async fn flush_full_batches(&mut self) {
        while let Some(batch) = self.shared.buffer.take_full_batch() {
            self.deliver(batch).await;
        }
        self.report_overflows();
    }

    async fn flush_everything(&mut self) {
        if !self.in_flight.is_empty() {
            self.deliver(Vec::new()).await;
        }

        loop {
            let batch = self.shared.buffer.take_batch();
            if batch.is_empty() {
                break;
            }
            self.deliver(batch).await;
        }
        self.report_overflows();
    }

    #[tracing::instrument(level = "debug", skip_all, fields(size = batch.len()))]
    async fn deliver(&mut self, batch: Vec<EventRecord>) {
        for record in &batch {
            match document::to_document(record) {
                Ok(document) => self.in_flight.push(document),
                Err(err) => self
                    .shared
                    .drop_events(1, &format!("Failed to serialize event: {}", err)),
            }
        }

        let mut attempt = 0;
        while !self.in_flight.is_empty() {
            attempt += 1;

            let result = match tokio::time::timeout(
                self.options.request_timeout,
                self.transport
                    .bulk_create(&self.options.index_name, &self.in_flight),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(TransportError::Timeout(self.options.request_timeout)),
            };

            let reason = match result {
                Ok(outcomes) => {
                    let documents = std::mem::take(&mut self.in_flight);
                    self.in_flight = self.settle(documents, outcomes);
                    if self.in_flight.is_empty() {
                        return;
                    }
                    format!(
                        "{} documents were rejected with a retryable status",
                        self.in_flight.len()
                    )
                }
                Err(err) if err.is_retryable() => err.to_string(),
                Err(err) => {
                    let count = std::mem::take(&mut self.in_flight).len();
                    self.shared.drop_events(count, &err.to_string());
                    return;
                }
            };

            if attempt > self.options.max_retries {
                let count = std::mem::take(&mut self.in_flight).len();
                self.shared.drop_events(
                    count,
                    &format!("Giving up after {} attempts: {}", attempt, reason),
                );
                return;
            }

            let delay = backoff::calculate_backoff(
                attempt,
                self.options.backoff_base,
                self.options.backoff_max,
            );
            tracing::debug!(
                "Retrying {} documents in {:?} (attempt {}): {}",
                self.in_flight.len(),
                delay,
                attempt,
                reason
            );
            self.shared
                .stats
                .retried
                .fetch_add(self.in_flight.len() as u64, Ordering::Relaxed);

            // During shutdown the remaining attempts run back to back, bounded by the final
            // flush timeout.
            tokio::select! {
                _ = tokio::time::sleep(delay) => {},
                _ = self.shared.shutdown.cancelled() => {},
            }
        }
    }

    /// Books the outcome of a bulk request and returns the documents worth another attempt.
    fn settle(&self, documents: Vec<Value>, outcomes: Vec<ItemOutcome>) -> Vec<Value> {
        if outcomes.len() != documents.len() {
            // Transports are required to answer per document. Without that mapping nothing
            // can be considered delivered.
            return documents;
        }

        let mut retry = Vec::new();
        let mut delivered = 0;
        for (document, outcome) in documents.into_iter().zip(outcomes) {
            let retryable = outcome.is_retryable();
            match outcome {
                ItemOutcome::Created => delivered += 1,
                ItemOutcome::Failed { .. } if retryable => retry.push(document),
                ItemOutcome::Failed { reason, .. } => {
                    self.shared
                        .drop_events(1, &format!("Rejected by the index: {}", reason));
                }
            }
        }

        self.shared
            .stats
            .delivered
            .fetch_add(delivered, Ordering::Relaxed);
        retry
    }

    fn report_overflows(&mut self) {
        let overflowed = self.shared.stats.overflowed.load(Ordering::Relaxed);
        let unreported = overflowed.saturating_sub(self.reported_overflows);
        if unreported > 0 {
            self.reported_overflows = overflowed;
            self.shared.report(
                EventRecord::diagnostic(
                    Level::Warning,
                    "Discarded {OverflowCount} events because the delivery buffer was full ({Policy})",
                )
                .with_property("OverflowCount", unreported)
                .with_property("Policy", format!("{:?}", self.options.overflow_policy)),
            );
        }
    }
}
