// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Timer driven batching with size-aware, partial-failure delivery.
//!
//! # Flush cycle
//!
//! ```text
//!   buffer snapshot
//!        │ chunks of at most batch_size_limit
//!        v
//!   convert (shared routing key, gzip) ──> total size <= budget(n)?
//!                                              │ yes          │ no
//!                                              v              v
//!                                         send_batch     per event:
//!                                                          size > budget(1)  -> drop
//!                                                          send              -> ok
//!                                                          ImmediateSink     -> ok / drop
//! ```
//!
//! The flush runs on a background task woken by a periodic tick or by the buffer
//! reaching the batch size limit. [`BatchingEngine::flush`] runs the same cycle on
//! demand and [`BatchingEngine::shutdown`] runs it one last time.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::buffer::{EventBuffer, Push};
use crate::constants::{
    DEFAULT_BATCH_SIZE_LIMIT, DEFAULT_PERIOD, DIAGNOSTICS_TARGET, MAX_BATCH_SIZE_LIMIT,
    MAX_MESSAGE_SIZE_BYTES, MESSAGE_OVERHEAD_BYTES, MIN_BATCH_SIZE_LIMIT,
};
use crate::converter::{new_routing_key, Compression, EventConverter};
use crate::errors::{ConstructionError, FlushError};
use crate::event::LogEvent;
use crate::immediate::ImmediateSink;
use crate::message::OutboundMessage;
use crate::transport::Transport;

/// What happens when a whole batch cannot be published.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BatchPolicy {
    /// Measure first. Oversized chunks go out one event at a time; a failed
    /// batch send is reported and not retried.
    #[default]
    SizeChecked,
    /// Always try the batch. On failure every event is sent on its own.
    AttemptFirst,
}

/// Wire size ceiling and the overhead charged per message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeLimits {
    pub ceiling: usize,
    pub overhead: usize,
}

impl Default for SizeLimits {
    fn default() -> Self {
        SizeLimits {
            ceiling: MAX_MESSAGE_SIZE_BYTES,
            overhead: MESSAGE_OVERHEAD_BYTES,
        }
    }
}

impl SizeLimits {
    /// Bytes available to `count` messages published together.
    #[must_use]
    pub fn budget(&self, count: usize) -> usize {
        self.ceiling
            .saturating_sub(self.overhead.saturating_mul(count))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchingOptions {
    pub batch_size_limit: usize,
    pub period: Duration,
    pub policy: BatchPolicy,
    pub limits: SizeLimits,
    /// Compression threshold of the immediate fallback path.
    pub compression_threshold: Option<usize>,
}

impl Default for BatchingOptions {
    fn default() -> Self {
        BatchingOptions {
            batch_size_limit: DEFAULT_BATCH_SIZE_LIMIT,
            period: DEFAULT_PERIOD,
            policy: BatchPolicy::default(),
            limits: SizeLimits::default(),
            compression_threshold: None,
        }
    }
}

impl BatchingOptions {
    pub fn validate(&self) -> Result<(), ConstructionError> {
        if !(MIN_BATCH_SIZE_LIMIT..=MAX_BATCH_SIZE_LIMIT).contains(&self.batch_size_limit) {
            return Err(ConstructionError::BatchSizeLimit {
                min: MIN_BATCH_SIZE_LIMIT,
                max: MAX_BATCH_SIZE_LIMIT,
                actual: self.batch_size_limit,
            });
        }
        if self.period.is_zero() {
            return Err(ConstructionError::ZeroPeriod);
        }
        Ok(())
    }
}

/// Outcome of one flush cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlushReport {
    /// Buffer generation processed by this cycle.
    pub generation: u64,
    /// Events published as part of a whole batch.
    pub batched: usize,
    /// Events published by an individual send.
    pub sent_individually: usize,
    /// Events published through the immediate path after an individual send failed.
    pub rescued: usize,
    /// Events given up on.
    pub dropped: usize,
    /// Events in batches whose send failed under [`BatchPolicy::SizeChecked`].
    pub failed: usize,
    /// Another flush was running, nothing was done.
    pub skipped: bool,
}

impl FlushReport {
    fn new(generation: u64) -> Self {
        FlushReport {
            generation,
            ..Default::default()
        }
    }

    fn in_progress() -> Self {
        FlushReport {
            skipped: true,
            ..Default::default()
        }
    }

    /// Events that reached the transport in this cycle.
    #[must_use]
    pub fn delivered(&self) -> usize {
        self.batched + self.sent_individually + self.rescued
    }

    /// Events this cycle took out of the buffer.
    #[must_use]
    pub fn processed(&self) -> usize {
        self.delivered() + self.dropped + self.failed
    }
}

struct Shared {
    buffer: EventBuffer,
    converter: EventConverter,
    transport: Arc<dyn Transport>,
    immediate: ImmediateSink,
    options: BatchingOptions,
    size_reached: Notify,
}

impl Shared {
    async fn flush(&self) -> Result<FlushReport, FlushError> {
        let Some(guard) = self.buffer.begin_flush() else {
            debug!("EVENTHUB | Flush already in progress, skipping");
            return Ok(FlushReport::in_progress());
        };
        self.process(guard.generation(), guard.events()).await
    }

    async fn final_flush(&self) -> Result<FlushReport, FlushError> {
        let guard = self.buffer.begin_flush_when_idle().await;
        self.process(guard.generation(), guard.events()).await
    }

    /// Every chunk is attempted. The first error is returned once all are done.
    async fn process(
        &self,
        generation: u64,
        events: &[LogEvent],
    ) -> Result<FlushReport, FlushError> {
        let mut report = FlushReport::new(generation);
        if events.is_empty() {
            return Ok(report);
        }

        debug!(
            "EVENTHUB | Flushing {} events from generation {generation}",
            events.len()
        );

        let mut first_error = None;
        for chunk in events.chunks(self.options.batch_size_limit) {
            if let Err(e) = self.flush_chunk(chunk, &mut report).await {
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(report),
        }
    }

    async fn flush_chunk(
        &self,
        chunk: &[LogEvent],
        report: &mut FlushReport,
    ) -> Result<(), FlushError> {
        let routing_key = new_routing_key();
        let messages = match chunk
            .iter()
            .map(|event| {
                self.converter
                    .convert(event, Some(&routing_key), Compression::Always)
            })
            .collect::<Result<Vec<OutboundMessage>, _>>()
        {
            Ok(messages) => messages,
            Err(e) => {
                error!(
                    target: DIAGNOSTICS_TARGET,
                    "EVENTHUB | Dropping {} events: failed to convert batch: {e}",
                    chunk.len()
                );
                report.dropped += chunk.len();
                return Err(e.into());
            }
        };

        let count = messages.len();
        match self.options.policy {
            BatchPolicy::SizeChecked => {
                let total: usize = messages.iter().map(OutboundMessage::serialized_size).sum();
                let budget = self.options.limits.budget(count);
                if total > budget {
                    debug!(
                        "EVENTHUB | Batch of {count} messages is {total} bytes, over the budget of {budget} bytes, sending individually"
                    );
                    self.send_individually(chunk, report).await;
                    return Ok(());
                }

                if let Err(source) = self.transport.send_batch(&messages).await {
                    report.failed += count;
                    return Err(FlushError::Batch { count, source });
                }
                report.batched += count;
            }
            BatchPolicy::AttemptFirst => match self.transport.send_batch(&messages).await {
                Ok(()) => report.batched += count,
                Err(e) => {
                    warn!(
                        target: DIAGNOSTICS_TARGET,
                        "EVENTHUB | Failed to send batch of {count} messages, sending individually: {e}"
                    );
                    self.send_individually(chunk, report).await;
                }
            },
        }
        Ok(())
    }

    /// A size notification raised while the periodic tick was being served is
    /// covered by that flush. Drop it unless the buffer has filled up again.
    fn discard_stale_size_notification(&self) {
        let pending = self.size_reached.notified();
        tokio::pin!(pending);
        pending.as_mut().enable();
        if self.buffer.len() >= self.options.batch_size_limit {
            self.size_reached.notify_one();
        }
    }

    /// Per-event delivery. Never fails: every event ends up delivered or dropped.
    async fn send_individually(&self, events: &[LogEvent], report: &mut FlushReport) {
        let budget = self.options.limits.budget(1);

        for event in events {
            let message = match self.converter.convert(event, None, Compression::Always) {
                Ok(message) => message,
                Err(e) => {
                    error!(
                        target: DIAGNOSTICS_TARGET,
                        "EVENTHUB | Dropping event: failed to convert: {e}"
                    );
                    report.dropped += 1;
                    continue;
                }
            };

            let size = message.serialized_size();
            if size > budget {
                warn!(
                    target: DIAGNOSTICS_TARGET,
                    "EVENTHUB | Dropping message of {size} bytes, larger than the limit of {budget} bytes"
                );
                report.dropped += 1;
                continue;
            }

            let Err(e) = self.transport.send(&message).await else {
                report.sent_individually += 1;
                continue;
            };

            debug!("EVENTHUB | Individual send failed, retrying through the immediate path: {e}");
            match self.immediate.emit(event).await {
                Ok(()) => report.rescued += 1,
                Err(e) => {
                    error!(
                        target: DIAGNOSTICS_TARGET,
                        "EVENTHUB | Dropping event after immediate retry failed: {e}"
                    );
                    report.dropped += 1;
                }
            }
        }
    }
}

/// Buffers events and publishes them in the background.
///
/// Must be started from within a tokio runtime.
pub struct BatchingEngine {
    shared: Arc<Shared>,
    cancel_token: CancellationToken,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for BatchingEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchingEngine")
            .field("options", &self.shared.options)
            .field("buffered", &self.shared.buffer.len())
            .finish_non_exhaustive()
    }
}

impl BatchingEngine {
    /// Validates `options` and spawns the flush worker.
    pub fn start(
        options: BatchingOptions,
        converter: EventConverter,
        transport: Arc<dyn Transport>,
    ) -> Result<Self, ConstructionError> {
        options.validate()?;

        let immediate = ImmediateSink::new(
            converter.clone(),
            Arc::clone(&transport),
            options.compression_threshold,
        );
        let shared = Arc::new(Shared {
            buffer: EventBuffer::new(),
            converter,
            transport,
            immediate,
            options,
            size_reached: Notify::new(),
        });

        let cancel_token = CancellationToken::new();
        let worker = tokio::spawn(run_worker(Arc::clone(&shared), cancel_token.clone()));

        Ok(BatchingEngine {
            shared,
            cancel_token,
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Buffers `event` without blocking on I/O. Wakes the worker once the buffer
    /// holds a full batch.
    pub fn enqueue(&self, event: LogEvent) {
        match self.shared.buffer.push(event) {
            Push::Accepted(len) => {
                if len >= self.shared.options.batch_size_limit {
                    self.shared.size_reached.notify_one();
                }
            }
            Push::Closed => {
                warn!(
                    target: DIAGNOSTICS_TARGET,
                    "EVENTHUB | Dropping event enqueued after shutdown"
                );
            }
        }
    }

    /// Runs one flush cycle now. Returns a skipped report when a flush is
    /// already running.
    pub async fn flush(&self) -> Result<FlushReport, FlushError> {
        self.shared.flush().await
    }

    #[must_use]
    pub fn buffered(&self) -> usize {
        self.shared.buffer.len()
    }

    #[must_use]
    pub fn options(&self) -> &BatchingOptions {
        &self.shared.options
    }

    /// Stops the worker and flushes everything still buffered, exactly once.
    /// Later events are dropped.
    pub async fn shutdown(&self) -> Result<FlushReport, FlushError> {
        let buffered = self.shared.buffer.close();
        debug!("EVENTHUB | Shutting down with {buffered} buffered events");

        self.cancel_token.cancel();
        let worker = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                error!("EVENTHUB | Flush worker ended abnormally: {e}");
            }
        }

        self.shared.final_flush().await
    }
}

impl Drop for BatchingEngine {
    fn drop(&mut self) {
        self.cancel_token.cancel();
        let stranded = self.shared.buffer.len();
        if stranded > 0 {
            warn!(
                target: DIAGNOSTICS_TARGET,
                "EVENTHUB | Engine dropped without shutdown, {stranded} buffered events were not sent"
            );
        }
    }
}

async fn run_worker(shared: Arc<Shared>, cancel_token: CancellationToken) {
    let mut flush_interval = interval(shared.options.period);
    flush_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    flush_interval.tick().await; // discard first tick, which is instantaneous

    loop {
        let periodic = tokio::select! {
            biased;
            () = cancel_token.cancelled() => {
                debug!("EVENTHUB | Flush worker cancelled");
                break;
            }
            _ = flush_interval.tick() => true,
            () = shared.size_reached.notified() => {
                debug!("EVENTHUB | Batch size limit reached, flushing early");
                false
            }
        };

        let result = shared.flush().await;
        if periodic {
            shared.discard_stale_size_notification();
        }

        match result {
            Ok(report) if report.processed() > 0 => {
                debug!(
                    "EVENTHUB | Flushed generation {}: {} delivered, {} dropped",
                    report.generation,
                    report.delivered(),
                    report.dropped
                );
            }
            Ok(_) => {}
            Err(e) => {
                error!(target: DIAGNOSTICS_TARGET, "EVENTHUB | Flush failed: {e}");
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::errors::TransportError;
    use crate::event::LogLevel;
    use crate::transport::MemoryTransport;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tracing_test::traced_test;

    #[derive(Default)]
    struct Counting {
        sends: AtomicUsize,
        batches: AtomicUsize,
        fail_batches: bool,
        fail_sends: bool,
    }

    #[async_trait]
    impl Transport for Counting {
        async fn send(&self, _message: &OutboundMessage) -> Result<(), TransportError> {
            self.sends.fetch_add(1, Ordering::SeqCst);
            if self.fail_sends {
                return Err(TransportError::Unavailable);
            }
            Ok(())
        }

        async fn send_batch(&self, _messages: &[OutboundMessage]) -> Result<(), TransportError> {
            self.batches.fetch_add(1, Ordering::SeqCst);
            if self.fail_batches {
                return Err(TransportError::Rejected("batch refused".to_string()));
            }
            Ok(())
        }
    }

    fn event(n: usize) -> LogEvent {
        LogEvent::new(Utc::now().fixed_offset(), LogLevel::Information, "Item {N}")
            .with_property("N", n as u64)
    }

    fn options(batch_size_limit: usize) -> BatchingOptions {
        BatchingOptions {
            batch_size_limit,
            ..Default::default()
        }
    }

    #[test]
    fn test_budget_saturates() {
        let limits = SizeLimits::default();
        assert_eq!(limits.budget(0), 256_000);
        assert_eq!(limits.budget(1), 250_000);
        assert_eq!(limits.budget(10), 196_000);
        assert_eq!(limits.budget(42), 4_000);
        assert_eq!(limits.budget(43), 0);
        assert_eq!(limits.budget(usize::MAX), 0);
    }

    #[test]
    fn test_validate_rejects_bad_options() {
        assert_eq!(
            options(0).validate(),
            Err(ConstructionError::BatchSizeLimit {
                min: 1,
                max: 100,
                actual: 0
            })
        );
        assert!(options(101).validate().is_err());
        assert!(options(1).validate().is_ok());
        assert!(options(100).validate().is_ok());

        let zero_period = BatchingOptions {
            period: Duration::ZERO,
            ..Default::default()
        };
        assert_eq!(zero_period.validate(), Err(ConstructionError::ZeroPeriod));
    }

    #[tokio::test]
    async fn test_start_rejects_invalid_limit() {
        let result = BatchingEngine::start(
            options(101),
            EventConverter::default(),
            Arc::new(MemoryTransport::new()),
        );
        assert!(matches!(
            result,
            Err(ConstructionError::BatchSizeLimit { actual: 101, .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_flush_sends_one_batch() {
        let transport = Arc::new(MemoryTransport::new());
        let engine =
            BatchingEngine::start(options(10), EventConverter::default(), transport.clone())
                .unwrap();

        for n in 0..3 {
            engine.enqueue(event(n));
        }
        tokio::time::sleep(DEFAULT_PERIOD + Duration::from_millis(10)).await;

        let published = transport.published();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].len(), 3);
        assert!(published[0].iter().all(OutboundMessage::is_compressed));
        let key = published[0][0].routing_key();
        assert!(published[0].iter().all(|m| m.routing_key() == key));
        assert_eq!(engine.buffered(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_buffer_flushes_before_period() {
        let transport = Arc::new(MemoryTransport::new());
        let engine =
            BatchingEngine::start(options(5), EventConverter::default(), transport.clone())
                .unwrap();

        for n in 0..5 {
            engine.enqueue(event(n));
        }
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(transport.published().len(), 1);
        assert_eq!(transport.messages().len(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_size_notification_is_discarded() {
        let transport = Arc::new(MemoryTransport::new());
        let engine =
            BatchingEngine::start(options(3), EventConverter::default(), transport.clone())
                .unwrap();

        engine.enqueue(event(0));
        engine.enqueue(event(1));
        // left over from a full buffer that a periodic flush already took
        engine.shared.size_reached.notify_one();
        engine.shared.discard_stale_size_notification();
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert!(transport.published().is_empty());
        assert_eq!(engine.buffered(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_size_notification_kept_when_buffer_is_full_again() {
        let transport = Arc::new(MemoryTransport::new());
        let engine =
            BatchingEngine::start(options(3), EventConverter::default(), transport.clone())
                .unwrap();

        for n in 0..3 {
            engine.enqueue(event(n));
        }
        engine.shared.discard_stale_size_notification();
        tokio::time::sleep(Duration::from_millis(10)).await;

        let published = transport.published();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].len(), 3);
    }

    #[tokio::test]
    async fn test_large_snapshot_is_chunked() {
        let transport = Arc::new(MemoryTransport::new());
        let engine =
            BatchingEngine::start(options(4), EventConverter::default(), transport.clone())
                .unwrap();
        engine.cancel_token.cancel();

        for n in 0..10 {
            engine.enqueue(event(n));
        }
        let report = engine.flush().await.unwrap();

        assert_eq!(report.batched, 10);
        let sizes: Vec<usize> = transport.published().iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![4, 4, 2]);
    }

    #[tokio::test]
    async fn test_attempt_first_falls_back_to_individual_sends() {
        let transport = Arc::new(Counting {
            fail_batches: true,
            ..Default::default()
        });
        let engine = BatchingEngine::start(
            BatchingOptions {
                policy: BatchPolicy::AttemptFirst,
                ..options(10)
            },
            EventConverter::default(),
            transport.clone(),
        )
        .unwrap();
        engine.cancel_token.cancel();

        for n in 0..10 {
            engine.enqueue(event(n));
        }
        let report = engine.flush().await.unwrap();

        assert_eq!(transport.batches.load(Ordering::SeqCst), 1);
        assert_eq!(transport.sends.load(Ordering::SeqCst), 10);
        assert_eq!(report.sent_individually, 10);
        assert_eq!(report.dropped, 0);
    }

    #[tokio::test]
    async fn test_size_checked_batch_failure_is_returned() {
        let transport = Arc::new(Counting {
            fail_batches: true,
            ..Default::default()
        });
        let engine =
            BatchingEngine::start(options(10), EventConverter::default(), transport.clone())
                .unwrap();
        engine.cancel_token.cancel();

        for n in 0..3 {
            engine.enqueue(event(n));
        }
        let result = engine.flush().await;

        assert!(matches!(result, Err(FlushError::Batch { count: 3, .. })));
        assert_eq!(transport.sends.load(Ordering::SeqCst), 0);
    }

    #[traced_test]
    #[tokio::test]
    async fn test_failed_send_and_retry_drops_with_diagnostic() {
        let transport = Arc::new(Counting {
            fail_batches: true,
            fail_sends: true,
            ..Default::default()
        });
        let engine = BatchingEngine::start(
            BatchingOptions {
                policy: BatchPolicy::AttemptFirst,
                ..options(10)
            },
            EventConverter::default(),
            transport.clone(),
        )
        .unwrap();
        engine.cancel_token.cancel();

        engine.enqueue(event(1));
        let report = engine.flush().await.unwrap();

        // One individual send, then one through the immediate path.
        assert_eq!(transport.sends.load(Ordering::SeqCst), 2);
        assert_eq!(report.dropped, 1);
        assert!(logs_contain("Dropping event after immediate retry failed"));
    }

    #[traced_test]
    #[tokio::test]
    async fn test_flush_while_flushing_is_skipped() {
        let engine = BatchingEngine::start(
            options(10),
            EventConverter::default(),
            Arc::new(MemoryTransport::new()),
        )
        .unwrap();
        engine.cancel_token.cancel();

        let guard = engine.shared.buffer.begin_flush().unwrap();
        let report = engine.flush().await.unwrap();
        drop(guard);

        assert!(report.skipped);
        assert!(logs_contain("Flush already in progress"));
    }

    #[tokio::test]
    async fn test_shutdown_flushes_everything_once() {
        let transport = Arc::new(MemoryTransport::new());
        let engine =
            BatchingEngine::start(options(50), EventConverter::default(), transport.clone())
                .unwrap();

        for n in 0..7 {
            engine.enqueue(event(n));
        }
        let report = engine.shutdown().await.unwrap();

        assert_eq!(report.batched, 7);
        assert_eq!(transport.published().len(), 1);
        assert_eq!(engine.buffered(), 0);
    }

    #[traced_test]
    #[tokio::test]
    async fn test_enqueue_after_shutdown_is_dropped() {
        let transport = Arc::new(MemoryTransport::new());
        let engine =
            BatchingEngine::start(options(10), EventConverter::default(), transport.clone())
                .unwrap();
        engine.shutdown().await.unwrap();

        engine.enqueue(event(1));

        assert_eq!(engine.buffered(), 0);
        assert!(transport.published().is_empty());
        assert!(logs_contain("Dropping event enqueued after shutdown"));
    }

    #[traced_test]
    #[tokio::test]
    async fn test_drop_reports_stranded_events() {
        let engine = BatchingEngine::start(
            options(10),
            EventConverter::default(),
            Arc::new(MemoryTransport::new()),
        )
        .unwrap();
        engine.enqueue(event(1));
        engine.enqueue(event(2));

        drop(engine);

        assert!(logs_contain("2 buffered events were not sent"));
    }
}
