//! Business consumer workers.
//!
//! Worker `i` of `n` owns every requests partition `p` with `p % n == i`, so
//! one user's requests are processed in order by one worker. A unit is
//! committed only after its reply is published. Failures that a retry can fix
//! leave the acknowledgement uncommitted and the queue redelivers the unit;
//! units that can never succeed (bad bytes, unknown type) are committed and
//! dropped.

use std::sync::Arc;
use std::time::{Duration, Instant};

use relay_core::{Message, MessageKind, RelayError};
use relay_queue::{Consumer, Delivery, Producer, Record, REPLIES_TOPIC, REQUESTS_TOPIC};
use relay_settings::BusinessSettings;
use relay_telemetry::MetricsRecorder;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::processors::{ProcessorSet, UnitId};

/// What happened to one unit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnitOutcome {
    Processed,
    /// Left uncommitted for redelivery.
    Released,
    /// Committed without processing.
    Discarded,
}

pub struct BusinessConsumer {
    consumer: Arc<dyn Consumer>,
    producer: Arc<dyn Producer>,
    processors: ProcessorSet,
    metrics: Arc<MetricsRecorder>,
    workers: usize,
    batch_size: usize,
    poll_interval: Duration,
}

impl BusinessConsumer {
    pub fn new(
        consumer: Arc<dyn Consumer>,
        producer: Arc<dyn Producer>,
        processors: ProcessorSet,
        settings: &BusinessSettings,
        metrics: Arc<MetricsRecorder>,
    ) -> Self {
        Self {
            consumer,
            producer,
            processors,
            metrics,
            workers: settings.consumers.max(1),
            batch_size: settings.batch_size.max(1),
            poll_interval: settings.poll_interval(),
        }
    }

    /// Partitions owned by worker `worker`.
    pub fn partitions_for(&self, worker: usize) -> Vec<usize> {
        (0..self.consumer.partition_count())
            .filter(|p| p % self.workers == worker)
            .collect()
    }

    /// Take one batch from `partition` and settle every unit in it.
    pub async fn drain_partition(&self, partition: usize) -> Vec<UnitOutcome> {
        let batch = self
            .consumer
            .poll(REQUESTS_TOPIC, partition, self.batch_size)
            .await;
        let mut outcomes = Vec::with_capacity(batch.len());
        for delivery in batch {
            outcomes.push(self.handle(delivery).await);
        }
        outcomes
    }

    async fn handle(&self, delivery: Delivery) -> UnitOutcome {
        let (record, ack) = delivery.into_parts();
        let started = Instant::now();
        match self.process(&record).await {
            Ok(request_type) => {
                ack.commit();
                let labels = [("request_type", request_type)];
                self.metrics.counter_inc("business.processed", &labels, 1);
                self.metrics.histogram_observe(
                    "business.process_ms",
                    &labels,
                    started.elapsed().as_secs_f64() * 1000.0,
                );
                UnitOutcome::Processed
            }
            Err(e) if e.is_redeliverable() => {
                tracing::warn!(
                    key = %record.key,
                    partition = record.partition,
                    offset = record.offset,
                    attempt = record.attempt,
                    error_kind = e.error_kind(),
                    error = %e,
                    "processing failed, leaving unit for redelivery"
                );
                self.metrics
                    .counter_inc("business.processing_failed", &[("error_kind", e.error_kind())], 1);
                drop(ack);
                UnitOutcome::Released
            }
            Err(e) => {
                tracing::warn!(
                    key = %record.key,
                    partition = record.partition,
                    offset = record.offset,
                    error_kind = e.error_kind(),
                    error = %e,
                    "discarding unprocessable unit"
                );
                self.metrics
                    .counter_inc("business.discarded", &[("error_kind", e.error_kind())], 1);
                ack.commit();
                UnitOutcome::Discarded
            }
        }
    }

    async fn process(&self, record: &Record) -> Result<&'static str, RelayError> {
        let request = Message::decode(&record.payload)?;
        if request.kind() != MessageKind::Request {
            return Err(RelayError::Decode("response frame on requests topic".into()));
        }
        let request_type = request.request_type();
        let processor = self
            .processors
            .get(request_type)
            .ok_or(RelayError::UnknownRequestType(request_type.code()))?;

        if let Some(reply) = processor.process(UnitId::from(record), &request).await? {
            self.producer
                .publish(REPLIES_TOPIC, &record.key, reply.encode())
                .await?;
        }
        tracing::debug!(key = %record.key, request_type = request_type.name(), attempt = record.attempt, "unit processed");
        Ok(request_type.name())
    }

    /// Start one task per worker. Each stops when `cancel` fires.
    pub fn spawn(self: Arc<Self>, cancel: CancellationToken) -> Vec<JoinHandle<()>> {
        (0..self.workers)
            .map(|worker| {
                let this = Arc::clone(&self);
                let cancel = cancel.clone();
                tokio::spawn(async move { this.run_worker(worker, cancel).await })
            })
            .collect()
    }

    async fn run_worker(&self, worker: usize, cancel: CancellationToken) {
        let partitions = self.partitions_for(worker);
        if partitions.is_empty() {
            tracing::debug!(worker, "no partitions to consume");
            return;
        }
        tracing::debug!(worker, ?partitions, "business worker started");
        loop {
            if cancel.is_cancelled() {
                break;
            }
            let mut settled = 0;
            let mut released = false;
            for &partition in &partitions {
                for outcome in self.drain_partition(partition).await {
                    match outcome {
                        UnitOutcome::Released => released = true,
                        UnitOutcome::Processed | UnitOutcome::Discarded => settled += 1,
                    }
                }
            }
            // A released unit comes straight back on the next poll.
            if settled == 0 || released {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(self.poll_interval) => {}
                }
            }
        }
        tracing::debug!(worker, "business worker stopped");
    }
}
