//! Return path from the business tier.
//!
//! Replies land on the replies topic keyed by user. The reply router pulls
//! them and writes each frame to the acceptor link that user's session is
//! bound to; the acceptor then delivers it through its own session table.
//! A reply whose session is gone is dropped. Every unit is committed either
//! way, since redelivering an undeliverable reply cannot make it deliverable.

use std::sync::Arc;
use std::time::Duration;

use relay_core::{routing_key, Connection, Message, MessageKind, RelayError, SessionTable};
use relay_queue::{Consumer, Record, REPLIES_TOPIC};
use relay_telemetry::MetricsRecorder;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub struct ReplyRouter {
    consumer: Arc<dyn Consumer>,
    sessions: Arc<SessionTable>,
    metrics: Arc<MetricsRecorder>,
    batch_size: usize,
    poll_interval: Duration,
}

impl ReplyRouter {
    pub fn new(
        consumer: Arc<dyn Consumer>,
        sessions: Arc<SessionTable>,
        metrics: Arc<MetricsRecorder>,
        batch_size: usize,
        poll_interval: Duration,
    ) -> Self {
        Self {
            consumer,
            sessions,
            metrics,
            batch_size: batch_size.max(1),
            poll_interval,
        }
    }

    /// Deliver one encoded RESPONSE frame to the link bound to its user.
    pub fn deliver(&self, frame: &[u8]) -> Result<(), RelayError> {
        let message = Message::decode(frame)?;
        if message.kind() != MessageKind::Response {
            return Err(RelayError::Decode(format!(
                "reply topic carried a request for {}",
                message.request_type()
            )));
        }
        let uid = routing_key(message.body())?;
        let labels = [("request_type", message.request_type().name())];

        let Some(link) = self.sessions.get(&uid) else {
            self.metrics.counter_inc("dispatcher.delivery_missing", &labels, 1);
            return Err(RelayError::DeliveryMissing(uid));
        };
        if !link.write(message.encode()) {
            self.metrics.counter_inc("dispatcher.delivery_missing", &labels, 1);
            return Err(RelayError::DeliveryMissing(uid));
        }
        self.metrics.counter_inc("dispatcher.delivered", &labels, 1);
        tracing::debug!(%uid, link = %link.id(), "reply delivered");
        Ok(())
    }

    /// One pass over every partition. Returns how many units were handled.
    pub async fn drain_once(&self) -> usize {
        let mut handled = 0;
        for partition in 0..self.consumer.partition_count() {
            for delivery in self.consumer.poll(REPLIES_TOPIC, partition, self.batch_size).await {
                let (record, ack) = delivery.into_parts();
                self.handle(&record);
                ack.commit();
                handled += 1;
            }
        }
        handled
    }

    fn handle(&self, record: &Record) {
        if let Err(e) = self.deliver(&record.payload) {
            tracing::warn!(
                key = %record.key,
                partition = record.partition,
                offset = record.offset,
                error_kind = e.error_kind(),
                error = %e,
                "reply dropped"
            );
        }
    }

    /// Poll until `cancel` fires, idling `poll_interval` after an empty pass.
    pub fn spawn(self: Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            tracing::debug!(partitions = self.consumer.partition_count(), "reply router started");
            loop {
                if cancel.is_cancelled() {
                    break;
                }
                if self.drain_once().await == 0 {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(self.poll_interval) => {}
                    }
                }
            }
            tracing::debug!("reply router stopped");
        })
    }
}
