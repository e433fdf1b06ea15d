//! Session-gated router.
//!
//! A request only enters the queue if its user holds a session on this
//! dispatcher. Otherwise the type's error reply goes back down the acceptor
//! link the request arrived on, addressed to the user, so the acceptor can
//! deliver it through its own session table.

use std::marker::PhantomData;
use std::sync::Arc;

use futures::future::BoxFuture;
use relay_core::payloads::{Identified, Payload};
use relay_core::{
    Connection, ConnectionHandle, Message, MessageHandler, PoolConfig, PoolStats, RelayError,
    SessionTable, UserId, WorkerPool,
};
use relay_queue::{Producer, REQUESTS_TOPIC};
use relay_telemetry::MetricsRecorder;

pub type GateErrorReply<P> = Arc<dyn Fn(&P) -> Message + Send + Sync>;
pub type ProcessHook<P> =
    Arc<dyn Fn(P, Message) -> BoxFuture<'static, Result<(), RelayError>> + Send + Sync>;

/// Per-type behaviour of a [`GatedRouter`].
pub struct GateHooks<P> {
    pub error_reply: GateErrorReply<P>,
    /// Replaces the default publish to the requests topic.
    pub process: Option<ProcessHook<P>>,
}

impl<P> Clone for GateHooks<P> {
    fn clone(&self) -> Self {
        Self {
            error_reply: Arc::clone(&self.error_reply),
            process: self.process.clone(),
        }
    }
}

impl<P> GateHooks<P> {
    pub fn new(error_reply: impl Fn(&P) -> Message + Send + Sync + 'static) -> Self {
        Self {
            error_reply: Arc::new(error_reply),
            process: None,
        }
    }

    pub fn with_process(mut self, hook: ProcessHook<P>) -> Self {
        self.process = Some(hook);
        self
    }
}

/// Where one message ended up.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GateOutcome {
    /// No session: the error reply went back to the acceptor.
    ErrorRouted,
    Forwarded,
}

struct GateCore<P> {
    name: &'static str,
    hooks: GateHooks<P>,
    sessions: Arc<SessionTable>,
    producer: Arc<dyn Producer>,
    metrics: Arc<MetricsRecorder>,
    _payload: PhantomData<fn() -> P>,
}

impl<P: Payload + Identified> GateCore<P> {
    async fn gate(&self, message: Message, link: ConnectionHandle) -> Result<GateOutcome, RelayError> {
        let payload = P::from_message(&message)?;
        let uid = payload.uid().clone();
        let labels = [("request_type", self.name)];

        if !self.sessions.contains(&uid) {
            let missing = RelayError::SessionMissing(uid.clone());
            tracing::warn!(%uid, request_type = self.name, error_kind = missing.error_kind(), "no session, routing error reply");
            self.metrics.counter_inc("dispatcher.session_missing", &labels, 1);
            let reply = (self.hooks.error_reply)(&payload);
            if !link.write(reply.encode()) {
                tracing::warn!(%uid, link = %link.id(), "acceptor link refused error reply");
            }
            return Ok(GateOutcome::ErrorRouted);
        }

        match &self.hooks.process {
            Some(process) => process(payload, message).await?,
            None => self.publish(&uid, message).await?,
        }
        Ok(GateOutcome::Forwarded)
    }

    async fn publish(&self, uid: &UserId, message: Message) -> Result<(), RelayError> {
        let labels = [("request_type", self.name)];
        match self
            .producer
            .publish(REQUESTS_TOPIC, uid.as_str(), message.encode())
            .await
        {
            Ok(()) => {
                tracing::debug!(%uid, request_type = self.name, "request published");
                self.metrics.counter_inc("dispatcher.published", &labels, 1);
                Ok(())
            }
            Err(e) => {
                self.metrics.counter_inc("dispatcher.publish_failed", &labels, 1);
                Err(e)
            }
        }
    }
}

/// Session-gated router for one payload type.
pub struct GatedRouter<P> {
    core: Arc<GateCore<P>>,
    pool: WorkerPool,
}

impl<P: Payload + Identified> GatedRouter<P> {
    pub fn new(
        name: &'static str,
        hooks: GateHooks<P>,
        sessions: Arc<SessionTable>,
        producer: Arc<dyn Producer>,
        pool: PoolConfig,
        metrics: Arc<MetricsRecorder>,
    ) -> Self {
        let pool = WorkerPool::with_metrics(format!("dispatcher.{name}"), pool, Arc::clone(&metrics));
        Self {
            core: Arc::new(GateCore {
                name,
                hooks,
                sessions,
                producer,
                metrics,
                _payload: PhantomData,
            }),
            pool,
        }
    }

    /// Gate one message on the current task.
    pub async fn gate(&self, message: Message, link: ConnectionHandle) -> Result<GateOutcome, RelayError> {
        self.core.gate(message, link).await
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }
}

impl<P: Payload + Identified> MessageHandler for GatedRouter<P> {
    fn handle_message(&self, message: Message, origin: ConnectionHandle) -> bool {
        let core = Arc::clone(&self.core);
        self.pool
            .submit(async move { core.gate(message, origin).await.map(|_| ()) })
    }
}
