//! Acceptor message router.
//!
//! REQUEST frames go out to the dispatcher the selector picks for the user;
//! RESPONSE frames come back in and are written to the client bound to the
//! user in the acceptor session table. All of it runs on the router's worker
//! pool, never on the socket task that read the frame.

use std::sync::Arc;

use relay_core::payloads::{Identified, Payload};
use relay_core::{
    Connection, ConnectionHandle, Message, MessageHandler, MessageKind, PoolConfig, PoolStats, RelayError,
    SessionTable, UserId, WorkerPool,
};
use relay_telemetry::MetricsRecorder;

use crate::selector::DispatcherSelector;

pub type KeyExtractor = Arc<dyn Fn(&Message) -> Result<UserId, RelayError> + Send + Sync>;
pub type ErrorReply = Arc<dyn Fn(&Message) -> Result<Message, RelayError> + Send + Sync>;
pub type PreDispatch = Arc<dyn Fn(&UserId, &ConnectionHandle) + Send + Sync>;

/// Per-request-type strategies plugged into an [`AcceptorRouter`].
#[derive(Clone)]
pub struct RouteHandler {
    pub name: &'static str,
    /// Routing key of an inbound request.
    pub request_key: KeyExtractor,
    /// Target user of a returning response.
    pub response_key: KeyExtractor,
    /// Reply written straight to the client when no dispatcher can take the request.
    pub error_reply: ErrorReply,
    /// Runs after the key is known and before a dispatcher is selected.
    pub pre_dispatch: Option<PreDispatch>,
}

impl RouteHandler {
    /// Strategies derived from a request/response payload pair. `on_error`
    /// builds the reply sent when routing fails.
    pub fn typed<Req, Resp>(name: &'static str, on_error: fn(&Req) -> Resp) -> Self
    where
        Req: Payload + Identified,
        Resp: Payload + Identified,
    {
        Self {
            name,
            request_key: Arc::new(|m: &Message| -> Result<UserId, RelayError> {
                Ok(Req::from_message(m)?.uid().clone())
            }),
            response_key: Arc::new(|m: &Message| -> Result<UserId, RelayError> {
                Ok(Resp::from_message(m)?.uid().clone())
            }),
            error_reply: Arc::new(move |m: &Message| -> Result<Message, RelayError> {
                Ok(on_error(&Req::from_message(m)?).to_response())
            }),
            pre_dispatch: None,
        }
    }

    pub fn with_pre_dispatch(mut self, hook: PreDispatch) -> Self {
        self.pre_dispatch = Some(hook);
        self
    }
}

/// What happened to one message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RouteOutcome {
    Forwarded,
    /// No dispatcher took the request; the client got the error reply.
    RoutingUnavailable,
    Delivered,
}

struct RouterCore {
    handler: RouteHandler,
    selector: Arc<dyn DispatcherSelector>,
    sessions: Arc<SessionTable>,
    metrics: Arc<MetricsRecorder>,
}

impl RouterCore {
    fn route(&self, message: Message, origin: ConnectionHandle) -> Result<RouteOutcome, RelayError> {
        match message.kind() {
            MessageKind::Request => self.route_request(message, origin),
            MessageKind::Response => self.deliver_response(message),
        }
    }

    fn route_request(&self, message: Message, client: ConnectionHandle) -> Result<RouteOutcome, RelayError> {
        let uid = (self.handler.request_key)(&message)?;
        if let Some(hook) = &self.handler.pre_dispatch {
            hook(&uid, &client);
        }

        let labels = [("request_type", self.handler.name)];
        match self.selector.choose(&uid) {
            Some(dispatcher) if dispatcher.forward(message.encode()) => {
                tracing::debug!(%uid, dispatcher = %dispatcher.id(), request_type = self.handler.name, "request forwarded");
                self.metrics.counter_inc("acceptor.forwarded", &labels, 1);
                return Ok(RouteOutcome::Forwarded);
            }
            Some(dispatcher) => {
                tracing::warn!(%uid, dispatcher = %dispatcher.id(), request_type = self.handler.name, "dispatcher link refused frame");
            }
            None => {
                tracing::warn!(%uid, request_type = self.handler.name, "no live dispatcher");
            }
        }

        self.metrics.counter_inc("acceptor.routing_unavailable", &labels, 1);
        let reply = (self.handler.error_reply)(&message)?;
        if !client.write(reply.encode()) {
            tracing::warn!(%uid, connection_id = %client.id(), "client refused error reply");
        }
        Ok(RouteOutcome::RoutingUnavailable)
    }

    fn deliver_response(&self, message: Message) -> Result<RouteOutcome, RelayError> {
        let uid = (self.handler.response_key)(&message)?;
        let labels = [("request_type", self.handler.name)];
        let Some(client) = self.sessions.get(&uid) else {
            self.metrics.counter_inc("acceptor.delivery_missing", &labels, 1);
            return Err(RelayError::DeliveryMissing(uid));
        };
        if !client.write(message.encode()) {
            self.metrics.counter_inc("acceptor.delivery_missing", &labels, 1);
            return Err(RelayError::DeliveryMissing(uid));
        }
        tracing::debug!(%uid, connection_id = %client.id(), request_type = self.handler.name, "response delivered");
        self.metrics.counter_inc("acceptor.delivered", &labels, 1);
        Ok(RouteOutcome::Delivered)
    }
}

/// Routes one request type. Each router owns its own worker pool.
pub struct AcceptorRouter {
    core: Arc<RouterCore>,
    pool: WorkerPool,
}

impl AcceptorRouter {
    pub fn new(
        handler: RouteHandler,
        selector: Arc<dyn DispatcherSelector>,
        sessions: Arc<SessionTable>,
        pool: PoolConfig,
        metrics: Arc<MetricsRecorder>,
    ) -> Self {
        let pool = WorkerPool::with_metrics(format!("acceptor.{}", handler.name), pool, Arc::clone(&metrics));
        Self {
            core: Arc::new(RouterCore {
                handler,
                selector,
                sessions,
                metrics,
            }),
            pool,
        }
    }

    pub fn name(&self) -> &'static str {
        self.core.handler.name
    }

    /// Route one message synchronously. Used by the pool tasks and by tests.
    pub fn route_now(&self, message: Message, origin: ConnectionHandle) -> Result<RouteOutcome, RelayError> {
        self.core.route(message, origin)
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    pub async fn shutdown(self) {
        self.pool.shutdown().await;
    }
}

impl MessageHandler for AcceptorRouter {
    fn handle_message(&self, message: Message, origin: ConnectionHandle) -> bool {
        let core = Arc::clone(&self.core);
        self.pool
            .submit(async move { core.route(message, origin).map(|_| ()) })
    }
}
