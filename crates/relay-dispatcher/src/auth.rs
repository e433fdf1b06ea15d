//! Session establishment on a dispatcher.
//!
//! Authentication is the one request type that is not session gated: it is
//! what creates the session. The user is bound to the acceptor link the
//! request came in on, and every later reply for that user goes back down
//! the same link.

use std::sync::Arc;

use relay_core::payloads::{AuthenticateRequest, AuthenticateResponse, Payload};
use relay_core::{
    Connection, ConnectionHandle, Message, MessageHandler, PoolConfig, PoolStats, RelayError,
    SessionTable, WorkerPool,
};
use relay_telemetry::MetricsRecorder;

struct AuthCore {
    sessions: Arc<SessionTable>,
    metrics: Arc<MetricsRecorder>,
}

impl AuthCore {
    fn authenticate(&self, message: Message, link: ConnectionHandle) -> Result<bool, RelayError> {
        let request = AuthenticateRequest::from_message(&message)?;
        let uid = request.uid.clone();
        let ok = !uid.is_empty() && !request.token.is_empty();

        if ok {
            if let Some(previous) = self.sessions.bind(uid.clone(), Arc::clone(&link)) {
                if previous.id() != link.id() {
                    tracing::info!(%uid, from = %previous.id(), to = %link.id(), "session moved to another link");
                }
            }
            self.metrics.counter_inc("dispatcher.sessions_bound", &[], 1);
            tracing::debug!(%uid, link = %link.id(), "session bound");
        } else {
            self.metrics.counter_inc("dispatcher.auth_rejected", &[], 1);
            tracing::info!(%uid, "authentication rejected");
        }

        let reply = AuthenticateResponse { uid, ok }.to_response();
        if !link.write(reply.encode()) {
            tracing::warn!(link = %link.id(), "acceptor link refused authenticate reply");
        }
        Ok(ok)
    }
}

pub struct AuthenticateRouter {
    core: Arc<AuthCore>,
    pool: WorkerPool,
}

impl AuthenticateRouter {
    pub fn new(sessions: Arc<SessionTable>, pool: PoolConfig, metrics: Arc<MetricsRecorder>) -> Self {
        let pool = WorkerPool::with_metrics("dispatcher.authenticate", pool, Arc::clone(&metrics));
        Self {
            core: Arc::new(AuthCore { sessions, metrics }),
            pool,
        }
    }

    /// Authenticate on the current task. Returns whether a session was bound.
    pub fn authenticate(&self, message: Message, link: ConnectionHandle) -> Result<bool, RelayError> {
        self.core.authenticate(message, link)
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }
}

impl MessageHandler for AuthenticateRouter {
    fn handle_message(&self, message: Message, origin: ConnectionHandle) -> bool {
        let core = Arc::clone(&self.core);
        self.pool
            .submit(async move { core.authenticate(message, origin).map(|_| ()) })
    }
}
