use std::sync::Arc;

use relay_core::payloads::{
    AuthenticateRequest, AuthenticateResponse, FetchRequest, FetchResponse, SendMessageRequest,
    SendMessageResponse,
};
use relay_core::{Connection, ConnectionHandle, HandlerRegistry, PoolConfig, RequestType, SessionTable, UserId};
use relay_telemetry::MetricsRecorder;

use crate::router::{AcceptorRouter, RouteHandler};
use crate::selector::DispatcherSelector;

pub fn fetch_handler() -> RouteHandler {
    RouteHandler::typed::<FetchRequest, FetchResponse>("fetch_message", |req| {
        FetchResponse::empty(req.uid.clone())
    })
}

/// Binds the user to the client connection before the request leaves, so the
/// dispatcher's reply (and everything after it) can find the socket.
pub fn authenticate_handler(sessions: Arc<SessionTable>) -> RouteHandler {
    RouteHandler::typed::<AuthenticateRequest, AuthenticateResponse>("authenticate", |req| {
        AuthenticateResponse {
            uid: req.uid.clone(),
            ok: false,
        }
    })
    .with_pre_dispatch(Arc::new(move |uid: &UserId, client: &ConnectionHandle| {
        if let Some(previous) = sessions.bind(uid.clone(), Arc::clone(client)) {
            if previous.id() != client.id() {
                tracing::info!(%uid, previous = %previous.id(), current = %client.id(), "user rebound to new connection");
            }
        }
    }))
}

pub fn send_handler() -> RouteHandler {
    RouteHandler::typed::<SendMessageRequest, SendMessageResponse>("send_message", |req| {
        SendMessageResponse {
            uid: req.uid.clone(),
            msg_id: req.msg_id.clone(),
            ok: false,
        }
    })
}

/// Registry with a router for every request type the acceptor serves.
pub fn build_registry(
    selector: Arc<dyn DispatcherSelector>,
    sessions: Arc<SessionTable>,
    pool: PoolConfig,
    metrics: Arc<MetricsRecorder>,
) -> HandlerRegistry {
    let mut registry = HandlerRegistry::new("acceptor").with_metrics(Arc::clone(&metrics));
    let handlers = [
        (RequestType::AUTHENTICATE, authenticate_handler(Arc::clone(&sessions))),
        (RequestType::FETCH_MESSAGE, fetch_handler()),
        (RequestType::SEND_MESSAGE, send_handler()),
    ];
    for (request_type, handler) in handlers {
        let router = AcceptorRouter::new(
            handler,
            Arc::clone(&selector),
            Arc::clone(&sessions),
            pool,
            Arc::clone(&metrics),
        );
        registry.register(request_type, Arc::new(router));
    }
    registry
}
