use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use futures::{SinkExt, StreamExt};
use relay_core::{
    ChannelConnection, Connection, ConnectionHandle, DispatcherId, HandlerRegistry, MessageKind,
    PoolConfig, SessionTable,
};
use relay_settings::AcceptorSettings;
use relay_telemetry::MetricsRecorder;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use crate::dispatcher::DispatcherInstance;
use crate::handlers::build_registry;
use crate::link::{spawn_link, Backoff, DispatcherLink};
use crate::selector::RendezvousSelector;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Shared state behind the acceptor's HTTP routes.
#[derive(Clone)]
pub struct AcceptorState {
    pub registry: Arc<HandlerRegistry>,
    pub sessions: Arc<SessionTable>,
    pub selector: Arc<RendezvousSelector>,
    pub metrics: Arc<MetricsRecorder>,
    pub connections: Arc<AtomicUsize>,
    pub client_buffer: usize,
}

pub fn build_router(state: AcceptorState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// A running acceptor: HTTP server plus one link task per dispatcher.
pub struct AcceptorHandle {
    pub addr: SocketAddr,
    pub state: AcceptorState,
    cancel: CancellationToken,
    server: JoinHandle<()>,
    links: Vec<JoinHandle<()>>,
}

impl AcceptorHandle {
    pub async fn shutdown(self) {
        self.cancel.cancel();
        let _ = self.server.await;
        for link in self.links {
            let _ = link.await;
        }
        tracing::info!(addr = %self.addr, "acceptor stopped");
    }
}

/// Bind `settings.listen`, open links to every configured dispatcher, and serve.
pub async fn start(
    settings: &AcceptorSettings,
    metrics: Arc<MetricsRecorder>,
    cancel: CancellationToken,
) -> Result<AcceptorHandle, std::io::Error> {
    let listener = TcpListener::bind(&settings.listen).await?;
    start_on(listener, settings, metrics, cancel)
}

pub fn start_on(
    listener: TcpListener,
    settings: &AcceptorSettings,
    metrics: Arc<MetricsRecorder>,
    cancel: CancellationToken,
) -> Result<AcceptorHandle, std::io::Error> {
    let addr = listener.local_addr()?;

    let selector = Arc::new(RendezvousSelector::new());
    let mut pending_links = Vec::new();
    for endpoint in &settings.dispatchers {
        let id = DispatcherId::from_raw(endpoint.id.clone());
        let (link, outbound) = DispatcherLink::detached(id.clone(), settings.link_buffer);
        selector.add(DispatcherInstance::new(id, link.clone()));
        pending_links.push((link, outbound, endpoint.url.clone()));
    }

    let sessions = Arc::new(SessionTable::new());
    let pool = PoolConfig {
        workers: settings.workers,
        queue_capacity: settings.queue_capacity,
    };
    let registry = Arc::new(build_registry(
        selector.clone(),
        Arc::clone(&sessions),
        pool,
        Arc::clone(&metrics),
    ));

    let links = pending_links
        .into_iter()
        .map(|(link, outbound, url)| {
            spawn_link(
                link,
                outbound,
                url,
                Backoff::new(settings.reconnect_initial(), settings.reconnect_max()),
                Arc::clone(&registry),
                cancel.child_token(),
            )
        })
        .collect();

    let state = AcceptorState {
        registry,
        sessions,
        selector,
        metrics,
        connections: Arc::new(AtomicUsize::new(0)),
        client_buffer: settings.client_buffer,
    };

    let router = build_router(state.clone());
    let shutdown = cancel.clone();
    let server = tokio::spawn(async move {
        let serve = axum::serve(listener, router)
            .with_graceful_shutdown(async move { shutdown.cancelled().await });
        if let Err(e) = serve.await {
            tracing::error!(error = %e, "acceptor server failed");
        }
    });

    tracing::info!(%addr, dispatchers = settings.dispatchers.len(), "acceptor started");
    Ok(AcceptorHandle {
        addr,
        state,
        cancel,
        server,
        links,
    })
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AcceptorState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_client(socket, state))
}

async fn handle_client(socket: WebSocket, state: AcceptorState) {
    let (conn, mut rx) = ChannelConnection::pair(state.client_buffer);
    let client: ConnectionHandle = conn.clone();
    let live = state.connections.fetch_add(1, Ordering::Relaxed) + 1;
    state.metrics.gauge_set("acceptor.connections", &[], live as f64);
    tracing::info!(connection_id = %conn.id(), "client connected");

    let (mut ws_tx, mut ws_rx) = socket.split();

    let writer = tokio::spawn(async move {
        let mut ping = tokio::time::interval(HEARTBEAT_INTERVAL);
        ping.tick().await;
        loop {
            tokio::select! {
                frame = rx.recv() => {
                    let Some(frame) = frame else { break };
                    if ws_tx.send(WsMessage::Binary(frame)).await.is_err() {
                        break;
                    }
                }
                _ = ping.tick() => {
                    if ws_tx.send(WsMessage::Ping(Default::default())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    while let Some(Ok(msg)) = ws_rx.next().await {
        match msg {
            WsMessage::Binary(frame) => {
                state
                    .registry
                    .route_frame(&frame, MessageKind::Request, Arc::clone(&client));
            }
            WsMessage::Close(_) => break,
            _ => {}
        }
    }

    conn.close();
    writer.abort();
    let unbound = state.sessions.unbind_connection(conn.id());
    let live = state.connections.fetch_sub(1, Ordering::Relaxed).saturating_sub(1);
    state.metrics.gauge_set("acceptor.connections", &[], live as f64);
    tracing::info!(
        connection_id = %conn.id(),
        unbound,
        dropped_frames = conn.drop_count(),
        age_ms = conn.age().as_millis() as u64,
        "client disconnected"
    );
}

async fn health_handler(State(state): State<AcceptorState>) -> impl IntoResponse {
    let live = state.selector.live_count();
    let configured = state.selector.member_count();
    let status = if configured == 0 || live > 0 { "healthy" } else { "degraded" };
    Json(serde_json::json!({
        "status": status,
        "connections": state.connections.load(Ordering::Relaxed),
        "sessions": state.sessions.len(),
        "dispatchers": {
            "live": live,
            "configured": configured,
        },
        "metrics": state.metrics.snapshot(),
    }))
}
