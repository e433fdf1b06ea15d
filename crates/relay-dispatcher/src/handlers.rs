use std::sync::Arc;

use relay_core::payloads::{
    FetchRequest, FetchResponse, Payload, SendMessageRequest, SendMessageResponse,
};
use relay_core::{HandlerRegistry, PoolConfig, RequestType, SessionTable};
use relay_queue::Producer;
use relay_telemetry::MetricsRecorder;

use crate::auth::AuthenticateRouter;
use crate::gate::{GateHooks, GatedRouter};

pub fn fetch_hooks() -> GateHooks<FetchRequest> {
    GateHooks::new(|req: &FetchRequest| FetchResponse::empty(req.uid.clone()).to_response())
}

pub fn send_hooks() -> GateHooks<SendMessageRequest> {
    GateHooks::new(|req: &SendMessageRequest| {
        SendMessageResponse {
            uid: req.uid.clone(),
            msg_id: req.msg_id.clone(),
            ok: false,
        }
        .to_response()
    })
}

/// Every request type the dispatcher serves, each on its own pool.
pub fn build_registry(
    sessions: Arc<SessionTable>,
    producer: Arc<dyn Producer>,
    pool: PoolConfig,
    metrics: Arc<MetricsRecorder>,
) -> HandlerRegistry {
    let mut registry = HandlerRegistry::new("dispatcher").with_metrics(Arc::clone(&metrics));
    registry.register(
        RequestType::AUTHENTICATE,
        Arc::new(AuthenticateRouter::new(Arc::clone(&sessions), pool, Arc::clone(&metrics))),
    );
    registry.register(
        RequestType::FETCH_MESSAGE,
        Arc::new(GatedRouter::new(
            "fetch_message",
            fetch_hooks(),
            Arc::clone(&sessions),
            Arc::clone(&producer),
            pool,
            Arc::clone(&metrics),
        )),
    );
    registry.register(
        RequestType::SEND_MESSAGE,
        Arc::new(GatedRouter::new(
            "send_message",
            send_hooks(),
            sessions,
            producer,
            pool,
            metrics,
        )),
    );
    registry
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::RecordingProducer;
    use relay_core::payloads::{AuthenticateRequest, AuthenticateResponse};
    use relay_core::{ChannelConnection, Message, MessageKind, UserId};
    use std::time::Duration;

    #[tokio::test]
    async fn registers_all_request_types() {
        let registry = build_registry(
            Arc::new(SessionTable::new()),
            Arc::new(RecordingProducer::default()),
            PoolConfig::default(),
            Arc::new(MetricsRecorder::new()),
        );
        assert_eq!(registry.count(), 3);
        assert!(registry.contains(RequestType::AUTHENTICATE));
        assert!(registry.contains(RequestType::FETCH_MESSAGE));
        assert!(registry.contains(RequestType::SEND_MESSAGE));
    }

    #[tokio::test]
    async fn authenticate_then_fetch_publishes() {
        let producer = Arc::new(RecordingProducer::default());
        let registry = build_registry(
            Arc::new(SessionTable::new()),
            producer.clone(),
            PoolConfig { workers: 1, queue_capacity: 8 },
            Arc::new(MetricsRecorder::new()),
        );
        let (link, mut rx) = ChannelConnection::pair(8);

        let auth = AuthenticateRequest {
            uid: UserId::from_raw("alice"),
            token: "secret".into(),
        };
        assert!(registry.route_frame(&auth.to_request().encode(), MessageKind::Request, link.clone()));
        let frame = tokio::time::timeout(Duration::from_secs(2), rx.recv()).await.unwrap().unwrap();
        assert!(AuthenticateResponse::from_message(&Message::decode(&frame).unwrap()).unwrap().ok);

        let fetch = FetchRequest { uid: UserId::from_raw("alice") }.to_request();
        assert!(registry.route_frame(&fetch.encode(), MessageKind::Request, link));
        for _ in 0..200 {
            if !producer.published().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(producer.published().len(), 1);
    }

    #[tokio::test]
    async fn response_frames_are_not_accepted_from_links() {
        let registry = build_registry(
            Arc::new(SessionTable::new()),
            Arc::new(RecordingProducer::default()),
            PoolConfig::default(),
            Arc::new(MetricsRecorder::new()),
        );
        let (link, _rx) = ChannelConnection::pair(8);
        let reply = FetchResponse::empty(UserId::from_raw("a")).to_response();
        assert!(!registry.route_frame(&reply.encode(), MessageKind::Request, link));
    }
}
