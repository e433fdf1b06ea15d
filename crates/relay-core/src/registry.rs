use std::collections::HashMap;
use std::sync::Arc;

use relay_telemetry::MetricsRecorder;

use crate::connection::ConnectionHandle;
use crate::envelope::{Message, MessageKind, RequestType};
use crate::errors::RelayError;

/// A router for one request type.
pub trait MessageHandler: Send + Sync {
    /// Hand a message off for processing. Must not block; returns whether the
    /// message was accepted.
    fn handle_message(&self, message: Message, origin: ConnectionHandle) -> bool;
}

/// Request type → handler. Decodes inbound frames and routes them.
pub struct HandlerRegistry {
    name: String,
    handlers: HashMap<RequestType, Arc<dyn MessageHandler>>,
    metrics: Option<Arc<MetricsRecorder>>,
}

impl HandlerRegistry {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            handlers: HashMap::new(),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsRecorder>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Register a handler, replacing any previous one for the type.
    pub fn register(&mut self, request_type: RequestType, handler: Arc<dyn MessageHandler>) {
        self.handlers.insert(request_type, handler);
    }

    pub fn get(&self, request_type: RequestType) -> Option<Arc<dyn MessageHandler>> {
        self.handlers.get(&request_type).map(Arc::clone)
    }

    pub fn contains(&self, request_type: RequestType) -> bool {
        self.handlers.contains_key(&request_type)
    }

    pub fn count(&self) -> usize {
        self.handlers.len()
    }

    /// Decode `frame` and hand it to its handler. Frames that do not decode,
    /// have the wrong direction for this origin, or name an unregistered type
    /// are logged and dropped.
    pub fn route_frame(&self, frame: &[u8], expected: MessageKind, origin: ConnectionHandle) -> bool {
        let message = match Message::decode(frame) {
            Ok(message) => message,
            Err(e) => {
                self.drop_frame(&e, frame.len());
                return false;
            }
        };
        if message.kind() != expected {
            let e = RelayError::Decode(format!(
                "unexpected {:?} frame for {}",
                message.kind(),
                message.request_type()
            ));
            self.drop_frame(&e, frame.len());
            return false;
        }
        self.route(message, origin)
    }

    /// Hand an already decoded message to its handler.
    pub fn route(&self, message: Message, origin: ConnectionHandle) -> bool {
        let request_type = message.request_type();
        match self.handlers.get(&request_type) {
            Some(handler) => handler.handle_message(message, origin),
            None => {
                let e = RelayError::UnknownRequestType(request_type.code());
                self.drop_frame(&e, message.body().len());
                false
            }
        }
    }

    fn drop_frame(&self, error: &RelayError, len: usize) {
        tracing::warn!(
            registry = %self.name,
            error_kind = error.error_kind(),
            error = %error,
            frame_len = len,
            "dropping frame"
        );
        if let Some(metrics) = &self.metrics {
            metrics.counter_inc(
                "frames.dropped",
                &[("registry", self.name.as_str()), ("reason", error.error_kind())],
                1,
            );
        }
    }
}
