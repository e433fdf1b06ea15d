//! Domain logic per request type.
//!
//! Processors may run more than once for the same unit (redelivery), so each
//! one is idempotent: fetch answers a repeated unit with the batch it already
//! handed out, send dedups on the sender and message id.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use relay_core::payloads::{
    FetchRequest, FetchResponse, Payload, SendMessageRequest, SendMessageResponse,
};
use relay_core::{Message, RelayError, RequestType};
use relay_queue::Record;

use crate::mailbox::Mailbox;

/// Identity of one queued unit. Every redelivery of a unit carries the same id.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct UnitId {
    pub partition: usize,
    pub offset: u64,
}

impl From<&Record> for UnitId {
    fn from(record: &Record) -> Self {
        Self {
            partition: record.partition,
            offset: record.offset,
        }
    }
}

#[async_trait]
pub trait Processor: Send + Sync {
    /// Run the request carried by `unit`. `Ok(Some(reply))` is published back
    /// to the user.
    async fn process(&self, unit: UnitId, request: &Message)
        -> Result<Option<Message>, RelayError>;
}

pub struct FetchProcessor {
    mailbox: Arc<Mailbox>,
}

impl FetchProcessor {
    pub fn new(mailbox: Arc<Mailbox>) -> Self {
        Self { mailbox }
    }
}

#[async_trait]
impl Processor for FetchProcessor {
    async fn process(&self, unit: UnitId, request: &Message) -> Result<Option<Message>, RelayError> {
        let req = FetchRequest::from_message(request)?;
        let messages = self.mailbox.take(&req.uid, unit);
        let reply = FetchResponse {
            uid: req.uid,
            is_empty: messages.is_empty(),
            messages,
        };
        Ok(Some(reply.to_response()))
    }
}

pub struct SendProcessor {
    mailbox: Arc<Mailbox>,
}

impl SendProcessor {
    pub fn new(mailbox: Arc<Mailbox>) -> Self {
        Self { mailbox }
    }
}

#[async_trait]
impl Processor for SendProcessor {
    async fn process(&self, _unit: UnitId, request: &Message) -> Result<Option<Message>, RelayError> {
        let req = SendMessageRequest::from_message(request)?;
        let ok = !req.to.is_empty();
        if ok && !self.mailbox.append(&req.to, &req.uid, &req.msg_id, &req.content) {
            tracing::debug!(uid = %req.uid, msg_id = %req.msg_id, "duplicate send ignored");
        }
        let reply = SendMessageResponse {
            uid: req.uid,
            msg_id: req.msg_id,
            ok,
        };
        Ok(Some(reply.to_response()))
    }
}

/// Request type → processor.
#[derive(Clone, Default)]
pub struct ProcessorSet {
    processors: HashMap<RequestType, Arc<dyn Processor>>,
}

impl ProcessorSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch and send over a shared mailbox.
    pub fn standard(mailbox: Arc<Mailbox>) -> Self {
        let mut set = Self::new();
        set.register(RequestType::FETCH_MESSAGE, Arc::new(FetchProcessor::new(Arc::clone(&mailbox))));
        set.register(RequestType::SEND_MESSAGE, Arc::new(SendProcessor::new(mailbox)));
        set
    }

    pub fn register(&mut self, request_type: RequestType, processor: Arc<dyn Processor>) {
        self.processors.insert(request_type, processor);
    }

    pub fn get(&self, request_type: RequestType) -> Option<Arc<dyn Processor>> {
        self.processors.get(&request_type).map(Arc::clone)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_core::UserId;

    fn send(uid: &str, to: &str, msg_id: &str, content: &str) -> Message {
        SendMessageRequest {
            uid: UserId::from_raw(uid),
            to: UserId::from_raw(to),
            msg_id: msg_id.into(),
            content: content.into(),
        }
        .to_request()
    }

    fn fetch(uid: &str) -> Message {
        FetchRequest { uid: UserId::from_raw(uid) }.to_request()
    }

    fn unit(offset: u64) -> UnitId {
        UnitId { partition: 0, offset }
    }

    async fn fetched(processor: &dyn Processor, offset: u64, uid: &str) -> FetchResponse {
        let reply = processor.process(unit(offset), &fetch(uid)).await.unwrap().unwrap();
        FetchResponse::from_message(&reply).unwrap()
    }

    #[tokio::test]
    async fn send_then_fetch() {
        let set = ProcessorSet::standard(Arc::new(Mailbox::new()));
        let sender = set.get(RequestType::SEND_MESSAGE).unwrap();
        let fetcher = set.get(RequestType::FETCH_MESSAGE).unwrap();

        assert_eq!(
            fetched(fetcher.as_ref(), 0, "bob").await,
            FetchResponse::empty(UserId::from_raw("bob"))
        );

        let ack = sender.process(unit(1), &send("alice", "bob", "m1", "hi")).await.unwrap().unwrap();
        let ack = SendMessageResponse::from_message(&ack).unwrap();
        assert!(ack.ok);
        assert_eq!(ack.uid.as_str(), "alice");

        let reply = fetched(fetcher.as_ref(), 2, "bob").await;
        assert!(!reply.is_empty);
        assert_eq!(reply.messages, vec!["hi"]);

        // Delivered once; the next fetch sees nothing.
        assert!(fetched(fetcher.as_ref(), 3, "bob").await.is_empty);
    }

    #[tokio::test]
    async fn redelivered_fetch_repeats_its_batch() {
        let mailbox = Arc::new(Mailbox::new());
        let sender = SendProcessor::new(Arc::clone(&mailbox));
        let fetcher = FetchProcessor::new(Arc::clone(&mailbox));
        sender.process(unit(0), &send("alice", "bob", "m1", "hi")).await.unwrap();

        assert_eq!(fetched(&fetcher, 1, "bob").await.messages, vec!["hi"]);
        assert_eq!(fetched(&fetcher, 1, "bob").await.messages, vec!["hi"]);
        assert!(fetched(&fetcher, 2, "bob").await.is_empty);
    }

    #[tokio::test]
    async fn repeated_send_appends_once() {
        let mailbox = Arc::new(Mailbox::new());
        let sender = SendProcessor::new(Arc::clone(&mailbox));
        for _ in 0..3 {
            let reply = sender.process(unit(0), &send("a", "b", "m1", "x")).await.unwrap().unwrap();
            assert!(SendMessageResponse::from_message(&reply).unwrap().ok);
        }
        assert_eq!(mailbox.pending(&UserId::from_raw("b")).len(), 1);
    }

    #[tokio::test]
    async fn different_senders_may_reuse_a_msg_id() {
        let mailbox = Arc::new(Mailbox::new());
        let sender = SendProcessor::new(Arc::clone(&mailbox));
        for (offset, from) in [(0, "alice"), (1, "carol")] {
            let content = format!("from {from}");
            let reply = sender
                .process(unit(offset), &send(from, "bob", "1", &content))
                .await
                .unwrap()
                .unwrap();
            assert!(SendMessageResponse::from_message(&reply).unwrap().ok);
        }
        assert_eq!(
            mailbox.pending(&UserId::from_raw("bob")),
            vec!["from alice", "from carol"]
        );
    }

    #[tokio::test]
    async fn empty_recipient_is_not_ok() {
        let mailbox = Arc::new(Mailbox::new());
        let sender = SendProcessor::new(Arc::clone(&mailbox));
        let reply = sender.process(unit(0), &send("a", "", "m1", "x")).await.unwrap().unwrap();
        assert!(!SendMessageResponse::from_message(&reply).unwrap().ok);
        assert_eq!(mailbox.users(), 0);
    }

    #[tokio::test]
    async fn wrong_payload_is_a_decode_error() {
        let fetcher = FetchProcessor::new(Arc::new(Mailbox::new()));
        let err = fetcher.process(unit(0), &send("a", "b", "m", "x")).await.unwrap_err();
        assert!(matches!(err, RelayError::Decode(_)));
    }
}
