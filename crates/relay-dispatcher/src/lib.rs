//! Dispatcher tier: owns per-user sessions, gates every forwarded request on
//! them, publishes admitted requests to the queue, and delivers business-tier
//! replies back down the acceptor link each user is bound to.

pub mod auth;
pub mod gate;
pub mod handlers;
pub mod replies;
pub mod server;

pub use auth::AuthenticateRouter;
pub use gate::{GateHooks, GateOutcome, GatedRouter};
pub use handlers::{build_registry, fetch_hooks, send_hooks};
pub use replies::ReplyRouter;
pub use server::{start, start_on, DispatcherHandle, DispatcherState};

#[cfg(test)]
pub(crate) mod test_support {
    use async_trait::async_trait;
    use bytes::Bytes;
    use parking_lot::Mutex;
    use relay_core::RelayError;
    use relay_queue::Producer;

    /// Producer that records publishes, or refuses all of them.
    #[derive(Default)]
    pub struct RecordingProducer {
        fail: bool,
        published: Mutex<Vec<(String, String, Bytes)>>,
    }

    impl RecordingProducer {
        pub fn failing() -> Self {
            Self {
                fail: true,
                ..Self::default()
            }
        }

        pub fn published(&self) -> Vec<(String, String, Bytes)> {
            self.published.lock().clone()
        }
    }

    #[async_trait]
    impl Producer for RecordingProducer {
        async fn publish(&self, topic: &str, key: &str, payload: Bytes) -> Result<(), RelayError> {
            if self.fail {
                return Err(RelayError::PublishFailure("producer closed".into()));
            }
            self.published
                .lock()
                .push((topic.to_string(), key.to_string(), payload));
            Ok(())
        }
    }
}
