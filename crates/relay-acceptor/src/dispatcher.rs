use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use relay_core::DispatcherId;

/// Outbound side of a link to one dispatcher.
pub trait DispatcherTransport: Send + Sync {
    /// Queue a frame for the dispatcher without waiting. `false` means the
    /// frame was not queued (link down or buffer full).
    fn send(&self, frame: Bytes) -> bool;

    fn is_connected(&self) -> bool;
}

/// A dispatcher known to this acceptor.
#[derive(Clone)]
pub struct DispatcherInstance {
    id: DispatcherId,
    transport: Arc<dyn DispatcherTransport>,
}

impl DispatcherInstance {
    pub fn new(id: DispatcherId, transport: Arc<dyn DispatcherTransport>) -> Self {
        Self { id, transport }
    }

    pub fn id(&self) -> &DispatcherId {
        &self.id
    }

    pub fn is_live(&self) -> bool {
        self.transport.is_connected()
    }

    pub fn forward(&self, frame: Bytes) -> bool {
        self.transport.send(frame)
    }
}

impl fmt::Debug for DispatcherInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatcherInstance")
            .field("id", &self.id)
            .field("live", &self.is_live())
            .finish()
    }
}
