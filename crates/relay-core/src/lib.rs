pub mod connection;
pub mod envelope;
pub mod errors;
pub mod ids;
pub mod payloads;
pub mod pool;
pub mod registry;
pub mod session;

pub use connection::{ChannelConnection, Connection, ConnectionHandle};
pub use envelope::{Message, MessageKind, RequestType};
pub use errors::RelayError;
pub use ids::{ConnectionId, DispatcherId, UserId};
pub use payloads::{routing_key, Identified, Payload};
pub use pool::{PoolConfig, PoolStats, WorkerPool};
pub use registry::{HandlerRegistry, MessageHandler};
pub use session::SessionTable;
