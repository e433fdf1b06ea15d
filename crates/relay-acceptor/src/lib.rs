//! Acceptor tier: terminates client WebSockets, forwards requests to the
//! dispatcher that owns each user, and writes replies back to the client.

pub mod dispatcher;
pub mod handlers;
pub mod link;
pub mod router;
pub mod selector;
pub mod server;

pub use dispatcher::{DispatcherInstance, DispatcherTransport};
pub use handlers::{authenticate_handler, build_registry, fetch_handler, send_handler};
pub use link::{spawn_link, Backoff, DispatcherLink};
pub use router::{AcceptorRouter, RouteHandler, RouteOutcome};
pub use selector::{DispatcherSelector, RendezvousSelector};
pub use server::{start, start_on, AcceptorHandle, AcceptorState};
