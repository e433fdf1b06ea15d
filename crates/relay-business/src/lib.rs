//! Business tier: pulls requests off the queue, runs the domain logic for
//! each type, publishes the reply, and only then acknowledges the unit.

pub mod consumer;
pub mod mailbox;
pub mod processors;

pub use consumer::{BusinessConsumer, UnitOutcome};
pub use mailbox::{Mailbox, DEFAULT_DEDUP_WINDOW};
pub use processors::{FetchProcessor, Processor, ProcessorSet, SendProcessor, UnitId};
