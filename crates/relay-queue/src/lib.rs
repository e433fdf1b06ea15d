//! Queue boundary between the dispatcher tier and the business tier.
//!
//! Routers publish through [`Producer`]; business workers pull through
//! [`Consumer`] and settle each unit with its [`Acknowledgement`].
//! [`MemoryQueue`] implements both for single-binary deployments and tests.

mod ack;
mod memory;

pub use ack::{AckTarget, Acknowledgement};
pub use memory::{MemoryQueue, PartitionStats, QueueConfig};

use async_trait::async_trait;
use bytes::Bytes;
use relay_core::RelayError;

/// Requests forwarded by dispatchers to the business tier.
pub const REQUESTS_TOPIC: &str = "requests";
/// Replies published by the business tier for dispatchers to deliver.
pub const REPLIES_TOPIC: &str = "replies";

#[async_trait]
pub trait Producer: Send + Sync {
    /// Append `payload` to `topic`. Units with the same `key` land on the same
    /// partition.
    async fn publish(&self, topic: &str, key: &str, payload: Bytes) -> Result<(), RelayError>;
}

#[async_trait]
pub trait Consumer: Send + Sync {
    fn partition_count(&self) -> usize;

    /// Take up to `max` units from one partition without waiting. Redelivered
    /// units come first.
    async fn poll(&self, topic: &str, partition: usize, max: usize) -> Vec<Delivery>;
}

/// A unit as stored in the queue.
#[derive(Clone, Debug)]
pub struct Record {
    pub topic: String,
    pub partition: usize,
    pub offset: u64,
    pub key: String,
    pub payload: Bytes,
    /// 1 on first delivery, incremented on every redelivery.
    pub attempt: u32,
}

/// One consumed unit plus the capability to commit it.
#[derive(Debug)]
pub struct Delivery {
    pub record: Record,
    pub ack: Acknowledgement,
}

impl Delivery {
    pub fn into_parts(self) -> (Record, Acknowledgement) {
        (self.record, self.ack)
    }
}
