//! In-memory partitioned queue.
//!
//! Each topic has a fixed number of partitions; each partition is an
//! append-only log with a delivery cursor, a redelivery set, and a committed
//! watermark. Entries below the watermark are discarded. A partition refuses
//! publishes once it holds `partition_capacity` uncommitted entries.

use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeSet, VecDeque};
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::Mutex;
use relay_core::RelayError;

use crate::ack::{AckTarget, Acknowledgement};
use crate::{Consumer, Delivery, Producer, Record};

#[derive(Clone, Copy, Debug)]
pub struct QueueConfig {
    pub partitions: usize,
    pub partition_capacity: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            partitions: 16,
            partition_capacity: 65_536,
        }
    }
}

/// Point-in-time view of one partition.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PartitionStats {
    /// Every offset below this is committed.
    pub committed: u64,
    /// Next offset a publish will get.
    pub end: u64,
    /// Entries delivered and not yet settled.
    pub in_flight: usize,
    pub pending_redelivery: usize,
}

struct Entry {
    key: String,
    payload: Bytes,
    committed: bool,
    attempts: u32,
}

struct PartitionState {
    /// Offset of `entries[0]`; equal to the committed watermark.
    base: u64,
    entries: VecDeque<Entry>,
    /// Next never-delivered offset.
    cursor: u64,
    redeliver: BTreeSet<u64>,
}

impl PartitionState {
    fn end(&self) -> u64 {
        self.base + self.entries.len() as u64
    }

    fn entry_mut(&mut self, offset: u64) -> Option<&mut Entry> {
        let index = offset.checked_sub(self.base)?;
        self.entries.get_mut(usize::try_from(index).ok()?)
    }

    fn compact(&mut self) {
        while self.entries.front().is_some_and(|e| e.committed) {
            self.entries.pop_front();
            self.base += 1;
        }
    }
}

struct Partition {
    topic: String,
    index: usize,
    capacity: usize,
    state: Mutex<PartitionState>,
}

impl Partition {
    fn new(topic: &str, index: usize, capacity: usize) -> Self {
        Self {
            topic: topic.to_string(),
            index,
            capacity,
            state: Mutex::new(PartitionState {
                base: 0,
                entries: VecDeque::new(),
                cursor: 0,
                redeliver: BTreeSet::new(),
            }),
        }
    }

    fn append(&self, key: &str, payload: Bytes) -> Result<u64, RelayError> {
        let mut state = self.state.lock();
        if state.entries.len() >= self.capacity {
            return Err(RelayError::PublishFailure(format!(
                "{}[{}] is full ({} uncommitted)",
                self.topic,
                self.index,
                state.entries.len()
            )));
        }
        let offset = state.end();
        state.entries.push_back(Entry {
            key: key.to_string(),
            payload,
            committed: false,
            attempts: 0,
        });
        Ok(offset)
    }

    fn take(self: &Arc<Self>, max: usize) -> Vec<Delivery> {
        let mut state = self.state.lock();
        let mut offsets = Vec::with_capacity(max);

        while offsets.len() < max {
            let Some(offset) = state.redeliver.pop_first() else { break };
            offsets.push(offset);
        }
        while offsets.len() < max && state.cursor < state.end() {
            let offset = state.cursor;
            state.cursor += 1;
            offsets.push(offset);
        }

        let mut out = Vec::with_capacity(offsets.len());
        for offset in offsets {
            let Some(entry) = state.entry_mut(offset) else { continue };
            if entry.committed {
                continue;
            }
            entry.attempts += 1;
            let record = Record {
                topic: self.topic.clone(),
                partition: self.index,
                offset,
                key: entry.key.clone(),
                payload: entry.payload.clone(),
                attempt: entry.attempts,
            };
            let target: Arc<dyn AckTarget> = self.clone();
            out.push(Delivery {
                record,
                ack: Acknowledgement::new(target, offset),
            });
        }
        out
    }

    fn stats(&self) -> PartitionStats {
        let state = self.state.lock();
        let settled_in_window = state
            .entries
            .iter()
            .take(usize::try_from(state.cursor - state.base).unwrap_or(usize::MAX))
            .filter(|e| e.committed)
            .count();
        let delivered = usize::try_from(state.cursor - state.base).unwrap_or(usize::MAX);
        PartitionStats {
            committed: state.base,
            end: state.end(),
            in_flight: delivered
                .saturating_sub(settled_in_window)
                .saturating_sub(state.redeliver.len()),
            pending_redelivery: state.redeliver.len(),
        }
    }
}

impl AckTarget for Partition {
    fn commit(&self, offset: u64) {
        let mut state = self.state.lock();
        match state.entry_mut(offset) {
            Some(entry) => entry.committed = true,
            None => return,
        }
        state.redeliver.remove(&offset);
        state.compact();
    }

    fn release(&self, offset: u64) {
        let mut state = self.state.lock();
        let still_pending = state.entry_mut(offset).is_some_and(|e| !e.committed);
        if still_pending {
            state.redeliver.insert(offset);
            tracing::debug!(topic = %self.topic, partition = self.index, offset, "unit queued for redelivery");
        }
    }
}

struct Topic {
    partitions: Vec<Arc<Partition>>,
}

/// Embedded queue implementing both [`Producer`] and [`Consumer`]. Topics are
/// created on first use.
pub struct MemoryQueue {
    config: QueueConfig,
    topics: DashMap<String, Arc<Topic>>,
}

impl MemoryQueue {
    pub fn new(config: QueueConfig) -> Self {
        Self {
            config: QueueConfig {
                partitions: config.partitions.max(1),
                partition_capacity: config.partition_capacity.max(1),
            },
            topics: DashMap::new(),
        }
    }

    /// Partition a key maps to. Stable for the life of the process, not
    /// across builds (`DefaultHasher`).
    pub fn partition_for(&self, key: &str) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() % self.config.partitions as u64) as usize
    }

    pub fn partition_stats(&self, topic: &str, partition: usize) -> PartitionStats {
        self.topics
            .get(topic)
            .and_then(|t| t.partitions.get(partition).map(|p| p.stats()))
            .unwrap_or_default()
    }

    fn topic(&self, name: &str) -> Arc<Topic> {
        if let Some(topic) = self.topics.get(name) {
            return Arc::clone(topic.value());
        }
        let entry = self.topics.entry(name.to_string()).or_insert_with(|| {
            Arc::new(Topic {
                partitions: (0..self.config.partitions)
                    .map(|i| Arc::new(Partition::new(name, i, self.config.partition_capacity)))
                    .collect(),
            })
        });
        Arc::clone(entry.value())
    }
}

impl Default for MemoryQueue {
    fn default() -> Self {
        Self::new(QueueConfig::default())
    }
}

#[async_trait]
impl Producer for MemoryQueue {
    async fn publish(&self, topic: &str, key: &str, payload: Bytes) -> Result<(), RelayError> {
        let partition = self.partition_for(key);
        let offset = self.topic(topic).partitions[partition].append(key, payload)?;
        tracing::trace!(topic, key, partition, offset, "unit published");
        Ok(())
    }
}

#[async_trait]
impl Consumer for MemoryQueue {
    fn partition_count(&self) -> usize {
        self.config.partitions
    }

    async fn poll(&self, topic: &str, partition: usize, max: usize) -> Vec<Delivery> {
        match self.topic(topic).partitions.get(partition) {
            Some(p) => p.take(max),
            None => Vec::new(),
        }
    }
}
