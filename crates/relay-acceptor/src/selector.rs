//! Dispatcher selection by rendezvous (highest-random-weight) hashing.
//!
//! Each live member scores every key with SHA-256 over `(member id, key)`;
//! the highest score wins. Membership changes only move the keys the
//! added or removed member wins, and every acceptor with the same member
//! set picks the same dispatcher without coordination.

use parking_lot::RwLock;
use relay_core::{DispatcherId, UserId};
use sha2::{Digest, Sha256};

use crate::dispatcher::DispatcherInstance;

pub trait DispatcherSelector: Send + Sync {
    /// The dispatcher owning `key`, or `None` when no member is live.
    fn choose(&self, key: &UserId) -> Option<DispatcherInstance>;
}

pub struct RendezvousSelector {
    members: RwLock<Vec<DispatcherInstance>>,
}

impl RendezvousSelector {
    pub fn new() -> Self {
        Self {
            members: RwLock::new(Vec::new()),
        }
    }

    pub fn with_members(members: impl IntoIterator<Item = DispatcherInstance>) -> Self {
        let selector = Self::new();
        for member in members {
            selector.add(member);
        }
        selector
    }

    /// Add a member, replacing one with the same id.
    pub fn add(&self, instance: DispatcherInstance) {
        let mut members = self.members.write();
        members.retain(|m| m.id() != instance.id());
        tracing::info!(dispatcher = %instance.id(), "dispatcher added to selector");
        members.push(instance);
    }

    pub fn remove(&self, id: &DispatcherId) -> Option<DispatcherInstance> {
        let mut members = self.members.write();
        let index = members.iter().position(|m| m.id() == id)?;
        tracing::info!(dispatcher = %id, "dispatcher removed from selector");
        Some(members.swap_remove(index))
    }

    pub fn members(&self) -> Vec<DispatcherInstance> {
        self.members.read().clone()
    }

    pub fn member_count(&self) -> usize {
        self.members.read().len()
    }

    pub fn live_count(&self) -> usize {
        self.members.read().iter().filter(|m| m.is_live()).count()
    }
}

impl Default for RendezvousSelector {
    fn default() -> Self {
        Self::new()
    }
}

impl DispatcherSelector for RendezvousSelector {
    fn choose(&self, key: &UserId) -> Option<DispatcherInstance> {
        self.members
            .read()
            .iter()
            .filter(|m| m.is_live())
            .max_by(|a, b| {
                score(a.id(), key)
                    .cmp(&score(b.id(), key))
                    .then_with(|| b.id().cmp(a.id()))
            })
            .cloned()
    }
}

/// Weight of `member` for `key`: the first eight bytes of
/// `SHA-256(member ‖ 0x00 ‖ key)`.
pub fn score(member: &DispatcherId, key: &UserId) -> u64 {
    let mut hasher = Sha256::new();
    hasher.update(member.as_str().as_bytes());
    hasher.update([0u8]);
    hasher.update(key.as_str().as_bytes());
    let digest = hasher.finalize();
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(head)
}
