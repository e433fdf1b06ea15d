use std::collections::{HashSet, VecDeque};

use dashmap::DashMap;
use relay_core::UserId;

use crate::processors::UnitId;

/// Send keys remembered per recipient.
pub const DEFAULT_DEDUP_WINDOW: usize = 1024;

/// Fetch batches remembered per user for redelivered fetch units.
const RECENT_FETCHES: usize = 8;

type SendKey = (UserId, String);

#[derive(Default)]
struct UserMailbox {
    pending: Vec<String>,
    seen: HashSet<SendKey>,
    seen_order: VecDeque<SendKey>,
    recent_fetches: VecDeque<(UnitId, Vec<String>)>,
}

/// Pending messages per user.
///
/// Appends are deduplicated on `(sender, msg_id)`, so a redelivered send
/// lands once. `take` removes what it hands out but remembers the batch
/// against the fetch unit, so a redelivered fetch gets the same answer.
pub struct Mailbox {
    boxes: DashMap<UserId, UserMailbox>,
    dedup_window: usize,
}

impl Default for Mailbox {
    fn default() -> Self {
        Self::with_dedup_window(DEFAULT_DEDUP_WINDOW)
    }
}

impl Mailbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_dedup_window(dedup_window: usize) -> Self {
        Self {
            boxes: DashMap::new(),
            dedup_window: dedup_window.max(1),
        }
    }

    /// Append `content` from `from` for `to`. Returns `false` if this sender
    /// already used `msg_id` toward `to`.
    pub fn append(&self, to: &UserId, from: &UserId, msg_id: &str, content: &str) -> bool {
        let key = (from.clone(), msg_id.to_string());
        let mut mailbox = self.boxes.entry(to.clone()).or_default();
        if !mailbox.seen.insert(key.clone()) {
            return false;
        }
        mailbox.seen_order.push_back(key);
        if mailbox.seen_order.len() > self.dedup_window {
            if let Some(oldest) = mailbox.seen_order.pop_front() {
                mailbox.seen.remove(&oldest);
            }
        }
        mailbox.pending.push(content.to_string());
        true
    }

    /// Hand out and remove everything pending for `uid` on behalf of fetch
    /// unit `unit`.
    pub fn take(&self, uid: &UserId, unit: UnitId) -> Vec<String> {
        let Some(mut mailbox) = self.boxes.get_mut(uid) else {
            return Vec::new();
        };
        if let Some((_, batch)) = mailbox.recent_fetches.iter().find(|(id, _)| *id == unit) {
            return batch.clone();
        }
        let batch = std::mem::take(&mut mailbox.pending);
        mailbox.recent_fetches.push_back((unit, batch.clone()));
        if mailbox.recent_fetches.len() > RECENT_FETCHES {
            mailbox.recent_fetches.pop_front();
        }
        batch
    }

    /// Messages not yet handed out. Does not consume them.
    pub fn pending(&self, uid: &UserId) -> Vec<String> {
        self.boxes
            .get(uid)
            .map(|mailbox| mailbox.pending.clone())
            .unwrap_or_default()
    }

    pub fn users(&self) -> usize {
        self.boxes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uid(raw: &str) -> UserId {
        UserId::from_raw(raw)
    }

    fn unit(offset: u64) -> UnitId {
        UnitId { partition: 0, offset }
    }

    #[test]
    fn append_and_read() {
        let mailbox = Mailbox::new();
        let bob = uid("bob");
        assert!(mailbox.pending(&bob).is_empty());

        assert!(mailbox.append(&bob, &uid("alice"), "m1", "hi"));
        assert!(mailbox.append(&bob, &uid("alice"), "m2", "there"));
        assert_eq!(mailbox.pending(&bob), vec!["hi", "there"]);
        assert_eq!(mailbox.users(), 1);
    }

    #[test]
    fn duplicate_send_key_is_ignored() {
        let mailbox = Mailbox::new();
        let bob = uid("bob");
        assert!(mailbox.append(&bob, &uid("alice"), "m1", "hi"));
        assert!(!mailbox.append(&bob, &uid("alice"), "m1", "hi"));
        assert_eq!(mailbox.pending(&bob).len(), 1);
    }

    #[test]
    fn senders_sharing_a_msg_id_both_land() {
        let mailbox = Mailbox::new();
        let bob = uid("bob");
        assert!(mailbox.append(&bob, &uid("alice"), "1", "from alice"));
        assert!(mailbox.append(&bob, &uid("carol"), "1", "from carol"));
        assert_eq!(mailbox.pending(&bob), vec!["from alice", "from carol"]);
    }

    #[test]
    fn dedup_is_per_recipient() {
        let mailbox = Mailbox::new();
        assert!(mailbox.append(&uid("a"), &uid("s"), "m1", "x"));
        assert!(mailbox.append(&uid("b"), &uid("s"), "m1", "x"));
    }

    #[test]
    fn dedup_window_forgets_oldest_keys() {
        let mailbox = Mailbox::with_dedup_window(2);
        let bob = uid("bob");
        let alice = uid("alice");
        assert!(mailbox.append(&bob, &alice, "m1", "a"));
        assert!(mailbox.append(&bob, &alice, "m2", "b"));
        assert!(mailbox.append(&bob, &alice, "m3", "c"));
        // m1 fell out of the window, m3 is still remembered.
        assert!(!mailbox.append(&bob, &alice, "m3", "c"));
        assert!(mailbox.append(&bob, &alice, "m1", "a"));
    }

    #[test]
    fn fetched_messages_stop_coming_back() {
        let mailbox = Mailbox::new();
        let bob = uid("bob");
        mailbox.append(&bob, &uid("alice"), "m1", "hi");

        assert_eq!(mailbox.take(&bob, unit(0)), vec!["hi"]);
        assert!(mailbox.pending(&bob).is_empty());
        assert!(mailbox.take(&bob, unit(1)).is_empty());

        mailbox.append(&bob, &uid("alice"), "m2", "again");
        assert_eq!(mailbox.take(&bob, unit(2)), vec!["again"]);
    }

    #[test]
    fn redelivered_fetch_unit_gets_the_same_batch() {
        let mailbox = Mailbox::new();
        let bob = uid("bob");
        mailbox.append(&bob, &uid("alice"), "m1", "hi");

        assert_eq!(mailbox.take(&bob, unit(5)), vec!["hi"]);
        mailbox.append(&bob, &uid("alice"), "m2", "later");
        assert_eq!(mailbox.take(&bob, unit(5)), vec!["hi"]);
        assert_eq!(mailbox.pending(&bob), vec!["later"]);
    }

    #[test]
    fn take_for_unknown_user_is_empty() {
        let mailbox = Mailbox::new();
        assert!(mailbox.take(&uid("nobody"), unit(0)).is_empty());
        assert_eq!(mailbox.users(), 0);
    }
}
