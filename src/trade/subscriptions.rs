use crate::core::kernel::codec::SubscriptionOp;
use crate::core::types::Topic;
use std::collections::BTreeMap;

/// Subscription bookkeeping for one topic
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionState {
    pub topic: Topic,
    /// What the application asked for
    pub desired: bool,
    /// Acknowledged by the server on the current connection
    pub confirmed: bool,
    /// What the server will hold once every message sent on the current
    /// connection has been processed
    pub projected: bool,
}

impl SubscriptionState {
    fn new(topic: Topic) -> Self {
        Self {
            topic,
            desired: false,
            confirmed: false,
            projected: false,
        }
    }
}

/// Desired versus server-side subscription state of every known topic
///
/// Application calls only touch `desired`. The channel worker turns the
/// difference between `desired` and `projected` into wire messages, so any
/// number of calls between two reconciliations collapse into at most one
/// message per topic.
#[derive(Debug, Default)]
pub struct SubscriptionTable {
    entries: BTreeMap<Topic, SubscriptionState>,
}

impl SubscriptionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the application's intent; returns whether anything changed
    pub fn set_desired(&mut self, topics: &[Topic], desired: bool) -> bool {
        let mut changed = false;
        for topic in topics {
            let entry = self
                .entries
                .entry(*topic)
                .or_insert_with(|| SubscriptionState::new(*topic));
            changed |= entry.desired != desired;
            entry.desired = desired;
        }
        changed
    }

    /// A fresh connection holds no subscriptions
    pub fn reset_connection(&mut self) {
        for entry in self.entries.values_mut() {
            entry.confirmed = false;
            entry.projected = false;
        }
    }

    /// Operations needed to bring the server in line with `desired`
    ///
    /// The caller is expected to send every returned operation; the
    /// projection is updated as if it had.
    pub fn take_changes(&mut self) -> Vec<(SubscriptionOp, Topic)> {
        self.entries
            .values_mut()
            .filter(|entry| entry.desired != entry.projected)
            .map(|entry| {
                entry.projected = entry.desired;
                let op = if entry.desired {
                    SubscriptionOp::Subscribe
                } else {
                    entry.confirmed = false;
                    SubscriptionOp::Unsubscribe
                };
                (op, entry.topic)
            })
            .collect()
    }

    /// Apply a successful server acknowledgement
    pub fn confirm(&mut self, op: SubscriptionOp, topic: Topic) {
        if let Some(entry) = self.entries.get_mut(&topic) {
            entry.confirmed = op == SubscriptionOp::Subscribe && entry.projected;
        }
    }

    pub fn get(&self, topic: Topic) -> Option<SubscriptionState> {
        self.entries.get(&topic).copied()
    }

    pub fn desired_topics(&self) -> Vec<Topic> {
        self.entries
            .values()
            .filter(|entry| entry.desired)
            .map(|entry| entry.topic)
            .collect()
    }

    pub fn snapshot(&self) -> Vec<SubscriptionState> {
        self.entries.values().copied().collect()
    }
}
