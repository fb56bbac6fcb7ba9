/*
[INPUT]:  Topic names and subscriber callbacks
[OUTPUT]: Token-keyed callback registry with snapshot reads
[POS]:    WebSocket layer - per-topic subscriber bookkeeping
[UPDATE]: When changing subscription identity or dispatch order
*/

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde_json::Value;

/// Subscriber callback; receives the decoded payload (`Null` when absent)
pub type Callback = Arc<dyn Fn(&Value) + Send + Sync>;

/// Opaque subscription token
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriptionId(u64);

#[derive(Default)]
pub(crate) struct SubscriberRegistry {
    next_id: u64,
    topics: HashMap<String, BTreeMap<SubscriptionId, Callback>>,
}

impl SubscriberRegistry {
    pub(crate) fn insert(&mut self, topic: &str, callback: Callback) -> SubscriptionId {
        self.next_id += 1;
        let id = SubscriptionId(self.next_id);
        self.topics
            .entry(topic.to_string())
            .or_default()
            .insert(id, callback);
        id
    }

    pub(crate) fn remove(&mut self, topic: &str, id: SubscriptionId) -> bool {
        let Some(callbacks) = self.topics.get_mut(topic) else {
            return false;
        };
        let removed = callbacks.remove(&id).is_some();
        if callbacks.is_empty() {
            self.topics.remove(topic);
        }
        removed
    }

    pub(crate) fn remove_topic(&mut self, topic: &str) -> usize {
        self.topics.remove(topic).map_or(0, |callbacks| callbacks.len())
    }

    pub(crate) fn contains(&self, topic: &str, id: SubscriptionId) -> bool {
        self.topics
            .get(topic)
            .is_some_and(|callbacks| callbacks.contains_key(&id))
    }

    /// Callbacks for `topic` in subscription order, detached from the registry
    pub(crate) fn snapshot(&self, topic: &str) -> Vec<(SubscriptionId, Callback)> {
        self.topics
            .get(topic)
            .map(|callbacks| {
                callbacks
                    .iter()
                    .map(|(id, callback)| (*id, Arc::clone(callback)))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub(crate) fn count(&self, topic: &str) -> usize {
        self.topics.get(topic).map_or(0, BTreeMap::len)
    }

    pub(crate) fn clear(&mut self) {
        self.topics.clear();
    }
}
