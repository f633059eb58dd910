use std::collections::VecDeque;

use dashmap::DashMap;

use super::message::ConsoleMessage;

/// Bounded FIFO of console messages per instance.
pub struct ConsoleHistory {
    capacity: usize,
    entries: DashMap<String, VecDeque<ConsoleMessage>>,
}

impl ConsoleHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: DashMap::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn push(&self, instance_id: &str, message: ConsoleMessage) {
        let mut queue = self.entries.entry(instance_id.to_string()).or_default();
        while queue.len() >= self.capacity {
            queue.pop_front();
        }
        queue.push_back(message);
    }

    /// The newest `limit` messages, oldest first.
    pub fn recent(&self, instance_id: &str, limit: usize) -> Vec<ConsoleMessage> {
        self.entries
            .get(instance_id)
            .map(|queue| {
                let skip = queue.len().saturating_sub(limit);
                queue.iter().skip(skip).cloned().collect()
            })
            .unwrap_or_default()
    }

    pub fn all(&self, instance_id: &str) -> Vec<ConsoleMessage> {
        self.recent(instance_id, usize::MAX)
    }

    pub fn len(&self, instance_id: &str) -> usize {
        self.entries.get(instance_id).map(|q| q.len()).unwrap_or(0)
    }

    pub fn clear(&self, instance_id: &str) {
        self.entries.remove(instance_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evicts_oldest_past_capacity() {
        let history = ConsoleHistory::new(3);
        for i in 0..4 {
            history.push("a", ConsoleMessage::info(format!("m{i}")));
        }
        let texts: Vec<String> = history.all("a").into_iter().map(|m| m.message).collect();
        assert_eq!(texts, vec!["m1", "m2", "m3"]);
        assert_eq!(history.len("a"), 3);
    }

    #[test]
    fn recent_returns_tail_in_order() {
        let history = ConsoleHistory::new(10);
        for i in 0..6 {
            history.push("a", ConsoleMessage::info(format!("m{i}")));
        }
        let texts: Vec<String> = history.recent("a", 2).into_iter().map(|m| m.message).collect();
        assert_eq!(texts, vec!["m4", "m5"]);
        assert!(history.recent("missing", 5).is_empty());

        history.clear("a");
        assert_eq!(history.len("a"), 0);
    }
}
