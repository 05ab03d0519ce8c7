//! Pending windows of one worker, in emission order.
//!
//! Shedding removes the oldest window of the most-idle key, so the
//! remaining windows of every key stay in order.

use std::collections::VecDeque;
use std::time::Instant;

use crate::logic::window::{EntityKey, Window};

#[derive(Debug, Default)]
pub struct PendingQueue {
    windows: VecDeque<Window>,
}

impl PendingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, window: Window) {
        self.windows.push_back(window);
    }

    pub fn pop(&mut self) -> Option<Window> {
        self.windows.pop_front()
    }

    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }

    /// Drop the oldest window of the key whose last activity is earliest.
    /// Keys unknown to `last_activity` (already evicted) count as most idle.
    pub fn shed_one<F>(&mut self, last_activity: F) -> Option<Window>
    where
        F: Fn(&EntityKey) -> Option<Instant>,
    {
        let idx = self
            .windows
            .iter()
            .enumerate()
            .min_by_key(|(i, w)| (last_activity(&w.entity_key), *i))
            .map(|(i, _)| i)?;
        self.windows.remove(idx)
    }

    pub fn drain(&mut self) -> impl Iterator<Item = Window> + '_ {
        self.windows.drain(..)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logic::window::{EmitReason, WindowId};
    use chrono::Utc;
    use std::time::Duration;

    fn window(key: &EntityKey, id: u64) -> Window {
        Window {
            id: WindowId(id),
            entity_key: key.clone(),
            sequence: vec![2],
            start_ts: Utc::now(),
            end_ts: Utc::now(),
            record_refs: vec![id],
            padded: 0,
            reason: EmitReason::Full,
        }
    }

    #[test]
    fn test_shed_oldest_of_most_idle_key() {
        let busy = EntityKey::process("h1", "sshd");
        let idle = EntityKey::process("h2", "cron");
        let t0 = Instant::now();

        let mut queue = PendingQueue::new();
        queue.push(window(&busy, 1));
        queue.push(window(&idle, 2));
        queue.push(window(&idle, 3));
        queue.push(window(&busy, 4));

        let activity = |k: &EntityKey| {
            if *k == idle {
                Some(t0)
            } else {
                Some(t0 + Duration::from_secs(5))
            }
        };

        let shed = queue.shed_one(activity).unwrap();
        assert_eq!(shed.id, WindowId(2));
        let shed = queue.shed_one(activity).unwrap();
        assert_eq!(shed.id, WindowId(3));
        let shed = queue.shed_one(activity).unwrap();
        assert_eq!(shed.id, WindowId(1));
        assert_eq!(queue.pop().unwrap().id, WindowId(4));
        assert!(queue.shed_one(activity).is_none());
    }
}
