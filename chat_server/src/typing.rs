use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Rate limits relayed typing signals per (sender, receiver) pair.
pub struct TypingTracker {
    last: Mutex<HashMap<(Uuid, Uuid), Instant>>,
    debounce: Duration,
}

impl TypingTracker {
    pub fn new(debounce: Duration) -> Self {
        Self {
            last: Mutex::new(HashMap::new()),
            debounce,
        }
    }

    /// Register a typing signal. Returns true if it should be relayed.
    ///
    /// A start is relayed at most once per debounce window while typing
    /// continues; a stop is relayed only if a start was relayed before it.
    pub fn typing(&self, sender: Uuid, receiver: Uuid, active: bool) -> bool {
        let mut guard = self.last.lock();
        let key = (sender, receiver);
        if !active {
            return guard.remove(&key).is_some();
        }
        let now = Instant::now();
        let should = match guard.get(&key) {
            Some(&prev) => now.duration_since(prev) >= self.debounce,
            None => true,
        };
        if should {
            guard.insert(key, now);
        }
        should
    }

    /// Forget every pair the sender was typing in. Returns the receivers that
    /// were last told the sender is typing.
    pub fn clear_sender(&self, sender: &Uuid) -> Vec<Uuid> {
        let mut guard = self.last.lock();
        let receivers: Vec<Uuid> = guard
            .keys()
            .filter(|(s, _)| s == sender)
            .map(|(_, r)| *r)
            .collect();
        for r in &receivers {
            guard.remove(&(*sender, *r));
        }
        receivers
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn debounce_logic() {
        let tracker = TypingTracker::new(Duration::from_secs(2));
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        assert!(tracker.typing(a, b, true));
        assert!(!tracker.typing(a, b, true));
        assert!(tracker.typing(a, b, false));
        assert!(!tracker.typing(a, b, false));
        assert!(tracker.typing(a, b, true));
    }

    #[test]
    fn window_elapses() {
        let tracker = TypingTracker::new(Duration::from_millis(10));
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        assert!(tracker.typing(a, b, true));
        std::thread::sleep(Duration::from_millis(20));
        assert!(tracker.typing(a, b, true));
    }

    #[test]
    fn clear_sender_reports_open_pairs() {
        let tracker = TypingTracker::new(Duration::from_secs(2));
        let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        tracker.typing(a, b, true);
        tracker.typing(c, b, true);
        assert_eq!(tracker.clear_sender(&a), vec![b]);
        assert!(tracker.clear_sender(&a).is_empty());
        assert!(!tracker.typing(c, b, true));
    }
}
