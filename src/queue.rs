use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};

use crate::sync_ext::{CondvarExt, MutexExt};

/// FIFO of job ids awaiting work. Scheduling hint only — the durable
/// truth is `status == queued|running` in `meta/` (§4.2). Grounded on
/// the teacher's `worker_loop` queue-wait pattern
/// (`engine/worker/spawner.rs`): a Mutex-guarded deque plus a Condvar
/// so workers block without polling, yet still wake promptly on push
/// or shutdown.
pub struct JobQueue {
    items: Mutex<VecDeque<String>>,
    cv: Condvar,
}

impl JobQueue {
    pub fn new() -> Self {
        JobQueue {
            items: Mutex::new(VecDeque::new()),
            cv: Condvar::new(),
        }
    }

    pub fn push(&self, id: String) {
        let mut items = self.items.lock_unpoisoned();
        items.push_back(id);
        drop(items);
        self.cv.notify_all();
    }

    /// Block until an id is available, or `should_stop` starts returning
    /// true (checked each time the condvar wakes, so shutdown is always
    /// observable even with nothing queued).
    pub fn pop_blocking(&self, should_stop: &dyn Fn() -> bool) -> Option<String> {
        let mut items = self.items.lock_unpoisoned();
        loop {
            if let Some(id) = items.pop_front() {
                return Some(id);
            }
            if should_stop() {
                return None;
            }
            items = self.cv.wait_unpoisoned(items);
        }
    }

    pub fn wake_all(&self) {
        self.cv.notify_all();
    }

    pub fn len(&self) -> usize {
        self.items.lock_unpoisoned().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for JobQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn push_then_pop_returns_in_fifo_order() {
        let queue = JobQueue::new();
        queue.push("a".to_string());
        queue.push("b".to_string());
        assert_eq!(queue.pop_blocking(&|| false), Some("a".to_string()));
        assert_eq!(queue.pop_blocking(&|| false), Some("b".to_string()));
    }

    #[test]
    fn pop_blocking_wakes_on_push_from_another_thread() {
        let queue = Arc::new(JobQueue::new());
        let queue_clone = queue.clone();
        let handle = std::thread::spawn(move || queue_clone.pop_blocking(&|| false));
        std::thread::sleep(Duration::from_millis(50));
        queue.push("late".to_string());
        let result = handle.join().unwrap();
        assert_eq!(result, Some("late".to_string()));
    }

    #[test]
    fn pop_blocking_returns_none_when_stop_requested() {
        let queue = JobQueue::new();
        assert_eq!(queue.pop_blocking(&|| true), None);
    }
}
