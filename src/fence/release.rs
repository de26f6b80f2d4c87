// Deferred release of GPU-visible objects
//
// An engine-owned native object dropped by the client may still be referenced
// by submitted (or about to be submitted) GPU work. It is parked here with the
// next fence value of every queue and destroyed once all of those complete.

use parking_lot::Mutex;

struct Stale<T> {
    marks: Vec<u64>,
    resource: T,
}

pub struct ReleaseQueue<T> {
    pending: Mutex<Vec<Stale<T>>>,
}

impl<T> ReleaseQueue<T> {
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(Vec::new()),
        }
    }

    /// Parks `resource` until every queue `i` has completed `marks[i]`.
    pub fn defer(&self, marks: Vec<u64>, resource: T) {
        self.pending.lock().push(Stale { marks, resource });
    }

    /// Destroys every parked resource whose marks are all covered by
    /// `completed` (indexed by queue). Returns how many were released.
    pub fn release_completed(&self, completed: &[u64]) -> usize {
        let ready: Vec<Stale<T>> = {
            let mut pending = self.pending.lock();
            let (ready, waiting) = pending.drain(..).partition(|stale: &Stale<T>| {
                debug_assert_eq!(stale.marks.len(), completed.len());
                stale.marks.iter().zip(completed).all(|(mark, done)| mark <= done)
            });
            *pending = waiting;
            ready
        };
        // Destructors run outside the lock; they may touch other device state.
        let count = ready.len();
        drop(ready);
        count
    }

    /// Destroys everything regardless of fence progress. Only valid once the
    /// device is idle.
    pub fn drain(&self) -> usize {
        let all = std::mem::take(&mut *self.pending.lock());
        all.len()
    }

    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> Default for ReleaseQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct Tracked(Arc<AtomicUsize>);

    impl Drop for Tracked {
        fn drop(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_releases_only_completed_work() {
        let destroyed = Arc::new(AtomicUsize::new(0));
        let queue = ReleaseQueue::new();
        queue.defer(vec![1, 1], Tracked(destroyed.clone()));
        queue.defer(vec![3, 1], Tracked(destroyed.clone()));
        queue.defer(vec![2, 5], Tracked(destroyed.clone()));

        assert_eq!(queue.release_completed(&[0, 0]), 0);
        assert_eq!(queue.release_completed(&[2, 1]), 1);
        assert_eq!(destroyed.load(Ordering::SeqCst), 1);

        // First queue is far ahead, second still lags for the last entry.
        assert_eq!(queue.release_completed(&[10, 4]), 1);
        assert_eq!(queue.len(), 1);

        assert_eq!(queue.release_completed(&[10, 5]), 1);
        assert!(queue.is_empty());
        assert_eq!(destroyed.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_drain_releases_everything() {
        let destroyed = Arc::new(AtomicUsize::new(0));
        let queue = ReleaseQueue::new();
        for v in 1..=4 {
            queue.defer(vec![v], Tracked(destroyed.clone()));
        }
        assert_eq!(queue.drain(), 4);
        assert_eq!(destroyed.load(Ordering::SeqCst), 4);
    }
}
