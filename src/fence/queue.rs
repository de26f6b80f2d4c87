// Fence-tracked command queue
//
// Two counters per queue: the value the next submission will signal, and the
// highest value the GPU is known to have signaled. Everything that reclaims
// CPU-side memory tied to GPU work asks this structure first.

use anyhow::Result;
use parking_lot::{Mutex, MutexGuard};
use std::sync::atomic::{AtomicU64, Ordering};

/// Value signaled by the first submission to a fresh queue.
pub const INITIAL_FENCE_VALUE: u64 = 1;

/// Backend side of a queue's fence: reports how far the GPU has progressed.
pub trait FenceSource: Send + Sync {
    /// Highest value the GPU has signaled so far. Must not block.
    fn signaled_value(&self) -> Result<u64>;
}

pub struct FencedQueue<S> {
    source: S,
    next_value: AtomicU64,
    completed_value: AtomicU64,
    // Binds fence values to native submissions in order.
    submit_lock: Mutex<()>,
}

impl<S: FenceSource> FencedQueue<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            next_value: AtomicU64::new(INITIAL_FENCE_VALUE),
            completed_value: AtomicU64::new(INITIAL_FENCE_VALUE - 1),
            submit_lock: Mutex::new(()),
        }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// The value the next submission will signal.
    ///
    /// Observational only: another thread may submit between this read and
    /// any use of it. Use the value returned by [`FencedQueue::submit`] to
    /// tag work.
    pub fn next_fence_value(&self) -> u64 {
        self.next_value.load(Ordering::Acquire)
    }

    /// Last completed value observed by any caller, without polling the GPU.
    pub fn last_completed_fence_value(&self) -> u64 {
        self.completed_value.load(Ordering::Acquire)
    }

    /// Polls the backend and returns the highest value known to be complete.
    pub fn completed_fence_value(&self) -> u64 {
        match self.source.signaled_value() {
            Ok(value) => self.advance_completed(value),
            Err(e) => {
                log::warn!("Failed to poll queue fence: {:#}", e);
                self.last_completed_fence_value()
            }
        }
    }

    /// Non-blocking check that all work tagged with `value` has finished.
    pub fn is_fence_signaled(&self, value: u64) -> bool {
        value <= self.last_completed_fence_value() || value <= self.completed_fence_value()
    }

    /// Records that the GPU has reached `value`. Stale (smaller) observations
    /// never move the counter backwards. Returns the resulting completed value.
    pub fn advance_completed(&self, value: u64) -> u64 {
        let previous = self.completed_value.fetch_max(value, Ordering::AcqRel);
        previous.max(value)
    }

    /// Submits one unit of work that signals the next fence value.
    ///
    /// `submit` receives the value to signal. The counter moves past `value`
    /// before the native submission, since the GPU may signal it before the
    /// call returns. A failed submission rolls it back, so no value is burned.
    pub fn submit<R>(&self, submit: impl FnOnce(&S, u64) -> Result<R>) -> Result<(u64, R)> {
        let _guard = self.submit_lock.lock();
        let value = self.next_value.load(Ordering::Acquire);
        self.next_value.store(value + 1, Ordering::Release);
        match submit(&self.source, value) {
            Ok(output) => Ok((value, output)),
            Err(e) => {
                self.next_value.store(value, Ordering::Release);
                Err(e)
            }
        }
    }

    /// Runs `f` with the same exclusivity as a submission, without signaling
    /// a fence value. For queue operations such as presentation.
    pub fn with_exclusive<R>(&self, f: impl FnOnce(&S) -> R) -> R {
        let _guard = self.submit_lock.lock();
        f(&self.source)
    }

    /// Blocks submissions to this queue until the guard is dropped. While it
    /// is held, `next_fence_value() - 1` is the last value actually submitted.
    pub fn lock_submissions(&self) -> MutexGuard<'_, ()> {
        self.submit_lock.lock()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    /// Fence whose signaled value tests move by hand.
    #[derive(Default)]
    pub(crate) struct ManualFence(pub AtomicU64);

    impl ManualFence {
        pub(crate) fn signal(&self, value: u64) {
            self.0.store(value, Ordering::SeqCst);
        }
    }

    impl FenceSource for ManualFence {
        fn signaled_value(&self) -> Result<u64> {
            Ok(self.0.load(Ordering::SeqCst))
        }
    }

    fn submit_empty(queue: &FencedQueue<ManualFence>) -> u64 {
        queue.submit(|_, _| Ok(())).unwrap().0
    }

    #[test]
    fn test_fresh_queue() {
        let queue = FencedQueue::new(ManualFence::default());
        assert_eq!(queue.next_fence_value(), 1);
        assert_eq!(queue.completed_fence_value(), 0);
        assert!(queue.is_fence_signaled(0));
        assert!(!queue.is_fence_signaled(1));
    }

    #[test]
    fn test_three_submissions_two_completed() {
        let queue = FencedQueue::new(ManualFence::default());
        let values: Vec<u64> = (0..3).map(|_| submit_empty(&queue)).collect();
        assert_eq!(values, vec![1, 2, 3]);
        assert_eq!(queue.next_fence_value(), 4);

        queue.source().signal(2);
        assert!(queue.is_fence_signaled(1));
        assert!(queue.is_fence_signaled(2));
        assert!(!queue.is_fence_signaled(3));
        assert_eq!(queue.completed_fence_value(), 2);
    }

    #[test]
    fn test_signaled_stays_signaled() {
        let queue = FencedQueue::new(ManualFence::default());
        for _ in 0..5 {
            submit_empty(&queue);
        }
        queue.source().signal(4);
        assert!(queue.is_fence_signaled(4));

        // A backend that reports an older value must not regress the counter.
        queue.source().signal(1);
        assert!(queue.is_fence_signaled(4));
        assert_eq!(queue.completed_fence_value(), 4);
        assert!(!queue.is_fence_signaled(5));
    }

    #[test]
    fn test_failed_submission_does_not_consume_value() {
        let queue = FencedQueue::new(ManualFence::default());
        let result = queue.submit(|_, _| -> Result<()> { anyhow::bail!("device lost") });
        assert!(result.is_err());
        assert_eq!(queue.next_fence_value(), 1);
        assert_eq!(submit_empty(&queue), 1);
    }

    /// GPU that finishes each batch before the native submit call returns.
    #[derive(Default)]
    struct EagerGpu(AtomicU64);

    impl FenceSource for EagerGpu {
        fn signaled_value(&self) -> Result<u64> {
            Ok(self.0.load(Ordering::SeqCst))
        }
    }

    #[test]
    fn test_completed_stays_behind_next_during_submit() {
        let queue = FencedQueue::new(EagerGpu::default());
        for _ in 0..3 {
            let (value, (completed, next)) = queue
                .submit(|gpu, value| {
                    gpu.0.store(value, Ordering::SeqCst);
                    Ok((queue.completed_fence_value(), queue.next_fence_value()))
                })
                .unwrap();
            assert_eq!(completed, value);
            assert_eq!(next, value + 1);
            assert!(completed < next);
        }
    }

    #[test]
    fn test_eager_gpu_never_overtakes_next_value() {
        let queue = Arc::new(FencedQueue::new(EagerGpu::default()));
        let done = Arc::new(std::sync::atomic::AtomicBool::new(false));

        let poller = {
            let queue = queue.clone();
            let done = done.clone();
            thread::spawn(move || {
                let mut violations = 0u32;
                while !done.load(Ordering::SeqCst) {
                    // Read completed first: next only grows afterwards
                    let completed = queue.completed_fence_value();
                    if completed >= queue.next_fence_value() {
                        violations += 1;
                    }
                }
                violations
            })
        };

        for _ in 0..20_000 {
            queue
                .submit(|gpu, value| {
                    gpu.0.store(value, Ordering::SeqCst);
                    Ok(())
                })
                .unwrap();
        }
        done.store(true, Ordering::SeqCst);
        assert_eq!(poller.join().unwrap(), 0);
    }

    #[test]
    fn test_lock_submissions_freezes_next_value() {
        let queue = Arc::new(FencedQueue::new(ManualFence::default()));
        submit_empty(&queue);

        let guard = queue.lock_submissions();
        let submitter = {
            let queue = queue.clone();
            thread::spawn(move || submit_empty(&queue))
        };
        thread::sleep(std::time::Duration::from_millis(20));
        assert_eq!(queue.next_fence_value(), 2);
        drop(guard);

        assert_eq!(submitter.join().unwrap(), 2);
        assert_eq!(queue.next_fence_value(), 3);
    }

    #[test]
    fn test_poll_failure_keeps_cached_value() {
        struct Flaky(AtomicU64);
        impl FenceSource for Flaky {
            fn signaled_value(&self) -> Result<u64> {
                match self.0.load(Ordering::SeqCst) {
                    0 => anyhow::bail!("lost"),
                    v => Ok(v),
                }
            }
        }

        let queue = FencedQueue::new(Flaky(AtomicU64::new(3)));
        assert_eq!(queue.completed_fence_value(), 3);
        queue.source().0.store(0, Ordering::SeqCst);
        assert_eq!(queue.completed_fence_value(), 3);
        assert!(queue.is_fence_signaled(3));
    }

    #[test]
    fn test_concurrent_submissions_get_unique_values() {
        let queue = Arc::new(FencedQueue::new(ManualFence::default()));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let queue = queue.clone();
                thread::spawn(move || (0..250).map(|_| submit_empty(&queue)).collect::<Vec<_>>())
            })
            .collect();

        let mut all: Vec<u64> = handles.into_iter().flat_map(|h| h.join().unwrap()).collect();
        all.sort_unstable();
        assert_eq!(all, (1..=2000).collect::<Vec<_>>());
        assert_eq!(queue.next_fence_value(), 2001);
    }

    #[test]
    fn test_concurrent_completion_is_monotonic() {
        let queue = Arc::new(FencedQueue::new(ManualFence::default()));
        let handles: Vec<_> = (0..4u64)
            .map(|t| {
                let queue = queue.clone();
                thread::spawn(move || {
                    let mut last = 0;
                    for v in 0..1000u64 {
                        // Threads report interleaved, partly stale observations.
                        let seen = queue.advance_completed(v * 4 + t);
                        assert!(seen >= last);
                        last = seen;
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(queue.last_completed_fence_value(), 999 * 4 + 3);
    }
}
