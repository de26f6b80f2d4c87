// Device-wide fence tracking
//
// The queues of one device plus the engine-owned objects waiting on them.
// After shutdown nothing can be submitted anymore, so released objects are
// destroyed on the spot.

use anyhow::Result;
use std::sync::atomic::{AtomicBool, Ordering};

use super::{DeviceQueues, FenceSource, ReleaseQueue};

/// Engine-owned native object waiting for the GPU to let go of it.
pub type StaleObject = Box<dyn Send>;

pub struct FenceTracker<S> {
    queues: DeviceQueues<S>,
    stale: ReleaseQueue<StaleObject>,
    shut_down: AtomicBool,
}

impl<S: FenceSource> FenceTracker<S> {
    pub fn new(sources: impl IntoIterator<Item = S>) -> Self {
        Self {
            queues: DeviceQueues::new(sources),
            stale: ReleaseQueue::new(),
            shut_down: AtomicBool::new(false),
        }
    }

    pub fn queues(&self) -> &DeviceQueues<S> {
        &self.queues
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }

    /// Objects still waiting for their fence values.
    pub fn parked(&self) -> usize {
        self.stale.len()
    }

    /// Destroys `object` once every queue has finished the work submitted so
    /// far, or right away after shutdown.
    pub fn safe_release<T: Send + 'static>(&self, object: T) {
        if self.is_shut_down() {
            drop(object);
            return;
        }
        self.stale.defer(self.queues.next_values(), Box::new(object));
        // Lost the race against shutdown: nobody will poll again
        if self.is_shut_down() {
            self.stale.drain();
        }
    }

    pub fn release_stale(&self) -> usize {
        let released = self.queues.release_completed(&self.stale);
        if released > 0 {
            log::trace!("Released {} stale objects", released);
        }
        released
    }

    /// Runs `wait_native` with every queue's submissions blocked, then marks
    /// everything submitted as complete.
    ///
    /// `wait_native` must return only once the GPU is idle.
    pub fn wait_idle(&self, wait_native: impl FnOnce() -> Result<()>) -> Result<()> {
        let _guards: Vec<_> = self.queues.iter().map(|q| q.lock_submissions()).collect();
        wait_native()?;
        for queue in self.queues.iter() {
            queue.advance_completed(queue.next_fence_value() - 1);
        }
        Ok(())
    }

    /// Idles the device and destroys every parked object. Returns how many
    /// were destroyed.
    pub fn shutdown(&self, wait_native: impl FnOnce() -> Result<()>) -> usize {
        if let Err(e) = self.wait_idle(wait_native) {
            log::error!("Failed to idle device during shutdown: {:#}", e);
        }
        self.shut_down.store(true, Ordering::Release);
        let drained = self.stale.drain();
        log::debug!("Device shut down, {} parked objects destroyed", drained);
        drained
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fence::ManualFence;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    struct Tracked(Arc<AtomicUsize>);

    impl Drop for Tracked {
        fn drop(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_parked_until_fence_completes() {
        let tracker = FenceTracker::new([ManualFence::default()]);
        let destroyed = Arc::new(AtomicUsize::new(0));

        tracker.safe_release(Tracked(destroyed.clone()));
        let value = tracker.queues().queue(0).submit(|_, v| Ok(v)).unwrap().0;
        assert_eq!(tracker.release_stale(), 0);
        assert_eq!(tracker.parked(), 1);

        tracker.queues().queue(0).source().signal(value);
        assert_eq!(tracker.release_stale(), 1);
        assert_eq!(destroyed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_shutdown_idles_before_draining() {
        let tracker = FenceTracker::new([ManualFence::default(), ManualFence::default()]);
        let destroyed = Arc::new(AtomicUsize::new(0));
        tracker.queues().queue(1).submit(|_, _| Ok(())).unwrap();
        tracker.safe_release(Tracked(destroyed.clone()));

        let drained = tracker.shutdown(|| {
            // Nothing destroyed while the GPU may still be running
            assert_eq!(destroyed.load(Ordering::SeqCst), 0);
            assert!(!tracker.is_shut_down());
            tracker.queues().queue(1).source().signal(1);
            Ok(())
        });
        assert_eq!(drained, 1);
        assert_eq!(destroyed.load(Ordering::SeqCst), 1);
        assert!(tracker.queues().is_fence_signaled(1, 1));

        tracker.safe_release(Tracked(destroyed.clone()));
        assert_eq!(destroyed.load(Ordering::SeqCst), 2);
        assert_eq!(tracker.parked(), 0);
    }

    #[test]
    fn test_failed_idle_still_shuts_down() {
        let tracker = FenceTracker::new([ManualFence::default()]);
        let destroyed = Arc::new(AtomicUsize::new(0));
        tracker.safe_release(Tracked(destroyed.clone()));

        tracker.shutdown(|| anyhow::bail!("device lost"));
        assert!(tracker.is_shut_down());
        assert_eq!(destroyed.load(Ordering::SeqCst), 1);
    }
}
