// Fence values and deferred release across a device's queues, with simulated GPUs.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use vk_rhi::fence::{DeviceQueues, FenceSource, FenceTracker, ReleaseQueue};

/// GPU stand-in: the test decides how far it has progressed.
#[derive(Default)]
struct SimulatedGpu {
    reached: AtomicU64,
}

impl SimulatedGpu {
    fn complete_up_to(&self, value: u64) {
        self.reached.fetch_max(value, Ordering::SeqCst);
    }
}

impl FenceSource for SimulatedGpu {
    fn signaled_value(&self) -> anyhow::Result<u64> {
        Ok(self.reached.load(Ordering::SeqCst))
    }
}

fn submit(queues: &DeviceQueues<SimulatedGpu>, index: usize) -> u64 {
    queues.queue(index).submit(|_, _| Ok(())).unwrap().0
}

#[test]
fn test_three_submissions_two_completed() {
    let queues = DeviceQueues::new([SimulatedGpu::default()]);
    assert_eq!(queues.next_fence_value(0), 1);
    assert!(queues.is_fence_signaled(0, 0));

    let values: Vec<u64> = (0..3).map(|_| submit(&queues, 0)).collect();
    assert_eq!(values, [1, 2, 3]);

    queues.queue(0).source().complete_up_to(2);
    assert!(queues.is_fence_signaled(0, 1));
    assert!(queues.is_fence_signaled(0, 2));
    assert!(!queues.is_fence_signaled(0, 3));
    assert_eq!(queues.completed_fence_value(0), 2);
    assert_eq!(queues.next_fence_value(0), 4);
}

#[test]
fn test_signaled_value_never_reverts() {
    let queues = DeviceQueues::new([SimulatedGpu::default(), SimulatedGpu::default()]);
    for _ in 0..10 {
        submit(&queues, 1);
    }

    for step in 1..=10 {
        queues.queue(1).source().complete_up_to(step);
        for v in 1..=10 {
            assert_eq!(queues.is_fence_signaled(1, v), v <= step);
        }
        // Once true, stays true
        assert!((1..=step).all(|v| queues.is_fence_signaled(1, v)));
    }

    // Queue 0 saw none of this
    assert_eq!(queues.completed_fence_value(0), 0);
    assert_eq!(queues.next_fence_value(0), 1);
}

#[test]
#[should_panic(expected = "out of range")]
fn test_bad_queue_index_is_fatal() {
    let queues = DeviceQueues::new([SimulatedGpu::default()]);
    queues.is_fence_signaled(1, 0);
}

struct Tracked(Arc<AtomicUsize>);

impl Drop for Tracked {
    fn drop(&mut self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn test_stale_resources_wait_for_every_queue() {
    let queues = DeviceQueues::new([SimulatedGpu::default(), SimulatedGpu::default()]);
    let stale = ReleaseQueue::new();
    let released = Arc::new(AtomicUsize::new(0));

    let graphics = submit(&queues, 0);
    let copy = submit(&queues, 1);
    stale.defer(queues.next_values(), Tracked(released.clone()));

    // The work that may still use it is the next submission on each queue
    let graphics_next = submit(&queues, 0);
    let copy_next = submit(&queues, 1);
    assert_eq!((graphics, copy, graphics_next, copy_next), (1, 1, 2, 2));

    queues.queue(0).source().complete_up_to(graphics_next);
    assert_eq!(queues.release_completed(&stale), 0);
    assert_eq!(released.load(Ordering::SeqCst), 0);

    queues.queue(1).source().complete_up_to(copy_next);
    assert_eq!(queues.release_completed(&stale), 1);
    assert_eq!(released.load(Ordering::SeqCst), 1);
    assert!(stale.is_empty());
}

#[test]
fn test_submitters_and_pollers_race() {
    let queues = Arc::new(DeviceQueues::new([SimulatedGpu::default()]));

    let submitters: Vec<_> = (0..4)
        .map(|_| {
            let queues = queues.clone();
            thread::spawn(move || {
                for _ in 0..500 {
                    let value = submit(&queues, 0);
                    queues.queue(0).source().complete_up_to(value);
                }
            })
        })
        .collect();

    let poller = {
        let queues = queues.clone();
        thread::spawn(move || {
            let mut last = 0;
            for _ in 0..2000 {
                let completed = queues.completed_fence_value(0);
                assert!(completed >= last);
                assert!(completed < queues.next_fence_value(0));
                last = completed;
            }
        })
    };

    for h in submitters {
        h.join().unwrap();
    }
    poller.join().unwrap();

    assert_eq!(queues.next_fence_value(0), 2001);
    assert!(queues.is_fence_signaled(0, 2000));
}

#[test]
fn test_gpu_finishing_inside_submit_stays_behind_next() {
    let queues = DeviceQueues::new([SimulatedGpu::default()]);
    for expected in 1..=5 {
        let (value, seen) = queues
            .queue(0)
            .submit(|gpu, value| {
                // Work done before the native call has even returned
                gpu.complete_up_to(value);
                Ok((queues.completed_fence_value(0), queues.next_fence_value(0)))
            })
            .unwrap();
        assert_eq!(value, expected);
        assert_eq!(seen, (value, value + 1));
    }
}

#[test]
fn test_teardown_drains_only_after_idle() {
    let tracker = FenceTracker::new([SimulatedGpu::default(), SimulatedGpu::default()]);
    let released = Arc::new(AtomicUsize::new(0));

    let in_flight = tracker.queues().queue(0).submit(|_, v| Ok(v)).unwrap().0;
    tracker.safe_release(Tracked(released.clone()));
    tracker.queues().queue(1).submit(|_, _| Ok(())).unwrap();

    // Still in use on both queues
    assert_eq!(tracker.release_stale(), 0);
    tracker.queues().queue(0).source().complete_up_to(in_flight);
    assert_eq!(tracker.release_stale(), 0);
    assert_eq!(tracker.parked(), 1);

    let destroyed = tracker.shutdown(|| {
        assert_eq!(released.load(Ordering::SeqCst), 0);
        tracker.queues().queue(1).source().complete_up_to(1);
        Ok(())
    });
    assert_eq!(destroyed, 1);
    assert_eq!(released.load(Ordering::SeqCst), 1);
    assert!(tracker.is_shut_down());

    // Nothing can be in flight anymore
    tracker.safe_release(Tracked(released.clone()));
    assert_eq!(released.load(Ordering::SeqCst), 2);
}

#[test]
fn test_idle_wait_excludes_concurrent_submissions() {
    let tracker = Arc::new(FenceTracker::new([SimulatedGpu::default()]));
    tracker.queues().queue(0).submit(|_, _| Ok(())).unwrap();

    let submitter = {
        let tracker = tracker.clone();
        thread::spawn(move || {
            for _ in 0..1000 {
                tracker.queues().queue(0).submit(|_, _| Ok(())).unwrap();
            }
        })
    };

    for _ in 0..50 {
        tracker
            .wait_idle(|| {
                // Simulated device idle: everything submitted so far is done
                let last = tracker.queues().next_fence_value(0) - 1;
                tracker.queues().queue(0).source().complete_up_to(last);
                Ok(())
            })
            .unwrap();
        let completed = tracker.queues().completed_fence_value(0);
        assert!(completed < tracker.queues().next_fence_value(0));
    }
    submitter.join().unwrap();
}
