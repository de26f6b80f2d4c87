// GPU/CPU synchronization - fence values per command queue
//
// The GPU signals a monotonically increasing 64-bit value per queue, in
// submission order. Comparing a recorded value against the queue's completed
// value is how the CPU learns that memory, command buffers or descriptor sets
// tied to that work can be reused.

mod queue;
mod release;
mod tracker;

pub use queue::{FenceSource, FencedQueue, INITIAL_FENCE_VALUE};
pub use release::ReleaseQueue;
pub use tracker::{FenceTracker, StaleObject};

#[cfg(test)]
pub(crate) use queue::tests::ManualFence;

/// All fence-tracked queues of one device, addressed by queue index.
pub struct DeviceQueues<S> {
    queues: Vec<FencedQueue<S>>,
}

impl<S: FenceSource> DeviceQueues<S> {
    pub fn new(sources: impl IntoIterator<Item = S>) -> Self {
        Self {
            queues: sources.into_iter().map(FencedQueue::new).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.queues.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queues.is_empty()
    }

    /// # Panics
    /// If `index` is not a configured queue. That is a caller bug, not a
    /// runtime condition.
    pub fn queue(&self, index: usize) -> &FencedQueue<S> {
        assert!(
            index < self.queues.len(),
            "queue index {} out of range (device has {} queues)",
            index,
            self.queues.len()
        );
        &self.queues[index]
    }

    pub fn iter(&self) -> impl Iterator<Item = &FencedQueue<S>> {
        self.queues.iter()
    }

    pub fn next_fence_value(&self, index: usize) -> u64 {
        self.queue(index).next_fence_value()
    }

    pub fn completed_fence_value(&self, index: usize) -> u64 {
        self.queue(index).completed_fence_value()
    }

    pub fn is_fence_signaled(&self, index: usize, value: u64) -> bool {
        self.queue(index).is_fence_signaled(value)
    }

    /// Next value of every queue; tags anything whose last use is not yet submitted.
    pub fn next_values(&self) -> Vec<u64> {
        self.queues.iter().map(FencedQueue::next_fence_value).collect()
    }

    /// Freshly polled completed value of every queue.
    pub fn completed_values(&self) -> Vec<u64> {
        self.queues.iter().map(FencedQueue::completed_fence_value).collect()
    }

    /// Releases every parked resource whose GPU work has finished on all queues.
    pub fn release_completed<T>(&self, stale: &ReleaseQueue<T>) -> usize {
        stale.release_completed(&self.completed_values())
    }
}
