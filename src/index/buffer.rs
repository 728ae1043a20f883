//! The bounded buffer between event producers and the delivery worker.

use crate::event::EventRecord;
use serde::Deserialize;
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

/// What happens when an event arrives while the buffer is full.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
pub enum OverflowPolicy {
    /// Evict the oldest buffered event to make room for the new one.
    #[default]
    DropOldest,
    /// Keep the buffered events and discard the new one.
    RejectNewest,
}

/// Result of appending an event to the buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Appended {
    /// The event was buffered, no full batch is available yet.
    Queued,
    /// The event was buffered and at least one full batch is waiting.
    BatchReady,
    /// The buffer was full and one event (old or new, depending on the policy) was discarded.
    Overflowed,
}

/// Ordered, bounded sequence of events awaiting transmission.
///
/// Producers append under a short lock. The worker takes whole batches out in one step, so a
/// producer never observes a partially drained buffer.
pub struct BatchBuffer {
    queue: Mutex<VecDeque<EventRecord>>,
    capacity: usize,
    batch_size: usize,
    policy: OverflowPolicy,
}

impl BatchBuffer {
    pub fn new(capacity: usize, batch_size: usize, policy: OverflowPolicy) -> Self {
        let batch_size = batch_size.max(1);
        let capacity = capacity.max(batch_size);

        BatchBuffer {
            queue: Mutex::new(VecDeque::with_capacity(batch_size)),
            capacity,
            batch_size,
            policy,
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<EventRecord>> {
        self.queue.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn append(&self, record: EventRecord) -> Appended {
        let mut queue = self.lock();
        if queue.len() >= self.capacity {
            match self.policy {
                OverflowPolicy::DropOldest => {
                    let _ = queue.pop_front();
                    queue.push_back(record);
                }
                OverflowPolicy::RejectNewest => {}
            }
            return Appended::Overflowed;
        }

        queue.push_back(record);
        if queue.len() >= self.batch_size {
            Appended::BatchReady
        } else {
            Appended::Queued
        }
    }

    /// Removes and returns the oldest full batch, if one is available.
    pub fn take_full_batch(&self) -> Option<Vec<EventRecord>> {
        let mut queue = self.lock();
        if queue.len() >= self.batch_size {
            Some(queue.drain(..self.batch_size).collect())
        } else {
            None
        }
    }

    /// Removes and returns up to one batch worth of events, oldest first.
    pub fn take_batch(&self) -> Vec<EventRecord> {
        let mut queue = self.lock();
        let count = queue.len().min(self.batch_size);
        queue.drain(..count).collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{Level, PropertyValue};

    fn record(index: i64) -> EventRecord {
        EventRecord::new(Level::Information, "event {Index}").with_property("Index", index)
    }

    fn indices(records: &[EventRecord]) -> Vec<i64> {
        records
            .iter()
            .filter_map(|r| r.property("Index").and_then(PropertyValue::as_i64))
            .collect()
    }

    #[test]
    fn signals_when_a_batch_is_full() {
        let buffer = BatchBuffer::new(100, 3, OverflowPolicy::DropOldest);

        assert_eq!(buffer.append(record(0)), Appended::Queued);
        assert_eq!(buffer.append(record(1)), Appended::Queued);
        assert_eq!(buffer.append(record(2)), Appended::BatchReady);
        assert_eq!(indices(&buffer.take_full_batch().unwrap()), vec![0, 1, 2]);
        assert!(buffer.take_full_batch().is_none());
    }

    #[test]
    fn take_batch_preserves_order_and_limits_size() {
        let buffer = BatchBuffer::new(100, 2, OverflowPolicy::DropOldest);
        for index in 0..5 {
            buffer.append(record(index));
        }

        assert_eq!(indices(&buffer.take_batch()), vec![0, 1]);
        assert_eq!(indices(&buffer.take_batch()), vec![2, 3]);
        assert_eq!(indices(&buffer.take_batch()), vec![4]);
        assert!(buffer.take_batch().is_empty());
    }

    #[test]
    fn drop_oldest_evicts_the_head() {
        let buffer = BatchBuffer::new(3, 3, OverflowPolicy::DropOldest);
        for index in 0..3 {
            buffer.append(record(index));
        }

        assert_eq!(buffer.append(record(3)), Appended::Overflowed);
        assert_eq!(buffer.len(), 3);
        assert_eq!(indices(&buffer.take_batch()), vec![1, 2, 3]);
    }

    #[test]
    fn reject_newest_keeps_the_buffer() {
        let buffer = BatchBuffer::new(3, 3, OverflowPolicy::RejectNewest);
        for index in 0..3 {
            buffer.append(record(index));
        }

        assert_eq!(buffer.append(record(3)), Appended::Overflowed);
        assert_eq!(indices(&buffer.take_batch()), vec![0, 1, 2]);
    }

    #[test]
    fn concurrent_appends_are_never_lost() {
        let buffer = std::sync::Arc::new(BatchBuffer::new(10_000, 10, OverflowPolicy::DropOldest));
        let drained = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));

        let producers: Vec<_> = (0..4)
            .map(|_| {
                let buffer = buffer.clone();
                std::thread::spawn(move || {
                    for index in 0..500 {
                        buffer.append(record(index));
                    }
                })
            })
            .collect();

        let consumer = {
            let buffer = buffer.clone();
            let drained = drained.clone();
            std::thread::spawn(move || {
                for _ in 0..200 {
                    let batch = buffer.take_batch();
                    assert!(batch.len() <= 10);
                    drained.fetch_add(batch.len(), std::sync::atomic::Ordering::SeqCst);
                }
            })
        };

        for producer in producers {
            producer.join().unwrap();
        }
        consumer.join().unwrap();

        let remaining = buffer.len();
        assert_eq!(drained.load(std::sync::atomic::Ordering::SeqCst) + remaining, 2_000);
    }
}
