use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Outcome of [MonitorQueue::publish]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Publish {
    Sent,
    /// The queue was full; the item was discarded
    Dropped,
    /// Nobody is listening anymore; the item was discarded
    Disconnected,
}

/// MonitorQueue hands copies of events to an online monitor without ever blocking
/// the acquisition. When the monitor falls behind, items are dropped and counted.
#[derive(Debug)]
pub struct MonitorQueue<T> {
    sender: Sender<T>,
    dropped: AtomicU64,
    disconnected: AtomicBool,
}

impl<T> MonitorQueue<T> {
    /// Create a queue holding at most `capacity` items, and its consumer handle.
    /// Clones of the receiver share the same queue.
    pub fn new(capacity: usize) -> (Self, Receiver<T>) {
        let (sender, receiver) = bounded(capacity.max(1));
        let queue = Self {
            sender,
            dropped: AtomicU64::new(0),
            disconnected: AtomicBool::new(false),
        };
        (queue, receiver)
    }

    pub fn publish(&self, item: T) -> Publish {
        match self.sender.try_send(item) {
            Ok(()) => Publish::Sent,
            Err(TrySendError::Full(_)) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                if dropped.is_power_of_two() {
                    spdlog::warn!("Monitor queue is full; {} items dropped so far", dropped);
                }
                Publish::Dropped
            }
            Err(TrySendError::Disconnected(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                if !self.disconnected.swap(true, Ordering::Relaxed) {
                    spdlog::warn!("Monitor queue consumer disconnected; further items are dropped");
                }
                Publish::Disconnected
            }
        }
    }

    /// Items discarded so far
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Items waiting in the queue
    pub fn depth(&self) -> usize {
        self.sender.len()
    }

    pub fn capacity(&self) -> usize {
        self.sender.capacity().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_queue_drops() {
        let (queue, rx) = MonitorQueue::new(2);
        assert_eq!(queue.publish(1), Publish::Sent);
        assert_eq!(queue.publish(2), Publish::Sent);
        assert_eq!(queue.publish(3), Publish::Dropped);
        assert_eq!(queue.publish(4), Publish::Dropped);
        assert_eq!(queue.depth(), 2);
        assert_eq!(queue.dropped(), 2);

        assert_eq!(rx.try_recv(), Ok(1));
        assert_eq!(queue.publish(5), Publish::Sent);
        let rest: Vec<i32> = rx.try_iter().collect();
        assert_eq!(rest, vec![2, 5]);
        assert_eq!(queue.depth(), 0);
    }

    #[test]
    fn test_consumer_thread() {
        let (queue, rx) = MonitorQueue::new(64);
        let handle = std::thread::spawn(move || rx.iter().take(10).sum::<u64>());
        for i in 0..10u64 {
            assert_eq!(queue.publish(i), Publish::Sent);
        }
        assert_eq!(handle.join().unwrap(), 45);
        assert_eq!(queue.dropped(), 0);
        assert_eq!(queue.capacity(), 64);
    }

    #[test]
    fn test_disconnected_consumer() {
        let (queue, rx) = MonitorQueue::new(4);
        assert_eq!(queue.publish("a"), Publish::Sent);
        drop(rx);
        assert_eq!(queue.publish("b"), Publish::Disconnected);
        assert_eq!(queue.publish("c"), Publish::Disconnected);
        assert_eq!(queue.dropped(), 2);
    }
}
