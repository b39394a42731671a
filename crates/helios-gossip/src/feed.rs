use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use parking_lot::Mutex;
use tracing::warn;

/// Fan-out of values to any number of subscribers over bounded channels.
///
/// A subscriber that falls behind misses values instead of stalling the sender; a dropped
/// receiver is unsubscribed on the next send.
#[derive(Debug)]
pub struct Feed<T> {
    name: &'static str,
    subscribers: Mutex<Vec<Sender<T>>>,
}

impl<T: Clone> Feed<T> {
    /// Creates a feed without subscribers.
    pub const fn new(name: &'static str) -> Self {
        Self { name, subscribers: Mutex::new(Vec::new()) }
    }

    /// Subscribes with a buffer of `capacity` values.
    pub fn subscribe(&self, capacity: usize) -> Receiver<T> {
        let (tx, rx) = bounded(capacity.max(1));
        self.subscribers.lock().push(tx);
        rx
    }

    /// Number of live subscribers.
    pub fn subscribers(&self) -> usize {
        self.subscribers.lock().len()
    }

    /// Sends `value` to every subscriber and returns how many received it.
    pub fn send(&self, value: T) -> usize {
        let mut subscribers = self.subscribers.lock();
        let mut delivered = 0;
        subscribers.retain(|tx| match tx.try_send(value.clone()) {
            Ok(()) => {
                delivered += 1;
                true
            }
            Err(TrySendError::Full(_)) => {
                warn!(target: "gossip::feed", feed = self.name, "subscriber lagging, value dropped");
                true
            }
            Err(TrySendError::Disconnected(_)) => false,
        });
        delivered
    }
}
