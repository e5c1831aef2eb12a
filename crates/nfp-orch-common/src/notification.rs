//! Bounded notification inbox for an orchestration loop.
//!
//! Producers (RPC handlers, timers, the binary's request loader) hold a
//! cloneable [`NotificationSender`]; the loop owns the single
//! [`NotificationQueue`] and drains it once per poll tick.

use log::warn;
use thiserror::Error;
use tokio::sync::mpsc;

/// Error returned when a notification cannot be queued.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NotifyError {
    /// The queue is at capacity
    #[error("Notification queue full (capacity {capacity})")]
    Full { capacity: usize },

    /// The owning loop has dropped its queue
    #[error("Notification queue closed")]
    Closed,
}

/// Producer side of a [`NotificationQueue`].
#[derive(Debug)]
pub struct NotificationSender<T> {
    tx: mpsc::Sender<T>,
    capacity: usize,
}

impl<T> Clone for NotificationSender<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            capacity: self.capacity,
        }
    }
}

impl<T> NotificationSender<T> {
    /// Queues a notification without waiting.
    pub fn notify(&self, item: T) -> Result<(), NotifyError> {
        self.tx.try_send(item).map_err(|err| match err {
            mpsc::error::TrySendError::Full(_) => {
                warn!("notification queue full (capacity {})", self.capacity);
                NotifyError::Full {
                    capacity: self.capacity,
                }
            }
            mpsc::error::TrySendError::Closed(_) => NotifyError::Closed,
        })
    }
}

/// Consumer side, owned by the orchestration loop.
#[derive(Debug)]
pub struct NotificationQueue<T> {
    rx: mpsc::Receiver<T>,
    capacity: usize,
}

impl<T> NotificationQueue<T> {
    /// Creates a queue holding at most `capacity` notifications.
    pub fn bounded(capacity: usize) -> (NotificationSender<T>, NotificationQueue<T>) {
        let capacity = capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        (
            NotificationSender { tx, capacity },
            NotificationQueue { rx, capacity },
        )
    }

    /// Returns the queue capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns the number of queued notifications.
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    /// Returns true if nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    /// Takes every notification queued at the time of the call.
    ///
    /// Notifications sent while draining are left for the next tick.
    pub fn drain(&mut self) -> Vec<T> {
        let available = self.rx.len();
        let mut items = Vec::with_capacity(available);
        while items.len() < available {
            match self.rx.try_recv() {
                Ok(item) => items.push(item),
                Err(_) => break,
            }
        }
        items
    }
}
