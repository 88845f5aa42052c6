//! The three queue tiers of the send pipeline.
//!
//! - [`TypedQueue`]: interactive commands, at most one pending per type
//! - [`JobQueue`]: job and script lines, with prepend for injected macros
//! - [`SendQueue`]: the sending loop's input, with a resend sub-queue that
//!   takes priority and can lock out regular items

use super::command::QueueItem;
use parking_lot::Mutex;
use std::collections::{HashSet, VecDeque};
use thiserror::Error;
use tokio::sync::Notify;

/// Raised when an item's type is already pending in the queue.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("A command of type {command_type} is already queued")]
pub struct AlreadyQueued {
    /// The duplicate type.
    pub command_type: String,
}

#[derive(Debug, Default)]
struct TypedInner {
    items: VecDeque<QueueItem>,
    types: HashSet<String>,
}

/// FIFO that refuses a second pending item of the same type.
#[derive(Debug, Default)]
pub struct TypedQueue {
    inner: Mutex<TypedInner>,
}

impl TypedQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an item.
    pub fn put(&self, item: QueueItem) -> Result<(), AlreadyQueued> {
        let mut inner = self.inner.lock();
        if let Some(command_type) = &item.command_type {
            if !inner.types.insert(command_type.clone()) {
                return Err(AlreadyQueued {
                    command_type: command_type.clone(),
                });
            }
        }
        inner.items.push_back(item);
        Ok(())
    }

    /// Pop the oldest item.
    pub fn get(&self) -> Option<QueueItem> {
        let mut inner = self.inner.lock();
        let item = inner.items.pop_front()?;
        if let Some(command_type) = &item.command_type {
            inner.types.remove(command_type);
        }
        Some(item)
    }

    /// True if an item of `command_type` is pending.
    pub fn contains_type(&self, command_type: &str) -> bool {
        self.inner.lock().types.contains(command_type)
    }

    /// Number of pending items.
    pub fn len(&self) -> usize {
        self.inner.lock().items.len()
    }

    /// True if nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop everything.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.items.clear();
        inner.types.clear();
    }
}

/// Plain FIFO for job and script lines.
#[derive(Debug, Default)]
pub struct JobQueue {
    items: Mutex<VecDeque<QueueItem>>,
}

impl JobQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an item.
    pub fn put(&self, item: QueueItem) {
        self.items.lock().push_back(item);
    }

    /// Insert items at the front, keeping their order.
    pub fn prepend(&self, items: Vec<QueueItem>) {
        let mut queue = self.items.lock();
        for item in items.into_iter().rev() {
            queue.push_front(item);
        }
    }

    /// Pop the oldest item.
    pub fn get(&self) -> Option<QueueItem> {
        self.items.lock().pop_front()
    }

    /// Number of pending items.
    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    /// True if nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop everything.
    pub fn clear(&self) {
        self.items.lock().clear();
    }
}

#[derive(Debug, Default)]
struct SendInner {
    resend: VecDeque<QueueItem>,
    send: VecDeque<QueueItem>,
    types: HashSet<String>,
    resend_active: bool,
}

impl SendInner {
    fn claim_type(&mut self, item: &QueueItem) -> Result<(), AlreadyQueued> {
        if let Some(command_type) = &item.command_type {
            if !self.types.insert(command_type.clone()) {
                return Err(AlreadyQueued {
                    command_type: command_type.clone(),
                });
            }
        }
        Ok(())
    }
}

/// Input of the sending loop.
///
/// Resent lines go to their own sub-queue and are always served first. While
/// `resend_active` is set, only resent lines are served.
#[derive(Debug, Default)]
pub struct SendQueue {
    inner: Mutex<SendInner>,
    notify: Notify,
}

impl SendQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a regular item, or a resent one if `resend` is set.
    pub fn put(&self, item: QueueItem, resend: bool) -> Result<(), AlreadyQueued> {
        {
            let mut inner = self.inner.lock();
            inner.claim_type(&item)?;
            if resend {
                inner.resend.push_back(item);
            } else {
                inner.send.push_back(item);
            }
        }
        self.notify.notify_one();
        Ok(())
    }

    /// Insert an item at the front of the regular or resend sub-queue.
    pub fn prepend(&self, item: QueueItem, resend: bool) -> Result<(), AlreadyQueued> {
        {
            let mut inner = self.inner.lock();
            inner.claim_type(&item)?;
            if resend {
                inner.resend.push_front(item);
            } else {
                inner.send.push_front(item);
            }
        }
        self.notify.notify_one();
        Ok(())
    }

    /// Pop the next item the sending loop may write.
    pub fn try_get(&self) -> Option<QueueItem> {
        let mut inner = self.inner.lock();
        let item = match inner.resend.pop_front() {
            Some(item) => item,
            None if inner.resend_active => return None,
            None => inner.send.pop_front()?,
        };
        if let Some(command_type) = &item.command_type {
            inner.types.remove(command_type);
        }
        Some(item)
    }

    /// Wait for the next item.
    pub async fn get(&self) -> QueueItem {
        loop {
            let notified = self.notify.notified();
            if let Some(item) = self.try_get() {
                return item;
            }
            notified.await;
        }
    }

    /// Items the sending loop could currently take.
    pub fn len(&self) -> usize {
        let inner = self.inner.lock();
        if inner.resend_active {
            inner.resend.len()
        } else {
            inner.resend.len() + inner.send.len()
        }
    }

    /// True if the sending loop has nothing to take.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True if regular items are held back for a resend.
    pub fn resend_active(&self) -> bool {
        self.inner.lock().resend_active
    }

    /// Hold back or release regular items.
    pub fn set_resend_active(&self, active: bool) {
        self.inner.lock().resend_active = active;
        if !active {
            self.notify.notify_one();
        }
    }

    /// Drop everything and stop holding back regular items.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.resend.clear();
        inner.send.clear();
        inner.types.clear();
        inner.resend_active = false;
    }

    /// Wake a waiting `get`.
    pub fn wake(&self) {
        self.notify.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn typed(text: &str, command_type: &str) -> QueueItem {
        QueueItem::command(text).with_type(Some(command_type.to_string()))
    }

    #[test]
    fn test_typed_queue_rejects_duplicates() {
        let queue = TypedQueue::new();
        queue.put(typed("M105", "temperature_poll")).unwrap();
        let err = queue.put(typed("M105", "temperature_poll")).unwrap_err();
        assert_eq!(err.command_type, "temperature_poll");
        queue.put(QueueItem::command("G28")).unwrap();
        assert_eq!(queue.len(), 2);

        assert_eq!(queue.get().unwrap().text(), Some("M105"));
        assert!(!queue.contains_type("temperature_poll"));
        queue.put(typed("M105", "temperature_poll")).unwrap();
    }

    #[test]
    fn test_job_queue_prepend_keeps_order() {
        let queue = JobQueue::new();
        queue.put(QueueItem::command("G1 X1"));
        queue.prepend(vec![QueueItem::command("M400"), QueueItem::command("M114")]);
        let order: Vec<_> = std::iter::from_fn(|| queue.get())
            .map(|item| item.text().unwrap_or_default().to_string())
            .collect();
        assert_eq!(order, vec!["M400", "M114", "G1 X1"]);
    }

    #[test]
    fn test_send_queue_resend_priority() {
        let queue = SendQueue::new();
        queue.put(QueueItem::command("G1 X1"), false).unwrap();
        queue.put(QueueItem::command("N5 G1 X0*1"), true).unwrap();
        assert_eq!(queue.try_get().unwrap().text(), Some("N5 G1 X0*1"));

        queue.set_resend_active(true);
        assert_eq!(queue.len(), 0);
        assert!(queue.try_get().is_none());

        queue.set_resend_active(false);
        assert_eq!(queue.try_get().unwrap().text(), Some("G1 X1"));
    }

    #[test]
    fn test_send_queue_shares_types_across_subqueues() {
        let queue = SendQueue::new();
        queue.put(typed("M105", "poll"), false).unwrap();
        assert!(queue.put(typed("M105", "poll"), true).is_err());
        queue.clear();
        assert!(queue.put(typed("M105", "poll"), true).is_ok());
    }

    #[test]
    fn test_send_queue_clear_releases_regular_items() {
        let queue = SendQueue::new();
        queue.set_resend_active(true);
        queue.clear();
        assert!(!queue.resend_active());

        queue.put(QueueItem::command("G1 X1"), false).unwrap();
        assert_eq!(queue.try_get().unwrap().text(), Some("G1 X1"));
    }

    #[tokio::test]
    async fn test_send_queue_get_wakes_on_put() {
        let queue = std::sync::Arc::new(SendQueue::new());
        let getter = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.get().await })
        };
        tokio::task::yield_now().await;
        queue.put(QueueItem::command("M105"), false).unwrap();
        let item = getter.await.unwrap();
        assert_eq!(item.text(), Some("M105"));
    }
}
