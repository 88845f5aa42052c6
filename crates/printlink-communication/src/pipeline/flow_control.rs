//! Clear-to-send gate bounding the number of unacknowledged commands.

use parking_lot::Mutex;
use tokio::sync::Notify;

/// Credit counter in `[0, max]`.
///
/// The sending loop waits for credit, consumes one unit per acknowledged
/// command it writes, and every `ok` releases one unit again.
#[derive(Debug)]
pub struct ClearToSend {
    counter: Mutex<usize>,
    max: usize,
    notify: Notify,
}

impl ClearToSend {
    /// Create a closed gate with room for `max` outstanding commands.
    pub fn new(max: usize) -> Self {
        Self {
            counter: Mutex::new(0),
            max: max.max(1),
            notify: Notify::new(),
        }
    }

    /// Configured maximum.
    pub fn max(&self) -> usize {
        self.max
    }

    /// Currently available credit.
    pub fn available(&self) -> usize {
        *self.counter.lock()
    }

    /// True if no credit is available.
    pub fn is_blocked(&self) -> bool {
        self.available() == 0
    }

    /// Return one unit, saturating at the maximum.
    pub fn release(&self) {
        {
            let mut counter = self.counter.lock();
            if *counter < self.max {
                *counter += 1;
            }
        }
        self.notify.notify_one();
    }

    /// Take one unit without waiting.
    pub fn consume(&self) {
        let mut counter = self.counter.lock();
        *counter = counter.saturating_sub(1);
    }

    /// Force the counter to its maximum.
    pub fn reset(&self) {
        *self.counter.lock() = self.max;
        self.notify.notify_one();
    }

    /// Drop all credit.
    pub fn clear(&self) {
        *self.counter.lock() = 0;
    }

    /// Wait until credit is available, without taking it.
    pub async fn wait(&self) {
        loop {
            let notified = self.notify.notified();
            if !self.is_blocked() {
                return;
            }
            notified.await;
        }
    }

    /// Wait for credit and take one unit.
    pub async fn acquire(&self) {
        loop {
            let notified = self.notify.notified();
            {
                let mut counter = self.counter.lock();
                if *counter > 0 {
                    *counter -= 1;
                    return;
                }
            }
            notified.await;
        }
    }

    /// Wake a waiter so it re-checks its exit conditions.
    pub fn wake(&self) {
        self.notify.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_bounds() {
        let gate = ClearToSend::new(2);
        assert!(gate.is_blocked());
        gate.release();
        gate.release();
        gate.release();
        assert_eq!(gate.available(), 2);
        gate.consume();
        gate.consume();
        gate.consume();
        assert_eq!(gate.available(), 0);
        gate.reset();
        assert_eq!(gate.available(), 2);
    }

    #[tokio::test]
    async fn test_acquire_waits_for_release() {
        let gate = Arc::new(ClearToSend::new(1));
        let waiter = {
            let gate = gate.clone();
            tokio::spawn(async move { gate.acquire().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        gate.release();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("acquire did not finish")
            .unwrap();
        assert_eq!(gate.available(), 0);
    }
}
