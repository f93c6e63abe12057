//! # DeferredValue: single-slot, re-armable promise.
//!
//! A [`DeferredValue`] hands out the current value immediately once set,
//! and parks earlier callers on the current generation of waiters.
//! `set_value` completes exactly the waiters registered before the call and
//! re-arms the slot, so a later `set_value` never resolves a waiter that an
//! earlier one already satisfied.

use parking_lot::Mutex;
use tokio::sync::oneshot;

struct DeferredInner<T> {
    value: Option<T>,
    waiters: Vec<oneshot::Sender<T>>,
}

/// Single-slot future/promise that can be reset and set again.
pub struct DeferredValue<T> {
    inner: Mutex<DeferredInner<T>>,
}

impl<T> DeferredValue<T>
where
    T: Clone + Send + 'static,
{
    /// Creates an empty slot.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(DeferredInner {
                value: None,
                waiters: Vec::new(),
            }),
        }
    }

    /// True once a value has been set and not reset since.
    pub fn has_value(&self) -> bool {
        self.inner.lock().value.is_some()
    }

    /// The current value, if set.
    pub fn value(&self) -> Option<T> {
        self.inner.lock().value.clone()
    }

    /// Returns the current value immediately if set, otherwise waits for
    /// the next `set_value`.
    pub async fn wait_for_value(&self) -> T {
        let rx = {
            let mut inner = self.inner.lock();
            if let Some(value) = &inner.value {
                return value.clone();
            }
            let (tx, rx) = oneshot::channel();
            inner.waiters.push(tx);
            rx
        };
        match rx.await {
            Ok(value) => value,
            // The sender lives in the slot until `set_value` drains it
            // with a send, so this arm is unreachable while `self` is
            // borrowed by the wait.
            Err(_) => std::future::pending().await,
        }
    }

    /// Stores `value`, completes all current-generation waiters with it,
    /// and re-arms for subsequent waits.
    pub fn set_value(&self, value: T) {
        let waiters = {
            let mut inner = self.inner.lock();
            inner.value = Some(value.clone());
            std::mem::take(&mut inner.waiters)
        };
        for waiter in waiters {
            let _ = waiter.send(value.clone());
        }
    }

    /// Clears the stored value without disturbing pending waiters.
    pub fn reset_value(&self) {
        self.inner.lock().value = None;
    }
}

impl<T> Default for DeferredValue<T>
where
    T: Clone + Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_value_can_be_set() {
        let slot = DeferredValue::new();
        assert!(!slot.has_value());

        slot.set_value(7u32);
        assert!(slot.has_value());
        assert_eq!(slot.value(), Some(7));
    }

    #[tokio::test]
    async fn test_set_value_unblocks_all_current_waiters() {
        let slot = Arc::new(DeferredValue::new());

        let mut waiters = Vec::new();
        for _ in 0..3 {
            let slot = Arc::clone(&slot);
            waiters.push(tokio::spawn(async move { slot.wait_for_value().await }));
        }
        tokio::time::sleep(Duration::from_millis(20)).await;

        slot.set_value("ready".to_string());
        for waiter in waiters {
            assert_eq!(waiter.await.unwrap(), "ready");
        }
    }

    #[tokio::test]
    async fn test_wait_returns_immediately_once_set() {
        let slot = DeferredValue::new();
        slot.set_value(1u8);
        assert_eq!(slot.wait_for_value().await, 1);
    }

    #[tokio::test]
    async fn test_later_set_does_not_retouch_satisfied_waiter() {
        let slot = Arc::new(DeferredValue::new());

        let early = {
            let slot = Arc::clone(&slot);
            tokio::spawn(async move { slot.wait_for_value().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        slot.set_value("x".to_string());
        assert_eq!(early.await.unwrap(), "x");

        slot.reset_value();
        assert!(!slot.has_value());

        let late = {
            let slot = Arc::clone(&slot);
            tokio::spawn(async move { slot.wait_for_value().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        slot.set_value("y".to_string());
        assert_eq!(late.await.unwrap(), "y");
    }
}
