//! Caller-supplied cancellation for long-running provisioning work.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;

/// Why in-flight work was interrupted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interrupt {
    /// `cancel()` was called
    Cancelled,

    /// The deadline passed
    DeadlineExceeded,
}

/// Cloneable cancellation signal with an optional deadline.
///
/// Clones share the same signal: cancelling one cancels all.
#[derive(Debug, Clone)]
pub struct Cancellation {
    sender: Arc<watch::Sender<bool>>,
    receiver: watch::Receiver<bool>,
    deadline: Option<Instant>,
}

impl Default for Cancellation {
    fn default() -> Self {
        Self::new()
    }
}

impl Cancellation {
    /// A signal that only fires when `cancel()` is called
    pub fn new() -> Self {
        let (sender, receiver) = watch::channel(false);
        Self {
            sender: Arc::new(sender),
            receiver,
            deadline: None,
        }
    }

    /// Same signal, additionally firing at `deadline`
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Same signal, additionally firing after `timeout` from now.
    ///
    /// A timeout too large to represent leaves the signal without a deadline.
    pub fn with_timeout(self, timeout: Duration) -> Self {
        match Instant::now().checked_add(timeout) {
            Some(deadline) => self.with_deadline(deadline),
            None => self,
        }
    }

    pub fn cancel(&self) {
        self.sender.send_replace(true);
    }

    /// The interrupt that has already happened, if any
    pub fn interrupted(&self) -> Option<Interrupt> {
        if *self.receiver.borrow() {
            return Some(Interrupt::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(Interrupt::DeadlineExceeded),
            _ => None,
        }
    }

    /// Resolve once cancelled or past the deadline
    pub async fn fired(&self) -> Interrupt {
        let mut receiver = self.receiver.clone();

        let cancelled = async move {
            loop {
                if *receiver.borrow_and_update() {
                    break;
                }
                if receiver.changed().await.is_err() {
                    // Sender is owned by `self`, so this only happens on teardown
                    std::future::pending::<()>().await;
                }
            }
        };

        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    _ = cancelled => Interrupt::Cancelled,
                    _ = tokio::time::sleep_until(deadline) => Interrupt::DeadlineExceeded,
                }
            }
            None => {
                cancelled.await;
                Interrupt::Cancelled
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_signal_not_interrupted() {
        assert_eq!(Cancellation::new().interrupted(), None);
    }

    #[tokio::test]
    async fn test_cancel_shared_between_clones() {
        let cancel = Cancellation::new();
        let clone = cancel.clone();

        clone.cancel();
        assert_eq!(cancel.interrupted(), Some(Interrupt::Cancelled));
        assert_eq!(cancel.fired().await, Interrupt::Cancelled);
    }

    #[tokio::test]
    async fn test_cancel_wakes_waiter() {
        let cancel = Cancellation::new();
        let waiter = cancel.clone();
        let handle = tokio::spawn(async move { waiter.fired().await });

        tokio::time::sleep(Duration::from_millis(10)).await;
        cancel.cancel();

        assert_eq!(handle.await.unwrap(), Interrupt::Cancelled);
    }

    #[tokio::test]
    async fn test_deadline_fires() {
        let cancel = Cancellation::new().with_timeout(Duration::from_millis(20));
        assert_eq!(cancel.interrupted(), None);
        assert_eq!(cancel.fired().await, Interrupt::DeadlineExceeded);
        assert_eq!(cancel.interrupted(), Some(Interrupt::DeadlineExceeded));
    }

    #[tokio::test]
    async fn test_unrepresentable_timeout_never_fires() {
        let cancel = Cancellation::new().with_timeout(Duration::MAX);
        assert_eq!(cancel.interrupted(), None);

        let fired = tokio::time::timeout(Duration::from_millis(20), cancel.fired()).await;
        assert!(fired.is_err());

        cancel.cancel();
        assert_eq!(cancel.interrupted(), Some(Interrupt::Cancelled));
    }
}
