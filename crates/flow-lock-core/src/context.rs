//! Cancellation context passed through every blocking lock call.

use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;

use crate::error::ContextError;

/// Carries a cancellation signal and an optional deadline.
///
/// Contexts are cheap to clone; clones observe the same cancellation signal.
///
/// # Example
///
/// ```rust,ignore
/// let (ctx, cancel) = LockContext::with_cancel();
/// let ctx = ctx.with_timeout(Duration::from_secs(2));
///
/// tokio::spawn(async move {
///     shutdown_signal().await;
///     cancel.cancel();
/// });
///
/// let handle = manager.acquire(&ctx, "report", Duration::ZERO).await?;
/// ```
#[derive(Debug, Clone, Default)]
pub struct LockContext {
    cancel: Option<watch::Receiver<bool>>,
    deadline: Option<Instant>,
}

/// Cancels every context created from the same [`LockContext::with_cancel`] call.
#[derive(Debug)]
pub struct CancelHandle {
    sender: watch::Sender<bool>,
}

impl CancelHandle {
    /// Signals cancellation. Calling it more than once has no further effect.
    pub fn cancel(&self) {
        self.sender.send_replace(true);
    }
}

impl LockContext {
    /// A context that is never cancelled and has no deadline.
    pub fn background() -> Self {
        Self::default()
    }

    /// Creates a cancellable context and the handle that cancels it.
    pub fn with_cancel() -> (Self, CancelHandle) {
        let (sender, receiver) = watch::channel(false);
        let ctx = Self {
            cancel: Some(receiver),
            deadline: None,
        };
        (ctx, CancelHandle { sender })
    }

    /// Wraps an existing cancellation watch; `true` means cancelled.
    pub fn from_receiver(receiver: watch::Receiver<bool>) -> Self {
        Self {
            cancel: Some(receiver),
            deadline: None,
        }
    }

    /// Returns a copy whose deadline is at most `timeout` from now.
    ///
    /// A timeout too large to represent leaves the deadline unchanged.
    pub fn with_timeout(self, timeout: Duration) -> Self {
        match Instant::now().checked_add(timeout) {
            Some(deadline) => self.with_deadline(deadline),
            None => self,
        }
    }

    /// Returns a copy whose deadline is at most `deadline`.
    ///
    /// An earlier existing deadline is kept.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(existing) => existing.min(deadline),
            None => deadline,
        });
        self
    }

    /// The deadline, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the deadline. `None` means unbounded.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    /// Reports why the context is done, or `None` while it is still live.
    pub fn err(&self) -> Option<ContextError> {
        if let Some(cancel) = &self.cancel
            && *cancel.borrow()
        {
            return Some(ContextError::Canceled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(ContextError::DeadlineExceeded),
            _ => None,
        }
    }

    /// Resolves once the context is cancelled or its deadline passes.
    ///
    /// Never resolves for a background context.
    pub async fn done(&self) -> ContextError {
        let cancelled = async {
            if let Some(cancel) = &self.cancel {
                let mut cancel = cancel.clone();
                if cancel.wait_for(|cancelled| *cancelled).await.is_ok() {
                    return;
                }
            }
            // Sender dropped without cancelling: this context can no longer be cancelled.
            std::future::pending::<()>().await
        };
        let expired = async {
            match self.deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            _ = cancelled => ContextError::Canceled,
            _ = expired => ContextError::DeadlineExceeded,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_background_is_live() {
        let ctx = LockContext::background();
        assert!(ctx.err().is_none());
        assert!(ctx.remaining().is_none());
    }

    #[tokio::test]
    async fn test_cancel_is_observed_by_clones() {
        let (ctx, cancel) = LockContext::with_cancel();
        let clone = ctx.clone();
        cancel.cancel();
        assert_eq!(ctx.err(), Some(ContextError::Canceled));
        assert_eq!(clone.done().await, ContextError::Canceled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_expires() {
        let ctx = LockContext::background().with_timeout(Duration::from_millis(100));
        assert!(ctx.err().is_none());
        assert_eq!(ctx.done().await, ContextError::DeadlineExceeded);
        assert_eq!(ctx.err(), Some(ContextError::DeadlineExceeded));
    }

    #[tokio::test]
    async fn test_unrepresentable_timeout_leaves_no_deadline() {
        let ctx = LockContext::background().with_timeout(Duration::MAX);
        assert!(ctx.deadline().is_none());
        assert!(ctx.err().is_none());

        let bounded = LockContext::background()
            .with_timeout(Duration::from_secs(1))
            .with_timeout(Duration::MAX);
        assert!(bounded.deadline().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_earlier_deadline_wins() {
        let now = Instant::now();
        let ctx = LockContext::background()
            .with_deadline(now + Duration::from_millis(50))
            .with_deadline(now + Duration::from_millis(500));
        assert_eq!(ctx.deadline(), Some(now + Duration::from_millis(50)));
    }

    #[tokio::test]
    async fn test_cancel_takes_priority_over_deadline() {
        let (ctx, cancel) = LockContext::with_cancel();
        let ctx = ctx.with_timeout(Duration::ZERO);
        cancel.cancel();
        assert_eq!(ctx.err(), Some(ContextError::Canceled));
    }
}
