use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::domain::IndexError;

/// Cooperative cancellation and deadline for a public operation.
///
/// Checked at suspension points (file I/O, model inference, store I/O).
/// In-flight work completes its current step before observing the signal.
#[derive(Debug, Clone, Default)]
pub struct OpContext {
    cancel: CancellationToken,
    deadline: Option<Instant>,
}

impl OpContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cancel(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            deadline: None,
        }
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Returns `Cancelled` or `DeadlineExceeded` when the operation should
    /// stop, `Ok` otherwise.
    pub fn checkpoint(&self) -> Result<(), IndexError> {
        if self.cancel.is_cancelled() {
            return Err(IndexError::Cancelled);
        }
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                return Err(IndexError::DeadlineExceeded);
            }
        }
        Ok(())
    }

    /// Derive a context whose token can be cancelled independently while
    /// still observing this context's cancellation and deadline.
    pub fn child(&self) -> OpContext {
        OpContext {
            cancel: self.cancel.child_token(),
            deadline: self.deadline,
        }
    }

    /// Remaining budget until the deadline, if one is set.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_context_passes() {
        let ctx = OpContext::new();
        assert!(ctx.checkpoint().is_ok());
    }

    #[test]
    fn test_cancelled_context_fails() {
        let token = CancellationToken::new();
        let ctx = OpContext::with_cancel(token.clone());
        token.cancel();

        assert!(matches!(ctx.checkpoint(), Err(IndexError::Cancelled)));
    }

    #[test]
    fn test_expired_deadline_fails() {
        let ctx = OpContext::new().with_deadline(Instant::now() - Duration::from_secs(1));
        assert!(matches!(
            ctx.checkpoint(),
            Err(IndexError::DeadlineExceeded)
        ));
    }

    #[test]
    fn test_future_deadline_passes() {
        let ctx = OpContext::new().with_timeout(Duration::from_secs(60));
        assert!(ctx.checkpoint().is_ok());
        assert!(ctx.remaining().unwrap() > Duration::from_secs(30));
    }
}
