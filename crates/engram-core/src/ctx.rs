//! Operation context - cancellation and deadlines
//!
//! Long-running operations check the context only at component boundaries
//! (before embedding, before acquiring write locks, between fan-out legs).
//! The commit phase never checks: once the transaction record is durable the
//! operation runs to completion so the unified-identity invariant holds.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use crate::error::{EngramError, Result};

/// Shared cancellation flag
///
/// Clone freely; all clones observe the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    /// Create a token in the not-cancelled state
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// True once `cancel()` has been called
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Per-operation context carrying an optional cancel token and deadline
#[derive(Debug, Clone, Default)]
pub struct OpContext {
    token: Option<CancelToken>,
    deadline: Option<Instant>,
}

impl OpContext {
    /// Context with neither cancellation nor deadline
    pub fn none() -> Self {
        Self::default()
    }

    /// Context observing the given cancel token
    pub fn with_token(token: CancelToken) -> Self {
        Self {
            token: Some(token),
            deadline: None,
        }
    }

    /// Context that expires at `deadline`
    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            token: None,
            deadline: Some(deadline),
        }
    }

    /// Attach a deadline to an existing context
    pub fn deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Attach a cancel token to an existing context
    pub fn token(mut self, token: CancelToken) -> Self {
        self.token = Some(token);
        self
    }

    /// Check for cancellation and deadline expiry
    ///
    /// Cancellation wins over timeout when both apply.
    pub fn check(&self) -> Result<()> {
        if let Some(token) = &self.token {
            if token.is_cancelled() {
                return Err(EngramError::Cancelled);
            }
        }
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                return Err(EngramError::Timeout);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_default_context_never_fails() {
        assert!(OpContext::none().check().is_ok());
    }

    #[test]
    fn test_cancelled_token_surfaces_cancelled() {
        let token = CancelToken::new();
        let ctx = OpContext::with_token(token.clone());
        assert!(ctx.check().is_ok());

        token.cancel();
        assert!(matches!(ctx.check(), Err(EngramError::Cancelled)));
    }

    #[test]
    fn test_expired_deadline_surfaces_timeout() {
        let ctx = OpContext::with_deadline(Instant::now() - Duration::from_millis(1));
        assert!(matches!(ctx.check(), Err(EngramError::Timeout)));
    }

    #[test]
    fn test_cancellation_wins_over_timeout() {
        let token = CancelToken::new();
        token.cancel();
        let ctx =
            OpContext::with_token(token).deadline(Instant::now() - Duration::from_millis(1));
        assert!(matches!(ctx.check(), Err(EngramError::Cancelled)));
    }
}
