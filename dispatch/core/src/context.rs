//! Call Context
//!
//! Cancellation and deadline signal threaded through every suspension point
//! of a dispatch: admission waits, backend calls and retry backoff.
//!
//! A [`CallContext`] wraps a [`CancellationToken`] plus an optional absolute
//! deadline. Child contexts created with [`CallContext::with_timeout`] are
//! cancelled whenever their parent is, and never outlive the parent's
//! deadline.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Why a call stopped before completing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Interrupt {
    /// The caller cancelled the context
    #[error("call cancelled")]
    Cancelled,
    /// The context deadline passed
    #[error("deadline exceeded")]
    DeadlineExceeded,
}

/// Cancellation signal plus optional deadline for one logical call
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl CallContext {
    /// A context with no deadline that is only cancelled explicitly
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a context around an existing token (e.g. one tied to Ctrl-C)
    #[must_use]
    pub fn from_token(token: CancellationToken) -> Self {
        Self {
            token,
            deadline: None,
        }
    }

    /// Child context that expires after `timeout`, or at the parent's
    /// deadline if that comes first
    #[must_use]
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        let candidate = Instant::now() + timeout;
        let deadline = match self.deadline {
            Some(parent) if parent < candidate => parent,
            _ => candidate,
        };
        Self {
            token: self.token.child_token(),
            deadline: Some(deadline),
        }
    }

    /// Cancel this context and every child derived from it
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// The underlying token
    #[must_use]
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Absolute deadline, if any
    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Returns the interruption if the context is already done
    pub fn check(&self) -> Result<(), Interrupt> {
        if self.token.is_cancelled() {
            return Err(Interrupt::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Err(Interrupt::DeadlineExceeded),
            _ => Ok(()),
        }
    }

    /// Whether cancellation or the deadline has fired
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.check().is_err()
    }

    /// Drive `fut` to completion unless the context fires first.
    ///
    /// When the context wins, `fut` is dropped.
    pub async fn run<F>(&self, fut: F) -> Result<F::Output, Interrupt>
    where
        F: Future,
    {
        self.check()?;
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    biased;
                    () = self.token.cancelled() => Err(Interrupt::Cancelled),
                    () = tokio::time::sleep_until(deadline) => Err(Interrupt::DeadlineExceeded),
                    out = fut => Ok(out),
                }
            }
            None => {
                tokio::select! {
                    biased;
                    () = self.token.cancelled() => Err(Interrupt::Cancelled),
                    out = fut => Ok(out),
                }
            }
        }
    }

    /// Sleep for `duration`, waking early on interruption
    pub async fn sleep(&self, duration: Duration) -> Result<(), Interrupt> {
        self.run(tokio::time::sleep(duration)).await
    }
}
