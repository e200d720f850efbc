use crate::store::StoreError;

use tokio_util::sync::CancellationToken;

use std::future::Future;
use std::time::{Duration, Instant};

/// Cancellation signal and optional deadline for a single reconcile invocation. Every store
/// operation takes a `Context`, and aborts with `StoreError::Cancelled` or
/// `StoreError::DeadlineExceeded` as soon as either one fires.
#[derive(Debug, Clone)]
pub struct Context {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl Default for Context {
    fn default() -> Context {
        Context::background()
    }
}

impl Context {
    /// A context that is never cancelled and has no deadline
    pub fn background() -> Context {
        Context::new(CancellationToken::new())
    }

    pub fn new(token: CancellationToken) -> Context {
        Context {
            token,
            deadline: None,
        }
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Context {
        self.deadline = Some(match self.deadline {
            Some(existing) => existing.min(deadline),
            None => deadline,
        });
        self
    }

    pub fn with_timeout(self, timeout: Duration) -> Context {
        self.with_deadline(Instant::now() + timeout)
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Returns an error if the context has already been cancelled or its deadline has passed
    pub fn check(&self) -> Result<(), StoreError> {
        if self.token.is_cancelled() {
            Err(StoreError::Cancelled)
        } else if self.deadline.map(|d| Instant::now() >= d).unwrap_or(false) {
            Err(StoreError::DeadlineExceeded)
        } else {
            Ok(())
        }
    }

    /// Runs the given store operation to completion, unless the context is cancelled or the
    /// deadline passes first, in which case the operation is dropped.
    pub async fn run<T, F>(&self, operation: F) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        self.check()?;
        let deadline = self.deadline;
        let expired = async move {
            match deadline {
                Some(d) => tokio::time::sleep_until(tokio::time::Instant::from_std(d)).await,
                None => futures_util::future::pending::<()>().await,
            }
        };
        tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(StoreError::Cancelled),
            _ = expired => Err(StoreError::DeadlineExceeded),
            result = operation => result,
        }
    }
}
