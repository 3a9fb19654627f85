//! Per-call execution context.
//!
//! Every database operation takes an [`ExecContext`] carrying a cancellation
//! token, an optional deadline and, inside a transaction scope, the active
//! transaction handle. Contexts are cheap to clone.

use crate::db::transaction::TxHandle;
use crate::error::{DbError, DbResult};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Default)]
pub struct ExecContext {
    cancel: CancellationToken,
    deadline: Option<Instant>,
    tx: Option<TxHandle>,
}

impl ExecContext {
    /// A context with no deadline and a fresh cancellation token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bound the context by `timeout` from now. An earlier deadline wins.
    pub fn with_timeout(self, timeout: Duration) -> Self {
        let deadline = Instant::now() + timeout;
        self.with_deadline(deadline)
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(existing) => existing.min(deadline),
            None => deadline,
        });
        self
    }

    /// Replace the cancellation token.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// A context cancelled together with this one, but cancellable on its own.
    pub fn child(&self) -> Self {
        Self {
            cancel: self.cancel.child_token(),
            deadline: self.deadline,
            tx: self.tx.clone(),
        }
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// The transaction this context is bound to, if any.
    pub fn transaction(&self) -> Option<&TxHandle> {
        self.tx.as_ref()
    }

    pub(crate) fn with_transaction(mut self, tx: TxHandle) -> Self {
        self.tx = Some(tx);
        self
    }

    /// Drive `fut` to completion unless the context is cancelled or its
    /// deadline passes first.
    pub async fn run<T, F>(&self, operation: &str, fut: F) -> DbResult<T>
    where
        F: Future<Output = DbResult<T>>,
    {
        self.check(operation)?;

        let bounded = async {
            match self.deadline {
                Some(deadline) => tokio::time::timeout_at(deadline, fut)
                    .await
                    .map_err(|_| DbError::deadline_exceeded(operation))?,
                None => fut.await,
            }
        };

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(DbError::cancelled(operation)),
            result = bounded => result,
        }
    }

    /// Like [`run`](Self::run), but bounded by `fallback` when the context
    /// carries no deadline of its own.
    pub async fn run_with_fallback<T, F>(
        &self,
        operation: &str,
        fallback: Duration,
        fut: F,
    ) -> DbResult<T>
    where
        F: Future<Output = DbResult<T>>,
    {
        if self.deadline.is_some() {
            return self.run(operation, fut).await;
        }

        let bounded = async {
            tokio::time::timeout(fallback, fut).await.map_err(|_| {
                DbError::timeout(operation, u32::try_from(fallback.as_secs()).unwrap_or(u32::MAX))
            })?
        };
        self.run(operation, bounded).await
    }

    fn check(&self, operation: &str) -> DbResult<()> {
        if self.cancel.is_cancelled() {
            return Err(DbError::cancelled(operation));
        }
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                return Err(DbError::deadline_exceeded(operation));
            }
        }
        Ok(())
    }
}
