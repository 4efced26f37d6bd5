//! Request-scoped deadline and cancellation
//!
//! Every resource operation receives a [`Context`]. Long-running work such as
//! API calls should go through [`Context::run`] so that an expired deadline
//! or an explicit cancel stops it.

use crate::error::{Result, TfplugError};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::time;

#[derive(Clone)]
pub struct Context {
    inner: Arc<ContextInner>,
}

struct ContextInner {
    deadline: Option<Instant>,
    cancel_tx: watch::Sender<bool>,
}

impl Context {
    pub fn new() -> Self {
        let (cancel_tx, _) = watch::channel(false);
        Self {
            inner: Arc::new(ContextInner {
                deadline: None,
                cancel_tx,
            }),
        }
    }

    /// Derives a context that is cancelled once `timeout` elapses.
    /// Must be called from within a tokio runtime.
    pub fn with_timeout(self, timeout: Duration) -> Self {
        let deadline = Instant::now() + timeout;
        let (cancel_tx, _) = watch::channel(self.is_cancelled());

        let timer_tx = cancel_tx.clone();
        let mut parent = self.inner.cancel_tx.subscribe();
        tokio::spawn(async move {
            let parent_cancelled = async {
                // A dropped parent can no longer be cancelled
                if parent.wait_for(|cancelled| *cancelled).await.is_err() {
                    std::future::pending::<()>().await;
                }
            };
            tokio::select! {
                _ = time::sleep_until(deadline.into()) => {}
                _ = parent_cancelled => {}
            }
            timer_tx.send_replace(true);
        });

        Self {
            inner: Arc::new(ContextInner {
                deadline: Some(deadline),
                cancel_tx,
            }),
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.inner.deadline
    }

    pub fn is_cancelled(&self) -> bool {
        *self.inner.cancel_tx.borrow()
    }

    pub fn cancel(&self) {
        self.inner.cancel_tx.send_replace(true);
    }

    /// Resolves once the context is cancelled
    pub async fn cancelled(&self) {
        let mut rx = self.inner.cancel_tx.subscribe();
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }

    /// Drives `future` to completion unless the context is cancelled first
    pub async fn run<F>(&self, future: F) -> Result<F::Output>
    where
        F: Future,
    {
        if self.is_cancelled() {
            return Err(TfplugError::Cancelled);
        }
        tokio::select! {
            output = future => Ok(output),
            _ = self.cancelled() => Err(TfplugError::Cancelled),
        }
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}
