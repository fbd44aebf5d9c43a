//! Per-call cancellation and deadline.
//!
//! A [`CallContext`] is handed to every blocking connection operation. Each
//! operation races its I/O against [`CallContext::done`], so an explicit
//! cancel surfaces as `canceled` and an expired deadline as
//! `deadline_exceeded`.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::select_all;
use tokio::sync::watch;
use tokio::time::Instant;

use crate::error::ConnectError;

/// Deadline and cancellation signals for one call.
///
/// Cloning is cheap; clones observe the same signals.
#[derive(Clone, Debug, Default)]
pub struct CallContext {
    deadline: Option<Instant>,
    cancel: Vec<watch::Receiver<bool>>,
}

/// Cancels the [`CallContext`] it was created with, and every context derived from it.
///
/// Dropping the handle does not cancel.
#[derive(Clone, Debug)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_canceled(&self) -> bool {
        *self.tx.borrow()
    }
}

impl CallContext {
    /// A context that is never canceled and has no deadline.
    pub fn background() -> Self {
        Self::default()
    }

    /// Derive a context whose deadline is at most `timeout` from now.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Derive a context with a deadline no later than `deadline`.
    pub fn with_deadline(&self, deadline: Instant) -> Self {
        let mut ctx = self.clone();
        ctx.deadline = Some(match self.deadline {
            Some(existing) => existing.min(deadline),
            None => deadline,
        });
        ctx
    }

    /// Derive a cancelable context.
    pub fn with_cancel(&self) -> (Self, CancelHandle) {
        let (tx, rx) = watch::channel(false);
        let mut ctx = self.clone();
        ctx.cancel.push(rx);
        (ctx, CancelHandle { tx: Arc::new(tx) })
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the deadline, `None` when there is none.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// The error this context has already fired with, if any.
    pub fn err(&self) -> Option<ConnectError> {
        if self.cancel.iter().any(|rx| *rx.borrow()) {
            return Some(canceled());
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(deadline_exceeded()),
            _ => None,
        }
    }

    /// Resolve once the context is canceled or its deadline passes.
    pub async fn done(&self) -> ConnectError {
        if let Some(err) = self.err() {
            return err;
        }
        let deadline = async {
            match self.deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending().await,
            }
        };
        let cancel = async {
            if self.cancel.is_empty() {
                return std::future::pending().await;
            }
            let waits = self.cancel.iter().cloned().map(|rx| Box::pin(wait_canceled(rx)));
            select_all(waits).await;
        };
        tokio::select! {
            biased;
            _ = cancel => canceled(),
            _ = deadline => deadline_exceeded(),
        }
    }

    /// Run `fut` unless the context fires first.
    ///
    /// A context that has already fired wins without polling `fut`.
    pub async fn run<F>(&self, fut: F) -> Result<F::Output, ConnectError>
    where
        F: Future,
    {
        tokio::select! {
            biased;
            err = self.done() => Err(err),
            out = fut => Ok(out),
        }
    }
}

async fn wait_canceled(mut rx: watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            // Handle dropped without canceling.
            std::future::pending::<()>().await;
        }
    }
}

fn canceled() -> ConnectError {
    ConnectError::canceled("context canceled")
}

fn deadline_exceeded() -> ConnectError {
    ConnectError::deadline_exceeded("context deadline exceeded")
}
