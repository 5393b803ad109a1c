//! Structured-concurrency scope: a cancellation token plus a joinable set
//! of child tasks.
//!
//! A `Supervisor` owns one generation of tasks. Cancellation is a broadcast
//! to every child; `wait` drains all of them and reports the first real
//! failure. A child that stops because it was asked to must return `Ok`,
//! so cancellation never surfaces as an error.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinSet;

use crate::error::{Error, Result};

/// Shared cancellation signal with an awaitable edge.
#[derive(Clone)]
pub struct CancelToken {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelToken {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Signal cancellation. Idempotent.
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once cancellation has been signalled.
    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        loop {
            if *rx.borrow() {
                return;
            }
            // The sender lives in self, so changed() cannot fail while we
            // are polling here.
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

/// A cancellable group of tasks sharing one fate.
pub struct Supervisor {
    cancel: CancelToken,
    tasks: JoinSet<Result<()>>,
}

impl Supervisor {
    pub fn new() -> Self {
        Self::with_token(CancelToken::new())
    }

    /// Build a scope on an externally-owned token, so an ancestor can
    /// cancel this scope directly.
    pub fn with_token(cancel: CancelToken) -> Self {
        Self {
            cancel,
            tasks: JoinSet::new(),
        }
    }

    /// The token children should select on for cooperative shutdown.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Fork a child task into this scope.
    pub fn spawn<F>(&mut self, fut: F)
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        self.tasks.spawn(fut);
    }

    /// Signal every child to stop at its next safe point.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Join one child, flattening panics into `Error::TaskPanic`.
    /// Returns `None` once every child has been joined.
    pub async fn join_next(&mut self) -> Option<Result<()>> {
        match self.tasks.join_next().await? {
            Ok(res) => Some(res),
            Err(e) if e.is_panic() => Some(Err(Error::TaskPanic(e.to_string()))),
            Err(_) => Some(Ok(())),
        }
    }

    /// Block until every child has exited; the first failure cancels the
    /// remaining children and is returned.
    pub async fn wait(&mut self) -> Result<()> {
        let mut first: Option<Error> = None;
        while let Some(res) = self.join_next().await {
            if let Err(e) = res {
                self.cancel.cancel();
                first.get_or_insert(e);
            }
        }
        match first {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Cancel, then wait for full drain.
    pub async fn shutdown(&mut self) -> Result<()> {
        self.cancel();
        self.wait().await
    }
}

impl Default for Supervisor {
    fn default() -> Self {
        Self::new()
    }
}
