//! # Task Handles
//!
//! A [`TaskHandle`] is the future half of the backend contract: backend
//! `submit` and `scatter` hand one back immediately, and the handle then
//! travels through the graph as an ordinary [`Value`]. Handles are
//! cloneable shared futures, so the same result can be awaited by a gather
//! stage, resolved as a later stage's argument, and peeked at by tests, all
//! without re-running the work.

use crate::error::BackendError;
use crate::value::{Value, as_tuple, downcast, tuple};
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use pin_project::pin_project;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

/// Result of one backend task.
pub type TaskResult = Result<Value, BackendError>;

/// Cloneable handle to asynchronous backend work.
#[pin_project]
#[derive(Clone)]
pub struct TaskHandle {
  #[pin]
  inner: Shared<BoxFuture<'static, TaskResult>>,
}

impl TaskHandle {
  /// Wraps a future as a shared handle.
  pub fn new<F>(future: F) -> Self
  where
    F: Future<Output = TaskResult> + Send + 'static,
  {
    TaskHandle {
      inner: future.boxed().shared(),
    }
  }

  /// A handle that is already resolved.
  pub fn ready(result: TaskResult) -> Self {
    TaskHandle::new(std::future::ready(result))
  }

  /// Non-blocking peek at the result, if the task already finished.
  pub fn peek(&self) -> Option<TaskResult> {
    self.inner.peek().cloned()
  }
}

impl Future for TaskHandle {
  type Output = TaskResult;

  fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
    self.project().inner.poll(cx)
  }
}

impl fmt::Debug for TaskHandle {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("TaskHandle")
      .field("resolved", &self.inner.peek().is_some())
      .finish()
  }
}

/// Resolves a value to its concrete form: task handles are awaited, tuple
/// values are resolved element-wise (recursively, rebuilding the tuple),
/// and anything else passes through unchanged.
///
/// This single routine backs both halves of the backend contract that deal
/// in futures: `submit`'s transparent argument resolution and `gather`.
pub fn resolve_value(value: Value) -> BoxFuture<'static, TaskResult> {
  async move {
    if let Some(handle) = downcast::<TaskHandle>(&value) {
      return handle.clone().await;
    }
    if let Some(items) = as_tuple(&value) {
      let pending: Vec<_> = items.iter().cloned().map(resolve_value).collect();
      let mut resolved = Vec::with_capacity(pending.len());
      for item in pending {
        resolved.push(item.await?);
      }
      return Ok(tuple(resolved));
    }
    Ok(value)
  }
  .boxed()
}
