//! # Backend Adapter
//!
//! A [`Backend`] turns a function call into a [`TaskHandle`]: `submit`
//! schedules work on the backend's own workers, `scatter` moves a plain
//! value onto the backend, and `gather` resolves handles back into concrete
//! values. Backends are configuration values passed explicitly to `scatter`;
//! there is no process-wide default, and feeding one node from upstreams
//! tagged with two different backends is a configuration error caught at
//! wiring time.
//!
//! Two contract obligations make pipelines composable:
//!
//! - `submit` resolves future-typed arguments (recursively through tuple
//!   values) before invoking the function, so a stage can pass an earlier
//!   stage's handle as an ordinary argument.
//! - if any resolved top-level argument is the suppress sentinel, the
//!   function is skipped and the task resolves to the sentinel, letting
//!   asynchronous filters drop values without breaking the stages behind
//!   them.
//!
//! [`ThreadPoolBackend`] is the in-process implementation: a fixed set of
//! worker threads consuming a job queue, decoupled from the event loop.

use crate::error::{BackendError, BoxError};
use crate::task::{TaskHandle, TaskResult, resolve_value};
use crate::value::{Value, is_suppressed, suppressed};
use async_trait::async_trait;
use std::sync::mpsc::{Receiver, Sender, channel};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use tokio::sync::oneshot;
use tracing::{debug, trace, warn};

/// Function executed on backend workers.
pub type TaskFn = Arc<dyn Fn(&[Value]) -> Result<Value, BoxError> + Send + Sync>;

/// Pluggable executor behind the submit/scatter/gather contract.
#[async_trait]
pub trait Backend: Send + Sync {
  /// Short label used in configuration errors and tracing.
  fn name(&self) -> &str;

  /// Schedules `func(args)` on the backend.
  ///
  /// Arguments holding task handles are resolved to their results before
  /// `func` runs; if any resolved top-level argument is the suppress
  /// sentinel, `func` is skipped and the task yields the sentinel.
  fn submit(&self, func: TaskFn, args: Vec<Value>) -> TaskHandle;

  /// Moves a plain value onto the backend.
  fn scatter(&self, value: Value) -> TaskHandle {
    let identity: TaskFn = Arc::new(|args: &[Value]| {
      args
        .first()
        .cloned()
        .ok_or_else(|| BoxError::from("scatter received no value"))
    });
    self.submit(identity, vec![value])
  }

  /// Resolves task handles inside `value`, recursively through tuple
  /// values, preserving tuple structure.
  async fn gather(&self, value: Value) -> Result<Value, BackendError> {
    resolve_value(value).await
  }
}

/// Configuration for [`ThreadPoolBackend`].
#[derive(Debug, Clone)]
pub struct ThreadPoolConfig {
  /// Number of worker threads.
  pub workers: usize,
  /// Prefix for worker thread names.
  pub thread_name: String,
}

impl Default for ThreadPoolConfig {
  fn default() -> Self {
    ThreadPoolConfig {
      workers: thread::available_parallelism().map_or(2, usize::from),
      thread_name: "pulseweave-worker".to_string(),
    }
  }
}

type Job = Box<dyn FnOnce() + Send + 'static>;

/// In-process worker pool backend.
///
/// Workers are plain OS threads consuming a shared job queue. They exit
/// when the backend is dropped and the queue closes. Argument resolution
/// runs on the worker itself, so a task whose arguments are still pending
/// occupies its worker until the upstream task finishes; jobs are queued in
/// submission order, which matches dataflow order, so chains never wait on
/// work queued behind them.
pub struct ThreadPoolBackend {
  sender: Sender<Job>,
  label: String,
}

impl ThreadPoolBackend {
  /// Starts the worker threads.
  pub fn new(config: ThreadPoolConfig) -> Self {
    let (sender, receiver) = channel::<Job>();
    let receiver = Arc::new(Mutex::new(receiver));
    let workers = config.workers.max(1);
    for index in 0..workers {
      let receiver = Arc::clone(&receiver);
      let builder = thread::Builder::new().name(format!("{}-{index}", config.thread_name));
      if let Err(error) = builder.spawn(move || worker_loop(&receiver)) {
        warn!(%error, index, "failed to spawn worker thread");
      }
    }
    debug!(workers, "thread pool backend started");
    ThreadPoolBackend {
      sender,
      label: config.thread_name,
    }
  }

  /// A pool with the given number of workers and default naming.
  pub fn with_workers(workers: usize) -> Self {
    ThreadPoolBackend::new(ThreadPoolConfig {
      workers,
      ..ThreadPoolConfig::default()
    })
  }
}

impl Default for ThreadPoolBackend {
  fn default() -> Self {
    ThreadPoolBackend::new(ThreadPoolConfig::default())
  }
}

fn worker_loop(receiver: &Mutex<Receiver<Job>>) {
  loop {
    let job = {
      let guard = receiver.lock().unwrap_or_else(PoisonError::into_inner);
      guard.recv()
    };
    match job {
      Ok(job) => job(),
      Err(_) => break,
    }
  }
  trace!("worker exiting, job queue closed");
}

fn run_task(func: &TaskFn, args: Vec<Value>) -> TaskResult {
  let mut resolved = Vec::with_capacity(args.len());
  for arg in args {
    resolved.push(futures::executor::block_on(resolve_value(arg))?);
  }
  if resolved.iter().any(is_suppressed) {
    trace!("skipping task, argument was suppressed");
    return Ok(suppressed());
  }
  func(&resolved).map_err(BackendError::new)
}

#[async_trait]
impl Backend for ThreadPoolBackend {
  fn name(&self) -> &str {
    &self.label
  }

  fn submit(&self, func: TaskFn, args: Vec<Value>) -> TaskHandle {
    let (done_tx, done_rx) = oneshot::channel::<TaskResult>();
    let job: Job = Box::new(move || {
      let result = run_task(&func, args);
      if done_tx.send(result).is_err() {
        trace!("task finished with no handle waiting");
      }
    });
    if self.sender.send(job).is_err() {
      return TaskHandle::ready(Err(BackendError::message("worker pool is shut down")));
    }
    TaskHandle::new(async move {
      done_rx
        .await
        .map_err(|_| BackendError::message("worker exited before reporting a result"))?
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::value::{extract, tuple, value};

  fn pool() -> ThreadPoolBackend {
    ThreadPoolBackend::with_workers(2)
  }

  fn increment() -> TaskFn {
    Arc::new(|args: &[Value]| {
      let n = extract::<i64>(&args[0]).ok_or("expected an i64")?;
      Ok(value(n + 1))
    })
  }

  #[tokio::test]
  async fn submit_runs_on_workers() {
    let backend = pool();
    let handle = backend.submit(increment(), vec![value(41_i64)]);
    assert_eq!(extract::<i64>(&handle.await.unwrap()), Some(42));
  }

  #[tokio::test]
  async fn submitted_arguments_resolve_transparently() {
    let backend = pool();
    let first = backend.submit(increment(), vec![value(1_i64)]);
    let second = backend.submit(increment(), vec![value(first)]);
    assert_eq!(extract::<i64>(&second.await.unwrap()), Some(3));
  }

  #[tokio::test]
  async fn scatter_then_gather_round_trips() {
    let backend = pool();
    let scattered = backend.scatter(value(9_i64));
    let gathered = backend.gather(value(scattered)).await.unwrap();
    assert_eq!(extract::<i64>(&gathered), Some(9));
  }

  #[tokio::test]
  async fn gather_preserves_tuple_shape() {
    let backend = pool();
    let pair = tuple(vec![
      value(backend.scatter(value(1_i64))),
      value(backend.scatter(value(2_i64))),
    ]);
    let gathered = backend.gather(pair).await.unwrap();
    let items = crate::value::as_tuple(&gathered).unwrap();
    assert_eq!(extract::<i64>(&items[0]), Some(1));
    assert_eq!(extract::<i64>(&items[1]), Some(2));
  }

  #[tokio::test]
  async fn suppressed_arguments_skip_the_function() {
    let backend = pool();
    let handle = backend.submit(increment(), vec![suppressed()]);
    assert!(is_suppressed(&handle.await.unwrap()));
  }

  #[tokio::test]
  async fn task_errors_surface_at_resolution() {
    let backend = pool();
    let failing: TaskFn = Arc::new(|_args| Err(BoxError::from("no good")));
    let handle = backend.submit(failing, vec![value(0_i64)]);
    let error = handle.await.unwrap_err();
    assert!(error.to_string().contains("no good"));
  }
}
