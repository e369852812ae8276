//! # Execution Bridge
//!
//! An [`EventLoop`] is a dedicated thread driving a graph's asynchronous
//! work: a current-thread runtime consuming a queue of scheduled futures,
//! each spawned so branches interleave cooperatively. Graphs bind to at
//! most one loop; independent graphs get independent loops.
//!
//! The loop exposes two entry points. [`EventLoop::schedule`] queues raw
//! work and hands back an awaitable [`ScheduledTask`]. [`EventLoop::run_sync`]
//! is the blocking bridge: it schedules the work, parks the *calling*
//! thread on a channel (optionally with a deadline), and re-raises whatever
//! the work produced, so a plain thread can push a value into a loop-bound
//! graph and observe the complete traversal. Calling `run_sync` from the
//! loop's own thread would deadlock the loop against itself, so it fails
//! immediately with [`FlowError::Reentrant`].
//!
//! Bridged work runs inside a task-scoped async-context marker. Nested
//! emissions issued from within that work see the marker and drive
//! propagation directly instead of bridging again. Work queued through
//! `schedule` deliberately does not set the marker: it is the moral
//! equivalent of a bare loop callback, and an emit from there gets the
//! reentrancy error.

use crate::error::FlowError;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{RecvTimeoutError, sync_channel};
use std::task::{Context, Poll};
use std::thread::{self, ThreadId};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, warn};

tokio::task_local! {
  static ASYNC_CONTEXT: bool;
}

/// True while executing loop-driven asynchronous work, i.e. inside a
/// bridged emission or a propagation branch it spawned.
pub(crate) fn in_async_context() -> bool {
  ASYNC_CONTEXT.try_with(|flag| *flag).unwrap_or(false)
}

/// Wraps a future so it runs with the async-context marker set.
pub(crate) fn with_async_marker<F>(future: F) -> impl Future<Output = F::Output>
where
  F: Future,
{
  ASYNC_CONTEXT.scope(true, future)
}

type LoopTask = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Dedicated scheduling thread for a graph's asynchronous work.
///
/// Dropping the last handle closes the queue; the thread finishes the
/// work it already dequeued and exits.
pub struct EventLoop {
  sender: mpsc::UnboundedSender<LoopTask>,
  thread_id: ThreadId,
  alive: Arc<AtomicBool>,
}

impl EventLoop {
  /// Starts a loop thread with the default name.
  pub fn new() -> Result<Arc<Self>, FlowError> {
    EventLoop::named("pulseweave-loop")
  }

  /// Starts a loop thread with the given name.
  pub fn named(name: &str) -> Result<Arc<Self>, FlowError> {
    let (sender, mut receiver) = mpsc::unbounded_channel::<LoopTask>();
    let alive = Arc::new(AtomicBool::new(true));
    let alive_flag = Arc::clone(&alive);
    let handle = thread::Builder::new()
      .name(name.to_string())
      .spawn(move || {
        scopeguard::defer! {
          alive_flag.store(false, Ordering::SeqCst);
        }
        let runtime = match tokio::runtime::Builder::new_current_thread()
          .enable_all()
          .build()
        {
          Ok(runtime) => runtime,
          Err(build_error) => {
            error!(%build_error, "could not build the loop runtime");
            return;
          }
        };
        runtime.block_on(async move {
          while let Some(task) = receiver.recv().await {
            tokio::spawn(task);
          }
        });
        debug!("event loop drained, shutting down");
      })
      .map_err(|spawn_error| {
        FlowError::Configuration(format!("could not start event loop thread: {spawn_error}"))
      })?;
    debug!(thread = ?handle.thread().id(), "event loop started");
    Ok(Arc::new(EventLoop {
      sender,
      thread_id: handle.thread().id(),
      alive,
    }))
  }

  /// True if the current thread is the loop's own thread.
  pub fn on_loop_thread(&self) -> bool {
    thread::current().id() == self.thread_id
  }

  /// True until the loop thread exits.
  pub fn is_alive(&self) -> bool {
    self.alive.load(Ordering::SeqCst)
  }

  /// Queues raw work on the loop.
  ///
  /// The async-context marker is not set for it, so an `emit` into a
  /// loop-bound graph from inside this work takes the bridge path and
  /// fails with [`FlowError::Reentrant`].
  pub fn schedule<F, T>(&self, work: F) -> ScheduledTask<T>
  where
    F: Future<Output = T> + Send + 'static,
    T: Send + 'static,
  {
    let (done_tx, done_rx) = oneshot::channel::<T>();
    let task: LoopTask = Box::pin(async move {
      let outcome = work.await;
      if done_tx.send(outcome).is_err() {
        warn!("scheduled work finished after its handle was dropped");
      }
    });
    if self.sender.send(task).is_err() {
      warn!("scheduled work rejected, event loop is shut down");
    }
    ScheduledTask { receiver: done_rx }
  }

  /// Queues propagation work with the async-context marker set, so nested
  /// emissions from inside it skip the bridge. Fire and forget.
  pub(crate) fn spawn_traversal<F>(&self, work: F)
  where
    F: Future<Output = ()> + Send + 'static,
  {
    let task: LoopTask = Box::pin(ASYNC_CONTEXT.scope(true, work));
    if self.sender.send(task).is_err() {
      warn!("traversal dropped, event loop is shut down");
    }
  }

  /// The blocking bridge.
  ///
  /// Schedules `work` on the loop and blocks the calling thread until it
  /// completes, returning its result or re-raising its error. With a
  /// `timeout`, a deadline overrun raises [`FlowError::Timeout`] and the
  /// pending work is abandoned, not cancelled; if it later completes, a
  /// warning event is emitted and its result is discarded.
  ///
  /// # Errors
  ///
  /// [`FlowError::Reentrant`] when called from the loop's own thread, and
  /// [`FlowError::Configuration`] when the loop has shut down.
  pub fn run_sync<F, T>(&self, work: F, timeout: Option<Duration>) -> Result<T, FlowError>
  where
    F: Future<Output = Result<T, FlowError>> + Send + 'static,
    T: Send + 'static,
  {
    if self.on_loop_thread() {
      return Err(FlowError::Reentrant);
    }
    if !self.is_alive() {
      return Err(FlowError::Configuration("event loop is shut down".into()));
    }
    let (done_tx, done_rx) = sync_channel::<Result<T, FlowError>>(1);
    let task: LoopTask = Box::pin(ASYNC_CONTEXT.scope(true, async move {
      let outcome = work.await;
      if done_tx.send(outcome).is_err() {
        warn!("bridged work finished after its caller stopped waiting");
      }
    }));
    self
      .sender
      .send(task)
      .map_err(|_| FlowError::Configuration("event loop is shut down".into()))?;
    match timeout {
      Some(limit) => done_rx.recv_timeout(limit).map_err(|recv_error| match recv_error {
        RecvTimeoutError::Timeout => FlowError::Timeout(limit),
        RecvTimeoutError::Disconnected => {
          FlowError::Configuration("event loop dropped bridged work".into())
        }
      })?,
      None => done_rx
        .recv()
        .map_err(|_| FlowError::Configuration("event loop dropped bridged work".into()))?,
    }
  }
}

impl std::fmt::Debug for EventLoop {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("EventLoop")
      .field("thread", &self.thread_id)
      .field("alive", &self.is_alive())
      .finish()
  }
}

/// Handle to work queued via [`EventLoop::schedule`].
///
/// Await it from async code, or [`ScheduledTask::join`] it from a plain
/// thread.
pub struct ScheduledTask<T> {
  receiver: oneshot::Receiver<T>,
}

impl<T> ScheduledTask<T> {
  /// Blocks until the scheduled work completes.
  pub fn join(self) -> Result<T, FlowError> {
    self
      .receiver
      .blocking_recv()
      .map_err(|_| FlowError::Configuration("scheduled work was dropped before completing".into()))
  }
}

impl<T> Future for ScheduledTask<T> {
  type Output = Result<T, FlowError>;

  fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
    Pin::new(&mut self.receiver).poll(cx).map(|ready| {
      ready.map_err(|_| {
        FlowError::Configuration("scheduled work was dropped before completing".into())
      })
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn bridged_work_returns_its_value() {
    let event_loop = EventLoop::new().unwrap();
    let result: i64 = event_loop.run_sync(async { Ok(21 * 2) }, None).unwrap();
    assert_eq!(result, 42);
  }

  #[test]
  fn bridged_errors_reach_the_caller() {
    let event_loop = EventLoop::new().unwrap();
    let outcome: Result<(), FlowError> = event_loop.run_sync(
      async { Err(FlowError::Configuration("synthetic".into())) },
      None,
    );
    assert!(matches!(outcome, Err(FlowError::Configuration(message)) if message == "synthetic"));
  }

  #[test]
  fn bridge_times_out_and_loop_survives() {
    let event_loop = EventLoop::new().unwrap();
    let outcome: Result<(), FlowError> = event_loop.run_sync(
      async {
        tokio::time::sleep(Duration::from_secs(60)).await;
        Ok(())
      },
      Some(Duration::from_millis(20)),
    );
    assert!(matches!(outcome, Err(FlowError::Timeout(_))));
    // the loop is still serving work after the abandonment
    let answer: i64 = event_loop.run_sync(async { Ok(7) }, None).unwrap();
    assert_eq!(answer, 7);
  }

  #[test]
  fn bridging_from_the_loop_thread_is_reentrant() {
    let event_loop = EventLoop::new().unwrap();
    let inner = Arc::clone(&event_loop);
    let verdict = event_loop
      .schedule(async move { inner.run_sync(async { Ok(0_i64) }, None) })
      .join()
      .unwrap();
    assert!(matches!(verdict, Err(FlowError::Reentrant)));
  }

  #[test]
  fn scheduled_work_joins_from_plain_threads() {
    let event_loop = EventLoop::new().unwrap();
    let task = event_loop.schedule(async { "done" });
    assert_eq!(task.join().unwrap(), "done");
  }

  #[tokio::test]
  async fn scheduled_work_awaits_from_async_code() {
    let event_loop = EventLoop::new().unwrap();
    let task = event_loop.schedule(async { 5_i64 });
    assert_eq!(task.await.unwrap(), 5);
  }

  #[test]
  fn marker_is_only_set_inside_bridged_work() {
    let event_loop = EventLoop::new().unwrap();
    assert!(!in_async_context());
    let seen = event_loop
      .run_sync(async { Ok(in_async_context()) }, None)
      .unwrap();
    assert!(seen);
    let raw = event_loop.schedule(async { in_async_context() }).join().unwrap();
    assert!(!raw);
  }
}
