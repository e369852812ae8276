//! # Propagation Engine
//!
//! Drives an emitted value through the graph depth-first: each subscriber's
//! entire downstream subtree finishes before the next sibling sees the
//! value. Operators answer every delivery with an [`Emission`]; immediate
//! emissions recurse on the spot, deferred ones are spawned as branches on
//! the runtime and joined before a bridged emit returns.
//!
//! Routing is decided once per emit:
//!
//! - already inside loop-driven work (the task-local marker is set): run
//!   inline and leave branches to complete on their own;
//! - graph without an event loop: run inline on the calling thread;
//! - otherwise: bridge to the loop, run the traversal there, and block the
//!   caller until every deferred branch has joined.

use crate::bridge;
use crate::error::FlowError;
use crate::graph::Graph;
use crate::node::{Emission, NodeId};
use crate::value::{is_suppressed, Value};
use std::sync::PoisonError;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{trace, warn};

pub(crate) type BranchHandle = JoinHandle<Result<(), FlowError>>;

/// Entry point behind [`crate::graph::NodeHandle::emit`].
pub(crate) fn emit(
  graph: &Graph,
  id: NodeId,
  value: Value,
  timeout: Option<Duration>,
) -> Result<(), FlowError> {
  if !graph.is_alive(id) {
    return Err(FlowError::StaleNode(id));
  }
  if bridge::in_async_context() {
    trace!(node = %id, "nested emission, propagating inline");
    let mut branches = Vec::new();
    return propagate(graph, id, value, &mut branches);
  }
  let Some(event_loop) = graph.event_loop() else {
    let mut branches = Vec::new();
    return propagate(graph, id, value, &mut branches);
  };
  let graph = graph.clone();
  event_loop.run_sync(
    async move {
      let mut branches = Vec::new();
      propagate(&graph, id, value, &mut branches)?;
      join_branches(branches).await
    },
    timeout,
  )
}

/// Delivers `value` to every subscriber of `id`, in subscriber order.
///
/// The downstream list is snapshotted per hop; subscribers destroyed while
/// the traversal is in flight are skipped.
pub(crate) fn propagate(
  graph: &Graph,
  id: NodeId,
  value: Value,
  branches: &mut Vec<BranchHandle>,
) -> Result<(), FlowError> {
  let Ok(downstreams) = graph.downstreams(id) else {
    return Ok(());
  };
  for subscriber in downstreams {
    deliver(graph, subscriber, value.clone(), id, branches)?;
  }
  Ok(())
}

fn deliver(
  graph: &Graph,
  subscriber: NodeId,
  value: Value,
  source: NodeId,
  branches: &mut Vec<BranchHandle>,
) -> Result<(), FlowError> {
  let Ok(cell) = graph.operator_cell(subscriber) else {
    return Ok(());
  };
  // The operator lock is dropped before recursing, so feedback emissions
  // triggered further down can re-enter this node.
  let outcome = {
    let mut operator = cell.lock().unwrap_or_else(PoisonError::into_inner);
    operator.update(value, source)
  };
  let emission =
    outcome.map_err(|error| error.with_node_name(&graph.display_name(subscriber)))?;
  dispatch(graph, subscriber, emission, branches)
}

/// Routes one operator response into the traversal.
pub(crate) fn dispatch(
  graph: &Graph,
  node: NodeId,
  emission: Emission,
  branches: &mut Vec<BranchHandle>,
) -> Result<(), FlowError> {
  match emission {
    Emission::None => Ok(()),
    Emission::One(value) => {
      if is_suppressed(&value) {
        return Ok(());
      }
      propagate(graph, node, value, branches)
    }
    Emission::Many(values) => {
      for value in values {
        if is_suppressed(&value) {
          continue;
        }
        propagate(graph, node, value, branches)?;
      }
      Ok(())
    }
    Emission::Deferred(future) => {
      let Ok(runtime) = tokio::runtime::Handle::try_current() else {
        return Err(FlowError::Configuration(format!(
          "`{}` produced an asynchronous emission outside a runtime; bind the graph to an event loop",
          graph.display_name(node)
        )));
      };
      let graph = graph.clone();
      let branch = runtime.spawn(bridge::with_async_marker(async move {
        let values = future
          .await
          .map_err(|error| error.with_node_name(&graph.display_name(node)))?;
        let mut nested = Vec::new();
        for value in values {
          if is_suppressed(&value) {
            continue;
          }
          propagate(&graph, node, value, &mut nested)?;
        }
        join_branches(nested).await
      }));
      branches.push(branch);
      Ok(())
    }
  }
}

/// Awaits every deferred branch, reporting the first failure.
pub(crate) async fn join_branches(branches: Vec<BranchHandle>) -> Result<(), FlowError> {
  let mut first_error = None;
  for branch in branches {
    match branch.await {
      Ok(Ok(())) => {}
      Ok(Err(error)) => {
        warn!(%error, "deferred branch failed");
        first_error.get_or_insert(error);
      }
      Err(join_error) => {
        warn!(%join_error, "deferred branch panicked");
        first_error.get_or_insert(FlowError::operator(format!(
          "deferred branch panicked: {join_error}"
        )));
      }
    }
  }
  match first_error {
    Some(error) => Err(error),
    None => Ok(()),
  }
}
