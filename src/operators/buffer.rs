//! # Buffer
//!
//! Decouples a producer from its downstream subtree through a bounded
//! queue. Delivery into the buffer defers until the value is enqueued,
//! which is where backpressure bites once the queue is full. A drain task
//! on the graph's event loop dequeues values one at a time and drives each
//! through the buffer's subscribers, deferred branches included, before
//! touching the next, so per-edge order survives the decoupling.

use crate::bridge::EventLoop;
use crate::error::FlowError;
use crate::graph::{Graph, GraphCore};
use crate::node::{Emission, NodeId, Operator};
use crate::propagation;
use crate::value::Value;
use std::sync::Weak;
use tokio::sync::mpsc;
use tracing::{debug, warn};

pub(crate) struct BufferOp {
  sender: mpsc::Sender<Value>,
}

impl BufferOp {
  pub(crate) fn new(sender: mpsc::Sender<Value>) -> Self {
    BufferOp { sender }
  }
}

impl Operator for BufferOp {
  fn update(&mut self, value: Value, _source: NodeId) -> Result<Emission, FlowError> {
    let sender = self.sender.clone();
    Ok(Emission::Deferred(Box::pin(async move {
      sender
        .send(value)
        .await
        .map_err(|_| FlowError::Configuration("buffer drain task has shut down".into()))?;
      // forwarding is the drain task's job
      Ok(Vec::new())
    })))
  }
}

/// Starts the drain task for a buffer node.
///
/// The task holds the graph weakly; it winds down when the graph is gone,
/// the node is destroyed, or every sender has dropped.
pub(crate) fn spawn_drain(
  core: Weak<GraphCore>,
  node: NodeId,
  mut receiver: mpsc::Receiver<Value>,
  event_loop: &EventLoop,
) {
  event_loop.spawn_traversal(async move {
    while let Some(value) = receiver.recv().await {
      let Some(core) = core.upgrade() else {
        break;
      };
      let graph = Graph::from_core(core);
      if !graph.is_alive(node) {
        break;
      }
      let mut branches = Vec::new();
      if let Err(error) = propagation::propagate(&graph, node, value, &mut branches) {
        warn!(%error, node = %node, "buffer drain emission failed");
        continue;
      }
      if let Err(error) = propagation::join_branches(branches).await {
        warn!(%error, node = %node, "buffer drain branch failed");
      }
    }
    debug!(node = %node, "buffer drain finished");
  });
}
