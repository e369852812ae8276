//! # Node Model
//!
//! A graph is an arena of operator nodes addressed by stable [`NodeId`]s.
//! Every operator, from a bare source to a multi-parent join, implements the
//! single-method [`Operator`] trait: one value in from one upstream, one
//! [`Emission`] decision out. The propagation engine owns everything else,
//! so operators never touch graph structure and never recurse themselves.

use crate::error::FlowError;
use crate::value::Value;
use futures::future::BoxFuture;
use std::fmt;

/// Stable handle to a node slot.
///
/// Ids are generational: a slot freed by teardown and later reused gets a
/// new generation, so ids held past a node's death fail with
/// [`FlowError::StaleNode`] instead of addressing an unrelated node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId {
  pub(crate) index: u32,
  pub(crate) generation: u32,
}

impl fmt::Display for NodeId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "n{}.{}", self.index, self.generation)
  }
}

/// What one `update` call asks the engine to do next.
pub enum Emission {
  /// Nothing to propagate; the value was consumed or buffered.
  None,
  /// Propagate one value to the node's subscribers.
  One(Value),
  /// Propagate several values in order. A zip drain or a flatten can
  /// release a burst from a single input.
  Many(Vec<Value>),
  /// The branch continues on the event loop once this future resolves;
  /// each resolved value is then propagated to the node's subscribers.
  Deferred(BoxFuture<'static, Result<Vec<Value>, FlowError>>),
}

impl fmt::Debug for Emission {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Emission::None => write!(f, "None"),
      Emission::One(_) => write!(f, "One(..)"),
      Emission::Many(values) => write!(f, "Many(len={})", values.len()),
      Emission::Deferred(_) => write!(f, "Deferred(..)"),
    }
  }
}

/// A dataflow operator.
///
/// `update` must be total over every upstream the node was registered
/// against, and pure with respect to graph structure: it may mutate only
/// its own state. Errors abort the current branch of propagation from this
/// node downward; completed sibling branches keep their effects.
pub trait Operator: Send {
  /// Handles one value arriving from the upstream `source`.
  fn update(&mut self, value: Value, source: NodeId) -> Result<Emission, FlowError>;
}
