//! # Error Types
//!
//! Every fallible operation in PulseWeave surfaces a [`FlowError`]. The
//! variants follow the failure domains of the engine: wiring mistakes,
//! bridge misuse, bridge deadlines, backend failures, dead node handles,
//! and operators rejecting a value.

use crate::node::NodeId;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Boxed error type accepted from user code and backends.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors raised by graph construction, propagation, and the execution bridge.
#[derive(Debug, Clone, Error)]
pub enum FlowError {
  /// Incompatible wiring: mixed backends feeding one node, conflicting
  /// event-loop bindings, emit-on or promotion targets that are not
  /// actually upstreams or subscribers, or asynchronous operators on a
  /// graph that cannot host them.
  #[error("configuration error: {0}")]
  Configuration(String),

  /// The blocking bridge was invoked from the event loop's own thread,
  /// which would deadlock the loop against itself.
  #[error("blocking bridge invoked from the event loop thread")]
  Reentrant,

  /// The blocking bridge did not observe a result within its deadline.
  /// The scheduled work is abandoned, not cancelled.
  #[error("bridged call timed out after {0:?}")]
  Timeout(Duration),

  /// Failure surfaced unchanged from a backend's submit, scatter, or
  /// gather.
  #[error(transparent)]
  Backend(#[from] BackendError),

  /// The node id refers to a slot that was destroyed or released.
  #[error("node {0} is no longer alive")]
  StaleNode(NodeId),

  /// A synchronous operator rejected a value, e.g. a pluck index out of
  /// range or a tuple operator fed a non-tuple.
  #[error("operator error at `{node}`: {message}")]
  Operator {
    /// Display name of the node whose operator failed. Filled in by the
    /// propagation engine when the operator itself does not know it.
    node: String,
    /// Human-readable description of the rejection.
    message: String,
  },
}

impl FlowError {
  /// Operator rejection with the node name left for the engine to fill in.
  pub fn operator(message: impl Into<String>) -> Self {
    FlowError::Operator {
      node: String::new(),
      message: message.into(),
    }
  }

  pub(crate) fn with_node_name(self, name: &str) -> Self {
    match self {
      FlowError::Operator { node, message } if node.is_empty() => FlowError::Operator {
        node: name.to_string(),
        message,
      },
      other => other,
    }
  }
}

/// Opaque failure captured from backend work.
///
/// The underlying error is held behind an `Arc` so a failure observed on a
/// worker thread is re-raised to the blocking caller as the very same
/// error object, not a stringified copy. [`BackendError::same_cause`]
/// checks that identity.
#[derive(Debug, Clone)]
pub struct BackendError {
  cause: Arc<dyn std::error::Error + Send + Sync + 'static>,
}

impl BackendError {
  /// Wraps an error produced by backend work.
  pub fn new(cause: impl Into<BoxError>) -> Self {
    BackendError {
      cause: Arc::from(cause.into()),
    }
  }

  /// A backend error carrying only a message.
  pub fn message(message: impl Into<String>) -> Self {
    BackendError::new(message.into())
  }

  /// The captured error.
  pub fn cause(&self) -> &(dyn std::error::Error + Send + Sync + 'static) {
    &*self.cause
  }

  /// True when both wrappers hold the same captured error object.
  pub fn same_cause(&self, other: &BackendError) -> bool {
    Arc::ptr_eq(&self.cause, &other.cause)
  }
}

impl fmt::Display for BackendError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "backend error: {}", self.cause)
  }
}

impl std::error::Error for BackendError {
  fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
    Some(self.cause())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn operator_error_gets_node_name_filled_once() {
    let err = FlowError::operator("bad tuple").with_node_name("pluck");
    match &err {
      FlowError::Operator { node, message } => {
        assert_eq!(node, "pluck");
        assert_eq!(message, "bad tuple");
      }
      other => panic!("unexpected error: {other:?}"),
    }
    // a name already present is not overwritten
    match err.with_node_name("other") {
      FlowError::Operator { node, .. } => assert_eq!(node, "pluck"),
      other => panic!("unexpected error: {other:?}"),
    }
  }

  #[test]
  fn backend_error_identity_survives_cloning() {
    let original = BackendError::message("worker exploded");
    let via_flow = FlowError::from(original.clone());
    match via_flow {
      FlowError::Backend(roundtripped) => assert!(roundtripped.same_cause(&original)),
      other => panic!("unexpected error: {other:?}"),
    }
    assert!(!BackendError::message("worker exploded").same_cause(&original));
  }
}
