//! # Sinks
//!
//! Terminal side effects. Sink nodes are pinned by the graph so a pipeline
//! like `source.map(f)?.sink(print)?` keeps running after the returned
//! handle is dropped; [`crate::graph::Graph::destroy`] unpins.

use super::{SinkFn, StarsinkFn};
use crate::error::FlowError;
use crate::node::{Emission, NodeId, Operator};
use crate::value::{Value, as_tuple};

pub(crate) struct SinkOp {
  func: SinkFn,
}

impl SinkOp {
  pub(crate) fn new(func: SinkFn) -> Self {
    SinkOp { func }
  }
}

impl Operator for SinkOp {
  fn update(&mut self, value: Value, _source: NodeId) -> Result<Emission, FlowError> {
    (self.func)(value);
    Ok(Emission::None)
  }
}

/// Sink over tuple values, handing the callback the splatted elements.
pub(crate) struct StarsinkOp {
  func: StarsinkFn,
}

impl StarsinkOp {
  pub(crate) fn new(func: StarsinkFn) -> Self {
    StarsinkOp { func }
  }
}

impl Operator for StarsinkOp {
  fn update(&mut self, value: Value, _source: NodeId) -> Result<Emission, FlowError> {
    let elements =
      as_tuple(&value).ok_or_else(|| FlowError::operator("starsink expects a tuple value"))?;
    (self.func)(elements);
    Ok(Emission::None)
  }
}
