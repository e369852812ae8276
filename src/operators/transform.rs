//! # Synchronous Transforms
//!
//! One-input operators that rewrite, select, or drop values on the calling
//! stack. Tuple-shaped inputs are `Arc<Vec<Value>>` as produced by the join
//! operators; the tuple-consuming transforms raise [`FlowError::Operator`]
//! when handed anything else.

use super::{MapFn, PredicateFn, StarmapFn};
use crate::error::FlowError;
use crate::node::{Emission, NodeId, Operator};
use crate::value::{Value, as_tuple};

/// Entry node: forwards whatever is emitted into it.
pub(crate) struct SourceOp;

impl Operator for SourceOp {
  fn update(&mut self, value: Value, _source: NodeId) -> Result<Emission, FlowError> {
    Ok(Emission::One(value))
  }
}

pub(crate) struct MapOp {
  func: MapFn,
}

impl MapOp {
  pub(crate) fn new(func: MapFn) -> Self {
    MapOp { func }
  }
}

impl Operator for MapOp {
  fn update(&mut self, value: Value, _source: NodeId) -> Result<Emission, FlowError> {
    Ok(Emission::One((self.func)(value)))
  }
}

pub(crate) struct StarmapOp {
  func: StarmapFn,
}

impl StarmapOp {
  pub(crate) fn new(func: StarmapFn) -> Self {
    StarmapOp { func }
  }
}

impl Operator for StarmapOp {
  fn update(&mut self, value: Value, _source: NodeId) -> Result<Emission, FlowError> {
    let elements =
      as_tuple(&value).ok_or_else(|| FlowError::operator("starmap expects a tuple value"))?;
    Ok(Emission::One((self.func)(elements)))
  }
}

pub(crate) struct PluckOp {
  index: usize,
}

impl PluckOp {
  pub(crate) fn new(index: usize) -> Self {
    PluckOp { index }
  }
}

impl Operator for PluckOp {
  fn update(&mut self, value: Value, _source: NodeId) -> Result<Emission, FlowError> {
    let elements =
      as_tuple(&value).ok_or_else(|| FlowError::operator("pluck expects a tuple value"))?;
    let element = elements.get(self.index).cloned().ok_or_else(|| {
      FlowError::operator(format!(
        "pluck index {} out of range for a tuple of {}",
        self.index,
        elements.len()
      ))
    })?;
    Ok(Emission::One(element))
  }
}

pub(crate) struct FilterOp {
  predicate: PredicateFn,
}

impl FilterOp {
  pub(crate) fn new(predicate: PredicateFn) -> Self {
    FilterOp { predicate }
  }
}

impl Operator for FilterOp {
  fn update(&mut self, value: Value, _source: NodeId) -> Result<Emission, FlowError> {
    if (self.predicate)(&value) {
      Ok(Emission::One(value))
    } else {
      Ok(Emission::None)
    }
  }
}

/// Splats a tuple value into its elements, emitted in order.
pub(crate) struct FlattenOp;

impl Operator for FlattenOp {
  fn update(&mut self, value: Value, _source: NodeId) -> Result<Emission, FlowError> {
    let elements =
      as_tuple(&value).ok_or_else(|| FlowError::operator("flatten expects a tuple value"))?;
    Ok(Emission::Many(elements.to_vec()))
  }
}
