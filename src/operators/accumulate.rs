//! # Stateful Fold
//!
//! `accumulate` keeps one value of private state per node. Without a start
//! value the first input becomes the state and is emitted unchanged; from
//! then on each input folds into the state and the fold result propagates.
//! The stateful variant lets the fold return `(state, emitted)` pairs so
//! the carried state and the emitted value can diverge.

use super::{FoldFn, StatefulFoldFn};
use crate::error::FlowError;
use crate::node::{Emission, NodeId, Operator};
use crate::value::Value;

pub(crate) enum Fold {
  Plain(FoldFn),
  WithState(StatefulFoldFn),
}

pub(crate) struct AccumulateOp {
  fold: Fold,
  state: Option<Value>,
}

impl AccumulateOp {
  pub(crate) fn new(fold: Fold, start: Option<Value>) -> Self {
    AccumulateOp { fold, state: start }
  }
}

impl Operator for AccumulateOp {
  fn update(&mut self, value: Value, _source: NodeId) -> Result<Emission, FlowError> {
    let Some(state) = self.state.take() else {
      self.state = Some(value.clone());
      return Ok(Emission::One(value));
    };
    match &self.fold {
      Fold::Plain(fold) => {
        let next = fold(state, value);
        self.state = Some(next.clone());
        Ok(Emission::One(next))
      }
      Fold::WithState(fold) => {
        let (next, emitted) = fold(state, value);
        self.state = Some(next);
        Ok(Emission::One(emitted))
      }
    }
  }
}
