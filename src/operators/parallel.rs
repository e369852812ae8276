//! # Backend Operators
//!
//! Operators on a backend-tagged node hand their function to the inherited
//! [`Backend`] and immediately emit the resulting [`TaskHandle`] as a value,
//! so a whole pipeline stage can be in flight per input while propagation
//! itself never blocks. Argument resolution happens worker-side: a handle
//! passed as an argument is awaited there before the function runs, which
//! is how consecutive backend stages chain without a gather in between.
//!
//! `gather` is the synchronization point. It defers the branch until the
//! incoming value resolves, drops it when the result is the suppress
//! sentinel, and continues downstream with the concrete value.

use super::{FoldFn, MapFn, PredicateFn, StarmapFn, StatefulFoldFn};
use crate::backend::{Backend, TaskFn};
use crate::error::{BoxError, FlowError};
use crate::node::{Emission, NodeId, Operator};
use crate::task::TaskHandle;
use crate::value::{Value, as_tuple, is_suppressed, suppressed, tuple};
use std::sync::Arc;

fn handle_value(handle: TaskHandle) -> Value {
  Arc::new(handle)
}

fn sole_arg(args: &[Value], what: &str) -> Result<Value, BoxError> {
  args
    .first()
    .cloned()
    .ok_or_else(|| BoxError::from(format!("{what} task called without its argument")))
}

/// Moves plain values onto the backend.
pub(crate) struct ScatterOp {
  backend: Arc<dyn Backend>,
}

impl ScatterOp {
  pub(crate) fn new(backend: Arc<dyn Backend>) -> Self {
    ScatterOp { backend }
  }
}

impl Operator for ScatterOp {
  fn update(&mut self, value: Value, _source: NodeId) -> Result<Emission, FlowError> {
    Ok(Emission::One(handle_value(self.backend.scatter(value))))
  }
}

pub(crate) struct BackendMapOp {
  backend: Arc<dyn Backend>,
  func: TaskFn,
}

impl BackendMapOp {
  pub(crate) fn new(backend: Arc<dyn Backend>, func: MapFn) -> Self {
    let func: TaskFn = Arc::new(move |args| Ok(func(sole_arg(args, "map")?)));
    BackendMapOp { backend, func }
  }
}

impl Operator for BackendMapOp {
  fn update(&mut self, value: Value, _source: NodeId) -> Result<Emission, FlowError> {
    let handle = self.backend.submit(Arc::clone(&self.func), vec![value]);
    Ok(Emission::One(handle_value(handle)))
  }
}

pub(crate) struct BackendStarmapOp {
  backend: Arc<dyn Backend>,
  func: TaskFn,
}

impl BackendStarmapOp {
  pub(crate) fn new(backend: Arc<dyn Backend>, func: StarmapFn) -> Self {
    let func: TaskFn = Arc::new(move |args| {
      let value = sole_arg(args, "starmap")?;
      let elements =
        as_tuple(&value).ok_or_else(|| BoxError::from("starmap expects a tuple value"))?;
      Ok(func(elements))
    });
    BackendStarmapOp { backend, func }
  }
}

impl Operator for BackendStarmapOp {
  fn update(&mut self, value: Value, _source: NodeId) -> Result<Emission, FlowError> {
    let handle = self.backend.submit(Arc::clone(&self.func), vec![value]);
    Ok(Emission::One(handle_value(handle)))
  }
}

/// Backend filter: the worker returns the value itself or the suppress
/// sentinel, and the sentinel rides the handle until `gather` drops it.
pub(crate) struct BackendFilterOp {
  backend: Arc<dyn Backend>,
  func: TaskFn,
}

impl BackendFilterOp {
  pub(crate) fn new(backend: Arc<dyn Backend>, predicate: PredicateFn) -> Self {
    let func: TaskFn = Arc::new(move |args| {
      let value = sole_arg(args, "filter")?;
      if predicate(&value) {
        Ok(value)
      } else {
        Ok(suppressed())
      }
    });
    BackendFilterOp { backend, func }
  }
}

impl Operator for BackendFilterOp {
  fn update(&mut self, value: Value, _source: NodeId) -> Result<Emission, FlowError> {
    let handle = self.backend.submit(Arc::clone(&self.func), vec![value]);
    Ok(Emission::One(handle_value(handle)))
  }
}

fn tuple_getter(index: usize) -> TaskFn {
  Arc::new(move |args| {
    let value = sole_arg(args, "accumulate")?;
    let elements = as_tuple(&value)
      .ok_or_else(|| BoxError::from("accumulate fold did not return a (state, emitted) tuple"))?;
    elements
      .get(index)
      .cloned()
      .ok_or_else(|| BoxError::from(format!("fold tuple has no element {index}")))
  })
}

/// Stateful fold over backend tasks.
///
/// The carried state is itself a value, usually a pending handle, so each
/// fold chains on the previous one worker-side. With a state-splitting
/// fold, the `(state, emitted)` halves are plucked apart by two submitted
/// getters and only the emitted half propagates.
pub(crate) struct BackendAccumulateOp {
  backend: Arc<dyn Backend>,
  fold: TaskFn,
  split: Option<(TaskFn, TaskFn)>,
  state: Option<Value>,
}

impl BackendAccumulateOp {
  pub(crate) fn new(backend: Arc<dyn Backend>, fold: FoldFn, start: Option<Value>) -> Self {
    let fold: TaskFn = Arc::new(move |args| {
      let (state, value) = fold_args(args)?;
      Ok(fold(state, value))
    });
    BackendAccumulateOp {
      backend,
      fold,
      split: None,
      state: start,
    }
  }

  pub(crate) fn with_state(
    backend: Arc<dyn Backend>,
    fold: StatefulFoldFn,
    start: Option<Value>,
  ) -> Self {
    let fold: TaskFn = Arc::new(move |args| {
      let (state, value) = fold_args(args)?;
      let (next, emitted) = fold(state, value);
      Ok(tuple(vec![next, emitted]))
    });
    BackendAccumulateOp {
      backend,
      fold,
      split: Some((tuple_getter(0), tuple_getter(1))),
      state: start,
    }
  }
}

fn fold_args(args: &[Value]) -> Result<(Value, Value), BoxError> {
  match args {
    [state, value] => Ok((state.clone(), value.clone())),
    _ => Err(BoxError::from("accumulate task expects (state, value)")),
  }
}

impl Operator for BackendAccumulateOp {
  fn update(&mut self, value: Value, _source: NodeId) -> Result<Emission, FlowError> {
    let Some(state) = self.state.take() else {
      // first input seeds the state and passes through untouched
      self.state = Some(value.clone());
      return Ok(Emission::One(value));
    };
    let result = self
      .backend
      .submit(Arc::clone(&self.fold), vec![state, value]);
    let result = handle_value(result);
    match &self.split {
      None => {
        self.state = Some(result.clone());
        Ok(Emission::One(result))
      }
      Some((state_getter, emit_getter)) => {
        let next = self
          .backend
          .submit(Arc::clone(state_getter), vec![result.clone()]);
        let emitted = self.backend.submit(Arc::clone(emit_getter), vec![result]);
        self.state = Some(handle_value(next));
        Ok(Emission::One(handle_value(emitted)))
      }
    }
  }
}

/// Awaits resolution of the incoming value and continues the branch with
/// the concrete result; sentinel results end the branch. Nodes below a
/// gather carry no backend tag.
pub(crate) struct GatherOp {
  backend: Arc<dyn Backend>,
}

impl GatherOp {
  pub(crate) fn new(backend: Arc<dyn Backend>) -> Self {
    GatherOp { backend }
  }
}

impl Operator for GatherOp {
  fn update(&mut self, value: Value, _source: NodeId) -> Result<Emission, FlowError> {
    let backend = Arc::clone(&self.backend);
    Ok(Emission::Deferred(Box::pin(async move {
      let concrete = backend.gather(value).await?;
      if is_suppressed(&concrete) {
        Ok(Vec::new())
      } else {
        Ok(vec![concrete])
      }
    })))
  }
}
