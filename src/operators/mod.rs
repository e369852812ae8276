//! # Operators
//!
//! Built-in node behaviors, wired through the fluent constructors on
//! [`NodeHandle`]. Single-input transforms live in [`transform`], the
//! multi-input joins in [`join`], terminal side effects in [`sinks`],
//! deduplication in [`unique`], the queue-backed decoupler in [`buffer`],
//! and the backend family in [`parallel`].
//!
//! The constructors on a backend-tagged handle transparently build the
//! backend variant of the operator where one exists (`map`, `starmap`,
//! `filter`, `accumulate`), so the same pipeline text works on plain and
//! scattered streams alike. Custom behaviors implement
//! [`crate::node::Operator`] and join a graph via [`crate::graph::Graph::attach`].

pub mod accumulate;
pub mod buffer;
pub mod join;
pub mod parallel;
pub mod sinks;
pub mod transform;
pub mod unique;

#[cfg(test)]
mod parallel_test;

pub use unique::DedupKey;

use crate::backend::Backend;
use crate::error::FlowError;
use crate::graph::{BackendSpec, Graph, NodeHandle};
use crate::node::{NodeId, Operator};
use crate::value::{Value, ValueLog, downcast};
use std::hash::Hash;
use std::sync::Arc;

pub(crate) type MapFn = Arc<dyn Fn(Value) -> Value + Send + Sync>;
pub(crate) type StarmapFn = Arc<dyn Fn(&[Value]) -> Value + Send + Sync>;
pub(crate) type PredicateFn = Arc<dyn Fn(&Value) -> bool + Send + Sync>;
pub(crate) type FoldFn = Arc<dyn Fn(Value, Value) -> Value + Send + Sync>;
pub(crate) type StatefulFoldFn = Arc<dyn Fn(Value, Value) -> (Value, Value) + Send + Sync>;
pub(crate) type SinkFn = Arc<dyn Fn(Value) + Send + Sync>;
pub(crate) type StarsinkFn = Arc<dyn Fn(&[Value]) + Send + Sync>;
pub(crate) type KeyFn = Arc<dyn Fn(&Value) -> Result<DedupKey, FlowError> + Send + Sync>;

impl NodeHandle {
  fn add_single(&self, name: &str, operator: Box<dyn Operator>) -> Result<NodeHandle, FlowError> {
    self.graph().add_node(
      name.to_string(),
      operator,
      vec![self.id()],
      BackendSpec::Inherit,
      false,
    )
  }

  /// Upstream ids for `self` followed by `others`, rejecting handles from
  /// a different graph.
  fn chain_ids(&self, others: &[&NodeHandle]) -> Result<Vec<NodeId>, FlowError> {
    let mut ids = Vec::with_capacity(1 + others.len());
    ids.push(self.id());
    for other in others {
      if !self.graph().shares_core(other.graph()) {
        return Err(FlowError::Configuration(
          "nodes belong to different graphs".into(),
        ));
      }
      ids.push(other.id());
    }
    Ok(ids)
  }

  /// Applies `func` to every value.
  ///
  /// On a backend-tagged handle the function is submitted to the backend
  /// instead and the pending handle propagates.
  pub fn map(
    &self,
    func: impl Fn(Value) -> Value + Send + Sync + 'static,
  ) -> Result<NodeHandle, FlowError> {
    let func: MapFn = Arc::new(func);
    match self.graph().backend_of(self.id())? {
      Some(backend) => self.add_single("map", Box::new(parallel::BackendMapOp::new(backend, func))),
      None => self.add_single("map", Box::new(transform::MapOp::new(func))),
    }
  }

  /// Applies `func` to the elements of every tuple value.
  pub fn starmap(
    &self,
    func: impl Fn(&[Value]) -> Value + Send + Sync + 'static,
  ) -> Result<NodeHandle, FlowError> {
    let func: StarmapFn = Arc::new(func);
    match self.graph().backend_of(self.id())? {
      Some(backend) => self.add_single(
        "starmap",
        Box::new(parallel::BackendStarmapOp::new(backend, func)),
      ),
      None => self.add_single("starmap", Box::new(transform::StarmapOp::new(func))),
    }
  }

  /// Selects element `index` out of every tuple value.
  pub fn pluck(&self, index: usize) -> Result<NodeHandle, FlowError> {
    self.add_single("pluck", Box::new(transform::PluckOp::new(index)))
  }

  /// Passes through only values for which `predicate` holds. The backend
  /// variant suppresses worker-side via the sentinel, resolved at `gather`.
  pub fn filter(
    &self,
    predicate: impl Fn(&Value) -> bool + Send + Sync + 'static,
  ) -> Result<NodeHandle, FlowError> {
    let predicate: PredicateFn = Arc::new(predicate);
    match self.graph().backend_of(self.id())? {
      Some(backend) => self.add_single(
        "filter",
        Box::new(parallel::BackendFilterOp::new(backend, predicate)),
      ),
      None => self.add_single("filter", Box::new(transform::FilterOp::new(predicate))),
    }
  }

  /// Splats every tuple value into its elements, emitted in order.
  pub fn flatten(&self) -> Result<NodeHandle, FlowError> {
    self.add_single("flatten", Box::new(transform::FlattenOp))
  }

  /// Stateful fold: emits `state = fold(state, value)` per input.
  ///
  /// Without a `start` the first input seeds the state and passes through
  /// untouched. On a backend-tagged handle the folds run as backend tasks
  /// and the carried state is the pending handle of the previous fold.
  pub fn accumulate(
    &self,
    fold: impl Fn(Value, Value) -> Value + Send + Sync + 'static,
    start: Option<Value>,
  ) -> Result<NodeHandle, FlowError> {
    let fold: FoldFn = Arc::new(fold);
    match self.graph().backend_of(self.id())? {
      Some(backend) => self.add_single(
        "accumulate",
        Box::new(parallel::BackendAccumulateOp::new(backend, fold, start)),
      ),
      None => self.add_single(
        "accumulate",
        Box::new(accumulate::AccumulateOp::new(
          accumulate::Fold::Plain(fold),
          start,
        )),
      ),
    }
  }

  /// Fold whose `(state, emitted)` halves diverge: the first half is
  /// carried, only the second propagates.
  pub fn accumulate_with_state(
    &self,
    fold: impl Fn(Value, Value) -> (Value, Value) + Send + Sync + 'static,
    start: Option<Value>,
  ) -> Result<NodeHandle, FlowError> {
    let fold: StatefulFoldFn = Arc::new(fold);
    match self.graph().backend_of(self.id())? {
      Some(backend) => self.add_single(
        "accumulate",
        Box::new(parallel::BackendAccumulateOp::with_state(
          backend, fold, start,
        )),
      ),
      None => self.add_single(
        "accumulate",
        Box::new(accumulate::AccumulateOp::new(
          accumulate::Fold::WithState(fold),
          start,
        )),
      ),
    }
  }

  /// Drops values whose key was already seen, keyed by the downcast value
  /// itself.
  ///
  /// `history` bounds how many keys are remembered, oldest evicted first;
  /// `None` remembers forever. A repeat sighting does not refresh its key.
  ///
  /// # Errors
  ///
  /// Values that are not `K` fail the emission with
  /// [`FlowError::Operator`].
  pub fn unique<K>(&self, history: Option<usize>) -> Result<NodeHandle, FlowError>
  where
    K: Clone + Eq + Hash + Send + Sync + 'static,
  {
    let key_fn: KeyFn = Arc::new(|value: &Value| {
      let typed = downcast::<K>(value).ok_or_else(|| {
        FlowError::operator(format!(
          "unique expected `{}` values",
          std::any::type_name::<K>()
        ))
      })?;
      Ok(DedupKey::hashed(typed.clone()))
    });
    self.add_single("unique", Box::new(unique::UniqueOp::new(key_fn, history)))
  }

  /// Like [`NodeHandle::unique`], with an explicit key callback. Use
  /// [`DedupKey::opaque`] for key types that only support equality.
  pub fn unique_by(
    &self,
    history: Option<usize>,
    key: impl Fn(&Value) -> DedupKey + Send + Sync + 'static,
  ) -> Result<NodeHandle, FlowError> {
    let key_fn: KeyFn = Arc::new(move |value: &Value| Ok(key(value)));
    self.add_single("unique", Box::new(unique::UniqueOp::new(key_fn, history)))
  }

  /// Merges streams: any value from any upstream forwards immediately.
  pub fn union(&self, others: &[&NodeHandle]) -> Result<NodeHandle, FlowError> {
    let ids = self.chain_ids(others)?;
    self.graph().add_node(
      "union".to_string(),
      Box::new(join::UnionOp),
      ids,
      BackendSpec::Inherit,
      false,
    )
  }

  /// Pairs values across upstreams strictly first-in-first-out, emitting
  /// tuples in registration order.
  ///
  /// ```
  /// use pulseweave::graph::Graph;
  /// use pulseweave::value::{Value, extract, value};
  ///
  /// # fn main() -> Result<(), pulseweave::error::FlowError> {
  /// let graph = Graph::new();
  /// let a = graph.source();
  /// let b = graph.source();
  /// let log = a
  ///   .zip(&[&b])?
  ///   .starmap(|pair: &[Value]| {
  ///     let left = extract::<i64>(&pair[0]).unwrap_or(0);
  ///     let right = extract::<i64>(&pair[1]).unwrap_or(0);
  ///     value(left + right)
  ///   })?
  ///   .sink_to_log()?;
  /// a.emit(value(1_i64))?;
  /// b.emit(value(2_i64))?;
  /// assert_eq!(log.collected::<i64>(), vec![3]);
  /// # Ok(())
  /// # }
  /// ```
  pub fn zip(&self, others: &[&NodeHandle]) -> Result<NodeHandle, FlowError> {
    let ids = self.chain_ids(others)?;
    let op = join::ZipOp::new(&ids);
    self.graph().add_node(
      "zip".to_string(),
      Box::new(op),
      ids,
      BackendSpec::Inherit,
      false,
    )
  }

  /// Zip that never drops values from `self` and pairs each with the
  /// latest value of every other upstream, `self`'s value at position 0.
  pub fn zip_latest(&self, others: &[&NodeHandle]) -> Result<NodeHandle, FlowError> {
    let ids = self.chain_ids(others)?;
    let op = join::ZipLatestOp::new(self.id(), &ids[1..]);
    self.graph().add_node(
      "zip_latest".to_string(),
      Box::new(op),
      ids,
      BackendSpec::Inherit,
      false,
    )
  }

  /// Starts a combine-latest join over `self` and `others`.
  ///
  /// The builder configures which upstreams trigger emission (`emit_on`,
  /// default all) and which upstream should deliver to the join ahead of
  /// its other subscribers (`first`).
  pub fn combine_latest(&self, others: &[&NodeHandle]) -> CombineLatestBuilder {
    let mut upstreams = Vec::with_capacity(1 + others.len());
    upstreams.push(self.clone());
    upstreams.extend(others.iter().map(|other| (*other).clone()));
    CombineLatestBuilder {
      upstreams,
      emit_on: Vec::new(),
      first: None,
    }
  }

  /// Decouples this stream from its downstream subtree through a bounded
  /// queue drained on the graph's event loop.
  ///
  /// Delivery into the buffer blocks (asynchronously) once `capacity`
  /// values are waiting. Creating a buffer binds the graph to an event
  /// loop if it has none yet.
  pub fn buffer(&self, capacity: usize) -> Result<NodeHandle, FlowError> {
    let event_loop = self.graph().ensure_event_loop()?;
    let (sender, receiver) = tokio::sync::mpsc::channel(capacity.max(1));
    let node = self.add_single("buffer", Box::new(buffer::BufferOp::new(sender)))?;
    buffer::spawn_drain(self.graph().downgrade(), node.id(), receiver, &event_loop);
    Ok(node)
  }

  /// Moves values onto `backend`; downstream operators inherit the tag and
  /// submit their work there until a [`NodeHandle::gather`].
  pub fn scatter(&self, backend: Arc<dyn Backend>) -> Result<NodeHandle, FlowError> {
    self.graph().add_node(
      "scatter".to_string(),
      Box::new(parallel::ScatterOp::new(Arc::clone(&backend))),
      vec![self.id()],
      BackendSpec::Tag(backend),
      false,
    )
  }

  /// Resolves pending backend results back into concrete values and clears
  /// the backend tag. Sentinel-suppressed results are dropped here.
  ///
  /// # Errors
  ///
  /// [`FlowError::Configuration`] when the upstream carries no backend tag.
  pub fn gather(&self) -> Result<NodeHandle, FlowError> {
    let backend = self.graph().backend_of(self.id())?.ok_or_else(|| {
      FlowError::Configuration("gather requires a backend-tagged upstream".into())
    })?;
    self.graph().ensure_event_loop()?;
    self.graph().add_node(
      "gather".to_string(),
      Box::new(parallel::GatherOp::new(backend)),
      vec![self.id()],
      BackendSpec::Clear,
      false,
    )
  }

  /// Terminal side effect per value. The node is pinned by the graph, so
  /// it keeps running even when the returned handle is dropped.
  pub fn sink(&self, func: impl Fn(Value) + Send + Sync + 'static) -> Result<NodeHandle, FlowError> {
    self.graph().add_node(
      "sink".to_string(),
      Box::new(sinks::SinkOp::new(Arc::new(func))),
      vec![self.id()],
      BackendSpec::Inherit,
      true,
    )
  }

  /// Terminal side effect over the splatted elements of tuple values.
  pub fn starsink(
    &self,
    func: impl Fn(&[Value]) + Send + Sync + 'static,
  ) -> Result<NodeHandle, FlowError> {
    self.graph().add_node(
      "starsink".to_string(),
      Box::new(sinks::StarsinkOp::new(Arc::new(func))),
      vec![self.id()],
      BackendSpec::Inherit,
      true,
    )
  }

  /// Sink that appends every value to a shared [`ValueLog`].
  pub fn sink_to_log(&self) -> Result<ValueLog, FlowError> {
    let log = ValueLog::new();
    let writer = log.clone();
    self.sink(move |value| writer.push(value))?;
    Ok(log)
  }
}

/// Configures a combine-latest join; finished by
/// [`CombineLatestBuilder::build`].
pub struct CombineLatestBuilder {
  upstreams: Vec<NodeHandle>,
  emit_on: Vec<NodeHandle>,
  first: Option<NodeHandle>,
}

impl CombineLatestBuilder {
  /// Restricts emission to updates arriving from `trigger`. May be called
  /// repeatedly to allow several triggers; the default is every upstream.
  #[must_use]
  pub fn emit_on(mut self, trigger: &NodeHandle) -> Self {
    self.emit_on.push(trigger.clone());
    self
  }

  /// Promotes the join to the front of `upstream`'s subscriber list, so
  /// its subtree runs before any sibling sees the same value.
  #[must_use]
  pub fn first(mut self, upstream: &NodeHandle) -> Self {
    self.first = Some(upstream.clone());
    self
  }

  /// Wires the join into the graph.
  ///
  /// # Errors
  ///
  /// [`FlowError::Configuration`] when an `emit_on` or `first` target is
  /// not one of the upstreams, or the handles span different graphs.
  pub fn build(self) -> Result<NodeHandle, FlowError> {
    let anchor = &self.upstreams[0];
    let graph: Graph = anchor.graph().clone();
    let others: Vec<&NodeHandle> = self.upstreams[1..].iter().collect();
    let ids = anchor.chain_ids(&others)?;
    let mut triggers = Vec::with_capacity(self.emit_on.len());
    for trigger in &self.emit_on {
      if !graph.shares_core(trigger.graph()) || !ids.contains(&trigger.id()) {
        return Err(FlowError::Configuration(
          "emit_on target is not an upstream of this combine_latest".into(),
        ));
      }
      triggers.push(trigger.id());
    }
    if triggers.is_empty() {
      triggers = ids.clone();
    }
    if let Some(first) = &self.first {
      if !graph.shares_core(first.graph()) || !ids.contains(&first.id()) {
        return Err(FlowError::Configuration(
          "first target is not an upstream of this combine_latest".into(),
        ));
      }
    }
    let op = join::CombineLatestOp::new(&ids, &triggers);
    let node = graph.add_node(
      "combine_latest".to_string(),
      Box::new(op),
      ids,
      BackendSpec::Inherit,
      false,
    )?;
    if let Some(first) = &self.first {
      graph.promote(node.id(), &[first.id()])?;
    }
    Ok(node)
  }
}
