//! # Dataflow Graph
//!
//! A [`Graph`] is an arena of operator nodes wired at construction time.
//! Values pushed into a node with [`NodeHandle::emit`] are driven through
//! its downstream subscribers depth-first; see the crate docs for the full
//! propagation contract.
//!
//! ## Ownership
//!
//! Edges are asymmetric. A node owns its upstreams: as long as it is alive,
//! the sources feeding it stay alive. Downstream links are weak: holding a
//! source never keeps its subscribers alive. External [`NodeHandle`]s are
//! counted references, and sinks are pinned by the graph itself, so the two
//! usual pipeline shapes both behave naturally:
//!
//! - `source.map(f)?.sink(print)?` stays alive while `source` is held, even
//!   if the intermediate handles are dropped;
//! - dropping every handle to a dangling sub-pipeline releases it, upstream
//!   links cascading.
//!
//! [`Graph::destroy`] is the explicit teardown: it destroys the downstream
//! subtree first, then detaches from upstreams. Ids are generational, so
//! handles held past a teardown fail with [`FlowError::StaleNode`] instead
//! of addressing a recycled slot.

use crate::backend::Backend;
use crate::bridge::EventLoop;
use crate::error::FlowError;
use crate::node::{NodeId, Operator};
use crate::propagation;
use crate::value::Value;
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};
use std::time::Duration;
use tracing::{debug, trace, warn};

/// Construction-time configuration for a graph.
///
/// Everything is explicit: there is no process-wide loop, pool, or backend
/// a graph could fall back to.
#[derive(Clone, Debug, Default)]
pub struct GraphOptions {
  /// Event loop to bind at construction. Left unset, a loop is created
  /// lazily the first time an operator needs one.
  pub event_loop: Option<Arc<EventLoop>>,
}

/// How a new node acquires its backend tag.
pub(crate) enum BackendSpec {
  /// Take the single distinct backend of the upstreams, if any.
  Inherit,
  /// Tag explicitly (scatter).
  Tag(Arc<dyn Backend>),
  /// Drop the tag (gather): downstream values are concrete again.
  Clear,
}

pub(crate) struct NodeSlot {
  pub(crate) name: String,
  pub(crate) upstreams: Vec<NodeId>,
  pub(crate) downstreams: Vec<NodeId>,
  pub(crate) operator: Arc<Mutex<Box<dyn Operator>>>,
  pub(crate) backend: Option<Arc<dyn Backend>>,
  /// Count of live external `NodeHandle`s.
  external: usize,
  /// Count of alive nodes listing this one as an upstream.
  downstream_refs: usize,
  /// Sinks are kept alive by the graph itself.
  pinned: bool,
}

struct Entry {
  generation: u32,
  slot: Option<NodeSlot>,
}

#[derive(Default)]
pub(crate) struct Topology {
  entries: Vec<Entry>,
  free: Vec<u32>,
}

impl Topology {
  fn slot(&self, id: NodeId) -> Option<&NodeSlot> {
    let entry = self.entries.get(id.index as usize)?;
    if entry.generation != id.generation {
      return None;
    }
    entry.slot.as_ref()
  }

  fn slot_mut(&mut self, id: NodeId) -> Option<&mut NodeSlot> {
    let entry = self.entries.get_mut(id.index as usize)?;
    if entry.generation != id.generation {
      return None;
    }
    entry.slot.as_mut()
  }

  fn alive(&self, id: NodeId) -> bool {
    self.slot(id).is_some()
  }

  /// Frees the slot and hands back its contents; bumps the generation so
  /// stale ids miss.
  fn vacate(&mut self, id: NodeId) -> Option<NodeSlot> {
    let entry = self.entries.get_mut(id.index as usize)?;
    if entry.generation != id.generation {
      return None;
    }
    let slot = entry.slot.take()?;
    entry.generation = entry.generation.wrapping_add(1);
    self.free.push(id.index);
    Some(slot)
  }

  fn allocate(&mut self, slot: NodeSlot) -> NodeId {
    let index = match self.free.pop() {
      Some(index) => index,
      None => {
        self.entries.push(Entry {
          generation: 0,
          slot: None,
        });
        (self.entries.len() - 1) as u32
      }
    };
    let entry = &mut self.entries[index as usize];
    entry.slot = Some(slot);
    NodeId {
      index,
      generation: entry.generation,
    }
  }
}

pub(crate) struct GraphCore {
  topology: RwLock<Topology>,
  event_loop: Mutex<Option<Arc<EventLoop>>>,
}

/// Push-based dataflow graph. Cheap to clone; clones share the arena.
#[derive(Clone)]
pub struct Graph {
  core: Arc<GraphCore>,
}

impl Default for Graph {
  fn default() -> Self {
    Graph::new()
  }
}

impl Graph {
  /// An empty graph with default options.
  pub fn new() -> Self {
    Graph::with_options(GraphOptions::default())
  }

  /// An empty graph with explicit configuration.
  pub fn with_options(options: GraphOptions) -> Self {
    Graph {
      core: Arc::new(GraphCore {
        topology: RwLock::new(Topology::default()),
        event_loop: Mutex::new(options.event_loop),
      }),
    }
  }

  /// A source node: no upstreams, forwards whatever is emitted into it.
  pub fn source(&self) -> NodeHandle {
    let id = self
      .write_topology()
      .allocate(NodeSlot {
        name: "source".to_string(),
        upstreams: Vec::new(),
        downstreams: Vec::new(),
        operator: Arc::new(Mutex::new(
          Box::new(crate::operators::transform::SourceOp) as Box<dyn Operator>
        )),
        backend: None,
        external: 1,
        downstream_refs: 0,
        pinned: false,
      });
    debug!(node = %id, "source created");
    NodeHandle {
      graph: self.clone(),
      id,
    }
  }

  /// Attaches a custom operator below the given upstreams.
  ///
  /// This is the extension seam: anything implementing [`Operator`] can be
  /// wired into a graph alongside the built-in operators.
  ///
  /// # Errors
  ///
  /// [`FlowError::Configuration`] if an upstream handle belongs to a
  /// different graph. Ids are only meaningful within their own arena, so a
  /// foreign handle could alias an unrelated slot here.
  pub fn attach(
    &self,
    name: &str,
    upstreams: &[&NodeHandle],
    operator: impl Operator + 'static,
  ) -> Result<NodeHandle, FlowError> {
    let mut ids = Vec::with_capacity(upstreams.len());
    for handle in upstreams {
      if !self.shares_core(handle.graph()) {
        return Err(FlowError::Configuration(
          "nodes belong to different graphs".into(),
        ));
      }
      ids.push(handle.id);
    }
    self.add_node(
      name.to_string(),
      Box::new(operator),
      ids,
      BackendSpec::Inherit,
      false,
    )
  }

  /// Binds the graph to an event loop.
  ///
  /// # Errors
  ///
  /// [`FlowError::Configuration`] if the graph is already bound to a
  /// different loop.
  pub fn bind_event_loop(&self, event_loop: Arc<EventLoop>) -> Result<(), FlowError> {
    let mut guard = self.lock_event_loop();
    match guard.as_ref() {
      Some(existing) if Arc::ptr_eq(existing, &event_loop) => Ok(()),
      Some(_) => Err(FlowError::Configuration(
        "graph is already bound to a different event loop".into(),
      )),
      None => {
        debug!("graph bound to an event loop");
        *guard = Some(event_loop);
        Ok(())
      }
    }
  }

  /// Explicit teardown: destroys the downstream subtree depth-first, then
  /// detaches `id` from its upstreams. Handles to destroyed nodes turn
  /// stale.
  pub fn destroy(&self, id: NodeId) -> Result<(), FlowError> {
    let mut topology = self.write_topology();
    if !topology.alive(id) {
      return Err(FlowError::StaleNode(id));
    }
    Self::destroy_subtree(&mut topology, id);
    Ok(())
  }

  /// Moves `subscriber` to the front of each named upstream's downstream
  /// list, preserving the relative order of the other subscribers.
  ///
  /// Propagation is depth-first per subscriber, so after promotion the
  /// promoted node's entire downstream subtree runs before any sibling
  /// sees the same value.
  ///
  /// # Errors
  ///
  /// [`FlowError::Configuration`] if `subscriber` is not subscribed to one
  /// of the named upstreams.
  pub fn promote(&self, subscriber: NodeId, relative_to: &[NodeId]) -> Result<(), FlowError> {
    let mut topology = self.write_topology();
    if !topology.alive(subscriber) {
      return Err(FlowError::StaleNode(subscriber));
    }
    for &upstream in relative_to {
      let slot = topology
        .slot_mut(upstream)
        .ok_or(FlowError::StaleNode(upstream))?;
      let Some(position) = slot.downstreams.iter().position(|d| *d == subscriber) else {
        return Err(FlowError::Configuration(format!(
          "node {subscriber} is not a subscriber of `{}`",
          slot.name
        )));
      };
      let moved = slot.downstreams.remove(position);
      slot.downstreams.insert(0, moved);
      trace!(node = %subscriber, upstream = %upstream, "subscriber promoted");
    }
    Ok(())
  }

  /// True while the node is alive.
  pub fn is_alive(&self, id: NodeId) -> bool {
    self.read_topology().alive(id)
  }

  /// The node's upstream list, in positional order.
  pub fn upstreams(&self, id: NodeId) -> Result<Vec<NodeId>, FlowError> {
    let topology = self.read_topology();
    topology
      .slot(id)
      .map(|slot| slot.upstreams.clone())
      .ok_or(FlowError::StaleNode(id))
  }

  /// The node's downstream subscribers, in notification order.
  pub fn downstreams(&self, id: NodeId) -> Result<Vec<NodeId>, FlowError> {
    let topology = self.read_topology();
    topology
      .slot(id)
      .map(|slot| slot.downstreams.clone())
      .ok_or(FlowError::StaleNode(id))
  }

  /// The node's display name.
  pub fn node_name(&self, id: NodeId) -> Result<String, FlowError> {
    let topology = self.read_topology();
    topology
      .slot(id)
      .map(|slot| slot.name.clone())
      .ok_or(FlowError::StaleNode(id))
  }

  pub(crate) fn add_node(
    &self,
    name: String,
    operator: Box<dyn Operator>,
    upstreams: Vec<NodeId>,
    backend: BackendSpec,
    pinned: bool,
  ) -> Result<NodeHandle, FlowError> {
    let mut topology = self.write_topology();
    for &upstream in &upstreams {
      if !topology.alive(upstream) {
        return Err(FlowError::StaleNode(upstream));
      }
    }
    let inherited = Self::single_backend(&topology, &upstreams)?;
    let resolved = match backend {
      BackendSpec::Inherit => inherited,
      BackendSpec::Tag(explicit) => Some(explicit),
      BackendSpec::Clear => None,
    };
    let id = topology.allocate(NodeSlot {
      name,
      upstreams: upstreams.clone(),
      downstreams: Vec::new(),
      operator: Arc::new(Mutex::new(operator)),
      backend: resolved,
      external: 1,
      downstream_refs: 0,
      pinned,
    });
    for upstream in unique_ids(&upstreams) {
      if let Some(slot) = topology.slot_mut(upstream) {
        if !slot.downstreams.contains(&id) {
          slot.downstreams.push(id);
        }
        slot.downstream_refs += 1;
      }
    }
    debug!(node = %id, upstreams = upstreams.len(), "node created");
    Ok(NodeHandle {
      graph: self.clone(),
      id,
    })
  }

  /// The single distinct backend among the upstream tags, if any.
  fn single_backend(
    topology: &Topology,
    upstreams: &[NodeId],
  ) -> Result<Option<Arc<dyn Backend>>, FlowError> {
    let mut found: Option<Arc<dyn Backend>> = None;
    for &upstream in upstreams {
      let Some(tag) = topology.slot(upstream).and_then(|slot| slot.backend.clone()) else {
        continue;
      };
      match &found {
        None => found = Some(tag),
        Some(existing) if Arc::ptr_eq(existing, &tag) => {}
        Some(existing) => {
          return Err(FlowError::Configuration(format!(
            "mixing backends is not supported: `{}` and `{}` feed the same node",
            existing.name(),
            tag.name()
          )));
        }
      }
    }
    Ok(found)
  }

  fn destroy_subtree(topology: &mut Topology, id: NodeId) {
    let downstreams = match topology.slot(id) {
      Some(slot) => slot.downstreams.clone(),
      None => return,
    };
    for downstream in downstreams {
      if topology.alive(downstream) {
        Self::destroy_subtree(topology, downstream);
      }
    }
    let Some(slot) = topology.vacate(id) else {
      return;
    };
    debug!(node = %id, name = %slot.name, "node destroyed");
    let upstreams = unique_ids(&slot.upstreams);
    for &upstream in &upstreams {
      if let Some(upslot) = topology.slot_mut(upstream) {
        upslot.downstreams.retain(|d| *d != id);
        upslot.downstream_refs = upslot.downstream_refs.saturating_sub(1);
      }
    }
    for upstream in upstreams {
      Self::maybe_release(topology, upstream);
    }
  }

  /// Releases a slot whose last reference is gone, cascading up through
  /// the upstream links it owned.
  fn maybe_release(topology: &mut Topology, id: NodeId) {
    let can_release = topology
      .slot(id)
      .is_some_and(|slot| slot.external == 0 && slot.downstream_refs == 0 && !slot.pinned);
    if !can_release {
      return;
    }
    let Some(slot) = topology.vacate(id) else {
      return;
    };
    trace!(node = %id, name = %slot.name, "node released");
    let upstreams = unique_ids(&slot.upstreams);
    for &upstream in &upstreams {
      if let Some(upslot) = topology.slot_mut(upstream) {
        upslot.downstreams.retain(|d| *d != id);
        upslot.downstream_refs = upslot.downstream_refs.saturating_sub(1);
      }
    }
    for upstream in upstreams {
      Self::maybe_release(topology, upstream);
    }
  }

  pub(crate) fn register_external(&self, id: NodeId) {
    if let Some(slot) = self.write_topology().slot_mut(id) {
      slot.external += 1;
    }
  }

  pub(crate) fn release_external(&self, id: NodeId) {
    let mut topology = self.write_topology();
    match topology.slot_mut(id) {
      Some(slot) => slot.external = slot.external.saturating_sub(1),
      None => return,
    }
    Self::maybe_release(&mut topology, id);
  }

  pub(crate) fn set_node_name(&self, id: NodeId, name: &str) -> Result<(), FlowError> {
    let mut topology = self.write_topology();
    match topology.slot_mut(id) {
      Some(slot) => {
        slot.name = name.to_string();
        Ok(())
      }
      None => Err(FlowError::StaleNode(id)),
    }
  }

  pub(crate) fn operator_cell(
    &self,
    id: NodeId,
  ) -> Result<Arc<Mutex<Box<dyn Operator>>>, FlowError> {
    let topology = self.read_topology();
    topology
      .slot(id)
      .map(|slot| Arc::clone(&slot.operator))
      .ok_or(FlowError::StaleNode(id))
  }

  pub(crate) fn backend_of(&self, id: NodeId) -> Result<Option<Arc<dyn Backend>>, FlowError> {
    let topology = self.read_topology();
    topology
      .slot(id)
      .map(|slot| slot.backend.clone())
      .ok_or(FlowError::StaleNode(id))
  }

  /// Name for error and log messages; never fails.
  pub(crate) fn display_name(&self, id: NodeId) -> String {
    self.node_name(id).unwrap_or_else(|_| id.to_string())
  }

  pub(crate) fn event_loop(&self) -> Option<Arc<EventLoop>> {
    self.lock_event_loop().clone()
  }

  /// The bound loop, creating and binding one on first use.
  pub(crate) fn ensure_event_loop(&self) -> Result<Arc<EventLoop>, FlowError> {
    let mut guard = self.lock_event_loop();
    if let Some(existing) = guard.as_ref() {
      return Ok(Arc::clone(existing));
    }
    let created = EventLoop::new()?;
    *guard = Some(Arc::clone(&created));
    debug!("graph lazily bound to a new event loop");
    Ok(created)
  }

  pub(crate) fn downgrade(&self) -> Weak<GraphCore> {
    Arc::downgrade(&self.core)
  }

  /// True when both handles address the same arena.
  pub(crate) fn shares_core(&self, other: &Graph) -> bool {
    Arc::ptr_eq(&self.core, &other.core)
  }

  pub(crate) fn from_core(core: Arc<GraphCore>) -> Graph {
    Graph { core }
  }

  fn read_topology(&self) -> std::sync::RwLockReadGuard<'_, Topology> {
    self
      .core
      .topology
      .read()
      .unwrap_or_else(PoisonError::into_inner)
  }

  fn write_topology(&self) -> std::sync::RwLockWriteGuard<'_, Topology> {
    self
      .core
      .topology
      .write()
      .unwrap_or_else(PoisonError::into_inner)
  }

  fn lock_event_loop(&self) -> std::sync::MutexGuard<'_, Option<Arc<EventLoop>>> {
    self
      .core
      .event_loop
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
  }
}

fn unique_ids(ids: &[NodeId]) -> Vec<NodeId> {
  let mut unique = Vec::with_capacity(ids.len());
  for &id in ids {
    if !unique.contains(&id) {
      unique.push(id);
    }
  }
  unique
}

/// Counted external reference to a node.
///
/// Handles keep their node alive; cloning registers another reference and
/// dropping releases it. Operator constructors live on the handle, so
/// pipelines read top to bottom:
///
/// ```rust,no_run
/// use pulseweave::graph::Graph;
/// use pulseweave::value::{extract, value};
///
/// fn main() -> Result<(), pulseweave::error::FlowError> {
///   let graph = Graph::new();
///   let source = graph.source();
///   let log = source
///     .map(|v| value(extract::<i64>(&v).unwrap_or(0) * 2))?
///     .sink_to_log()?;
///   source.emit(value(21_i64))?;
///   assert_eq!(log.collected::<i64>(), vec![42]);
///   Ok(())
/// }
/// ```
pub struct NodeHandle {
  graph: Graph,
  id: NodeId,
}

impl NodeHandle {
  /// Stable id of the node.
  pub fn id(&self) -> NodeId {
    self.id
  }

  /// The graph this node belongs to.
  pub fn graph(&self) -> &Graph {
    &self.graph
  }

  /// The node's display name.
  pub fn name(&self) -> Result<String, FlowError> {
    self.graph.node_name(self.id)
  }

  /// Renames the node and hands the handle back, for chained wiring.
  pub fn named(self, name: &str) -> Self {
    if let Err(error) = self.graph.set_node_name(self.id, name) {
      warn!(%error, "rename skipped");
    }
    self
  }

  /// Pushes a value into this node and blocks until the full traversal,
  /// deferred branches included, has completed.
  ///
  /// On a graph without an event loop the traversal runs on the calling
  /// thread. On a loop-bound graph the call routes through the blocking
  /// bridge, unless it is already executing inside loop-driven work, in
  /// which case it propagates directly and leaves its asynchronous
  /// branches to complete on their own.
  ///
  /// # Errors
  ///
  /// [`FlowError::Reentrant`] when called from the loop thread outside of
  /// loop-driven work, plus whatever the traversal itself raises.
  pub fn emit(&self, value: Value) -> Result<(), FlowError> {
    propagation::emit(&self.graph, self.id, value, None)
  }

  /// Like [`NodeHandle::emit`], but gives up after `timeout` when bridging
  /// to the event loop. The abandoned traversal keeps running.
  pub fn emit_timeout(&self, value: Value, timeout: Duration) -> Result<(), FlowError> {
    propagation::emit(&self.graph, self.id, value, Some(timeout))
  }

  /// Explicit teardown of this node and its downstream subtree.
  pub fn destroy(&self) -> Result<(), FlowError> {
    self.graph.destroy(self.id)
  }

  /// Promotes this node to the front of each given upstream's subscriber
  /// list.
  pub fn promote(&self, relative_to: &[&NodeHandle]) -> Result<(), FlowError> {
    let ids: Vec<NodeId> = relative_to.iter().map(|handle| handle.id).collect();
    self.graph.promote(self.id, &ids)
  }
}

impl Clone for NodeHandle {
  fn clone(&self) -> Self {
    self.graph.register_external(self.id);
    NodeHandle {
      graph: self.graph.clone(),
      id: self.id,
    }
  }
}

impl Drop for NodeHandle {
  fn drop(&mut self) {
    self.graph.release_external(self.id);
  }
}

impl std::fmt::Debug for NodeHandle {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("NodeHandle")
      .field("id", &self.id)
      .field("name", &self.graph.display_name(self.id))
      .finish()
  }
}
