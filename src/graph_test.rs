//! # Graph Test Suite
//!
//! Covers the arena lifecycle (handle counting, sink pinning, explicit
//! teardown, generational staleness), subscriber promotion, read-only
//! introspection, event-loop binding, and the custom-operator seam.

use crate::bridge::EventLoop;
use crate::error::FlowError;
use crate::graph::{Graph, GraphOptions};
use crate::node::{Emission, NodeId, Operator};
use crate::value::{Value, extract, value};

struct Doubler;

impl Operator for Doubler {
  fn update(&mut self, value_in: Value, _source: NodeId) -> Result<Emission, FlowError> {
    let n = extract::<i64>(&value_in).unwrap_or(0);
    Ok(Emission::One(value(n * 2)))
  }
}

#[test]
fn values_flow_source_to_sink() {
  let graph = Graph::new();
  let source = graph.source();
  let log = source.sink_to_log().unwrap();
  source.emit(value(1_i64)).unwrap();
  source.emit(value(2_i64)).unwrap();
  assert_eq!(log.collected::<i64>(), vec![1, 2]);
}

#[test]
fn sinks_pin_their_pipeline() {
  let graph = Graph::new();
  let source = graph.source();
  let log = {
    // both intermediate handles are dropped at the end of this block
    let doubled = source.map(|v| value(extract::<i64>(&v).unwrap_or(0) * 2)).unwrap();
    doubled.sink_to_log().unwrap()
  };
  source.emit(value(21_i64)).unwrap();
  assert_eq!(log.collected::<i64>(), vec![42]);
}

#[test]
fn dropping_every_handle_releases_a_dangling_branch() {
  let graph = Graph::new();
  let source = graph.source();
  let mapped = source.map(|v| v).unwrap();
  let mapped_id = mapped.id();
  assert_eq!(graph.downstreams(source.id()).unwrap(), vec![mapped_id]);
  drop(mapped);
  assert!(!graph.is_alive(mapped_id));
  assert!(graph.downstreams(source.id()).unwrap().is_empty());
}

#[test]
fn released_branches_cascade_upstream() {
  let graph = Graph::new();
  let source = graph.source();
  let source_id = source.id();
  let tail = source.map(|v| v).unwrap().map(|v| v).unwrap();
  drop(source);
  // the chain owns its source, so it outlives the dropped handle
  assert!(graph.is_alive(source_id));
  drop(tail);
  assert!(!graph.is_alive(source_id));
}

#[test]
fn destroy_tears_down_the_downstream_subtree() {
  let graph = Graph::new();
  let source = graph.source();
  let mapped = source.map(|v| v).unwrap();
  let log = mapped.sink_to_log().unwrap();
  let mapped_id = mapped.id();
  mapped.destroy().unwrap();
  assert!(!graph.is_alive(mapped_id));
  assert!(graph.downstreams(source.id()).unwrap().is_empty());
  // the source itself survives and emits into nothing
  source.emit(value(5_i64)).unwrap();
  assert!(log.is_empty());
}

#[test]
fn stale_handles_fail_instead_of_hitting_recycled_slots() {
  let graph = Graph::new();
  let source = graph.source();
  let doomed = source.map(|v| v).unwrap();
  let doomed_id = doomed.id();
  doomed.destroy().unwrap();
  // reuse the freed slot
  let replacement = graph.source();
  assert_eq!(replacement.id().index, doomed_id.index);
  assert_ne!(replacement.id(), doomed_id);
  assert!(matches!(
    graph.destroy(doomed_id),
    Err(FlowError::StaleNode(id)) if id == doomed_id
  ));
}

#[test]
fn emitting_into_a_destroyed_node_is_stale() {
  let graph = Graph::new();
  let source = graph.source();
  source.destroy().unwrap();
  assert!(matches!(
    source.emit(value(0_i64)),
    Err(FlowError::StaleNode(_))
  ));
}

#[test]
fn promotion_moves_a_subscriber_to_the_front() {
  let graph = Graph::new();
  let source = graph.source();
  let first = source.map(|v| v).unwrap();
  let second = source.map(|v| v).unwrap();
  let third = source.map(|v| v).unwrap();
  assert_eq!(
    graph.downstreams(source.id()).unwrap(),
    vec![first.id(), second.id(), third.id()]
  );
  third.promote(&[&source]).unwrap();
  // relative order of the others is preserved
  assert_eq!(
    graph.downstreams(source.id()).unwrap(),
    vec![third.id(), first.id(), second.id()]
  );
}

#[test]
fn promoting_a_non_subscriber_is_a_configuration_error() {
  let graph = Graph::new();
  let source = graph.source();
  let other = graph.source();
  let sub = other.map(|v| v).unwrap();
  assert!(matches!(
    sub.promote(&[&source]),
    Err(FlowError::Configuration(_))
  ));
}

#[test]
fn introspection_reads_names_and_links() {
  let graph = Graph::new();
  let source = graph.source().named("events");
  let joined = source.zip(&[&source]).unwrap();
  assert_eq!(graph.node_name(source.id()).unwrap(), "events");
  assert_eq!(graph.node_name(joined.id()).unwrap(), "zip");
  assert_eq!(
    graph.upstreams(joined.id()).unwrap(),
    vec![source.id(), source.id()]
  );
  // a subscriber appears once per upstream's downstream list
  assert_eq!(graph.downstreams(source.id()).unwrap(), vec![joined.id()]);
}

#[test]
fn custom_operators_attach_alongside_builtins() {
  let graph = Graph::new();
  let source = graph.source();
  let doubled = graph.attach("doubler", &[&source], Doubler).unwrap();
  let log = doubled.sink_to_log().unwrap();
  source.emit(value(21_i64)).unwrap();
  assert_eq!(log.collected::<i64>(), vec![42]);
  assert_eq!(graph.node_name(doubled.id()).unwrap(), "doubler");
}

#[test]
fn attaching_under_a_foreign_upstream_is_a_configuration_error() {
  let graph_a = Graph::new();
  let graph_b = Graph::new();
  let foreign = graph_a.source();
  // graph_b has a node at the same index, so the raw id would alias it
  let _local = graph_b.source();
  assert!(matches!(
    graph_b.attach("relay", &[&foreign], Doubler),
    Err(FlowError::Configuration(_))
  ));
}

#[test]
fn joining_across_graphs_is_a_configuration_error() {
  let left = Graph::new().source();
  let right = Graph::new().source();
  assert!(matches!(
    left.zip(&[&right]),
    Err(FlowError::Configuration(_))
  ));
}

#[test]
fn rebinding_to_a_second_loop_is_a_configuration_error() {
  let graph = Graph::with_options(GraphOptions {
    event_loop: Some(EventLoop::new().unwrap()),
  });
  let other = EventLoop::new().unwrap();
  assert!(matches!(
    graph.bind_event_loop(other),
    Err(FlowError::Configuration(_))
  ));
}

#[test]
fn rebinding_the_same_loop_is_fine() {
  let event_loop = EventLoop::new().unwrap();
  let graph = Graph::with_options(GraphOptions {
    event_loop: Some(event_loop.clone()),
  });
  graph.bind_event_loop(event_loop).unwrap();
}
