//! # Backend Operator Test Suite
//!
//! Runs scatter/gather pipelines against the in-process worker pool from a
//! plain test thread, so every `emit` takes the blocking bridge and the
//! assertions below double as end-to-end checks of traversal completion.

use crate::backend::{Backend, ThreadPoolBackend};
use crate::error::FlowError;
use crate::graph::Graph;
use crate::value::{extract, value};
use std::sync::Arc;
use std::time::{Duration, Instant};

fn pool() -> Arc<dyn Backend> {
  Arc::new(ThreadPoolBackend::with_workers(2))
}

#[test]
fn scatter_map_gather_round_trips_in_order() {
  let graph = Graph::new();
  let source = graph.source();
  let log = source
    .scatter(pool())
    .unwrap()
    .map(|v| value(extract::<i64>(&v).unwrap_or(0) + 1))
    .unwrap()
    .gather()
    .unwrap()
    .sink_to_log()
    .unwrap();
  for n in 0..5_i64 {
    source.emit(value(n)).unwrap();
  }
  assert_eq!(log.collected::<i64>(), vec![1, 2, 3, 4, 5]);
}

#[test]
fn chained_backend_stages_need_no_intermediate_gather() {
  let graph = Graph::new();
  let source = graph.source();
  let log = source
    .scatter(pool())
    .unwrap()
    .map(|v| value(extract::<i64>(&v).unwrap_or(0) * 2))
    .unwrap()
    .map(|v| value(extract::<i64>(&v).unwrap_or(0) + 1))
    .unwrap()
    .gather()
    .unwrap()
    .sink_to_log()
    .unwrap();
  source.emit(value(20_i64)).unwrap();
  assert_eq!(log.collected::<i64>(), vec![41]);
}

#[test]
fn backend_filter_suppresses_at_gather() {
  let graph = Graph::new();
  let source = graph.source();
  let log = source
    .scatter(pool())
    .unwrap()
    .filter(|v| extract::<i64>(v).is_some_and(|n| n % 2 == 0))
    .unwrap()
    .gather()
    .unwrap()
    .sink_to_log()
    .unwrap();
  for n in 0..5_i64 {
    source.emit(value(n)).unwrap();
  }
  assert_eq!(log.collected::<i64>(), vec![0, 2, 4]);
}

#[test]
fn suppressed_values_skip_later_backend_stages() {
  let graph = Graph::new();
  let source = graph.source();
  // the map behind the filter must never see a suppressed value
  let log = source
    .scatter(pool())
    .unwrap()
    .filter(|v| extract::<i64>(v).is_some_and(|n| n != 1))
    .unwrap()
    .map(|v| value(extract::<i64>(&v).expect("map ran on a suppressed value") * 10))
    .unwrap()
    .gather()
    .unwrap()
    .sink_to_log()
    .unwrap();
  for n in 0..3_i64 {
    source.emit(value(n)).unwrap();
  }
  assert_eq!(log.collected::<i64>(), vec![0, 20]);
}

#[test]
fn backend_accumulate_chains_pending_state() {
  let graph = Graph::new();
  let source = graph.source();
  let log = source
    .scatter(pool())
    .unwrap()
    .accumulate(
      |state, v| {
        value(extract::<i64>(&state).unwrap_or(0) + extract::<i64>(&v).unwrap_or(0))
      },
      None,
    )
    .unwrap()
    .gather()
    .unwrap()
    .sink_to_log()
    .unwrap();
  for n in 0..3_i64 {
    source.emit(value(n)).unwrap();
  }
  assert_eq!(log.collected::<i64>(), vec![0, 1, 3]);
}

#[test]
fn backend_accumulate_with_state_splits_worker_side() {
  let graph = Graph::new();
  let source = graph.source();
  let log = source
    .scatter(pool())
    .unwrap()
    .accumulate_with_state(
      |state, v| {
        let next =
          value(extract::<i64>(&state).unwrap_or(0) + extract::<i64>(&v).unwrap_or(0));
        (next.clone(), next)
      },
      Some(value(0_i64)),
    )
    .unwrap()
    .gather()
    .unwrap()
    .sink_to_log()
    .unwrap();
  for n in 1..=3_i64 {
    source.emit(value(n)).unwrap();
  }
  assert_eq!(log.collected::<i64>(), vec![1, 3, 6]);
}

#[test]
fn mixing_backends_into_one_node_is_a_configuration_error() {
  let graph = Graph::new();
  let a = graph.source();
  let b = graph.source();
  let left = a.scatter(pool()).unwrap();
  let right = b.scatter(pool()).unwrap();
  assert!(matches!(
    left.zip(&[&right]),
    Err(FlowError::Configuration(_))
  ));
}

#[test]
fn one_backend_on_both_upstreams_is_fine() {
  let graph = Graph::new();
  let backend = pool();
  let a = graph.source();
  let b = graph.source();
  let left = a.scatter(Arc::clone(&backend)).unwrap();
  let right = b.scatter(backend).unwrap();
  let log = left.zip(&[&right]).unwrap().gather().unwrap().sink_to_log().unwrap();
  a.emit(value(1_i64)).unwrap();
  b.emit(value(2_i64)).unwrap();
  assert_eq!(log.len(), 1);
}

#[test]
fn gather_without_a_backend_tag_is_a_configuration_error() {
  let graph = Graph::new();
  let source = graph.source();
  assert!(matches!(
    source.gather(),
    Err(FlowError::Configuration(_))
  ));
}

#[test]
fn errors_below_a_gather_surface_in_the_emitting_thread() {
  let graph = Graph::new();
  let source = graph.source();
  let _log = source
    .scatter(pool())
    .unwrap()
    .gather()
    .unwrap()
    .pluck(0)
    .unwrap()
    .sink_to_log()
    .unwrap();
  // the pluck runs on the event loop, inside a deferred branch; its
  // failure still reaches the bridged caller
  assert!(matches!(
    source.emit(value(3_i64)),
    Err(FlowError::Operator { .. })
  ));
}

#[test]
fn buffer_preserves_per_edge_order_across_the_decoupling() {
  let graph = Graph::new();
  let source = graph.source();
  let log = source.buffer(2).unwrap().sink_to_log().unwrap();
  for n in 0..6_i64 {
    source.emit(value(n)).unwrap();
  }
  // emits return once enqueued; the drain task catches up on its own
  let deadline = Instant::now() + Duration::from_secs(5);
  while log.len() < 6 && Instant::now() < deadline {
    std::thread::sleep(Duration::from_millis(5));
  }
  assert_eq!(log.collected::<i64>(), vec![0, 1, 2, 3, 4, 5]);
}
