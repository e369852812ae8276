//! End-to-end pipeline tests against the public API: synchronous graphs,
//! loop-bound graphs driven from plain threads, and worker-pool backends.

use pulseweave::backend::ThreadPoolBackend;
use pulseweave::bridge::EventLoop;
use pulseweave::error::{BackendError, FlowError};
use pulseweave::graph::{Graph, GraphOptions};
use pulseweave::node::{Emission, NodeId, Operator};
use pulseweave::value::{Value, as_tuple, extract, value};
use std::sync::Arc;
use std::time::Duration;

fn init_tracing() {
  let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

#[test]
fn synchronous_pipeline_end_to_end() {
  init_tracing();
  let graph = Graph::new();
  let source = graph.source();
  let log = source
    .map(|v| value(extract::<i64>(&v).unwrap_or(0) * 3))
    .unwrap()
    .filter(|v| extract::<i64>(v).is_some_and(|n| n > 3))
    .unwrap()
    .sink_to_log()
    .unwrap();
  for n in 0..4_i64 {
    source.emit(value(n)).unwrap();
  }
  assert_eq!(log.collected::<i64>(), vec![6, 9]);
}

#[test]
fn join_then_scatter_then_gather() {
  init_tracing();
  let graph = Graph::new();
  let numbers = graph.source();
  let words = graph.source();
  let log = numbers
    .zip(&[&words])
    .unwrap()
    .scatter(Arc::new(ThreadPoolBackend::with_workers(2)))
    .unwrap()
    .starmap(|items: &[Value]| {
      let n = extract::<i64>(&items[0]).unwrap_or(0);
      let word = extract::<&str>(&items[1]).unwrap_or("");
      value(format!("{word}-{n}"))
    })
    .unwrap()
    .gather()
    .unwrap()
    .sink_to_log()
    .unwrap();
  numbers.emit(value(1_i64)).unwrap();
  numbers.emit(value(2_i64)).unwrap();
  words.emit(value("alpha")).unwrap();
  words.emit(value("beta")).unwrap();
  assert_eq!(
    log.collected::<String>(),
    vec!["alpha-1".to_string(), "beta-2".to_string()]
  );
}

#[test]
fn emits_from_many_threads_serialize_through_the_bridge() {
  init_tracing();
  let graph = Graph::with_options(GraphOptions {
    event_loop: Some(EventLoop::new().unwrap()),
  });
  let source = graph.source();
  let log = source.sink_to_log().unwrap();
  let workers: Vec<_> = (0..4_i64)
    .map(|n| {
      let source = source.clone();
      std::thread::spawn(move || source.emit(value(n)).unwrap())
    })
    .collect();
  for worker in workers {
    worker.join().unwrap();
  }
  let mut seen = log.collected::<i64>();
  seen.sort_unstable();
  assert_eq!(seen, vec![0, 1, 2, 3]);
}

#[test]
fn nested_emission_from_inside_loop_work_skips_the_bridge() {
  init_tracing();
  let graph = Graph::with_options(GraphOptions {
    event_loop: Some(EventLoop::new().unwrap()),
  });
  let outer = graph.source();
  let inner = graph.source();
  let log = inner.sink_to_log().unwrap();
  let feeder = inner.clone();
  let _relay = outer
    .sink(move |v| {
      // runs on the loop thread, inside bridged work
      feeder.emit(v).unwrap();
    })
    .unwrap();
  outer.emit(value(11_i64)).unwrap();
  assert_eq!(log.collected::<i64>(), vec![11]);
}

#[test]
fn emitting_from_raw_scheduled_work_is_reentrant() {
  init_tracing();
  let event_loop = EventLoop::new().unwrap();
  let graph = Graph::with_options(GraphOptions {
    event_loop: Some(event_loop.clone()),
  });
  let source = graph.source();
  let verdict = event_loop
    .schedule(async move { source.emit(value(1_i64)) })
    .join()
    .unwrap();
  assert!(matches!(verdict, Err(FlowError::Reentrant)));
}

#[test]
fn bridged_timeout_abandons_the_slow_branch() {
  init_tracing();
  let graph = Graph::new();
  let source = graph.source();
  let _log = source
    .scatter(Arc::new(ThreadPoolBackend::with_workers(1)))
    .unwrap()
    .map(|v| {
      std::thread::sleep(Duration::from_millis(500));
      v
    })
    .unwrap()
    .gather()
    .unwrap()
    .sink_to_log()
    .unwrap();
  let verdict = source.emit_timeout(value(1_i64), Duration::from_millis(30));
  assert!(matches!(verdict, Err(FlowError::Timeout(_))));
}

struct FailingOp {
  error: BackendError,
}

impl Operator for FailingOp {
  fn update(&mut self, _value: Value, _source: NodeId) -> Result<Emission, FlowError> {
    Err(FlowError::Backend(self.error.clone()))
  }
}

#[test]
fn bridged_errors_keep_their_identity() {
  init_tracing();
  let original = BackendError::message("storage rejected the batch");
  let graph = Graph::with_options(GraphOptions {
    event_loop: Some(EventLoop::new().unwrap()),
  });
  let source = graph.source();
  let failing = graph
    .attach(
      "flaky-store",
      &[&source],
      FailingOp {
        error: original.clone(),
      },
    )
    .unwrap();
  let _pin = failing.sink(|_| {}).unwrap();
  match source.emit(value(1_i64)) {
    Err(FlowError::Backend(surfaced)) => assert!(surfaced.same_cause(&original)),
    other => panic!("expected the backend error back, got {other:?}"),
  }
}

#[test]
fn promotion_orders_persistence_before_processing() {
  init_tracing();
  let graph = Graph::new();
  let source = graph.source();
  let order = pulseweave::value::ValueLog::new();
  let persist = order.clone();
  let process = order.clone();
  let _processor = source
    .sink(move |v| process.push(value(format!("process {}", extract::<i64>(&v).unwrap_or(0)))))
    .unwrap();
  let persister = source
    .sink(move |v| persist.push(value(format!("persist {}", extract::<i64>(&v).unwrap_or(0)))))
    .unwrap();
  persister.promote(&[&source]).unwrap();
  source.emit(value(7_i64)).unwrap();
  assert_eq!(
    order.collected::<String>(),
    vec!["persist 7".to_string(), "process 7".to_string()]
  );
}

#[test]
fn combine_latest_drives_a_labelling_pipeline() {
  init_tracing();
  let graph = Graph::new();
  let readings = graph.source();
  let labels = graph.source();
  let log = readings
    .combine_latest(&[&labels])
    .emit_on(&readings)
    .build()
    .unwrap()
    .sink_to_log()
    .unwrap();
  labels.emit(value("celsius")).unwrap();
  readings.emit(value(21_i64)).unwrap();
  readings.emit(value(22_i64)).unwrap();
  labels.emit(value("fahrenheit")).unwrap();
  readings.emit(value(70_i64)).unwrap();
  let rendered: Vec<String> = log
    .snapshot()
    .iter()
    .filter_map(|entry| {
      let items = as_tuple(entry)?;
      Some(format!(
        "{} {}",
        extract::<i64>(&items[0])?,
        extract::<&str>(&items[1])?
      ))
    })
    .collect();
  assert_eq!(rendered, vec!["21 celsius", "22 celsius", "70 fahrenheit"]);
}
