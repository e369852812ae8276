//! # Values
//!
//! Everything flowing through a graph is a [`Value`]: a cheaply cloneable,
//! dynamically typed `Arc<dyn Any + Send + Sync>`. Operators that work on
//! several upstream values at once (zip, combine-latest, starmap) exchange
//! *tuple values*, which are plain `Vec<Value>` payloads built with
//! [`tuple`] and inspected with [`as_tuple`].
//!
//! A reserved suppress sentinel ([`suppressed`] / [`is_suppressed`]) marks a
//! value as "computed but intentionally dropped". It exists for asynchronous
//! predicates: a backend filter cannot simply emit nothing, because its
//! decision lives inside a future, so it resolves to the sentinel and the
//! gather stage drops it.

use std::any::Any;
use std::sync::{Arc, Mutex, PoisonError};

/// Dynamically typed payload flowing along graph edges.
pub type Value = Arc<dyn Any + Send + Sync>;

/// Wraps a concrete value for emission into a graph.
pub fn value<T: Send + Sync + 'static>(inner: T) -> Value {
  Arc::new(inner)
}

/// Borrows the concrete payload, if `value` holds a `T`.
pub fn downcast<T: 'static>(value: &Value) -> Option<&T> {
  (**value).downcast_ref::<T>()
}

/// Clones the concrete payload out of a value.
pub fn extract<T: Clone + 'static>(value: &Value) -> Option<T> {
  downcast::<T>(value).cloned()
}

/// Builds a tuple value from per-position elements.
pub fn tuple(items: Vec<Value>) -> Value {
  Arc::new(items)
}

/// Borrows the elements of a tuple value, if `value` is one.
pub fn as_tuple(value: &Value) -> Option<&[Value]> {
  downcast::<Vec<Value>>(value).map(Vec::as_slice)
}

/// Marker payload for the suppress sentinel.
struct Suppressed;

/// The suppress sentinel: computed, intentionally not propagated.
pub fn suppressed() -> Value {
  Arc::new(Suppressed)
}

/// True when `value` is the suppress sentinel.
pub fn is_suppressed(value: &Value) -> bool {
  downcast::<Suppressed>(value).is_some()
}

/// Shared, thread-safe log of values, fed by `sink_to_log` nodes.
///
/// Cloning the log clones the handle, not the contents; every clone sees
/// the same entries.
#[derive(Clone, Default)]
pub struct ValueLog {
  entries: Arc<Mutex<Vec<Value>>>,
}

impl ValueLog {
  /// An empty log.
  pub fn new() -> Self {
    Self::default()
  }

  /// Appends a value. Custom sinks built outside the crate write through
  /// this, the same way `sink_to_log` does.
  pub fn push(&self, value: Value) {
    self
      .entries
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .push(value);
  }

  /// Number of values recorded so far.
  pub fn len(&self) -> usize {
    self
      .entries
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .len()
  }

  /// True when nothing has been recorded.
  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// Copies out the raw values in arrival order.
  pub fn snapshot(&self) -> Vec<Value> {
    self
      .entries
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .clone()
  }

  /// Copies out every value holding a `T`, in arrival order. Values of
  /// other types are skipped.
  pub fn collected<T: Clone + 'static>(&self) -> Vec<T> {
    self.snapshot().iter().filter_map(extract::<T>).collect()
  }
}
