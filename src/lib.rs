//! # PulseWeave
//!
//! Push-based reactive dataflow graphs in pure Rust.
//!
//! PulseWeave wires operator nodes into a graph at construction time and
//! drives values through it depth-first: one `emit` call completes a
//! subscriber's entire downstream subtree before the next sibling sees the
//! value. Joins pair values across streams, `promote` pins which subscriber
//! runs first, and the backend layer moves per-value work onto worker pools
//! while propagation itself stays synchronous.
//!
//! ## Key Pieces
//!
//! - **Graph & handles**: explicit construction, counted handles, pinned
//!   sinks, generational ids that turn stale on teardown
//! - **Joins**: combine-latest, zip, zip-latest, union, plus dedup/filter
//! - **Execution bridge**: a dedicated event-loop thread and a blocking
//!   `run_sync` path so plain threads can drive async pipelines
//! - **Backends**: `scatter`/`gather` around a worker pool, with pending
//!   task handles flowing through the graph as ordinary values
//!
//! ## Quick Start
//!
//! ```rust
//! use pulseweave::graph::Graph;
//! use pulseweave::value::{extract, value};
//!
//! # fn main() -> Result<(), pulseweave::error::FlowError> {
//! let graph = Graph::new();
//! let source = graph.source();
//! let log = source
//!   .map(|v| value(extract::<i64>(&v).unwrap_or(0) + 1))?
//!   .sink_to_log()?;
//! source.emit(value(41_i64))?;
//! assert_eq!(log.collected::<i64>(), vec![42]);
//! # Ok(())
//! # }
//! ```

// Documentation enforcement - treat missing docs as errors
#![deny(missing_docs)]

/// Backend contract and the in-process thread-pool backend.
pub mod backend;
/// Event loop thread and the blocking bridge into it.
pub mod bridge;
/// Error taxonomy for graph construction and propagation.
pub mod error;
/// Graph arena, node handles, and lifecycle management.
pub mod graph;
/// Core operator trait and emission types.
pub mod node;
/// Built-in operators and the fluent constructors on node handles.
pub mod operators;
/// Cloneable handles to pending backend results.
pub mod task;
/// Dynamically typed values flowing through a graph.
pub mod value;

mod propagation;

#[cfg(test)]
mod graph_test;
