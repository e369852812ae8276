//! # Join Operators
//!
//! Multi-input operators pairing values across upstreams. Each join fixes
//! its upstream list at construction; tuple output is ordered by upstream
//! registration position, and an upstream registered at several positions
//! fills all of them per delivery.

use crate::error::FlowError;
use crate::node::{Emission, NodeId, Operator};
use crate::value::{Value, tuple};
use std::collections::{HashMap, HashSet, VecDeque};

fn positions_of(upstreams: &[NodeId]) -> HashMap<NodeId, Vec<usize>> {
  let mut positions: HashMap<NodeId, Vec<usize>> = HashMap::new();
  for (index, &upstream) in upstreams.iter().enumerate() {
    positions.entry(upstream).or_default().push(index);
  }
  positions
}

/// Emits the tuple of most-recent values whenever a triggering upstream
/// updates and every position has been filled at least once.
///
/// Non-triggering upstreams still update their slot and clear it from the
/// missing set; once a position has been satisfied it stays satisfied.
pub(crate) struct CombineLatestOp {
  positions: HashMap<NodeId, Vec<usize>>,
  last: Vec<Option<Value>>,
  missing: HashSet<usize>,
  emit_on: HashSet<NodeId>,
}

impl CombineLatestOp {
  pub(crate) fn new(upstreams: &[NodeId], emit_on: &[NodeId]) -> Self {
    CombineLatestOp {
      positions: positions_of(upstreams),
      last: vec![None; upstreams.len()],
      missing: (0..upstreams.len()).collect(),
      emit_on: emit_on.iter().copied().collect(),
    }
  }
}

impl Operator for CombineLatestOp {
  fn update(&mut self, value: Value, source: NodeId) -> Result<Emission, FlowError> {
    let Some(slots) = self.positions.get(&source) else {
      return Ok(Emission::None);
    };
    for &slot in slots {
      self.last[slot] = Some(value.clone());
      self.missing.remove(&slot);
    }
    if !self.missing.is_empty() || !self.emit_on.contains(&source) {
      return Ok(Emission::None);
    }
    match self.last.iter().cloned().collect::<Option<Vec<Value>>>() {
      Some(elements) => Ok(Emission::One(tuple(elements))),
      None => Ok(Emission::None),
    }
  }
}

/// Pairs upstream values strictly first-in-first-out.
///
/// Every delivery is queued at its upstream's position; whenever all queues
/// are non-empty the oldest element of each pops into a tuple, so one
/// delivery can flush a burst of tuples.
pub(crate) struct ZipOp {
  positions: HashMap<NodeId, Vec<usize>>,
  queues: Vec<VecDeque<Value>>,
}

impl ZipOp {
  pub(crate) fn new(upstreams: &[NodeId]) -> Self {
    ZipOp {
      positions: positions_of(upstreams),
      queues: upstreams.iter().map(|_| VecDeque::new()).collect(),
    }
  }
}

impl Operator for ZipOp {
  fn update(&mut self, value: Value, source: NodeId) -> Result<Emission, FlowError> {
    let Some(slots) = self.positions.get(&source) else {
      return Ok(Emission::None);
    };
    for &slot in slots {
      self.queues[slot].push_back(value.clone());
    }
    let mut burst = Vec::new();
    while self.queues.iter().all(|queue| !queue.is_empty()) {
      let mut elements = Vec::with_capacity(self.queues.len());
      for queue in &mut self.queues {
        if let Some(element) = queue.pop_front() {
          elements.push(element);
        }
      }
      burst.push(tuple(elements));
    }
    if burst.is_empty() {
      Ok(Emission::None)
    } else {
      Ok(Emission::Many(burst))
    }
  }
}

/// Zip that is lossless for one upstream and latest-only for the rest.
///
/// Values from the lossless upstream queue up; the others overwrite their
/// slot. After any delivery, queued lossless values drain for as long as
/// every latest slot has been filled at least once, each draining into a
/// tuple with the lossless value at position zero.
pub(crate) struct ZipLatestOp {
  lossless: NodeId,
  positions: HashMap<NodeId, Vec<usize>>,
  queue: VecDeque<Value>,
  latest: Vec<Option<Value>>,
}

impl ZipLatestOp {
  pub(crate) fn new(lossless: NodeId, others: &[NodeId]) -> Self {
    ZipLatestOp {
      lossless,
      positions: positions_of(others),
      queue: VecDeque::new(),
      latest: vec![None; others.len()],
    }
  }
}

impl Operator for ZipLatestOp {
  fn update(&mut self, value: Value, source: NodeId) -> Result<Emission, FlowError> {
    if source == self.lossless {
      self.queue.push_back(value);
    } else if let Some(slots) = self.positions.get(&source) {
      for &slot in slots {
        self.latest[slot] = Some(value.clone());
      }
    } else {
      return Ok(Emission::None);
    }
    let mut burst = Vec::new();
    while !self.queue.is_empty() && self.latest.iter().all(Option::is_some) {
      let Some(head) = self.queue.pop_front() else {
        break;
      };
      let mut elements = Vec::with_capacity(1 + self.latest.len());
      elements.push(head);
      for slot in &self.latest {
        if let Some(latest) = slot {
          elements.push(latest.clone());
        }
      }
      burst.push(tuple(elements));
    }
    if burst.is_empty() {
      Ok(Emission::None)
    } else {
      Ok(Emission::Many(burst))
    }
  }
}

/// Forwards any value from any upstream immediately, in arrival order.
pub(crate) struct UnionOp;

impl Operator for UnionOp {
  fn update(&mut self, value: Value, _source: NodeId) -> Result<Emission, FlowError> {
    Ok(Emission::One(value))
  }
}
