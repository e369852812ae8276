//! # Deduplication
//!
//! `unique` suppresses values whose key has been seen before, remembering
//! at most `history` keys. Hashable keys live in an insertion-ordered map
//! with oldest-first eviction; keys that only support equality fall back to
//! a bounded FIFO list scanned linearly. A repeat sighting never refreshes
//! a key's position, so under a tight history a long-absent key is
//! forgotten even while it keeps arriving.

use super::KeyFn;
use crate::error::FlowError;
use crate::node::{Emission, NodeId, Operator};
use crate::value::Value;
use indexmap::IndexMap;
use std::any::Any;
use std::collections::VecDeque;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::Arc;

type KeyCell = Arc<dyn Any + Send + Sync>;

enum Lookup {
  Hashed(u64),
  Scanned,
}

/// Key produced by a `unique_by` callback.
///
/// [`DedupKey::hashed`] keys are matched through the recency map and should
/// be preferred; [`DedupKey::opaque`] accepts any `PartialEq` type at the
/// cost of a linear scan over the remembered window.
pub struct DedupKey {
  lookup: Lookup,
  cell: KeyCell,
  eq: fn(&KeyCell, &KeyCell) -> bool,
}

impl DedupKey {
  /// A key matched by hash and equality.
  pub fn hashed<K>(key: K) -> Self
  where
    K: Hash + Eq + Send + Sync + 'static,
  {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    DedupKey {
      lookup: Lookup::Hashed(hasher.finish()),
      cell: Arc::new(key),
      eq: cell_eq::<K>,
    }
  }

  /// A key matched by equality alone.
  pub fn opaque<K>(key: K) -> Self
  where
    K: PartialEq + Send + Sync + 'static,
  {
    DedupKey {
      lookup: Lookup::Scanned,
      cell: Arc::new(key),
      eq: cell_eq::<K>,
    }
  }
}

fn cell_eq<K: PartialEq + 'static>(a: &KeyCell, b: &KeyCell) -> bool {
  match (a.downcast_ref::<K>(), b.downcast_ref::<K>()) {
    (Some(left), Some(right)) => left == right,
    _ => false,
  }
}

impl PartialEq for DedupKey {
  fn eq(&self, other: &Self) -> bool {
    (self.eq)(&self.cell, &other.cell)
  }
}

// Only hashed keys enter the map, and their inner type carries a real `Eq`
// bound from the constructor.
impl Eq for DedupKey {}

impl Hash for DedupKey {
  fn hash<H: Hasher>(&self, state: &mut H) {
    let hash = match self.lookup {
      Lookup::Hashed(hash) => hash,
      Lookup::Scanned => 0,
    };
    state.write_u64(hash);
  }
}

impl std::fmt::Debug for DedupKey {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self.lookup {
      Lookup::Hashed(hash) => write!(f, "DedupKey::Hashed({hash:#x})"),
      Lookup::Scanned => write!(f, "DedupKey::Opaque"),
    }
  }
}

/// Bounded memory of keys already seen.
struct DedupCache {
  capacity: Option<usize>,
  recent: IndexMap<DedupKey, ()>,
  scanned: VecDeque<DedupKey>,
}

impl DedupCache {
  fn new(capacity: Option<usize>) -> Self {
    DedupCache {
      capacity,
      recent: IndexMap::new(),
      scanned: VecDeque::new(),
    }
  }

  /// Records the key; true on first sighting within the remembered window.
  fn observe(&mut self, key: DedupKey) -> bool {
    match key.lookup {
      Lookup::Hashed(_) => {
        if self.recent.contains_key(&key) {
          return false;
        }
        if let Some(capacity) = self.capacity {
          while self.recent.len() >= capacity.max(1) {
            self.recent.shift_remove_index(0);
          }
        }
        self.recent.insert(key, ());
        true
      }
      Lookup::Scanned => {
        if self.scanned.iter().any(|seen| *seen == key) {
          return false;
        }
        if let Some(capacity) = self.capacity {
          while self.scanned.len() >= capacity.max(1) {
            self.scanned.pop_front();
          }
        }
        self.scanned.push_back(key);
        true
      }
    }
  }
}

pub(crate) struct UniqueOp {
  key_fn: KeyFn,
  cache: DedupCache,
}

impl UniqueOp {
  pub(crate) fn new(key_fn: KeyFn, history: Option<usize>) -> Self {
    UniqueOp {
      key_fn,
      cache: DedupCache::new(history),
    }
  }
}

impl Operator for UniqueOp {
  fn update(&mut self, value: Value, _source: NodeId) -> Result<Emission, FlowError> {
    let key = (self.key_fn)(&value)?;
    if self.cache.observe(key) {
      Ok(Emission::One(value))
    } else {
      Ok(Emission::None)
    }
  }
}
