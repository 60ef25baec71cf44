//! Per-key coordination for store writers.
//!
//! Each key owns an async mutex around a memo slot. The first caller to take
//! the lock does the work and fills the slot; callers queued behind it find
//! the slot filled and reuse the value instead of repeating the work.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::Mutex as AsyncMutex;

use crate::util::hash::ObjectHash;

pub type Slot<V> = Arc<AsyncMutex<Option<V>>>;

#[derive(Debug)]
pub struct KeyedLocks<V> {
  slots: Mutex<HashMap<ObjectHash, Slot<V>>>,
}

impl<V> Default for KeyedLocks<V> {
  fn default() -> Self {
    Self {
      slots: Mutex::new(HashMap::new()),
    }
  }
}

impl<V> KeyedLocks<V> {
  pub fn new() -> Self {
    Self::default()
  }

  /// The slot for `key`, created empty on first use.
  pub fn slot(&self, key: &ObjectHash) -> Slot<V> {
    let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
    slots
      .entry(key.clone())
      .or_insert_with(|| Arc::new(AsyncMutex::new(None)))
      .clone()
  }

  /// Number of keys seen so far.
  pub fn len(&self) -> usize {
    self.slots.lock().unwrap_or_else(|e| e.into_inner()).len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}
