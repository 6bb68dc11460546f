//! Per-installer cache of tracked versions.
//!
//! Saves a tracker round-trip on every request once a component is known to
//! be installed. Only known versions are cached; an absent row is re-read on
//! each call. The owner decides when entries go stale.

use std::{
  collections::HashMap,
  sync::{Mutex, MutexGuard, PoisonError},
};

use crate::schema::{ComponentId, Version};

#[derive(Debug, Default)]
pub struct VersionCache {
  entries: Mutex<HashMap<ComponentId, Version>>,
}

impl VersionCache {
  pub fn new() -> Self { Self::default() }

  fn lock(&self) -> MutexGuard<'_, HashMap<ComponentId, Version>> {
    self.entries.lock().unwrap_or_else(PoisonError::into_inner)
  }

  pub fn get(&self, component: &ComponentId) -> Option<Version> {
    self.lock().get(component).copied()
  }

  pub fn store(&self, component: &ComponentId, version: Version) {
    self.lock().insert(component.clone(), version);
  }

  pub fn invalidate(&self, component: &ComponentId) { self.lock().remove(component); }

  pub fn invalidate_all(&self) { self.lock().clear(); }

  pub fn len(&self) -> usize { self.lock().len() }

  pub fn is_empty(&self) -> bool { self.lock().is_empty() }
}
