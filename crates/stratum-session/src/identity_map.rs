//! The identity map: one live instance per (type, identity).
//!
//! Each type gets its own lock-guarded map, so construction of a new
//! identity is serialized per type while lookups for different types
//! never contend. Reconciliation of racily-created duplicates happens at
//! insertion: the first writer wins and the loser is discarded before
//! any caller can observe it.

use crate::object::PersistentObject;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use stratum_core::Identity;
use stratum_schema::TypeId;

/// Process-wide cache of live instances, sharded per type.
#[derive(Debug)]
pub struct IdentityMap {
    shards: Vec<Mutex<HashMap<Identity, Arc<PersistentObject>>>>,
}

impl IdentityMap {
    /// Create a map with one shard per registered type.
    pub fn new(type_count: usize) -> Self {
        Self {
            shards: (0..type_count).map(|_| Mutex::new(HashMap::new())).collect(),
        }
    }

    /// Probe for a live instance without constructing one.
    pub fn lookup(&self, type_id: TypeId, identity: &Identity) -> Option<Arc<PersistentObject>> {
        self.shards[type_id.0].lock().get(identity).cloned()
    }

    /// Return the live instance for an identity, constructing it inside
    /// the shard lock if absent. Construction is therefore serialized per
    /// type and two concurrent callers always observe the same instance.
    pub fn get_or_insert_with(
        &self,
        type_id: TypeId,
        identity: &Identity,
        make: impl FnOnce() -> PersistentObject,
    ) -> Arc<PersistentObject> {
        let mut shard = self.shards[type_id.0].lock();
        shard
            .entry(identity.clone())
            .or_insert_with(|| Arc::new(make()))
            .clone()
    }

    /// Insert an instance that just acquired its identity (applied
    /// insert). If another instance won the race for that identity, the
    /// existing instance is returned and the argument is discarded.
    pub fn insert_reconciled(
        &self,
        type_id: TypeId,
        identity: Identity,
        object: Arc<PersistentObject>,
    ) -> Arc<PersistentObject> {
        let mut shard = self.shards[type_id.0].lock();
        shard.entry(identity).or_insert(object).clone()
    }

    /// Drop the instance for an identity (committed delete).
    pub fn remove(&self, type_id: TypeId, identity: &Identity) -> bool {
        self.shards[type_id.0].lock().remove(identity).is_some()
    }

    /// Number of live instances for one type.
    pub fn len_of(&self, type_id: TypeId) -> usize {
        self.shards[type_id.0].lock().len()
    }

    /// Number of live instances across all types.
    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.lock().len()).sum()
    }

    /// Whether the map is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
