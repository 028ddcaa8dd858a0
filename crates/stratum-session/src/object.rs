//! Live persistent objects.

use crate::fetch_state::FetchLatch;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use stratum_core::{Identity, Value};
use stratum_schema::{PropId, TypeId};

static NEXT_OID: AtomicU64 = AtomicU64::new(1);

/// Lifecycle flag set of a persistent object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ObjectFlags(u8);

impl ObjectFlags {
    /// Exists only in memory; no stored row yet.
    pub const TRANSIENT: ObjectFlags = ObjectFlags(1);
    /// Deleted in the current transaction.
    pub const REMOVED: ObjectFlags = ObjectFlags(1 << 1);
    /// Referenced by identity but not yet confirmed or loaded.
    pub const PROTOTYPE: ObjectFlags = ObjectFlags(1 << 2);
    /// An insert is queued but not yet applied.
    pub const PENDING_INSERT: ObjectFlags = ObjectFlags(1 << 3);
    /// Permanently unusable (e.g. after a committed delete).
    pub const STOPPED: ObjectFlags = ObjectFlags(1 << 4);

    /// Whether all bits of `other` are set.
    pub fn contains(self, other: ObjectFlags) -> bool {
        self.0 & other.0 == other.0
    }

    /// Set the bits of `other`.
    pub fn insert(&mut self, other: ObjectFlags) {
        self.0 |= other.0;
    }

    /// Clear the bits of `other`.
    pub fn remove(&mut self, other: ObjectFlags) {
        self.0 &= !other.0;
    }
}

/// The mutable state of an object, guarded by its lock.
#[derive(Debug, Default)]
pub struct ObjectState {
    /// Lifecycle flags.
    pub flags: ObjectFlags,
    /// One committed value slot per property (collection slots stay
    /// `Null`; their contents live in `collections`).
    pub slots: Vec<Value>,
    /// Committed collection contents per collection property, present
    /// once the owning fetch group has loaded.
    pub collections: HashMap<PropId, Vec<Identity>>,
}

/// The runtime wrapper for one domain instance.
///
/// One live instance exists per (type, identity); the identity map
/// enforces that. State mutation happens under the object's lock; I/O
/// never does.
#[derive(Debug)]
pub struct PersistentObject {
    oid: u64,
    type_id: TypeId,
    identity: RwLock<Option<Identity>>,
    /// Mutable state; lock scope is bookkeeping only.
    pub(crate) state: RwLock<ObjectState>,
    /// Fetch-state word and wait/wake machinery.
    pub(crate) latch: FetchLatch,
}

impl PersistentObject {
    fn next_oid() -> u64 {
        NEXT_OID.fetch_add(1, Ordering::Relaxed)
    }

    /// Create a transient instance (insert pending a `db_insert`).
    pub(crate) fn new_transient(type_id: TypeId, slot_count: usize) -> Self {
        let mut flags = ObjectFlags::default();
        flags.insert(ObjectFlags::TRANSIENT);
        Self {
            oid: Self::next_oid(),
            type_id,
            identity: RwLock::new(None),
            state: RwLock::new(ObjectState {
                flags,
                slots: vec![Value::Null; slot_count],
                collections: HashMap::new(),
            }),
            latch: FetchLatch::new(),
        }
    }

    /// Create a prototype instance for an identity not yet confirmed in
    /// storage. The identity slot is populated immediately.
    pub(crate) fn new_prototype(
        type_id: TypeId,
        slot_count: usize,
        identity_slot: PropId,
        identity: Identity,
    ) -> Self {
        let mut flags = ObjectFlags::default();
        flags.insert(ObjectFlags::PROTOTYPE);
        let mut slots = vec![Value::Null; slot_count];
        let values = identity.to_values();
        slots[identity_slot.0] = if values.len() == 1 {
            values.into_iter().next().expect("one identity value")
        } else {
            Value::Array(values)
        };
        Self {
            oid: Self::next_oid(),
            type_id,
            identity: RwLock::new(Some(identity)),
            state: RwLock::new(ObjectState {
                flags,
                slots,
                collections: HashMap::new(),
            }),
            latch: FetchLatch::new(),
        }
    }

    /// Process-unique handle for this instance.
    pub fn oid(&self) -> u64 {
        self.oid
    }

    /// The mapped type.
    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    /// The object's identity, once assigned.
    pub fn identity(&self) -> Option<Identity> {
        self.identity.read().clone()
    }

    pub(crate) fn set_identity(&self, identity: Identity) {
        *self.identity.write() = Some(identity);
    }

    /// Whether the instance exists only in memory.
    pub fn is_transient(&self) -> bool {
        self.state.read().flags.contains(ObjectFlags::TRANSIENT)
    }

    /// Whether the instance is deleted.
    pub fn is_removed(&self) -> bool {
        self.state.read().flags.contains(ObjectFlags::REMOVED)
    }

    /// Whether the instance is referenced by identity but not yet loaded.
    pub fn is_prototype(&self) -> bool {
        self.state.read().flags.contains(ObjectFlags::PROTOTYPE)
    }

    /// Whether an insert is queued for this instance.
    pub fn is_pending_insert(&self) -> bool {
        self.state.read().flags.contains(ObjectFlags::PENDING_INSERT)
    }

    /// Whether the instance is permanently unusable.
    pub fn is_stopped(&self) -> bool {
        self.state.read().flags.contains(ObjectFlags::STOPPED)
    }

    /// Mark the instance permanently unusable.
    pub fn stop(&self) {
        self.state.write().flags.insert(ObjectFlags::STOPPED);
    }

    /// Whether a fetch group is loaded.
    pub fn is_group_fetched(&self, group: usize) -> bool {
        self.latch.is_fetched(group)
    }

    /// Read one committed slot value.
    pub(crate) fn read_slot(&self, prop: PropId) -> Value {
        self.state.read().slots[prop.0].clone()
    }

    /// Write one committed slot value.
    pub(crate) fn write_slot(&self, prop: PropId, value: Value) {
        self.state.write().slots[prop.0] = value;
    }
}
