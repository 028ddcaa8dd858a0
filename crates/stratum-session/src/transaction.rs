//! The transaction context.
//!
//! One instance per unit of work, bound to its creating thread (`!Sync`)
//! and explicitly committed or rolled back. The transaction caches one
//! connection per data source, buffers pending operations in insertion
//! order with a by-object index, stages collection changes, and carries
//! the transaction-local value overrides that give uncommitted writes
//! their in-transaction visibility.

use crate::engine::Engine;
use crate::object::{ObjectFlags, PersistentObject};
use crate::operation::{OpSlot, PendingOperation};
use crate::staged::StagedCollection;
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::marker::PhantomData;
use std::sync::Arc;
use stratum_core::{
    ConfigErrorKind, Connection, Error, Identity, LifecycleErrorKind, Result, Value,
};
use stratum_query::decode_members;
use stratum_schema::{GroupId, PropId, PropertyKind};

/// What `set` did with a property write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// Recorded as a pending update in this transaction.
    Recorded,
    /// Written straight to the in-memory instance; nothing was queued.
    /// This is the no-op contract for transient, prototype, removed and
    /// stopped instances, unfetched groups, and writes issued by the
    /// commit machinery itself.
    Direct,
}

/// Count of pending operations by kind.
#[derive(Debug, Clone, Copy, Default)]
pub struct PendingCounts {
    /// Queued inserts.
    pub inserts: usize,
    /// Queued updates.
    pub updates: usize,
    /// Queued deletes.
    pub deletes: usize,
    /// Queued collection diffs.
    pub list_updates: usize,
}

impl PendingCounts {
    /// Total queued operations.
    pub fn total(&self) -> usize {
        self.inserts + self.updates + self.deletes + self.list_updates
    }

    /// Whether nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }
}

/// A thread-affine unit of work against one [`Engine`].
pub struct Transaction<'e> {
    pub(crate) engine: &'e Engine,
    pub(crate) connections: HashMap<String, Box<dyn Connection>>,
    /// Pending operations in insertion order.
    pub(crate) ops: Vec<OpSlot>,
    /// Latest object-level operation per object; at most one
    /// insert/update/delete is pending per object.
    pub(crate) by_object: HashMap<u64, usize>,
    /// Pending collection diff per (object, property).
    pub(crate) by_collection: HashMap<(u64, PropId), usize>,
    /// Staged collection views per (object, property).
    pub(crate) staged: HashMap<(u64, PropId), StagedCollection>,
    /// Reference writes whose target has no identity yet; resolved when
    /// the target's insert applies.
    pub(crate) pending_refs: HashMap<(u64, PropId), Arc<PersistentObject>>,
    /// Handles for every object this transaction touches, by oid.
    pub(crate) objects: HashMap<u64, Arc<PersistentObject>>,
    pub(crate) commit_in_progress: bool,
    pub(crate) applying_changes: bool,
    pub(crate) closed: bool,
    /// Keeps the transaction `!Sync`; it is never shared across threads.
    _affinity: PhantomData<std::cell::Cell<()>>,
}

impl<'e> Transaction<'e> {
    pub(crate) fn new(engine: &'e Engine) -> Self {
        Self {
            engine,
            connections: HashMap::new(),
            ops: Vec::new(),
            by_object: HashMap::new(),
            by_collection: HashMap::new(),
            staged: HashMap::new(),
            pending_refs: HashMap::new(),
            objects: HashMap::new(),
            commit_in_progress: false,
            applying_changes: false,
            closed: false,
            _affinity: PhantomData,
        }
    }

    /// The engine this transaction runs against.
    pub fn engine(&self) -> &'e Engine {
        self.engine
    }

    /// Whether commit is underway.
    pub fn is_commit_in_progress(&self) -> bool {
        self.commit_in_progress
    }

    /// Whether pending operations are being applied.
    pub fn is_applying_changes(&self) -> bool {
        self.applying_changes
    }

    /// Whether this transaction has been committed or rolled back.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub(crate) fn ensure_open(&self) -> Result<()> {
        if self.closed {
            Err(Error::lifecycle(
                LifecycleErrorKind::IllegalTransition,
                "transaction is closed",
            ))
        } else {
            Ok(())
        }
    }

    /// The cached connection for a data source, acquired from the driver
    /// on first use. Everything against one data source in this
    /// transaction shares it, so the operations commit or roll back
    /// atomically.
    pub fn connection(&mut self, data_source: &str) -> Result<&mut dyn Connection> {
        let conn = match self.connections.entry(data_source.to_string()) {
            Entry::Occupied(e) => e.into_mut(),
            Entry::Vacant(v) => v.insert(self.engine.driver().acquire(data_source)?),
        };
        Ok(conn.as_mut())
    }

    // ------------------------------------------------------------------
    // Fetch
    // ------------------------------------------------------------------

    /// Ensure the fetch group containing `property_or_group` is loaded.
    ///
    /// The name may be a fetch-group name or a property name.
    pub fn fetch(&mut self, obj: &Arc<PersistentObject>, property_or_group: &str) -> Result<()> {
        self.ensure_open()?;
        let registry = self.engine.registry();
        let td = registry.descriptor(obj.type_id());
        let group = match td.group_by_name(property_or_group) {
            Some(g) => g,
            None => registry.fetch_group_for_property(obj.type_id(), property_or_group)?,
        };
        self.ensure_fetched(obj, group)
    }

    /// Single-flight group loading with bounded retry.
    pub(crate) fn ensure_fetched(
        &mut self,
        obj: &Arc<PersistentObject>,
        group: GroupId,
    ) -> Result<()> {
        use crate::fetch_state::Claim;

        if obj.is_transient() {
            // nothing stored to load
            return Ok(());
        }
        let mut attempts: u32 = 0;
        loop {
            match obj.latch.claim(group.0) {
                Claim::AlreadyFetched => return Ok(()),
                Claim::Leader => match self.run_group_fetch(obj, group) {
                    Ok(()) => {
                        obj.latch.complete(group.0);
                        return Ok(());
                    }
                    Err(e) => {
                        obj.latch.abort(group.0);
                        attempts += 1;
                        if e.is_retryable() && attempts < self.engine.config().fetch_retry_limit {
                            tracing::warn!(error = %e, attempts, "fetch failed; retrying");
                            continue;
                        }
                        return Err(e);
                    }
                },
            }
        }
    }

    /// Execute one group query and populate the instance.
    #[tracing::instrument(level = "debug", skip(self, obj), fields(oid = obj.oid()))]
    fn run_group_fetch(&mut self, obj: &Arc<PersistentObject>, group: GroupId) -> Result<()> {
        let engine = self.engine;
        let registry = engine.registry();
        let type_id = obj.type_id();
        let td = registry.descriptor(type_id);
        let plan = engine.plan(type_id, group)?;

        let identity = obj.identity().ok_or_else(|| {
            Error::lifecycle(
                LifecycleErrorKind::IllegalTransition,
                "fetch on an instance without identity",
            )
        })?;
        let params = identity.to_values();
        let sql = plan.select_by_identity();
        let data_source = td.data_source.clone();
        let rows = self.connection(&data_source)?.query(&sql, &params)?;
        let decoded = stratum_query::decode_unique(plan, registry, &rows)?.ok_or_else(|| {
            Error::integrity(
                stratum_core::IntegrityErrorKind::MissingRow,
                plan.table.clone(),
                "no stored row for the requested identity",
            )
        })?;

        {
            let mut state = obj.state.write();
            for (prop, value) in &decoded.values {
                state.slots[prop.0] = value.clone();
            }
            state.flags.remove(ObjectFlags::PROTOTYPE);
        }

        // Resolve embedded references through the identity map so the
        // loaded graph shares instances with everything already live.
        for reference in &decoded.references {
            if let Some(id) = &reference.identity {
                engine.get_by_id(reference.target, id.clone())?;
            }
        }

        // Multi-row properties of this group load through their own
        // collection selects.
        for &cprop in &plan.collections {
            let Some(cplan) = engine.collection_plan(type_id, cprop) else {
                continue;
            };
            let sql = cplan.select_for_owners(1);
            let rows = self.connection(&data_source)?.query(&sql, &identity.to_values())?;
            let grouped = decode_members(cplan, &rows)?;
            let members = grouped
                .into_iter()
                .next()
                .map(|(_, members)| members)
                .unwrap_or_default();
            obj.state.write().collections.insert(cprop, members);
        }
        Ok(())
    }

    /// Fetch all objects of a type matching a filter over its default
    /// fetch group, with ordering and paging.
    ///
    /// Decoded rows resolve through the identity map: an instance that is
    /// already live keeps its state (and its identity), newly seen
    /// identities are populated under the fetch latch like any other
    /// group load.
    pub fn find(
        &mut self,
        type_id: stratum_schema::TypeId,
        filter: Option<&stratum_query::Filter>,
        order: &[stratum_query::OrderBy],
        paging: stratum_query::Paging,
    ) -> Result<Vec<Arc<PersistentObject>>> {
        use crate::fetch_state::Claim;

        self.ensure_open()?;
        let engine = self.engine;
        let registry = engine.registry();
        let td = registry.descriptor(type_id);
        let group = GroupId(0);
        let plan = engine.plan(type_id, group)?;
        let (sql, params) = plan.select_where(filter, order, paging)?;
        let data_source = td.data_source.clone();
        let rows = self.connection(&data_source)?.query(&sql, &params)?;
        let decoded = stratum_query::decode_all(plan, registry, &rows)?;

        let mut result = Vec::with_capacity(decoded.len());
        let mut claimed: Vec<(Arc<PersistentObject>, Identity)> = Vec::new();
        for object in decoded {
            let instance = engine.get_by_id(type_id, object.identity.clone())?;
            if matches!(instance.latch.claim(group.0), Claim::Leader) {
                {
                    let mut state = instance.state.write();
                    for (prop, value) in &object.values {
                        state.slots[prop.0] = value.clone();
                    }
                    state.flags.remove(ObjectFlags::PROTOTYPE);
                }
                for reference in &object.references {
                    if let Some(id) = &reference.identity {
                        engine.get_by_id(reference.target, id.clone())?;
                    }
                }
                claimed.push((Arc::clone(&instance), object.identity));
            }
            result.push(instance);
        }

        let loaded = self.load_group_collections(type_id, group, &data_source, &claimed);
        match loaded {
            Ok(()) => {
                for (instance, _) in &claimed {
                    instance.latch.complete(group.0);
                }
                Ok(result)
            }
            Err(e) => {
                for (instance, _) in &claimed {
                    instance.latch.abort(group.0);
                }
                Err(e)
            }
        }
    }

    /// Load a group's multi-row properties for a batch of owners in one
    /// query per collection, distributing members on owner transitions.
    fn load_group_collections(
        &mut self,
        type_id: stratum_schema::TypeId,
        group: GroupId,
        data_source: &str,
        owners: &[(Arc<PersistentObject>, Identity)],
    ) -> Result<()> {
        if owners.is_empty() {
            return Ok(());
        }
        let engine = self.engine;
        let plan = engine.plan(type_id, group)?;
        for &cprop in &plan.collections {
            let Some(cplan) = engine.collection_plan(type_id, cprop) else {
                continue;
            };
            let sql = cplan.select_for_owners(owners.len());
            let mut params = Vec::new();
            for (_, id) in owners {
                params.extend(id.to_values());
            }
            let rows = self.connection(data_source)?.query(&sql, &params)?;
            let grouped = decode_members(cplan, &rows)?;
            for (instance, id) in owners {
                let members = grouped
                    .iter()
                    .find(|(owner, _)| owner == id)
                    .map(|(_, members)| members.clone())
                    .unwrap_or_default();
                instance.state.write().collections.insert(cprop, members);
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Property reads
    // ------------------------------------------------------------------

    /// Read a property value, seeing this transaction's uncommitted
    /// writes first.
    pub fn get(&mut self, obj: &Arc<PersistentObject>, property: &str) -> Result<Value> {
        self.ensure_open()?;
        let registry = self.engine.registry();
        let type_id = obj.type_id();
        let prop = registry.slots(type_id).slot_of(property)?;
        let td = registry.descriptor(type_id);
        let descriptor = td.property_at(prop);
        if matches!(descriptor.kind, PropertyKind::Collection { .. }) {
            return Err(Error::config(
                ConfigErrorKind::Invalid,
                format!("'{property}' is a collection; read it with collection()"),
            ));
        }

        if let Some(value) = self.override_value(obj.oid(), prop) {
            return Ok(value);
        }
        let group = GroupId(descriptor.group_index);
        self.ensure_fetched(obj, group)?;
        Ok(obj.read_slot(prop))
    }

    /// The object's identity.
    pub fn get_identity(&self, obj: &Arc<PersistentObject>) -> Option<Identity> {
        obj.identity()
    }

    fn override_value(&self, oid: u64, prop: PropId) -> Option<Value> {
        let &ix = self.by_object.get(&oid)?;
        let slot = &self.ops[ix];
        if slot.cancelled {
            return None;
        }
        if let PendingOperation::Update { overrides, .. } = &slot.op {
            return overrides
                .iter()
                .rev()
                .find(|(p, _)| *p == prop)
                .map(|(_, v)| v.clone());
        }
        None
    }

    // ------------------------------------------------------------------
    // Property writes
    // ------------------------------------------------------------------

    /// Write a property.
    ///
    /// Returns [`WriteOutcome::Direct`] without queueing anything when
    /// the instance is transient, prototype, removed or stopped, when the
    /// property's fetch group has not been loaded (the stored value would
    /// silently overwrite this one on load), or while the commit
    /// machinery itself is writing. Otherwise the write merges into the
    /// object's single pending update operation.
    ///
    /// Reference properties accept the referenced identity value (or
    /// NULL) and keep the reverse side in sync; passing live targets is
    /// what [`set_reference`](Self::set_reference) is for.
    pub fn set(
        &mut self,
        obj: &Arc<PersistentObject>,
        property: &str,
        value: Value,
    ) -> Result<WriteOutcome> {
        self.ensure_open()?;
        let registry = self.engine.registry();
        let type_id = obj.type_id();
        let prop = registry.slots(type_id).slot_of(property)?;
        registry.slots(type_id).check_write(prop, &value)?;
        let td = registry.descriptor(type_id);
        let descriptor = td.property_at(prop);
        if descriptor.read_only {
            return Err(Error::config(
                ConfigErrorKind::Invalid,
                format!("'{property}' is the mirrored side of a relationship and read-only"),
            ));
        }
        if matches!(descriptor.kind, PropertyKind::Identity) && !obj.is_transient() {
            return Err(Error::lifecycle(
                LifecycleErrorKind::IllegalTransition,
                "identity of a persistent instance cannot change",
            ));
        }

        if let PropertyKind::Reference { .. } = descriptor.kind {
            let target_type = descriptor.target.ok_or_else(|| {
                Error::config(
                    ConfigErrorKind::UnknownType,
                    format!("reference '{property}' has no resolved target type"),
                )
            })?;
            let target = if value.is_null() {
                None
            } else {
                let values = match &value {
                    Value::Array(parts) => parts.clone(),
                    single => vec![single.clone()],
                };
                Some(self.engine.get_by_id(target_type, Identity::from_values(&values)?)?)
            };
            return self.set_reference_impl(obj, prop, target.as_ref());
        }

        if self.write_is_direct(obj, descriptor.group_index) {
            obj.write_slot(prop, value);
            return Ok(WriteOutcome::Direct);
        }
        self.record_override(obj, prop, value);
        Ok(WriteOutcome::Recorded)
    }

    /// Write a reference property with a live target instance.
    pub fn set_reference(
        &mut self,
        obj: &Arc<PersistentObject>,
        property: &str,
        target: Option<&Arc<PersistentObject>>,
    ) -> Result<WriteOutcome> {
        self.ensure_open()?;
        let registry = self.engine.registry();
        let type_id = obj.type_id();
        let prop = registry.slots(type_id).slot_of(property)?;
        let td = registry.descriptor(type_id);
        let descriptor = td.property_at(prop);
        let PropertyKind::Reference { .. } = descriptor.kind else {
            return Err(Error::config(
                ConfigErrorKind::Invalid,
                format!("'{property}' is not a reference property"),
            ));
        };
        if descriptor.read_only {
            // the mirrored side routes through the owning reference
            let Some(mirror) = descriptor.reverse_resolved else {
                return Err(Error::config(
                    ConfigErrorKind::Invalid,
                    format!("'{property}' is read-only and has no resolved owner side"),
                ));
            };
            return match target {
                Some(t) => self.set_reference_impl(t, mirror, Some(obj)),
                None => {
                    let current = self.current_reference(obj, prop)?;
                    match current {
                        Some(owner) => self.set_reference_impl(&owner, mirror, None),
                        None => Ok(WriteOutcome::Direct),
                    }
                }
            };
        }
        self.set_reference_impl(obj, prop, target)
    }

    /// Owning-side reference write plus reverse synchronization.
    pub(crate) fn set_reference_impl(
        &mut self,
        obj: &Arc<PersistentObject>,
        prop: PropId,
        target: Option<&Arc<PersistentObject>>,
    ) -> Result<WriteOutcome> {
        let registry = self.engine.registry();
        let type_id = obj.type_id();
        let td = registry.descriptor(type_id);
        let descriptor = td.property_at(prop);
        let target_type = descriptor.target.ok_or_else(|| {
            Error::config(
                ConfigErrorKind::UnknownType,
                format!("reference '{}' has no resolved target type", descriptor.name),
            )
        })?;
        if let Some(t) = target {
            let tt = t.type_id();
            let compatible = tt == target_type
                || registry.descriptor(tt).base_resolved == Some(target_type);
            if !compatible {
                return Err(Error::config(
                    ConfigErrorKind::Invalid,
                    format!(
                        "reference '{}' expects type {}, got {}",
                        descriptor.name,
                        registry.descriptor(target_type).name,
                        registry.descriptor(tt).name
                    ),
                ));
            }
        }

        let old = self.current_reference(obj, prop)?;
        let oid = obj.oid();
        self.objects.insert(oid, Arc::clone(obj));

        // Slot/override value: the target identity, or a placeholder
        // resolved when the target's own insert applies.
        let slot_value = match target {
            None => Value::Null,
            Some(t) => match t.identity() {
                Some(id) => {
                    self.pending_refs.remove(&(oid, prop));
                    identity_slot_value(&id)
                }
                None => {
                    self.pending_refs.insert((oid, prop), Arc::clone(t));
                    self.objects.insert(t.oid(), Arc::clone(t));
                    Value::Null
                }
            },
        };
        if target.is_none() {
            self.pending_refs.remove(&(oid, prop));
        }

        let outcome = if self.write_is_direct(obj, descriptor.group_index) {
            obj.write_slot(prop, slot_value);
            WriteOutcome::Direct
        } else {
            self.record_override(obj, prop, slot_value);
            WriteOutcome::Recorded
        };

        self.sync_reference_change(obj, prop, old.as_ref(), target)?;
        Ok(outcome)
    }

    /// Whether a write bypasses the operation log per the write contract.
    fn write_is_direct(&self, obj: &Arc<PersistentObject>, group_index: usize) -> bool {
        if self.commit_in_progress || self.applying_changes {
            return true;
        }
        let flag_blocked = {
            let state = obj.state.read();
            state.flags.contains(ObjectFlags::TRANSIENT)
                || state.flags.contains(ObjectFlags::REMOVED)
                || state.flags.contains(ObjectFlags::STOPPED)
                || state.flags.contains(ObjectFlags::PROTOTYPE)
        };
        flag_blocked || !obj.latch.is_fetched(group_index)
    }

    /// Merge a value into the object's single pending update operation.
    fn record_override(&mut self, obj: &Arc<PersistentObject>, prop: PropId, value: Value) {
        let oid = obj.oid();
        self.objects.insert(oid, Arc::clone(obj));
        if let Some(&ix) = self.by_object.get(&oid) {
            if !self.ops[ix].cancelled && !self.ops[ix].applied {
                if let PendingOperation::Update { overrides, .. } = &mut self.ops[ix].op {
                    match overrides.iter_mut().find(|(p, _)| *p == prop) {
                        Some(entry) => entry.1 = value,
                        None => overrides.push((prop, value)),
                    }
                    return;
                }
            }
        }
        let ix = self.ops.len();
        self.ops.push(OpSlot::new(PendingOperation::Update {
            object: Arc::clone(obj),
            overrides: vec![(prop, value)],
        }));
        self.by_object.insert(oid, ix);
    }

    /// The currently referenced instance for a reference property,
    /// consulting pending targets and overrides before committed state.
    /// Only probes the identity map; never constructs.
    pub(crate) fn current_reference(
        &self,
        obj: &Arc<PersistentObject>,
        prop: PropId,
    ) -> Result<Option<Arc<PersistentObject>>> {
        let oid = obj.oid();
        if let Some(target) = self.pending_refs.get(&(oid, prop)) {
            return Ok(Some(Arc::clone(target)));
        }
        let registry = self.engine.registry();
        let descriptor = registry.descriptor(obj.type_id()).property_at(prop);
        let Some(target_type) = descriptor.target else {
            return Ok(None);
        };
        let raw = match self.override_value(oid, prop) {
            Some(v) => v,
            None => obj.read_slot(prop),
        };
        if raw.is_null() {
            return Ok(None);
        }
        let values = match &raw {
            Value::Array(parts) => parts.clone(),
            single => vec![single.clone()],
        };
        let identity = Identity::from_values(&values)?;
        Ok(self.engine.lookup_polymorphic(target_type, &identity))
    }

    /// Resolve a reference property to its live target, constructing a
    /// prototype through the identity map when needed.
    pub fn get_reference(
        &mut self,
        obj: &Arc<PersistentObject>,
        property: &str,
    ) -> Result<Option<Arc<PersistentObject>>> {
        self.ensure_open()?;
        let registry = self.engine.registry();
        let type_id = obj.type_id();
        let prop = registry.slots(type_id).slot_of(property)?;
        let descriptor = registry.descriptor(type_id).property_at(prop);
        let PropertyKind::Reference { .. } = descriptor.kind else {
            return Err(Error::config(
                ConfigErrorKind::Invalid,
                format!("'{property}' is not a reference property"),
            ));
        };
        let target_type = descriptor.target.ok_or_else(|| {
            Error::config(
                ConfigErrorKind::UnknownType,
                format!("reference '{property}' has no resolved target type"),
            )
        })?;

        if let Some(target) = self.pending_refs.get(&(obj.oid(), prop)) {
            return Ok(Some(Arc::clone(target)));
        }
        let raw = match self.override_value(obj.oid(), prop) {
            Some(v) => v,
            None => {
                if !descriptor.read_only {
                    self.ensure_fetched(obj, GroupId(descriptor.group_index))?;
                }
                obj.read_slot(prop)
            }
        };
        if raw.is_null() {
            return Ok(None);
        }
        let values = match &raw {
            Value::Array(parts) => parts.clone(),
            single => vec![single.clone()],
        };
        let identity = Identity::from_values(&values)?;
        if let Some(found) = self.engine.lookup_polymorphic(target_type, &identity) {
            return Ok(Some(found));
        }
        self.engine.get_by_id(target_type, identity).map(Some)
    }

    // ------------------------------------------------------------------
    // Lifecycle transitions
    // ------------------------------------------------------------------

    /// Queue the instance for insertion.
    pub fn insert(&mut self, obj: &Arc<PersistentObject>) -> Result<()> {
        self.ensure_open()?;
        {
            let state = obj.state.read();
            if state.flags.contains(ObjectFlags::STOPPED) {
                return Err(Error::lifecycle(
                    LifecycleErrorKind::Stopped,
                    "insert on a stopped instance",
                ));
            }
            if state.flags.contains(ObjectFlags::REMOVED) {
                return Err(Error::lifecycle(
                    LifecycleErrorKind::Removed,
                    "insert on a removed instance",
                ));
            }
            if !state.flags.contains(ObjectFlags::TRANSIENT) {
                return Err(Error::lifecycle(
                    LifecycleErrorKind::AlreadyPersistent,
                    "insert on a persistent instance",
                ));
            }
            if state.flags.contains(ObjectFlags::PENDING_INSERT) {
                return Err(Error::lifecycle(
                    LifecycleErrorKind::AlreadyPersistent,
                    "insert already queued for this instance",
                ));
            }
        }
        obj.state.write().flags.insert(ObjectFlags::PENDING_INSERT);
        let oid = obj.oid();
        self.objects.insert(oid, Arc::clone(obj));
        let ix = self.ops.len();
        self.ops.push(OpSlot::new(PendingOperation::Insert {
            object: Arc::clone(obj),
        }));
        self.by_object.insert(oid, ix);
        Ok(())
    }

    /// Queue the instance for deletion.
    ///
    /// Deleting an instance whose insert is still queued cancels the
    /// insert instead of stacking a delete; deleting a plain transient
    /// or already-removed instance is a contract violation.
    pub fn delete(&mut self, obj: &Arc<PersistentObject>) -> Result<()> {
        self.ensure_open()?;
        let oid = obj.oid();
        let (transient, pending_insert) = {
            let state = obj.state.read();
            if state.flags.contains(ObjectFlags::STOPPED) {
                return Err(Error::lifecycle(
                    LifecycleErrorKind::Stopped,
                    "delete on a stopped instance",
                ));
            }
            if state.flags.contains(ObjectFlags::REMOVED) {
                return Err(Error::lifecycle(
                    LifecycleErrorKind::Removed,
                    "delete on an already-removed instance",
                ));
            }
            (
                state.flags.contains(ObjectFlags::TRANSIENT),
                state.flags.contains(ObjectFlags::PENDING_INSERT),
            )
        };

        if transient {
            if !pending_insert {
                return Err(Error::lifecycle(
                    LifecycleErrorKind::Transient,
                    "delete on a transient instance",
                ));
            }
            // insert-then-delete nets out to nothing
            if let Some(ix) = self.by_object.remove(&oid) {
                self.ops[ix].cancelled = true;
            }
            let mut state = obj.state.write();
            state.flags.remove(ObjectFlags::PENDING_INSERT);
            state.flags.insert(ObjectFlags::REMOVED);
            return Ok(());
        }

        if let Some(&ix) = self.by_object.get(&oid) {
            // a pending update is superseded by the delete
            self.ops[ix].cancelled = true;
        }
        self.objects.insert(oid, Arc::clone(obj));
        let ix = self.ops.len();
        self.ops.push(OpSlot::new(PendingOperation::Delete {
            object: Arc::clone(obj),
        }));
        self.by_object.insert(oid, ix);
        obj.state.write().flags.insert(ObjectFlags::REMOVED);
        Ok(())
    }

    /// Force a pending update for the instance (used to touch the row,
    /// e.g. to bump a configured version property).
    pub fn update(&mut self, obj: &Arc<PersistentObject>) -> Result<()> {
        self.ensure_open()?;
        let state = obj.state.read();
        if state.flags.contains(ObjectFlags::TRANSIENT) {
            return Err(Error::lifecycle(
                LifecycleErrorKind::Transient,
                "update on a transient instance",
            ));
        }
        if state.flags.contains(ObjectFlags::REMOVED) {
            return Err(Error::lifecycle(
                LifecycleErrorKind::Removed,
                "update on a removed instance",
            ));
        }
        if state.flags.contains(ObjectFlags::STOPPED) {
            return Err(Error::lifecycle(
                LifecycleErrorKind::Stopped,
                "update on a stopped instance",
            ));
        }
        drop(state);
        let oid = obj.oid();
        if let Some(&ix) = self.by_object.get(&oid) {
            if !self.ops[ix].cancelled && !self.ops[ix].applied {
                return Ok(());
            }
        }
        self.objects.insert(oid, Arc::clone(obj));
        let ix = self.ops.len();
        self.ops.push(OpSlot::new(PendingOperation::Update {
            object: Arc::clone(obj),
            overrides: Vec::new(),
        }));
        self.by_object.insert(oid, ix);
        Ok(())
    }

    /// Discard the cached view of the instance: every fetch group is
    /// forced back to unfetched and reloads from storage on next access.
    pub fn refresh(&mut self, obj: &Arc<PersistentObject>) -> Result<()> {
        self.ensure_open()?;
        if obj.is_transient() {
            return Err(Error::lifecycle(
                LifecycleErrorKind::Transient,
                "refresh on a transient instance",
            ));
        }
        obj.latch.reset_all();
        let oid = obj.oid();
        self.staged.retain(|(o, _), _| *o != oid);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Flush / commit / rollback
    // ------------------------------------------------------------------

    /// Apply every pending operation in insertion order.
    ///
    /// The drain loop re-reads the pending list until it is empty, so
    /// operations scheduled during the flush (cascading reference
    /// inserts) are picked up. Each operation leaves the by-object index
    /// as it completes. No lock is held while statements execute.
    #[tracing::instrument(level = "info", skip(self))]
    pub fn flush(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.applying_changes = true;
        let result = self.drain_ops();
        self.applying_changes = false;
        result
    }

    fn drain_ops(&mut self) -> Result<()> {
        loop {
            let Some(ix) = self
                .ops
                .iter()
                .position(|slot| !slot.applied && !slot.cancelled)
            else {
                break;
            };
            self.apply_op(ix)?;
        }
        Ok(())
    }

    /// Flush, then commit every acquired non-autocommit connection.
    ///
    /// A connection-commit failure is fatal for the whole transaction; no
    /// partial-commit recovery is attempted and the caller must roll
    /// back.
    pub fn commit(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.commit_in_progress = true;
        let flushed = self.flush();
        if let Err(e) = flushed {
            self.commit_in_progress = false;
            return Err(e);
        }
        for conn in self.connections.values_mut() {
            if conn.auto_commit() {
                continue;
            }
            if let Err(e) = conn.commit() {
                self.commit_in_progress = false;
                return Err(e);
            }
        }
        self.commit_in_progress = false;
        self.closed = true;
        self.clear_buffers();
        Ok(())
    }

    /// Cancel every queued (not yet applied) operation, restore staged
    /// state, and roll back every acquired connection.
    pub fn rollback(&mut self) -> Result<()> {
        self.ensure_open()?;
        for slot in &mut self.ops {
            if slot.applied || slot.cancelled {
                continue;
            }
            slot.op.cancel();
            slot.cancelled = true;
        }
        for staged in self.staged.values_mut() {
            staged.cancel();
        }
        self.pending_refs.clear();

        let mut first_error = None;
        for conn in self.connections.values_mut() {
            if conn.auto_commit() {
                continue;
            }
            if let Err(e) = conn.rollback() {
                tracing::warn!(error = %e, "connection rollback failed");
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }
        self.closed = true;
        self.clear_buffers();
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn clear_buffers(&mut self) {
        self.ops.clear();
        self.by_object.clear();
        self.by_collection.clear();
        self.staged.clear();
        self.pending_refs.clear();
        self.objects.clear();
    }

    /// Diagnostic counts of queued operations.
    pub fn pending_counts(&self) -> PendingCounts {
        let mut counts = PendingCounts::default();
        for slot in &self.ops {
            if slot.applied || slot.cancelled {
                continue;
            }
            match slot.op {
                PendingOperation::Insert { .. } => counts.inserts += 1,
                PendingOperation::Update { .. } => counts.updates += 1,
                PendingOperation::Delete { .. } => counts.deletes += 1,
                PendingOperation::ListUpdate { .. } => counts.list_updates += 1,
            }
        }
        counts
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if !self.closed {
            tracing::warn!("transaction dropped without commit or rollback; rolling back");
            let _ = self.rollback();
        }
    }
}

/// Encode an identity as a single slot value.
pub(crate) fn identity_slot_value(identity: &Identity) -> Value {
    let mut values = identity.to_values();
    if values.len() == 1 {
        values.remove(0)
    } else {
        Value::Array(values)
    }
}

/// A member key for the staged-collection machinery.
pub(crate) fn member_key_of(obj: &Arc<PersistentObject>) -> crate::staged::MemberKey {
    match obj.identity() {
        Some(id) => crate::staged::MemberKey::Id(id),
        None => crate::staged::MemberKey::Pending(obj.oid()),
    }
}
