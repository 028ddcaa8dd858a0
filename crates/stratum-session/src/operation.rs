//! Pending operations and their application.
//!
//! Operations buffer mutations until flush. Application builds the SQL
//! through `stratum-query` statement builders, executes it on the
//! transaction's cached connection, and enforces affected-row counts:
//! an unexpected count means the identity/uniqueness invariant is
//! already broken and is raised, never ignored.

use crate::object::{ObjectFlags, PersistentObject};
use crate::staged::MemberKey;
use crate::transaction::{Transaction, identity_slot_value};
use std::collections::BTreeMap;
use std::sync::Arc;
use stratum_core::{
    ConfigErrorKind, Error, Identity, IntegrityErrorKind, LifecycleErrorKind, Result, StaleError,
    Value,
};
use stratum_query::{build_delete, build_insert, build_insert_returning, build_update,
    build_update_versioned};
use stratum_schema::{PropId, PropertyKind, TypeDescriptor};

/// A buffered mutation, scoped to one transaction and one object.
#[derive(Clone)]
pub(crate) enum PendingOperation {
    /// Insert the object's row(s).
    Insert { object: Arc<PersistentObject> },
    /// Apply recorded property overrides, one UPDATE per touched table.
    Update {
        object: Arc<PersistentObject>,
        overrides: Vec<(PropId, Value)>,
    },
    /// Delete the object's row(s).
    Delete { object: Arc<PersistentObject> },
    /// Apply the staged diff of one collection property.
    ListUpdate {
        object: Arc<PersistentObject>,
        prop: PropId,
    },
}

impl PendingOperation {
    pub(crate) fn object(&self) -> &Arc<PersistentObject> {
        match self {
            PendingOperation::Insert { object }
            | PendingOperation::Update { object, .. }
            | PendingOperation::Delete { object }
            | PendingOperation::ListUpdate { object, .. } => object,
        }
    }

    /// Undo the in-memory effects of queueing this operation; called when
    /// a rollback discards it before application.
    pub(crate) fn cancel(&self) {
        match self {
            PendingOperation::Insert { object } => {
                object.state.write().flags.remove(ObjectFlags::PENDING_INSERT);
            }
            PendingOperation::Delete { object } => {
                object.state.write().flags.remove(ObjectFlags::REMOVED);
            }
            PendingOperation::Update { .. } | PendingOperation::ListUpdate { .. } => {}
        }
    }
}

/// An operation plus its drain-loop bookkeeping.
pub(crate) struct OpSlot {
    pub(crate) op: PendingOperation,
    pub(crate) applied: bool,
    pub(crate) cancelled: bool,
}

impl OpSlot {
    pub(crate) fn new(op: PendingOperation) -> Self {
        Self {
            op,
            applied: false,
            cancelled: false,
        }
    }
}

/// Split a slot value into its per-column bind values.
fn column_values(value: &Value, column_count: usize) -> Vec<Value> {
    if column_count == 1 {
        return vec![value.clone()];
    }
    match value {
        Value::Array(parts) if parts.len() == column_count => parts.clone(),
        _ => vec![Value::Null; column_count],
    }
}

impl Transaction<'_> {
    /// Apply one operation by index. Marked applied before execution so
    /// a dependency cycle cannot recurse forever; on failure the
    /// transaction is left for the caller to roll back.
    pub(crate) fn apply_op(&mut self, ix: usize) -> Result<()> {
        if self.ops[ix].applied || self.ops[ix].cancelled {
            return Ok(());
        }
        self.ops[ix].applied = true;
        let op = self.ops[ix].op.clone();
        let oid = op.object().oid();
        match &op {
            PendingOperation::Insert { object } => self.apply_insert(object)?,
            PendingOperation::Update { object, overrides } => {
                self.apply_update(object, overrides)?;
            }
            PendingOperation::Delete { object } => self.apply_delete(object)?,
            PendingOperation::ListUpdate { object, prop } => {
                self.apply_list_update(object, *prop)?;
            }
        }
        // the operation leaves the index as it completes
        match &op {
            PendingOperation::ListUpdate { prop, .. } => {
                self.by_collection.remove(&(oid, *prop));
            }
            _ => {
                if self.by_object.get(&oid) == Some(&ix) {
                    self.by_object.remove(&oid);
                }
            }
        }
        Ok(())
    }

    /// Identity of a reference target, applying the target's own pending
    /// insert first when it has none yet (cascading insert).
    pub(crate) fn resolve_identity_of(&mut self, target: &Arc<PersistentObject>) -> Result<Identity> {
        if let Some(id) = target.identity() {
            return Ok(id);
        }
        if let Some(&ix) = self.by_object.get(&target.oid()) {
            let is_insert = matches!(self.ops[ix].op, PendingOperation::Insert { .. });
            if is_insert {
                self.apply_op(ix)?;
            }
        }
        target.identity().ok_or_else(|| {
            Error::lifecycle(
                LifecycleErrorKind::IllegalTransition,
                "reference target has no identity and no pending insert",
            )
        })
    }

    /// Resolve every pending reference target recorded for an object into
    /// its slot, cascading dependent inserts.
    fn resolve_pending_refs(&mut self, obj: &Arc<PersistentObject>) -> Result<()> {
        let oid = obj.oid();
        let props: Vec<(PropId, Arc<PersistentObject>)> = self
            .pending_refs
            .iter()
            .filter(|((o, _), _)| *o == oid)
            .map(|((_, p), t)| (*p, Arc::clone(t)))
            .collect();
        for (prop, target) in props {
            let identity = self.resolve_identity_of(&target)?;
            obj.write_slot(prop, identity_slot_value(&identity));
            self.pending_refs.remove(&(oid, prop));
        }
        Ok(())
    }

    #[tracing::instrument(level = "debug", skip(self, obj), fields(oid = obj.oid()))]
    fn apply_insert(&mut self, obj: &Arc<PersistentObject>) -> Result<()> {
        self.resolve_pending_refs(obj)?;

        let engine = self.engine;
        let registry = engine.registry();
        let type_id = obj.type_id();
        let td = registry.descriptor(type_id);
        let data_source = td.data_source.clone();
        let id_prop = td.identity_property();
        let id_descriptor = td.property_at(id_prop);
        let generated = !id_descriptor.columns.is_empty()
            && id_descriptor.columns.iter().all(|c| c.db_generated);

        let include_nulls = engine.config().insert_null_primary_columns;
        let mut columns: Vec<String> = Vec::new();
        let mut params: Vec<Value> = Vec::new();

        if !generated {
            let slot = obj.read_slot(id_prop);
            if slot.is_null() {
                return Err(Error::lifecycle(
                    LifecycleErrorKind::IllegalTransition,
                    "insert without an assigned identity",
                ));
            }
            let values = column_values(&slot, id_descriptor.columns.len());
            for (spec, value) in id_descriptor.columns.iter().zip(values) {
                columns.push(spec.name.clone());
                params.push(value);
            }
        }

        for (index, prop) in td.properties.iter().enumerate() {
            let pid = PropId(index);
            if pid == id_prop
                || prop.table != 0
                || prop.columns.is_empty()
                || matches!(prop.kind, PropertyKind::Collection { .. })
            {
                continue;
            }
            let slot = obj.read_slot(pid);
            if slot.is_null() && !include_nulls {
                continue;
            }
            let values = column_values(&slot, prop.columns.len());
            for (spec, value) in prop.columns.iter().zip(values) {
                columns.push(spec.name.clone());
                params.push(value);
            }
        }

        let table = td.primary_table().name.clone();
        let column_refs: Vec<&str> = columns.iter().map(String::as_str).collect();
        let identity = if generated {
            let returning: Vec<&str> = id_descriptor
                .columns
                .iter()
                .map(|c| c.name.as_str())
                .collect();
            let sql = build_insert_returning(&table, &column_refs, &returning);
            tracing::debug!(sql = %sql, "executing insert (returning)");
            let row = self.connection(&data_source)?.insert_returning(&sql, &params)?;
            let mut key_values = Vec::with_capacity(returning.len());
            for i in 0..returning.len() {
                key_values.push(row.get(i).cloned().unwrap_or(Value::Null));
            }
            let identity = Identity::from_values(&key_values)?;
            obj.write_slot(id_prop, identity_slot_value(&identity));
            identity
        } else {
            let sql = build_insert(&table, &column_refs);
            tracing::debug!(sql = %sql, "executing insert");
            let affected = self.connection(&data_source)?.execute(&sql, &params)?;
            if affected != 1 {
                return Err(Error::integrity(
                    IntegrityErrorKind::RowCountMismatch,
                    table,
                    format!("insert affected {affected} rows, expected 1"),
                ));
            }
            let slot = obj.read_slot(id_prop);
            let values = column_values(&slot, id_descriptor.columns.len());
            Identity::from_values(&values)?
        };
        obj.set_identity(identity.clone());

        // auxiliary rows exist only once a property stored there is
        // non-null
        self.insert_auxiliary_rows(obj, td, &identity, &data_source, None)?;

        // reconcile into the identity map; a racing instance that already
        // owns this identity means a duplicate insert
        let winner = engine
            .map
            .insert_reconciled(type_id, identity.clone(), Arc::clone(obj));
        if !Arc::ptr_eq(&winner, obj) {
            return Err(Error::integrity(
                IntegrityErrorKind::DuplicateIdentity,
                td.primary_table().name.clone(),
                "another live instance already owns this identity",
            ));
        }

        {
            let mut state = obj.state.write();
            state.flags.remove(ObjectFlags::TRANSIENT);
            state.flags.remove(ObjectFlags::PENDING_INSERT);
            state.flags.remove(ObjectFlags::PROTOTYPE);
        }
        obj.latch.mark_all_fetched(td.fetch_groups.len());
        Ok(())
    }

    /// Insert auxiliary-table rows carrying non-null values. With
    /// `only_props`, restrict to the given property/value set (the
    /// zero-rows-updated fallback).
    fn insert_auxiliary_rows(
        &mut self,
        obj: &Arc<PersistentObject>,
        td: &TypeDescriptor,
        identity: &Identity,
        data_source: &str,
        only_table: Option<(usize, &[(PropId, Value)])>,
    ) -> Result<()> {
        for (table_index, table) in td.tables.iter().enumerate() {
            if table_index == 0 || table.multi_row {
                continue;
            }
            if let Some((restricted, _)) = only_table {
                if table_index != restricted {
                    continue;
                }
            }
            let mut columns: Vec<String> = Vec::new();
            let mut params: Vec<Value> = Vec::new();
            for (index, prop) in td.properties.iter().enumerate() {
                if prop.table != table_index || prop.columns.is_empty() {
                    continue;
                }
                let pid = PropId(index);
                let slot = match only_table {
                    Some((_, set)) => match set.iter().find(|(p, _)| *p == pid) {
                        Some((_, v)) => v.clone(),
                        None => obj.read_slot(pid),
                    },
                    None => obj.read_slot(pid),
                };
                if slot.is_null() {
                    continue;
                }
                let values = column_values(&slot, prop.columns.len());
                for (spec, value) in prop.columns.iter().zip(values) {
                    columns.push(spec.name.clone());
                    params.push(value);
                }
            }
            if columns.is_empty() {
                continue;
            }
            let mut all_columns: Vec<String> = table.identity_columns.clone();
            let mut all_params = identity.to_values();
            all_columns.extend(columns);
            all_params.extend(params);
            let column_refs: Vec<&str> = all_columns.iter().map(String::as_str).collect();
            let sql = build_insert(&table.name, &column_refs);
            tracing::debug!(sql = %sql, "executing auxiliary insert");
            let affected = self.connection(data_source)?.execute(&sql, &all_params)?;
            if affected != 1 {
                return Err(Error::integrity(
                    IntegrityErrorKind::RowCountMismatch,
                    table.name.clone(),
                    format!("auxiliary insert affected {affected} rows, expected 1"),
                ));
            }
        }
        Ok(())
    }

    #[tracing::instrument(level = "debug", skip(self, obj, overrides), fields(oid = obj.oid()))]
    fn apply_update(
        &mut self,
        obj: &Arc<PersistentObject>,
        overrides: &[(PropId, Value)],
    ) -> Result<()> {
        let engine = self.engine;
        let registry = engine.registry();
        let type_id = obj.type_id();
        let td = registry.descriptor(type_id);
        let data_source = td.data_source.clone();

        // late-bound reference targets
        let oid = obj.oid();
        let mut overrides: Vec<(PropId, Value)> = overrides.to_vec();
        for (prop, value) in &mut overrides {
            if let Some(target) = self.pending_refs.get(&(oid, *prop)).cloned() {
                let identity = self.resolve_identity_of(&target)?;
                *value = identity_slot_value(&identity);
                self.pending_refs.remove(&(oid, *prop));
            }
        }

        let identity = obj.identity().ok_or_else(|| {
            Error::lifecycle(
                LifecycleErrorKind::IllegalTransition,
                "update on an instance without identity",
            )
        })?;
        let id_values = identity.to_values();

        // group changed columns per table
        let mut per_table: BTreeMap<usize, (Vec<String>, Vec<Value>)> = BTreeMap::new();
        for (pid, value) in &overrides {
            let prop = td.property_at(*pid);
            if prop.columns.is_empty() {
                continue;
            }
            let entry = per_table.entry(prop.table).or_default();
            let values = column_values(value, prop.columns.len());
            for (spec, v) in prop.columns.iter().zip(values) {
                entry.0.push(spec.name.clone());
                entry.1.push(v);
            }
        }

        // version-checked path, only where a version property is mapped
        let version = td.version_property().map(|vp| {
            let old = obj.read_slot(vp).as_i64().unwrap_or(0);
            (vp, old, old + 1)
        });
        if let Some((vp, _, next)) = version {
            if !per_table.is_empty() {
                let prop = td.property_at(vp);
                let entry = per_table.entry(prop.table).or_default();
                entry.0.push(prop.columns[0].name.clone());
                entry.1.push(Value::BigInt(next));
            }
        }

        for (table_index, (set_columns, set_values)) in &per_table {
            let table = &td.tables[*table_index];
            let set_refs: Vec<&str> = set_columns.iter().map(String::as_str).collect();
            let key_refs: Vec<&str> =
                table.identity_columns.iter().map(String::as_str).collect();

            let versioned_here = version
                .map(|(vp, _, _)| td.property_at(vp).table == *table_index)
                .unwrap_or(false);

            let mut params: Vec<Value> = set_values.clone();
            params.extend(id_values.clone());

            let sql = if versioned_here {
                let (vp, old, _) = version.expect("checked above");
                params.push(Value::BigInt(old));
                build_update_versioned(
                    &table.name,
                    &set_refs,
                    &key_refs,
                    &td.property_at(vp).columns[0].name,
                )
            } else {
                build_update(&table.name, &set_refs, &key_refs)
            };
            tracing::debug!(sql = %sql, "executing update");
            let affected = self.connection(&data_source)?.execute(&sql, &params)?;

            if affected == 0 {
                if versioned_here {
                    return Err(Error::Stale(StaleError {
                        type_name: td.name.clone(),
                        message: "row version changed under a version-checked update".to_string(),
                    }));
                }
                if table.primary {
                    return Err(Error::integrity(
                        IntegrityErrorKind::MissingRow,
                        table.name.clone(),
                        "update matched no primary-table row",
                    ));
                }
                // the auxiliary row may never have existed
                let set: Vec<(PropId, Value)> = overrides
                    .iter()
                    .filter(|(p, _)| td.property_at(*p).table == *table_index)
                    .cloned()
                    .collect();
                self.insert_auxiliary_rows(obj, td, &identity, &data_source,
                    Some((*table_index, &set)))?;
            } else if affected > 1 {
                return Err(Error::integrity(
                    IntegrityErrorKind::RowCountMismatch,
                    table.name.clone(),
                    format!("update affected {affected} rows, expected 1"),
                ));
            }
        }

        // write-through to the committed slots
        for (pid, value) in &overrides {
            obj.write_slot(*pid, value.clone());
        }
        if let Some((vp, _, next)) = version {
            if !per_table.is_empty() {
                obj.write_slot(vp, Value::BigInt(next));
            }
        }
        Ok(())
    }

    #[tracing::instrument(level = "debug", skip(self, obj), fields(oid = obj.oid()))]
    fn apply_delete(&mut self, obj: &Arc<PersistentObject>) -> Result<()> {
        let engine = self.engine;
        let registry = engine.registry();
        let type_id = obj.type_id();
        let td = registry.descriptor(type_id);
        let data_source = td.data_source.clone();
        let identity = obj.identity().ok_or_else(|| {
            Error::lifecycle(
                LifecycleErrorKind::IllegalTransition,
                "delete on an instance without identity",
            )
        })?;
        let id_values = identity.to_values();

        // owned association rows go first
        for table in &td.tables {
            if !table.multi_row || table.reference {
                continue;
            }
            let owner_refs: Vec<&str> = table.owner_columns.iter().map(String::as_str).collect();
            let sql = build_delete(&table.name, &owner_refs);
            tracing::debug!(sql = %sql, "clearing association rows");
            self.connection(&data_source)?.execute(&sql, &id_values)?;
        }

        // auxiliary rows may or may not exist
        for table in &td.tables {
            if table.primary || table.multi_row {
                continue;
            }
            let key_refs: Vec<&str> =
                table.identity_columns.iter().map(String::as_str).collect();
            let sql = build_delete(&table.name, &key_refs);
            tracing::debug!(sql = %sql, "deleting auxiliary row");
            let affected = self.connection(&data_source)?.execute(&sql, &id_values)?;
            if affected > 1 {
                return Err(Error::integrity(
                    IntegrityErrorKind::RowCountMismatch,
                    table.name.clone(),
                    format!("auxiliary delete affected {affected} rows"),
                ));
            }
        }

        let primary = td.primary_table();
        let key_refs: Vec<&str> = primary.identity_columns.iter().map(String::as_str).collect();
        let sql = build_delete(&primary.name, &key_refs);
        tracing::debug!(sql = %sql, "deleting primary row");
        let affected = self.connection(&data_source)?.execute(&sql, &id_values)?;
        if affected == 0 {
            return Err(Error::integrity(
                IntegrityErrorKind::MissingRow,
                primary.name.clone(),
                "delete matched no primary-table row",
            ));
        }
        if affected > 1 {
            return Err(Error::integrity(
                IntegrityErrorKind::RowCountMismatch,
                primary.name.clone(),
                format!("delete affected {affected} rows, expected 1"),
            ));
        }

        engine.map.remove(type_id, &identity);
        obj.stop();
        Ok(())
    }

    #[tracing::instrument(level = "debug", skip(self, obj), fields(oid = obj.oid()))]
    fn apply_list_update(&mut self, obj: &Arc<PersistentObject>, prop: PropId) -> Result<()> {
        let oid = obj.oid();
        let Some(staged) = self.staged.get(&(oid, prop)).cloned() else {
            return Ok(());
        };
        let engine = self.engine;
        let registry = engine.registry();
        let td = registry.descriptor(obj.type_id());
        let data_source = td.data_source.clone();
        let plan = engine
            .collection_plan(obj.type_id(), prop)
            .ok_or_else(|| {
                Error::config(
                    ConfigErrorKind::Invalid,
                    format!("collection '{}' has no plan", td.property_at(prop).name),
                )
            })?
            .clone();
        let owner = obj.identity().ok_or_else(|| {
            Error::lifecycle(
                LifecycleErrorKind::IllegalTransition,
                "collection update on an instance without identity",
            )
        })?;
        let owner_values = owner.to_values();

        let (inserted, removed) = staged.diff();

        for member in &removed {
            let member_values = member.to_values();
            let (sql, params) = if plan.reference_table {
                let mut params = member_values;
                params.extend(owner_values.clone());
                (plan.detach_member_sql(), params)
            } else {
                let mut params = owner_values.clone();
                params.extend(member_values);
                (plan.delete_member_sql(), params)
            };
            tracing::debug!(sql = %sql, "removing collection member");
            let affected = self.connection(&data_source)?.execute(&sql, &params)?;
            if affected != 1 {
                return Err(Error::integrity(
                    IntegrityErrorKind::RowCountMismatch,
                    plan.table.clone(),
                    format!("member removal affected {affected} rows, expected 1"),
                ));
            }
        }

        for member in &inserted {
            let member_identity = match member {
                MemberKey::Id(id) => id.clone(),
                MemberKey::Pending(member_oid) => {
                    let target = self.objects.get(member_oid).cloned().ok_or_else(|| {
                        Error::lifecycle(
                            LifecycleErrorKind::IllegalTransition,
                            "staged member is gone from the transaction",
                        )
                    })?;
                    self.resolve_identity_of(&target)?
                }
            };
            let member_values = member_identity.to_values();
            let (sql, params) = if plan.reference_table {
                let mut params = owner_values.clone();
                params.extend(member_values);
                (plan.attach_member_sql(), params)
            } else {
                let mut params = owner_values.clone();
                params.extend(member_values);
                (plan.insert_member_sql(), params)
            };
            tracing::debug!(sql = %sql, "adding collection member");
            let affected = self.connection(&data_source)?.execute(&sql, &params)?;
            if affected != 1 {
                return Err(Error::integrity(
                    IntegrityErrorKind::RowCountMismatch,
                    plan.table.clone(),
                    format!("member insert affected {affected} rows, expected 1"),
                ));
            }
        }

        // merge the staged view into the committed contents
        let mut resolved: Vec<Identity> = Vec::new();
        for member in staged.staged() {
            match member {
                MemberKey::Id(id) => resolved.push(id.clone()),
                MemberKey::Pending(member_oid) => {
                    if let Some(target) = self.objects.get(member_oid) {
                        if let Some(id) = target.identity() {
                            resolved.push(id);
                        }
                    }
                }
            }
        }
        obj.state
            .write()
            .collections
            .insert(prop, resolved.clone());
        if let Some(entry) = self.staged.get_mut(&(oid, prop)) {
            entry.merge_committed(resolved);
        }
        Ok(())
    }
}
