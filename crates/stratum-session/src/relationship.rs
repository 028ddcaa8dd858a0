//! Bidirectional-relationship synchronization and the collection API.
//!
//! A write to one side of a resolved bidirectional pair mirrors onto the
//! in-memory reverse side in the same transaction: setting a child's
//! owning reference stages the child into the new parent's collection
//! view (and out of the old one); adding to an owning collection writes
//! the member's mirror reference. The non-owning side never produces
//! pending operations of its own; its storage is driven entirely by the
//! owning side.

use crate::object::PersistentObject;
use crate::operation::{OpSlot, PendingOperation};
use crate::staged::{MemberKey, StagedCollection};
use crate::transaction::{Transaction, identity_slot_value, member_key_of};
use std::sync::Arc;
use stratum_core::{ConfigErrorKind, Error, Result, Value};
use stratum_schema::{GroupId, PropId, PropertyKind, TypeId};

impl Transaction<'_> {
    /// Read a collection property as live member instances.
    ///
    /// Inside this transaction the staged view is returned; the committed
    /// contents stay visible to everyone else until flush.
    pub fn collection(
        &mut self,
        obj: &Arc<PersistentObject>,
        property: &str,
    ) -> Result<Vec<Arc<PersistentObject>>> {
        self.ensure_open()?;
        let registry = self.engine.registry();
        let type_id = obj.type_id();
        let prop = registry.slots(type_id).slot_of(property)?;
        let descriptor = registry.descriptor(type_id).property_at(prop);
        let PropertyKind::Collection { .. } = descriptor.kind else {
            return Err(Error::config(
                ConfigErrorKind::Invalid,
                format!("'{property}' is not a collection property"),
            ));
        };
        let target = descriptor.target.ok_or_else(|| {
            Error::config(
                ConfigErrorKind::UnknownType,
                format!("collection '{property}' has no resolved member type"),
            )
        })?;

        if !obj.is_transient() {
            self.ensure_fetched(obj, GroupId(descriptor.group_index))?;
        }

        let key = (obj.oid(), prop);
        let member_keys: Vec<MemberKey> = match self.staged.get(&key) {
            Some(staged) => staged.staged().to_vec(),
            None => obj
                .state
                .read()
                .collections
                .get(&prop)
                .cloned()
                .unwrap_or_default()
                .into_iter()
                .map(MemberKey::Id)
                .collect(),
        };

        let mut members = Vec::with_capacity(member_keys.len());
        for member in member_keys {
            match member {
                MemberKey::Id(id) => {
                    let instance = match self.engine.lookup_polymorphic(target, &id) {
                        Some(found) => found,
                        None => self.engine.get_by_id(target, id)?,
                    };
                    members.push(instance);
                }
                MemberKey::Pending(oid) => {
                    let instance = self.objects.get(&oid).cloned().ok_or_else(|| {
                        Error::config(
                            ConfigErrorKind::Invalid,
                            "staged member is gone from the transaction",
                        )
                    })?;
                    members.push(instance);
                }
            }
        }
        Ok(members)
    }

    /// Append a member to a collection, keeping the reverse side in sync.
    ///
    /// On the non-owning side of a one-to-many pair this routes through
    /// the member's owning reference, so the member's foreign key is what
    /// actually changes.
    pub fn collection_add(
        &mut self,
        obj: &Arc<PersistentObject>,
        property: &str,
        member: &Arc<PersistentObject>,
    ) -> Result<()> {
        self.ensure_open()?;
        let (prop, target) = self.collection_target(obj, property)?;
        self.check_member_type(target, member, property)?;
        let registry = self.engine.registry();
        let descriptor = registry.descriptor(obj.type_id()).property_at(prop);

        if descriptor.read_only {
            let mirror = descriptor.reverse_resolved.ok_or_else(|| {
                Error::config(
                    ConfigErrorKind::Invalid,
                    format!("collection '{property}' is read-only and has no owner side"),
                )
            })?;
            return self
                .set_reference_impl(member, mirror, Some(obj))
                .map(|_| ());
        }

        if !obj.is_transient() {
            self.ensure_fetched(obj, GroupId(descriptor.group_index))?;
        }
        self.objects.insert(member.oid(), Arc::clone(member));
        self.stage_member_change(obj, prop, member_key_of(member), true);
        self.ensure_list_update(obj, prop);

        if let Some(mirror) = descriptor.reverse_resolved {
            if member.type_id() == target {
                self.mirror_owner_onto_member(obj, member, target, mirror, true)?;
            }
        }
        Ok(())
    }

    /// Remove a member from a collection, clearing the reverse side.
    pub fn collection_remove(
        &mut self,
        obj: &Arc<PersistentObject>,
        property: &str,
        member: &Arc<PersistentObject>,
    ) -> Result<()> {
        self.ensure_open()?;
        let (prop, target) = self.collection_target(obj, property)?;
        self.check_member_type(target, member, property)?;
        let registry = self.engine.registry();
        let descriptor = registry.descriptor(obj.type_id()).property_at(prop);

        if descriptor.read_only {
            let mirror = descriptor.reverse_resolved.ok_or_else(|| {
                Error::config(
                    ConfigErrorKind::Invalid,
                    format!("collection '{property}' is read-only and has no owner side"),
                )
            })?;
            return self.set_reference_impl(member, mirror, None).map(|_| ());
        }

        if !obj.is_transient() {
            self.ensure_fetched(obj, GroupId(descriptor.group_index))?;
        }
        self.stage_member_change(obj, prop, member_key_of(member), false);
        self.ensure_list_update(obj, prop);

        if let Some(mirror) = descriptor.reverse_resolved {
            if member.type_id() == target {
                self.mirror_owner_onto_member(obj, member, target, mirror, false)?;
            }
        }
        Ok(())
    }

    fn collection_target(
        &self,
        obj: &Arc<PersistentObject>,
        property: &str,
    ) -> Result<(PropId, TypeId)> {
        let registry = self.engine.registry();
        let type_id = obj.type_id();
        let prop = registry.slots(type_id).slot_of(property)?;
        let descriptor = registry.descriptor(type_id).property_at(prop);
        let PropertyKind::Collection { .. } = descriptor.kind else {
            return Err(Error::config(
                ConfigErrorKind::Invalid,
                format!("'{property}' is not a collection property"),
            ));
        };
        let target = descriptor.target.ok_or_else(|| {
            Error::config(
                ConfigErrorKind::UnknownType,
                format!("collection '{property}' has no resolved member type"),
            )
        })?;
        Ok((prop, target))
    }

    fn check_member_type(
        &self,
        target: TypeId,
        member: &Arc<PersistentObject>,
        property: &str,
    ) -> Result<()> {
        let registry = self.engine.registry();
        let mt = member.type_id();
        let compatible = mt == target || registry.descriptor(mt).base_resolved == Some(target);
        if compatible {
            Ok(())
        } else {
            Err(Error::config(
                ConfigErrorKind::Invalid,
                format!(
                    "collection '{}' expects members of type {}, got {}",
                    property,
                    registry.descriptor(target).name,
                    registry.descriptor(mt).name
                ),
            ))
        }
    }

    /// Mirror an owning-reference change onto the reverse side.
    ///
    /// Called from the reference write path; `old`/`new` are the previous
    /// and next referenced instances, either of which may be absent.
    pub(crate) fn sync_reference_change(
        &mut self,
        obj: &Arc<PersistentObject>,
        prop: PropId,
        old: Option<&Arc<PersistentObject>>,
        new: Option<&Arc<PersistentObject>>,
    ) -> Result<()> {
        let registry = self.engine.registry();
        let descriptor = registry.descriptor(obj.type_id()).property_at(prop);
        let (Some(target_type), Some(mirror)) = (descriptor.target, descriptor.reverse_resolved)
        else {
            return Ok(());
        };
        if let (Some(old), Some(new)) = (old, new) {
            if Arc::ptr_eq(old, new) {
                return Ok(());
            }
        }
        let mirror_kind = registry
            .descriptor(target_type)
            .property_at(mirror)
            .kind
            .clone();
        let member = member_key_of(obj);

        match mirror_kind {
            PropertyKind::Collection { .. } => {
                if let Some(old) = old {
                    if old.type_id() == target_type {
                        self.stage_member_change(old, mirror, member.clone(), false);
                    }
                }
                if let Some(new) = new {
                    if new.type_id() == target_type {
                        self.stage_member_change(new, mirror, member, true);
                    }
                }
            }
            PropertyKind::Reference { .. } => {
                // one-to-one: clear the old mirror, point the new one back
                if let Some(old) = old {
                    if old.type_id() == target_type {
                        self.pending_refs.remove(&(old.oid(), mirror));
                        old.write_slot(mirror, Value::Null);
                    }
                }
                if let Some(new) = new {
                    if new.type_id() == target_type {
                        self.write_mirror_reference(new, mirror, Some(obj));
                    }
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// Mirror a collection change onto the member's reverse property.
    fn mirror_owner_onto_member(
        &mut self,
        owner: &Arc<PersistentObject>,
        member: &Arc<PersistentObject>,
        target_type: TypeId,
        mirror: PropId,
        add: bool,
    ) -> Result<()> {
        let registry = self.engine.registry();
        let mirror_kind = registry
            .descriptor(target_type)
            .property_at(mirror)
            .kind
            .clone();
        match mirror_kind {
            PropertyKind::Reference { .. } => {
                // the mirror is the member's (read-only) back-reference
                if add {
                    self.write_mirror_reference(member, mirror, Some(owner));
                } else {
                    self.write_mirror_reference(member, mirror, None);
                }
            }
            PropertyKind::Collection { .. } => {
                // many-to-many: mirror membership on the member's side
                self.stage_member_change(member, mirror, member_key_of(owner), add);
            }
            _ => {}
        }
        Ok(())
    }

    /// Write a mirror reference slot, deferring to a pending target when
    /// the pointed-at instance has no identity yet.
    fn write_mirror_reference(
        &mut self,
        holder: &Arc<PersistentObject>,
        mirror: PropId,
        points_at: Option<&Arc<PersistentObject>>,
    ) {
        match points_at {
            None => {
                self.pending_refs.remove(&(holder.oid(), mirror));
                holder.write_slot(mirror, Value::Null);
            }
            Some(target) => {
                self.objects.insert(holder.oid(), Arc::clone(holder));
                match target.identity() {
                    Some(id) => {
                        self.pending_refs.remove(&(holder.oid(), mirror));
                        holder.write_slot(mirror, identity_slot_value(&id));
                    }
                    None => {
                        self.objects.insert(target.oid(), Arc::clone(target));
                        self.pending_refs
                            .insert((holder.oid(), mirror), Arc::clone(target));
                    }
                }
            }
        }
    }

    /// Stage a membership change on a collection view.
    ///
    /// Staging starts from the committed contents; a collection that has
    /// never been loaded is left alone (the change will be visible once
    /// it loads from storage).
    pub(crate) fn stage_member_change(
        &mut self,
        owner: &Arc<PersistentObject>,
        prop: PropId,
        member: MemberKey,
        add: bool,
    ) {
        let key = (owner.oid(), prop);
        if !self.staged.contains_key(&key) {
            let committed = if owner.is_transient() {
                Some(Vec::new())
            } else {
                owner.state.read().collections.get(&prop).cloned()
            };
            let Some(committed) = committed else {
                return;
            };
            self.staged.insert(key, StagedCollection::new(committed));
        }
        self.objects.insert(owner.oid(), Arc::clone(owner));
        if let Some(staged) = self.staged.get_mut(&key) {
            if add {
                staged.add(member);
            } else {
                staged.remove(&member);
            }
        }
    }

    /// Obtain-or-create the pending collection diff for (object,
    /// property).
    fn ensure_list_update(&mut self, obj: &Arc<PersistentObject>, prop: PropId) {
        let key = (obj.oid(), prop);
        if let Some(&ix) = self.by_collection.get(&key) {
            if !self.ops[ix].cancelled && !self.ops[ix].applied {
                return;
            }
        }
        self.objects.insert(obj.oid(), Arc::clone(obj));
        let ix = self.ops.len();
        self.ops.push(OpSlot::new(PendingOperation::ListUpdate {
            object: Arc::clone(obj),
            prop,
        }));
        self.by_collection.insert(key, ix);
    }
}
