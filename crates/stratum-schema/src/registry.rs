//! The schema registry.
//!
//! An explicit value constructed once at process start: descriptor graphs
//! are registered, `resolve()` wires cross-references, and the registry is
//! then shared immutably with every component that needs lookups.

use crate::accessor::PropertySlots;
use crate::descriptor::{GroupId, TypeDescriptor};
use crate::property::{PropId, PropertyKind};
use std::collections::{HashMap, HashSet};
use stratum_core::{ConfigErrorKind, Error, Result};

/// Index of a type within the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeId(pub usize);

/// Registry of all mapped types.
#[derive(Debug, Default)]
pub struct SchemaRegistry {
    types: Vec<TypeDescriptor>,
    slots: Vec<PropertySlots>,
    by_name: HashMap<String, TypeId>,
    resolved: bool,
}

/// A planned reverse-pair wiring, applied after validation.
struct PairWire {
    owner: (usize, usize),
    mirror: (usize, usize),
}

impl SchemaRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a generator-built type descriptor.
    ///
    /// Structural invariants (primary table, single identity property,
    /// fetch-group limit) are validated here; cross-type references are
    /// wired later by [`resolve`](Self::resolve).
    pub fn register(&mut self, mut descriptor: TypeDescriptor) -> Result<TypeId> {
        if self.resolved {
            return Err(Error::config(
                ConfigErrorKind::NotResolved,
                "registry is already resolved; registration is closed",
            ));
        }
        if self.by_name.contains_key(&descriptor.name) {
            return Err(Error::config(
                ConfigErrorKind::Invalid,
                format!("type '{}' registered twice", descriptor.name),
            ));
        }
        descriptor.validate_and_index()?;
        let id = TypeId(self.types.len());
        self.by_name.insert(descriptor.name.clone(), id);
        self.types.push(descriptor);
        Ok(id)
    }

    /// Wire cross-references between registered types.
    ///
    /// Relationship targets are resolved to `TypeId`s and declared reverse
    /// properties are linked pairwise, marking the non-owning side
    /// read-only. Metadata problems (unknown targets, self-referential
    /// reverse links, conflicting ownership) are generator-time mistakes:
    /// they are logged and the affected relationship is left unresolved,
    /// the rest of the type stays usable.
    pub fn resolve(&mut self) -> Result<()> {
        if self.resolved {
            return Err(Error::config(
                ConfigErrorKind::NotResolved,
                "registry resolved twice",
            ));
        }

        // Phase 1: resolve relationship targets and base links.
        let mut targets: Vec<(usize, usize, TypeId)> = Vec::new();
        let mut bases: Vec<(usize, TypeId)> = Vec::new();
        for (t, td) in self.types.iter().enumerate() {
            if let Some(base) = &td.base {
                match self.by_name.get(base) {
                    Some(&id) => bases.push((t, id)),
                    None => tracing::warn!(
                        type_name = %td.name,
                        base = %base,
                        "unknown base type; inheritance link left unresolved"
                    ),
                }
            }
            for (p, prop) in td.properties.iter().enumerate() {
                if let Some(target) = prop.target_name() {
                    match self.by_name.get(target) {
                        Some(&id) => targets.push((t, p, id)),
                        None => tracing::warn!(
                            type_name = %td.name,
                            property = %prop.name,
                            target = %target,
                            "unknown target type; relationship left unresolved"
                        ),
                    }
                }
            }
        }
        for (t, p, id) in &targets {
            self.types[*t].properties[*p].target = Some(*id);
        }
        for (t, id) in bases {
            self.types[t].base_resolved = Some(id);
        }

        // Phase 2: link declared reverse pairs.
        let mut wires: Vec<PairWire> = Vec::new();
        let mut rejected: Vec<(usize, usize)> = Vec::new();
        let mut seen: HashSet<(usize, usize)> = HashSet::new();
        for (t, p, target) in &targets {
            if seen.contains(&(*t, *p)) {
                continue;
            }
            let td = &self.types[*t];
            let prop = &td.properties[*p];
            let Some(reverse_name) = &prop.reverse else {
                continue;
            };
            let other = &self.types[target.0];
            let Some(PropId(q)) = other.property_by_name(reverse_name) else {
                tracing::warn!(
                    type_name = %td.name,
                    property = %prop.name,
                    reverse = %reverse_name,
                    "reverse property does not exist on target; relationship left unresolved"
                );
                rejected.push((*t, *p));
                continue;
            };
            let mirror = &other.properties[q];

            if target.0 == *t && q == *p {
                tracing::warn!(
                    type_name = %td.name,
                    property = %prop.name,
                    "self-referential reverse link; relationship left unresolved"
                );
                rejected.push((*t, *p));
                continue;
            }
            if let Some(declared_back) = &mirror.reverse {
                if declared_back != &prop.name {
                    tracing::warn!(
                        type_name = %td.name,
                        property = %prop.name,
                        mirror = %mirror.name,
                        "reverse declarations disagree; relationship left unresolved"
                    );
                    rejected.push((*t, *p));
                    rejected.push((target.0, q));
                    seen.insert((target.0, q));
                    continue;
                }
            }

            let p_owns = claims_ownership(td, *p);
            let q_owns = claims_ownership(other, q);
            let (owner, non_owner) = match (p_owns, q_owns) {
                (true, false) => ((*t, *p), (target.0, q)),
                (false, true) => ((target.0, q), (*t, *p)),
                _ => {
                    // Both sides claiming ownership (or neither) is
                    // ambiguous; the whole relationship is rejected rather
                    // than picking a side by registration order.
                    tracing::warn!(
                        type_name = %td.name,
                        property = %prop.name,
                        mirror = %mirror.name,
                        both_claim = p_owns,
                        "conflicting reverse ownership; relationship left unresolved"
                    );
                    rejected.push((*t, *p));
                    rejected.push((target.0, q));
                    seen.insert((target.0, q));
                    continue;
                }
            };
            seen.insert((*t, *p));
            seen.insert((target.0, q));
            wires.push(PairWire {
                owner,
                mirror: non_owner,
            });
        }

        for (t, p) in rejected {
            let prop = &mut self.types[t].properties[p];
            prop.target = None;
            prop.reverse_resolved = None;
        }
        for wire in wires {
            let (ot, op) = wire.owner;
            let (mt, mp) = wire.mirror;
            self.types[ot].properties[op].reverse_resolved = Some(PropId(mp));
            self.types[mt].properties[mp].reverse_resolved = Some(PropId(op));
            self.types[mt].properties[mp].read_only = true;
        }

        // Phase 3: build the per-type accessor tables.
        self.slots = self.types.iter().map(PropertySlots::build).collect();
        self.resolved = true;
        Ok(())
    }

    /// Whether `resolve()` has completed.
    pub fn is_resolved(&self) -> bool {
        self.resolved
    }

    /// Number of registered types.
    pub fn len(&self) -> usize {
        self.types.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// Access a type descriptor.
    pub fn descriptor(&self, id: TypeId) -> &TypeDescriptor {
        &self.types[id.0]
    }

    /// Access a type's accessor table. Only valid after `resolve()`.
    pub fn slots(&self, id: TypeId) -> &PropertySlots {
        &self.slots[id.0]
    }

    /// Look up a type by name.
    pub fn type_by_name(&self, name: &str) -> Result<TypeId> {
        self.by_name.get(name).copied().ok_or_else(|| {
            Error::config(
                ConfigErrorKind::UnknownType,
                format!("no mapped type named '{name}'"),
            )
        })
    }

    /// The fetch group that loads the named property.
    ///
    /// Unknown property names are a programmer error, reported as a
    /// configuration error rather than silently returning nothing.
    pub fn fetch_group_for_property(&self, id: TypeId, property: &str) -> Result<GroupId> {
        let td = self.descriptor(id);
        match td.property_by_name(property) {
            Some(pid) => Ok(GroupId(td.property_at(pid).group_index)),
            None => Err(Error::config(
                ConfigErrorKind::UnknownProperty,
                format!("type '{}' has no property '{}'", td.name, property),
            )),
        }
    }

    /// Find the subtype of `base` carrying the given discriminator token.
    pub fn subtype_by_discriminator(&self, base: TypeId, token: &str) -> Option<TypeId> {
        self.types.iter().enumerate().find_map(|(i, td)| {
            let matches_token = td
                .discriminator
                .as_ref()
                .is_some_and(|(_, t)| t == token);
            let descends = i == base.0 || td.base_resolved == Some(base);
            (matches_token && descends).then_some(TypeId(i))
        })
    }

    /// Iterate all registered type ids.
    pub fn type_ids(&self) -> impl Iterator<Item = TypeId> {
        (0..self.types.len()).map(TypeId)
    }
}

/// Does this side of a bidirectional pair claim ownership of the mapping?
///
/// A reference property claims ownership (it holds the foreign key); a
/// collection claims ownership only when its multi-row table is defined by
/// this type rather than viewed from the member type. A declared
/// `read_only` side never claims.
fn claims_ownership(td: &TypeDescriptor, prop: usize) -> bool {
    let p = &td.properties[prop];
    if p.read_only {
        return false;
    }
    match p.kind {
        PropertyKind::Reference { .. } => true,
        PropertyKind::Collection { .. } => !td.tables[p.table].reference,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::property::{ColumnSpec, PropertyDescriptor};
    use crate::table::TableDescriptor;
    use stratum_core::SqlType;

    fn team_type() -> TypeDescriptor {
        TypeDescriptor::new("Team")
            .table(TableDescriptor::primary("teams", vec!["id".into()]))
            .table(
                TableDescriptor::multi_row("heroes", vec!["team_id".into()], vec!["id".into()])
                    .reference(true)
                    .reverse_property("team"),
            )
            .property(PropertyDescriptor::identity(
                "id",
                vec![ColumnSpec::new("id", SqlType::BigInt)],
            ))
            .property(PropertyDescriptor::scalar(
                "name",
                ColumnSpec::new("name", SqlType::Text),
            ))
            .property(
                PropertyDescriptor::collection("members", "Hero", 1)
                    .fetch_group("members")
                    .reverse("team"),
            )
    }

    fn hero_type() -> TypeDescriptor {
        TypeDescriptor::new("Hero")
            .table(TableDescriptor::primary("heroes", vec!["id".into()]))
            .property(PropertyDescriptor::identity(
                "id",
                vec![ColumnSpec::new("id", SqlType::BigInt)],
            ))
            .property(PropertyDescriptor::scalar(
                "name",
                ColumnSpec::new("name", SqlType::Text),
            ))
            .property(
                PropertyDescriptor::reference(
                    "team",
                    "Team",
                    vec![ColumnSpec::new("team_id", SqlType::BigInt)],
                )
                .nullable(true)
                .reverse("members"),
            )
    }

    fn resolved_registry() -> (SchemaRegistry, TypeId, TypeId) {
        let mut reg = SchemaRegistry::new();
        let team = reg.register(team_type()).unwrap();
        let hero = reg.register(hero_type()).unwrap();
        reg.resolve().unwrap();
        (reg, team, hero)
    }

    #[test]
    fn wires_reference_and_collection_pair() {
        let (reg, team, hero) = resolved_registry();

        let hero_team = reg.descriptor(hero).property_by_name("team").unwrap();
        let team_members = reg.descriptor(team).property_by_name("members").unwrap();

        let ht = reg.descriptor(hero).property_at(hero_team);
        assert_eq!(ht.target, Some(team));
        assert_eq!(ht.reverse_resolved, Some(team_members));
        assert!(!ht.read_only);

        let tm = reg.descriptor(team).property_at(team_members);
        assert_eq!(tm.target, Some(hero));
        assert_eq!(tm.reverse_resolved, Some(hero_team));
        // collection through a reference table is the non-owning side
        assert!(tm.read_only);
    }

    #[test]
    fn conflicting_ownership_rejects_both_sides() {
        // Two reference properties pointing at each other, both owning.
        let a = TypeDescriptor::new("A")
            .table(TableDescriptor::primary("a", vec!["id".into()]))
            .property(PropertyDescriptor::identity(
                "id",
                vec![ColumnSpec::new("id", SqlType::BigInt)],
            ))
            .property(
                PropertyDescriptor::reference(
                    "b",
                    "B",
                    vec![ColumnSpec::new("b_id", SqlType::BigInt)],
                )
                .nullable(true)
                .reverse("a"),
            );
        let b = TypeDescriptor::new("B")
            .table(TableDescriptor::primary("b", vec!["id".into()]))
            .property(PropertyDescriptor::identity(
                "id",
                vec![ColumnSpec::new("id", SqlType::BigInt)],
            ))
            .property(
                PropertyDescriptor::reference(
                    "a",
                    "A",
                    vec![ColumnSpec::new("a_id", SqlType::BigInt)],
                )
                .nullable(true)
                .reverse("b"),
            );

        let mut reg = SchemaRegistry::new();
        let a_id = reg.register(a).unwrap();
        let b_id = reg.register(b).unwrap();
        reg.resolve().unwrap();

        let pa = reg.descriptor(a_id).property_by_name("b").unwrap();
        let pb = reg.descriptor(b_id).property_by_name("a").unwrap();
        assert_eq!(reg.descriptor(a_id).property_at(pa).target, None);
        assert_eq!(reg.descriptor(b_id).property_at(pb).target, None);
    }

    #[test]
    fn one_to_one_with_declared_read_only_side() {
        let a = TypeDescriptor::new("A")
            .table(TableDescriptor::primary("a", vec!["id".into()]))
            .property(PropertyDescriptor::identity(
                "id",
                vec![ColumnSpec::new("id", SqlType::BigInt)],
            ))
            .property(
                PropertyDescriptor::reference(
                    "b",
                    "B",
                    vec![ColumnSpec::new("b_id", SqlType::BigInt)],
                )
                .nullable(true)
                .unique(true)
                .reverse("a"),
            );
        let b = TypeDescriptor::new("B")
            .table(TableDescriptor::primary("b", vec!["id".into()]))
            .property(PropertyDescriptor::identity(
                "id",
                vec![ColumnSpec::new("id", SqlType::BigInt)],
            ))
            .property(
                PropertyDescriptor::reference(
                    "a",
                    "A",
                    vec![ColumnSpec::new("a_id", SqlType::BigInt)],
                )
                .nullable(true)
                .read_only(true)
                .reverse("b"),
            );

        let mut reg = SchemaRegistry::new();
        let a_id = reg.register(a).unwrap();
        let b_id = reg.register(b).unwrap();
        reg.resolve().unwrap();

        let pa = reg.descriptor(a_id).property_by_name("b").unwrap();
        let pb = reg.descriptor(b_id).property_by_name("a").unwrap();
        assert_eq!(
            reg.descriptor(a_id).property_at(pa).reverse_resolved,
            Some(pb)
        );
        assert!(reg.descriptor(b_id).property_at(pb).read_only);
    }

    #[test]
    fn unknown_property_is_config_error() {
        let (reg, team, _) = resolved_registry();
        let err = reg.fetch_group_for_property(team, "nonexistent").unwrap_err();
        assert!(matches!(
            err,
            stratum_core::Error::Config(ref c) if c.kind == ConfigErrorKind::UnknownProperty
        ));
    }

    #[test]
    fn fetch_group_lookup() {
        let (reg, team, _) = resolved_registry();
        let default = reg.fetch_group_for_property(team, "name").unwrap();
        let members = reg.fetch_group_for_property(team, "members").unwrap();
        assert_eq!(default, GroupId(0));
        assert_eq!(members, GroupId(1));
    }

    #[test]
    fn register_after_resolve_is_rejected() {
        let (mut reg, _, _) = resolved_registry();
        let err = reg.register(TypeDescriptor::new("Late")).unwrap_err();
        assert!(err.is_config());
    }

    #[test]
    fn duplicate_type_name_is_rejected() {
        let mut reg = SchemaRegistry::new();
        reg.register(hero_type()).unwrap();
        assert!(reg.register(hero_type()).is_err());
    }
}
