//! Fetch-group SELECT planning.
//!
//! A [`FetchPlan`] is precomputed per (type, fetch group): the column
//! list in decode order, the FROM clause with auxiliary-table outer
//! joins and eager reference joins, and the identity predicate.
//! [`CollectionPlan`]s cover multi-row tables, which are never joined
//! into the object select.

use crate::clause::{OrderBy, Paging};
use crate::expr::Filter;
use std::collections::HashMap;
use stratum_core::{ConfigErrorKind, Error, Result, quote_ident};
use stratum_schema::{
    GroupId, PropId, PropertyKind, SchemaRegistry, TypeId,
};

/// One decode step of a fetch plan, consuming a fixed number of result
/// columns.
#[derive(Debug, Clone)]
pub enum PlanEntry {
    /// Scalar or identity property: `width` aliased columns.
    Value { prop: PropId, width: usize },
    /// Reference property: `width` foreign-key columns, plus one
    /// discriminator column from the eager join when present.
    Reference {
        prop: PropId,
        target: TypeId,
        width: usize,
        has_discriminator: bool,
    },
}

impl PlanEntry {
    /// Result columns consumed by this entry.
    pub fn consumed(&self) -> usize {
        match self {
            PlanEntry::Value { width, .. } => *width,
            PlanEntry::Reference {
                width,
                has_discriminator,
                ..
            } => width + usize::from(*has_discriminator),
        }
    }
}

/// A precomputed SELECT over one fetch group.
#[derive(Debug, Clone)]
pub struct FetchPlan {
    /// The mapped type.
    pub type_id: TypeId,
    /// The fetch group.
    pub group: GroupId,
    /// Primary table name (for diagnostics).
    pub table: String,
    /// Decode steps; the first entry is always the identity property.
    pub entries: Vec<PlanEntry>,
    /// Collection properties in this group, loaded by separate
    /// collection plans.
    pub collections: Vec<PropId>,
    /// Number of identity columns bound by `select_by_identity`.
    pub key_width: usize,
    select_list: String,
    from_clause: String,
    key_predicate: String,
    columns_by_property: HashMap<String, String>,
}

impl FetchPlan {
    /// SELECT loading one object by identity; bind the identity values in
    /// column order.
    pub fn select_by_identity(&self) -> String {
        format!(
            "SELECT {} {} WHERE {}",
            self.select_list, self.from_clause, self.key_predicate
        )
    }

    /// SELECT over the group with an optional filter, ordering and paging.
    pub fn select_where(
        &self,
        filter: Option<&Filter>,
        order: &[OrderBy],
        paging: Paging,
    ) -> Result<(String, Vec<Value>)> {
        let column_of = |name: &str| self.column_for_property(name);
        let mut params = Vec::new();
        let mut sql = format!("SELECT {} {}", self.select_list, self.from_clause);
        if let Some(filter) = filter {
            let predicate = filter.build(&column_of, &mut params)?;
            sql.push_str(" WHERE ");
            sql.push_str(&predicate);
        }
        if !order.is_empty() {
            let terms = order
                .iter()
                .map(|o| o.build(&column_of))
                .collect::<Result<Vec<_>>>()?;
            sql.push_str(" ORDER BY ");
            sql.push_str(&terms.join(", "));
        }
        sql.push_str(&paging.build());
        Ok((sql, params))
    }

    /// Qualified column expression for a single-column property.
    pub fn column_for_property(&self, name: &str) -> Result<String> {
        self.columns_by_property.get(name).cloned().ok_or_else(|| {
            Error::config(
                ConfigErrorKind::UnknownProperty,
                format!("property '{name}' is not filterable in this fetch group"),
            )
        })
    }
}

use stratum_core::Value;

/// A precomputed select/mutation set for one multi-row collection table.
#[derive(Debug, Clone)]
pub struct CollectionPlan {
    /// Owning type.
    pub owner_type: TypeId,
    /// The collection property.
    pub prop: PropId,
    /// Member type.
    pub target: TypeId,
    /// Multi-row table name.
    pub table: String,
    /// Columns referencing the owner identity.
    pub owner_columns: Vec<String>,
    /// Columns referencing the member identity.
    pub element_columns: Vec<String>,
    /// The table is the member type's own table (one-to-many through a
    /// foreign key); membership changes update that foreign key instead
    /// of inserting/deleting association rows.
    pub reference_table: bool,
}

impl CollectionPlan {
    /// SELECT owner + member identity columns for `owner_count` owners,
    /// ordered by owner so decoding can group on owner transitions.
    ///
    /// Bind each owner's identity values in sequence.
    pub fn select_for_owners(&self, owner_count: usize) -> String {
        let mut select_cols = Vec::new();
        for c in self.owner_columns.iter().chain(&self.element_columns) {
            select_cols.push(quote_ident(c));
        }
        let mut predicates = Vec::with_capacity(owner_count);
        let mut n = 0;
        for _ in 0..owner_count {
            let one = self
                .owner_columns
                .iter()
                .map(|c| {
                    n += 1;
                    format!("{} = ${}", quote_ident(c), n)
                })
                .collect::<Vec<_>>()
                .join(" AND ");
            predicates.push(format!("({one})"));
        }
        let order = self
            .owner_columns
            .iter()
            .map(|c| quote_ident(c))
            .collect::<Vec<_>>()
            .join(", ");
        format!(
            "SELECT {} FROM {} WHERE {} ORDER BY {}",
            select_cols.join(", "),
            quote_ident(&self.table),
            predicates.join(" OR "),
            order
        )
    }

    /// INSERT one membership row; bind owner then member identity values.
    pub fn insert_member_sql(&self) -> String {
        let columns: Vec<&str> = self
            .owner_columns
            .iter()
            .chain(&self.element_columns)
            .map(String::as_str)
            .collect();
        crate::statement::build_insert(&self.table, &columns)
    }

    /// DELETE one membership row; bind owner then member identity values.
    pub fn delete_member_sql(&self) -> String {
        let columns: Vec<&str> = self
            .owner_columns
            .iter()
            .chain(&self.element_columns)
            .map(String::as_str)
            .collect();
        crate::statement::build_delete(&self.table, &columns)
    }

    /// Reference-table attach: point the member's foreign key at the
    /// owner. Bind owner values then member identity values.
    pub fn attach_member_sql(&self) -> String {
        let owner: Vec<&str> = self.owner_columns.iter().map(String::as_str).collect();
        let element: Vec<&str> = self.element_columns.iter().map(String::as_str).collect();
        crate::statement::build_update(&self.table, &owner, &element)
    }

    /// Reference-table detach: clear the member's foreign key, guarded by
    /// the current owner so another owner's member is never detached.
    /// Bind member identity values then owner values.
    pub fn detach_member_sql(&self) -> String {
        let set = self
            .owner_columns
            .iter()
            .map(|c| format!("{} = NULL", quote_ident(c)))
            .collect::<Vec<_>>()
            .join(", ");
        let mut n = 0;
        let mut predicate = self
            .element_columns
            .iter()
            .map(|c| {
                n += 1;
                format!("{} = ${}", quote_ident(c), n)
            })
            .collect::<Vec<_>>()
            .join(" AND ");
        for c in &self.owner_columns {
            n += 1;
            predicate.push_str(&format!(" AND {} = ${}", quote_ident(c), n));
        }
        format!(
            "UPDATE {} SET {} WHERE {}",
            quote_ident(&self.table),
            set,
            predicate
        )
    }
}

/// Builds fetch and collection plans from resolved schema metadata.
#[derive(Debug, Clone, Copy)]
pub struct FetchPlanner<'a> {
    registry: &'a SchemaRegistry,
}

impl<'a> FetchPlanner<'a> {
    /// Create a planner over a resolved registry.
    pub fn new(registry: &'a SchemaRegistry) -> Self {
        Self { registry }
    }

    /// Plan the SELECT for one (type, fetch group).
    #[tracing::instrument(level = "trace", skip(self))]
    pub fn plan(&self, type_id: TypeId, group: GroupId) -> Result<FetchPlan> {
        let td = self.registry.descriptor(type_id);
        let primary = td.primary_table();
        let id_prop = td.identity_property();

        let mut entries = Vec::new();
        let mut select_items = Vec::new();
        let mut joins = String::new();
        let mut joined_aux: Vec<usize> = Vec::new();
        let mut collections = Vec::new();
        let mut columns_by_property = HashMap::new();

        // The identity property leads every plan so decoded rows can be
        // placed in the identity map.
        Self::push_value_entry(td, id_prop, &mut entries, &mut select_items);
        Self::index_filterable(td, id_prop, &mut columns_by_property);

        for &pid in &td.group(group).properties {
            if pid == id_prop {
                continue;
            }
            let prop = td.property_at(pid);
            match &prop.kind {
                PropertyKind::Collection { .. } => {
                    collections.push(pid);
                    continue;
                }
                // mirror-only properties store nothing on this type; the
                // synchronizer maintains them in memory
                _ if prop.columns.is_empty() => continue,
                PropertyKind::Reference { .. } if prop.target.is_some() => {
                    let target = prop.target.expect("checked above");
                    if prop.table != 0 && !joined_aux.contains(&prop.table) {
                        joined_aux.push(prop.table);
                    }
                    let alias = format!("t{}", prop.table);
                    for col in &prop.columns {
                        select_items.push(format!(
                            "{}.{} AS {}__{}",
                            alias,
                            quote_ident(&col.name),
                            alias,
                            col.name
                        ));
                    }
                    // Eager join pulls the referenced row's discriminator
                    // so the decode step can instantiate the right subtype.
                    let target_td = self.registry.descriptor(target);
                    let eager =
                        !prop.on_demand && target_td.discriminator.is_some();
                    if eager {
                        let ralias = format!("r{}", pid.0);
                        let target_primary = target_td.primary_table();
                        let on = target_primary
                            .identity_columns
                            .iter()
                            .zip(&prop.columns)
                            .map(|(tid_col, fk)| {
                                format!(
                                    "{}.{} = {}.{}",
                                    ralias,
                                    quote_ident(tid_col),
                                    alias,
                                    quote_ident(&fk.name)
                                )
                            })
                            .collect::<Vec<_>>()
                            .join(" AND ");
                        joins.push_str(&format!(
                            " LEFT OUTER JOIN {} {} ON {}",
                            quote_ident(&target_primary.name),
                            ralias,
                            on
                        ));
                        let (disc_col, _) = target_td
                            .discriminator
                            .as_ref()
                            .expect("eager implies discriminator");
                        select_items.push(format!(
                            "{}.{} AS {}__{}",
                            ralias,
                            quote_ident(disc_col),
                            ralias,
                            disc_col
                        ));
                    }
                    entries.push(PlanEntry::Reference {
                        prop: pid,
                        target,
                        width: prop.columns.len(),
                        has_discriminator: eager,
                    });
                    Self::index_filterable(td, pid, &mut columns_by_property);
                    continue;
                }
                // Unresolved references degrade to their raw foreign-key
                // columns; scalars take the same path.
                _ => {
                    if prop.table != 0 && !joined_aux.contains(&prop.table) {
                        joined_aux.push(prop.table);
                    }
                    Self::push_value_entry(td, pid, &mut entries, &mut select_items);
                    Self::index_filterable(td, pid, &mut columns_by_property);
                }
            }
        }

        let mut from_clause = format!("FROM {} t0", quote_ident(&primary.name));
        for table_index in joined_aux {
            let aux = &td.tables[table_index];
            let alias = format!("t{table_index}");
            let on = aux
                .identity_columns
                .iter()
                .zip(&primary.identity_columns)
                .map(|(a, p)| {
                    format!("{}.{} = t0.{}", alias, quote_ident(a), quote_ident(p))
                })
                .collect::<Vec<_>>()
                .join(" AND ");
            from_clause.push_str(&format!(
                " LEFT OUTER JOIN {} {} ON {}",
                quote_ident(&aux.name),
                alias,
                on
            ));
        }
        from_clause.push_str(&joins);

        let key_predicate = primary
            .identity_columns
            .iter()
            .enumerate()
            .map(|(i, c)| format!("t0.{} = ${}", quote_ident(c), i + 1))
            .collect::<Vec<_>>()
            .join(" AND ");

        Ok(FetchPlan {
            type_id,
            group,
            table: primary.name.clone(),
            entries,
            collections,
            key_width: primary.identity_columns.len(),
            select_list: select_items.join(", "),
            from_clause,
            key_predicate,
            columns_by_property,
        })
    }

    /// Plan the collection select/mutations for one collection property.
    pub fn collection_plan(&self, type_id: TypeId, prop: PropId) -> Result<CollectionPlan> {
        let td = self.registry.descriptor(type_id);
        let p = td.property_at(prop);
        let PropertyKind::Collection { .. } = p.kind else {
            return Err(Error::config(
                ConfigErrorKind::Invalid,
                format!("property '{}' is not a collection", p.name),
            ));
        };
        let Some(target) = p.target else {
            return Err(Error::config(
                ConfigErrorKind::UnknownType,
                format!("collection '{}' has no resolved member type", p.name),
            ));
        };
        let table = &td.tables[p.table];
        Ok(CollectionPlan {
            owner_type: type_id,
            prop,
            target,
            table: table.name.clone(),
            owner_columns: table.owner_columns.clone(),
            element_columns: table.element_columns.clone(),
            reference_table: table.reference,
        })
    }

    fn push_value_entry(
        td: &stratum_schema::TypeDescriptor,
        pid: PropId,
        entries: &mut Vec<PlanEntry>,
        select_items: &mut Vec<String>,
    ) {
        let prop = td.property_at(pid);
        let alias = format!("t{}", prop.table);
        for col in &prop.columns {
            select_items.push(format!(
                "{}.{} AS {}__{}",
                alias,
                quote_ident(&col.name),
                alias,
                col.name
            ));
        }
        entries.push(PlanEntry::Value {
            prop: pid,
            width: prop.columns.len(),
        });
    }

    fn index_filterable(
        td: &stratum_schema::TypeDescriptor,
        pid: PropId,
        columns_by_property: &mut HashMap<String, String>,
    ) {
        let prop = td.property_at(pid);
        if prop.columns.len() == 1 {
            columns_by_property.insert(
                prop.name.clone(),
                format!("t{}.{}", prop.table, quote_ident(&prop.columns[0].name)),
            );
        }
    }
}
