//! Result-row decoding.
//!
//! Decoding walks the plan's entries in declared order and produces a
//! neutral bundle of slot values and reference identities. The session
//! layer applies the bundle to live objects, resolving references
//! through the identity map so decoded graphs share instances.

use crate::select::{CollectionPlan, FetchPlan, PlanEntry};
use stratum_core::{
    Error, Identity, IntegrityErrorKind, Result, Row, TypeError, Value,
};
use stratum_schema::{PropId, SchemaRegistry, TypeId};

/// A decoded reference-property cell.
#[derive(Debug, Clone)]
pub struct DecodedReference {
    /// The reference property.
    pub prop: PropId,
    /// Concrete target type: the declared target, or the subtype named by
    /// the joined discriminator column.
    pub target: TypeId,
    /// Referenced identity; `None` for a NULL foreign key.
    pub identity: Option<Identity>,
}

/// One decoded object row.
#[derive(Debug, Clone)]
pub struct DecodedObject {
    /// The object's identity.
    pub identity: Identity,
    /// Slot values in plan order (identity slot included; reference slots
    /// hold their raw foreign-key value).
    pub values: Vec<(PropId, Value)>,
    /// Reference cells for resolution through the identity map.
    pub references: Vec<DecodedReference>,
}

fn slot_value(columns: &[Value]) -> Value {
    if columns.len() == 1 {
        columns[0].clone()
    } else {
        Value::Array(columns.to_vec())
    }
}

fn decode_object(plan: &FetchPlan, registry: &SchemaRegistry, row: &Row) -> Result<DecodedObject> {
    let mut cursor = 0usize;
    let mut identity = None;
    let mut values = Vec::with_capacity(plan.entries.len());
    let mut references = Vec::new();

    for (index, entry) in plan.entries.iter().enumerate() {
        let take = |width: usize, cursor: usize| -> Result<Vec<Value>> {
            (cursor..cursor + width)
                .map(|i| {
                    row.get(i).cloned().ok_or_else(|| {
                        Error::Type(TypeError {
                            expected: "result column",
                            actual: format!("row of {} columns, needed index {}", row.len(), i),
                            column: None,
                        })
                    })
                })
                .collect()
        };
        match entry {
            PlanEntry::Value { prop, width } => {
                let columns = take(*width, cursor)?;
                if index == 0 {
                    identity = Some(Identity::from_values(&columns)?);
                }
                values.push((*prop, slot_value(&columns)));
                cursor += width;
            }
            PlanEntry::Reference {
                prop,
                target,
                width,
                has_discriminator,
            } => {
                let columns = take(*width, cursor)?;
                cursor += width;
                let referenced = if columns.iter().all(Value::is_null) {
                    None
                } else {
                    Some(Identity::from_values(&columns)?)
                };
                let mut concrete = *target;
                if *has_discriminator {
                    let token = row.get(cursor).cloned().unwrap_or(Value::Null);
                    cursor += 1;
                    if let Some(token) = token.as_str() {
                        if let Some(subtype) = registry.subtype_by_discriminator(*target, token) {
                            concrete = subtype;
                        }
                    }
                }
                values.push((*prop, slot_value(&columns)));
                references.push(DecodedReference {
                    prop: *prop,
                    target: concrete,
                    identity: referenced,
                });
            }
        }
    }

    Ok(DecodedObject {
        identity: identity.expect("plans always lead with the identity entry"),
        values,
        references,
    })
}

/// Decode a result set that must contain at most one row.
///
/// More than one row for a single identity means the uniqueness
/// assumption is already broken in storage; that is raised, never
/// silently truncated to the first row.
pub fn decode_unique(
    plan: &FetchPlan,
    registry: &SchemaRegistry,
    rows: &[Row],
) -> Result<Option<DecodedObject>> {
    match rows.len() {
        0 => Ok(None),
        1 => decode_object(plan, registry, &rows[0]).map(Some),
        n => Err(Error::integrity(
            IntegrityErrorKind::DuplicateIdentity,
            plan.table.clone(),
            format!("fetch by identity returned {n} rows"),
        )),
    }
}

/// Decode every row of a filtered fetch.
pub fn decode_all(
    plan: &FetchPlan,
    registry: &SchemaRegistry,
    rows: &[Row],
) -> Result<Vec<DecodedObject>> {
    rows.iter()
        .map(|row| decode_object(plan, registry, row))
        .collect()
}

/// Decode a collection select into per-owner member lists.
///
/// Rows arrive ordered by owner; a new list starts on every owning-row
/// transition, so each owner gets exactly one list even when interleaved
/// owners would hash equal.
pub fn decode_members(
    plan: &CollectionPlan,
    rows: &[Row],
) -> Result<Vec<(Identity, Vec<Identity>)>> {
    let owner_width = plan.owner_columns.len();
    let element_width = plan.element_columns.len();
    let mut out: Vec<(Identity, Vec<Identity>)> = Vec::new();

    for row in rows {
        let owner_values: Vec<Value> = (0..owner_width)
            .map(|i| row.get(i).cloned().unwrap_or(Value::Null))
            .collect();
        let member_values: Vec<Value> = (owner_width..owner_width + element_width)
            .map(|i| row.get(i).cloned().unwrap_or(Value::Null))
            .collect();
        let owner = Identity::from_values(&owner_values)?;
        let member = Identity::from_values(&member_values)?;
        match out.last_mut() {
            Some((current, members)) if *current == owner => members.push(member),
            _ => out.push((owner, vec![member])),
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::select::FetchPlanner;
    use stratum_core::SqlType;
    use stratum_schema::{
        ColumnSpec, GroupId, PropertyDescriptor, TableDescriptor, TypeDescriptor,
    };

    fn registry() -> SchemaRegistry {
        let mut reg = SchemaRegistry::new();
        reg.register(
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
                    .nullable(true),
                ),
        )
        .unwrap();
        reg.register(
            TypeDescriptor::new("Team")
                .table(TableDescriptor::primary("teams", vec!["id".into()]))
                .property(PropertyDescriptor::identity(
                    "id",
                    vec![ColumnSpec::new("id", SqlType::BigInt)],
                ))
                .property(PropertyDescriptor::scalar(
                    "name",
                    ColumnSpec::new("name", SqlType::Text),
                )),
        )
        .unwrap();
        reg.resolve().unwrap();
        reg
    }

    fn hero_row(id: i64, name: &str, team: Option<i64>) -> Row {
        Row::new(
            vec!["t0__id".into(), "t0__name".into(), "t0__team_id".into()],
            vec![
                Value::BigInt(id),
                Value::Text(name.into()),
                team.map_or(Value::Null, Value::BigInt),
            ],
        )
    }

    #[test]
    fn decodes_values_and_reference() {
        let reg = registry();
        let hero = reg.type_by_name("Hero").unwrap();
        let plan = FetchPlanner::new(&reg).plan(hero, GroupId(0)).unwrap();

        let decoded = decode_unique(&plan, &reg, &[hero_row(7, "Ada", Some(3))])
            .unwrap()
            .unwrap();
        assert_eq!(decoded.identity, Identity::from(7));
        assert_eq!(decoded.values.len(), 3);
        assert_eq!(decoded.references.len(), 1);
        let team = reg.type_by_name("Team").unwrap();
        assert_eq!(decoded.references[0].target, team);
        assert_eq!(decoded.references[0].identity, Some(Identity::from(3)));
    }

    #[test]
    fn null_foreign_key_decodes_to_none() {
        let reg = registry();
        let hero = reg.type_by_name("Hero").unwrap();
        let plan = FetchPlanner::new(&reg).plan(hero, GroupId(0)).unwrap();
        let decoded = decode_unique(&plan, &reg, &[hero_row(7, "Ada", None)])
            .unwrap()
            .unwrap();
        assert_eq!(decoded.references[0].identity, None);
    }

    #[test]
    fn two_rows_for_one_identity_is_fatal() {
        let reg = registry();
        let hero = reg.type_by_name("Hero").unwrap();
        let plan = FetchPlanner::new(&reg).plan(hero, GroupId(0)).unwrap();
        let err = decode_unique(
            &plan,
            &reg,
            &[hero_row(7, "Ada", None), hero_row(7, "Ada", None)],
        )
        .unwrap_err();
        assert!(matches!(
            err,
            Error::Integrity(ref i) if i.kind == IntegrityErrorKind::DuplicateIdentity
        ));
    }

    #[test]
    fn empty_result_is_none() {
        let reg = registry();
        let hero = reg.type_by_name("Hero").unwrap();
        let plan = FetchPlanner::new(&reg).plan(hero, GroupId(0)).unwrap();
        assert!(decode_unique(&plan, &reg, &[]).unwrap().is_none());
    }

    #[test]
    fn eager_discriminator_resolves_the_subtype() {
        let mut reg = SchemaRegistry::new();
        reg.register(
            TypeDescriptor::new("Media")
                .table(TableDescriptor::primary("media", vec!["id".into()]))
                .discriminator("kind", "media")
                .property(PropertyDescriptor::identity(
                    "id",
                    vec![ColumnSpec::new("id", SqlType::BigInt)],
                )),
        )
        .unwrap();
        reg.register(
            TypeDescriptor::new("Film")
                .table(TableDescriptor::primary("media", vec!["id".into()]))
                .base("Media")
                .discriminator("kind", "film")
                .property(PropertyDescriptor::identity(
                    "id",
                    vec![ColumnSpec::new("id", SqlType::BigInt)],
                )),
        )
        .unwrap();
        reg.register(
            TypeDescriptor::new("Review")
                .table(TableDescriptor::primary("reviews", vec!["id".into()]))
                .property(PropertyDescriptor::identity(
                    "id",
                    vec![ColumnSpec::new("id", SqlType::BigInt)],
                ))
                .property(PropertyDescriptor::reference(
                    "subject",
                    "Media",
                    vec![ColumnSpec::new("subject_id", SqlType::BigInt)],
                )),
        )
        .unwrap();
        reg.resolve().unwrap();

        let review = reg.type_by_name("Review").unwrap();
        let film = reg.type_by_name("Film").unwrap();
        let plan = FetchPlanner::new(&reg).plan(review, GroupId(0)).unwrap();
        let sql = plan.select_by_identity();
        assert!(sql.contains("LEFT OUTER JOIN \"media\""));
        assert!(sql.contains("\"kind\""));

        let row = Row::new(
            vec!["t0__id".into(), "t0__subject_id".into(), "r1__kind".into()],
            vec![
                Value::BigInt(1),
                Value::BigInt(7),
                Value::Text("film".into()),
            ],
        );
        let decoded = decode_unique(&plan, &reg, &[row]).unwrap().unwrap();
        assert_eq!(decoded.references[0].target, film);
        assert_eq!(decoded.references[0].identity, Some(Identity::from(7)));
    }

    #[test]
    fn members_group_on_owner_transition() {
        let plan = CollectionPlan {
            owner_type: TypeId(0),
            prop: PropId(0),
            target: TypeId(1),
            table: "album_tracks".into(),
            owner_columns: vec!["album_id".into()],
            element_columns: vec!["track_id".into()],
            reference_table: false,
        };
        let rows = vec![
            Row::new(
                vec!["album_id".into(), "track_id".into()],
                vec![Value::BigInt(1), Value::BigInt(10)],
            ),
            Row::new(
                vec!["album_id".into(), "track_id".into()],
                vec![Value::BigInt(1), Value::BigInt(11)],
            ),
            Row::new(
                vec!["album_id".into(), "track_id".into()],
                vec![Value::BigInt(2), Value::BigInt(12)],
            ),
        ];
        let grouped = decode_members(&plan, &rows).unwrap();
        assert_eq!(grouped.len(), 2);
        assert_eq!(grouped[0].0, Identity::from(1));
        assert_eq!(
            grouped[0].1,
            vec![Identity::from(10), Identity::from(11)]
        );
        assert_eq!(grouped[1].1, vec![Identity::from(12)]);
    }
}
