//! Per-type accessor tables.
//!
//! Built once from the metadata at resolve time; property reads and
//! writes go through these tables instead of any runtime reflection.
//! Each property owns one value slot; the table maps names to slot
//! indexes and checks written values against the declared column types.

use crate::descriptor::TypeDescriptor;
use crate::property::{PropId, PropertyKind};
use std::collections::HashMap;
use stratum_core::{ConfigErrorKind, Error, Result, SqlType, TypeError, Value};

/// How a slot is checked on write.
#[derive(Debug, Clone)]
enum SlotCheck {
    /// Single-column value.
    Single { sql_type: SqlType, nullable: bool },
    /// Multi-column value bound as an ordered tuple.
    Tuple {
        sql_types: Vec<SqlType>,
        nullable: bool,
    },
    /// Collection properties are written through the collection API, not
    /// through slots.
    Barred,
}

/// The accessor table for one type.
#[derive(Debug, Clone, Default)]
pub struct PropertySlots {
    by_name: HashMap<String, PropId>,
    checks: Vec<SlotCheck>,
}

impl PropertySlots {
    /// Build the table from a validated descriptor.
    pub fn build(descriptor: &TypeDescriptor) -> Self {
        let mut by_name = HashMap::new();
        let mut checks = Vec::with_capacity(descriptor.properties.len());
        for (index, prop) in descriptor.properties.iter().enumerate() {
            by_name.insert(prop.name.clone(), PropId(index));
            let check = match &prop.kind {
                PropertyKind::Collection { .. } => SlotCheck::Barred,
                PropertyKind::Identity => {
                    if prop.columns.len() == 1 {
                        SlotCheck::Single {
                            sql_type: prop.columns[0].sql_type,
                            nullable: false,
                        }
                    } else {
                        SlotCheck::Tuple {
                            sql_types: prop.columns.iter().map(|c| c.sql_type).collect(),
                            nullable: false,
                        }
                    }
                }
                PropertyKind::Scalar | PropertyKind::Reference { .. } => {
                    if prop.columns.len() == 1 {
                        SlotCheck::Single {
                            sql_type: prop.columns[0].sql_type,
                            nullable: prop.nullable,
                        }
                    } else {
                        SlotCheck::Tuple {
                            sql_types: prop.columns.iter().map(|c| c.sql_type).collect(),
                            nullable: prop.nullable,
                        }
                    }
                }
            };
            checks.push(check);
        }
        Self { by_name, checks }
    }

    /// Map a property name to its slot.
    pub fn slot_of(&self, name: &str) -> Result<PropId> {
        self.by_name.get(name).copied().ok_or_else(|| {
            Error::config(
                ConfigErrorKind::UnknownProperty,
                format!("no property named '{name}'"),
            )
        })
    }

    /// Number of slots.
    pub fn len(&self) -> usize {
        self.checks.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.checks.is_empty()
    }

    /// Check a value against a slot's declared shape.
    pub fn check_write(&self, slot: PropId, value: &Value) -> Result<()> {
        match &self.checks[slot.0] {
            SlotCheck::Barred => Err(Error::config(
                ConfigErrorKind::Invalid,
                "collection properties are written through the collection API",
            )),
            SlotCheck::Single { sql_type, nullable } => {
                if value.is_null() {
                    if *nullable {
                        Ok(())
                    } else {
                        Err(Error::Type(TypeError {
                            expected: "non-null value",
                            actual: "NULL".to_string(),
                            column: None,
                        }))
                    }
                } else if sql_type.accepts(value) {
                    Ok(())
                } else {
                    Err(Error::Type(TypeError {
                        expected: sql_type.sql_name(),
                        actual: value.type_name().to_string(),
                        column: None,
                    }))
                }
            }
            SlotCheck::Tuple {
                sql_types,
                nullable,
            } => {
                if value.is_null() {
                    return if *nullable {
                        Ok(())
                    } else {
                        Err(Error::Type(TypeError {
                            expected: "non-null tuple",
                            actual: "NULL".to_string(),
                            column: None,
                        }))
                    };
                }
                let Value::Array(parts) = value else {
                    return Err(Error::Type(TypeError {
                        expected: "value tuple",
                        actual: value.type_name().to_string(),
                        column: None,
                    }));
                };
                if parts.len() != sql_types.len() {
                    return Err(Error::Type(TypeError {
                        expected: "tuple of declared column arity",
                        actual: format!("{} components", parts.len()),
                        column: None,
                    }));
                }
                for (part, sql_type) in parts.iter().zip(sql_types) {
                    if !sql_type.accepts(part) {
                        return Err(Error::Type(TypeError {
                            expected: sql_type.sql_name(),
                            actual: part.type_name().to_string(),
                            column: None,
                        }));
                    }
                }
                Ok(())
            }
        }
    }
}
