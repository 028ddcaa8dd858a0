//! Type descriptors and fetch groups.

use crate::property::{PropId, PropertyDescriptor, PropertyKind};
use crate::registry::TypeId;
use crate::table::TableDescriptor;
use stratum_core::{ConfigErrorKind, Error, Result};

/// Maximum number of fetch groups per type.
///
/// Each object tracks fetch state in a 64-bit word with two bits per
/// group, so more than 31 groups cannot be represented.
pub const MAX_FETCH_GROUPS: usize = 31;

/// Index of a fetch group within its owning [`TypeDescriptor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GroupId(pub usize);

/// A named set of properties loaded together in a single query.
#[derive(Debug, Clone)]
pub struct FetchGroup {
    /// Group name.
    pub name: String,
    /// Member properties, in declaration order.
    pub properties: Vec<PropId>,
}

/// Describes one mapped type.
///
/// Built by the external generator, validated at registration, wired at
/// resolve time, immutable afterwards.
#[derive(Debug, Clone)]
pub struct TypeDescriptor {
    /// Type name (unique within the registry).
    pub name: String,
    /// Data-source name the type's tables live in.
    pub data_source: String,
    /// Mapped tables; index 0 is the primary table.
    pub tables: Vec<TableDescriptor>,
    /// All properties; `PropId` indexes into this list.
    pub properties: Vec<PropertyDescriptor>,
    /// Fetch groups; `GroupId` indexes into this list. Built at
    /// registration from the properties' declared group names.
    pub fetch_groups: Vec<FetchGroup>,
    /// Base type name for mapped inheritance.
    pub base: Option<String>,
    /// Discriminator column on the primary table and this type's token.
    pub discriminator: Option<(String, String)>,
    /// Resolved base type.
    pub base_resolved: Option<TypeId>,
}

impl TypeDescriptor {
    /// Start a descriptor for the named type.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_source: "default".to_string(),
            tables: Vec::new(),
            properties: Vec::new(),
            fetch_groups: Vec::new(),
            base: None,
            discriminator: None,
            base_resolved: None,
        }
    }

    /// Set the data-source name.
    pub fn data_source(mut self, name: impl Into<String>) -> Self {
        self.data_source = name.into();
        self
    }

    /// Add a table. The first added table must be the primary table.
    pub fn table(mut self, table: TableDescriptor) -> Self {
        self.tables.push(table);
        self
    }

    /// Add a property.
    pub fn property(mut self, property: PropertyDescriptor) -> Self {
        self.properties.push(property);
        self
    }

    /// Declare a base type for mapped inheritance.
    pub fn base(mut self, name: impl Into<String>) -> Self {
        self.base = Some(name.into());
        self
    }

    /// Declare the discriminator column and this type's token.
    pub fn discriminator(
        mut self,
        column: impl Into<String>,
        token: impl Into<String>,
    ) -> Self {
        self.discriminator = Some((column.into(), token.into()));
        self
    }

    /// The primary table.
    pub fn primary_table(&self) -> &TableDescriptor {
        &self.tables[0]
    }

    /// Look up a property by name.
    pub fn property_by_name(&self, name: &str) -> Option<PropId> {
        self.properties
            .iter()
            .position(|p| p.name == name)
            .map(PropId)
    }

    /// Access a property by id.
    pub fn property_at(&self, id: PropId) -> &PropertyDescriptor {
        &self.properties[id.0]
    }

    /// The identity property.
    pub fn identity_property(&self) -> PropId {
        // validated at registration: exactly one identity property exists
        PropId(
            self.properties
                .iter()
                .position(|p| p.kind == PropertyKind::Identity)
                .expect("validated descriptor has an identity property"),
        )
    }

    /// The version property, if one is configured.
    pub fn version_property(&self) -> Option<PropId> {
        self.properties.iter().position(|p| p.version).map(PropId)
    }

    /// Look up a fetch group by name.
    pub fn group_by_name(&self, name: &str) -> Option<GroupId> {
        self.fetch_groups
            .iter()
            .position(|g| g.name == name)
            .map(GroupId)
    }

    /// Member properties of a fetch group.
    pub fn group(&self, id: GroupId) -> &FetchGroup {
        &self.fetch_groups[id.0]
    }

    /// All collection properties.
    pub fn collection_properties(&self) -> impl Iterator<Item = PropId> + '_ {
        self.properties
            .iter()
            .enumerate()
            .filter(|(_, p)| matches!(p.kind, PropertyKind::Collection { .. }))
            .map(|(i, _)| PropId(i))
    }

    /// Validate structural invariants and derive the fetch group list.
    ///
    /// Called once at registration; the descriptor is immutable afterwards.
    pub(crate) fn validate_and_index(&mut self) -> Result<()> {
        if self.tables.is_empty() || !self.tables[0].primary {
            return Err(Error::config(
                ConfigErrorKind::Invalid,
                format!("type '{}': first table must be the primary table", self.name),
            ));
        }
        if self.tables.iter().filter(|t| t.primary).count() != 1 {
            return Err(Error::config(
                ConfigErrorKind::Invalid,
                format!("type '{}': exactly one primary table required", self.name),
            ));
        }
        let identity_count = self
            .properties
            .iter()
            .filter(|p| p.kind == PropertyKind::Identity)
            .count();
        if identity_count != 1 {
            return Err(Error::config(
                ConfigErrorKind::Invalid,
                format!(
                    "type '{}': exactly one identity property required, found {}",
                    self.name, identity_count
                ),
            ));
        }

        self.fetch_groups.clear();
        for index in 0..self.properties.len() {
            let (table_index, group_name, is_collection, prop_name) = {
                let prop = &self.properties[index];
                (
                    prop.table,
                    prop.fetch_group.clone(),
                    matches!(prop.kind, PropertyKind::Collection { .. }),
                    prop.name.clone(),
                )
            };
            let Some(table) = self.tables.get(table_index) else {
                return Err(Error::config(
                    ConfigErrorKind::Invalid,
                    format!(
                        "type '{}': property '{}' references table index {} out of range",
                        self.name, prop_name, table_index
                    ),
                ));
            };
            if is_collection != table.multi_row {
                return Err(Error::config(
                    ConfigErrorKind::Invalid,
                    format!(
                        "type '{}': property '{}' and table '{}' disagree on multi-row storage",
                        self.name, prop_name, table.name
                    ),
                ));
            }

            let group_index = match self.fetch_groups.iter().position(|g| g.name == group_name) {
                Some(i) => i,
                None => {
                    self.fetch_groups.push(FetchGroup {
                        name: group_name,
                        properties: Vec::new(),
                    });
                    self.fetch_groups.len() - 1
                }
            };
            self.fetch_groups[group_index].properties.push(PropId(index));
            self.properties[index].group_index = group_index;
        }

        if self.fetch_groups.len() > MAX_FETCH_GROUPS {
            return Err(Error::config(
                ConfigErrorKind::TooManyFetchGroups,
                format!(
                    "type '{}': {} fetch groups exceeds the limit of {}",
                    self.name,
                    self.fetch_groups.len(),
                    MAX_FETCH_GROUPS
                ),
            ));
        }
        Ok(())
    }
}
