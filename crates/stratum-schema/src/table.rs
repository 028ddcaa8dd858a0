//! Table descriptors.

/// Describes one mapped table.
///
/// Every type has exactly one `primary` table (one row per object, keyed
/// by the identity columns). Auxiliary tables share the same identity and
/// hold overflow properties; `multi_row` tables hold collection contents,
/// one row per member. A `reference` table is defined and owned by another
/// type and only viewed through this descriptor (the one-to-many case
/// where the collection is stored as a foreign key on the member's own
/// table).
#[derive(Debug, Clone)]
pub struct TableDescriptor {
    /// Table name.
    pub name: String,
    /// Identity column name(s) for primary/auxiliary tables.
    pub identity_columns: Vec<String>,
    /// One row per object, always present.
    pub primary: bool,
    /// Collection/association table, many rows per object.
    pub multi_row: bool,
    /// Defined and owned by another type.
    pub reference: bool,
    /// For multi-row tables: columns referencing the owning object.
    pub owner_columns: Vec<String>,
    /// For multi-row tables: columns referencing the member's identity.
    pub element_columns: Vec<String>,
    /// For one-to-many multi-row tables: the owning reference property on
    /// the member type (`child.parent` for `parent.children`).
    pub reverse_property: Option<String>,
}

impl TableDescriptor {
    /// Describe a primary table.
    pub fn primary(name: impl Into<String>, identity_columns: Vec<String>) -> Self {
        Self {
            name: name.into(),
            identity_columns,
            primary: true,
            multi_row: false,
            reference: false,
            owner_columns: Vec::new(),
            element_columns: Vec::new(),
            reverse_property: None,
        }
    }

    /// Describe an auxiliary table sharing the primary identity.
    pub fn auxiliary(name: impl Into<String>, identity_columns: Vec<String>) -> Self {
        Self {
            name: name.into(),
            identity_columns,
            primary: false,
            multi_row: false,
            reference: false,
            owner_columns: Vec::new(),
            element_columns: Vec::new(),
            reverse_property: None,
        }
    }

    /// Describe a multi-row association table.
    pub fn multi_row(
        name: impl Into<String>,
        owner_columns: Vec<String>,
        element_columns: Vec<String>,
    ) -> Self {
        Self {
            name: name.into(),
            identity_columns: Vec::new(),
            primary: false,
            multi_row: true,
            reference: false,
            owner_columns,
            element_columns,
            reverse_property: None,
        }
    }

    /// Mark this table as owned by another type.
    pub fn reference(mut self, value: bool) -> Self {
        self.reference = value;
        self
    }

    /// Set the owning reference property on the member type.
    pub fn reverse_property(mut self, name: impl Into<String>) -> Self {
        self.reverse_property = Some(name.into());
        self
    }
}
