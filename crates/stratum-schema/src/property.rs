//! Property descriptors.

use crate::registry::TypeId;
use stratum_core::SqlType;

/// Index of a property within its owning [`crate::TypeDescriptor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PropId(pub usize);

/// One mapped column backing a property.
#[derive(Debug, Clone)]
pub struct ColumnSpec {
    /// Column name.
    pub name: String,
    /// Declared SQL type.
    pub sql_type: SqlType,
    /// Value is produced by the database on insert (sequence, identity
    /// column); the insert runs with a RETURNING clause and the generated
    /// value is written back onto the instance.
    pub db_generated: bool,
}

impl ColumnSpec {
    /// Describe a plain column.
    pub fn new(name: impl Into<String>, sql_type: SqlType) -> Self {
        Self {
            name: name.into(),
            sql_type,
            db_generated: false,
        }
    }

    /// Mark the column value as database-generated.
    pub fn db_generated(mut self, value: bool) -> Self {
        self.db_generated = value;
        self
    }
}

/// What a property is, as a tagged variant rather than a descriptor
/// class hierarchy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropertyKind {
    /// Plain column value.
    Scalar,
    /// Identity column(s); every type has exactly one identity property.
    Identity,
    /// Reference to another mapped type; the foreign key column(s) live in
    /// this property's table.
    Reference {
        /// Target type name, resolved to a `TypeId` by the registry.
        target: String,
    },
    /// Collection of references stored in a multi-row table.
    Collection {
        /// Member type name, resolved to a `TypeId` by the registry.
        target: String,
    },
}

/// Describes one mapped property.
///
/// Built by the external generator via the builder methods, then wired by
/// `SchemaRegistry::resolve` (`target`, `reverse_resolved`, `read_only`
/// for the non-owning side of a bidirectional pair).
#[derive(Debug, Clone)]
pub struct PropertyDescriptor {
    /// Property name.
    pub name: String,
    /// Backing column(s) in `table`, in declared order. Empty for
    /// collection properties (their columns live on the multi-row table).
    pub columns: Vec<ColumnSpec>,
    /// The property kind.
    pub kind: PropertyKind,
    /// Index of the backing table within the owning type's table list.
    pub table: usize,
    /// Name of the fetch group loading this property.
    pub fetch_group: String,
    /// Whether NULL is a legal stored value.
    pub nullable: bool,
    /// Whether a uniqueness constraint applies.
    pub unique: bool,
    /// Lazy (separate query) rather than eagerly joined.
    pub on_demand: bool,
    /// Non-owning side of a mirrored pair; never produces its own
    /// pending operations.
    pub read_only: bool,
    /// Participates in the version-checked update path.
    pub version: bool,
    /// Declared reverse property name on the target type.
    pub reverse: Option<String>,

    /// Resolved target type (relationship kinds only).
    pub target: Option<TypeId>,
    /// Resolved reverse property on the target type.
    pub reverse_resolved: Option<PropId>,
    /// Resolved fetch group index.
    pub group_index: usize,
}

impl PropertyDescriptor {
    fn base(name: impl Into<String>, kind: PropertyKind, columns: Vec<ColumnSpec>) -> Self {
        Self {
            name: name.into(),
            columns,
            kind,
            table: 0,
            fetch_group: "default".to_string(),
            nullable: false,
            unique: false,
            on_demand: false,
            read_only: false,
            version: false,
            reverse: None,
            target: None,
            reverse_resolved: None,
            group_index: 0,
        }
    }

    /// Describe a scalar property.
    pub fn scalar(name: impl Into<String>, column: ColumnSpec) -> Self {
        Self::base(name, PropertyKind::Scalar, vec![column])
    }

    /// Describe the identity property.
    pub fn identity(name: impl Into<String>, columns: Vec<ColumnSpec>) -> Self {
        let mut p = Self::base(name, PropertyKind::Identity, columns);
        p.unique = true;
        p
    }

    /// Describe a reference property (foreign key held by this type).
    pub fn reference(
        name: impl Into<String>,
        target: impl Into<String>,
        columns: Vec<ColumnSpec>,
    ) -> Self {
        Self::base(
            name,
            PropertyKind::Reference {
                target: target.into(),
            },
            columns,
        )
    }

    /// Describe a collection property stored in the multi-row table at
    /// `table_index`.
    pub fn collection(
        name: impl Into<String>,
        target: impl Into<String>,
        table_index: usize,
    ) -> Self {
        let mut p = Self::base(
            name,
            PropertyKind::Collection {
                target: target.into(),
            },
            Vec::new(),
        );
        p.table = table_index;
        p
    }

    /// Set the backing table index.
    pub fn table(mut self, index: usize) -> Self {
        self.table = index;
        self
    }

    /// Set the fetch group name.
    pub fn fetch_group(mut self, name: impl Into<String>) -> Self {
        self.fetch_group = name.into();
        self
    }

    /// Set the nullable flag.
    pub fn nullable(mut self, value: bool) -> Self {
        self.nullable = value;
        self
    }

    /// Set the unique flag.
    pub fn unique(mut self, value: bool) -> Self {
        self.unique = value;
        self
    }

    /// Load lazily instead of joining eagerly.
    pub fn on_demand(mut self, value: bool) -> Self {
        self.on_demand = value;
        self
    }

    /// Declare the reverse property on the target type.
    pub fn reverse(mut self, name: impl Into<String>) -> Self {
        self.reverse = Some(name.into());
        self
    }

    /// Mark as the version property.
    pub fn version(mut self, value: bool) -> Self {
        self.version = value;
        self
    }

    /// Mark as the declared non-owning side of a mirrored pair.
    pub fn read_only(mut self, value: bool) -> Self {
        self.read_only = value;
        self
    }

    /// Whether this property holds a relationship (reference or collection).
    pub fn is_relationship(&self) -> bool {
        matches!(
            self.kind,
            PropertyKind::Reference { .. } | PropertyKind::Collection { .. }
        )
    }

    /// The declared target type name for relationship properties.
    pub fn target_name(&self) -> Option<&str> {
        match &self.kind {
            PropertyKind::Reference { target } | PropertyKind::Collection { target } => {
                Some(target)
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_defaults() {
        let p = PropertyDescriptor::scalar("name", ColumnSpec::new("name", SqlType::Text));
        assert_eq!(p.fetch_group, "default");
        assert_eq!(p.table, 0);
        assert!(!p.on_demand);
        assert!(!p.is_relationship());
    }

    #[test]
    fn identity_is_unique() {
        let p = PropertyDescriptor::identity("id", vec![ColumnSpec::new("id", SqlType::BigInt)]);
        assert!(p.unique);
        assert_eq!(p.kind, PropertyKind::Identity);
    }

    #[test]
    fn reference_target_name() {
        let p = PropertyDescriptor::reference(
            "team",
            "Team",
            vec![ColumnSpec::new("team_id", SqlType::BigInt)],
        )
        .reverse("members");
        assert!(p.is_relationship());
        assert_eq!(p.target_name(), Some("Team"));
        assert_eq!(p.reverse.as_deref(), Some("members"));
    }
}
