//! The persistence engine: registry + driver + identity map + plans.

use crate::identity_map::IdentityMap;
use crate::object::PersistentObject;
use crate::transaction::Transaction;
use std::collections::HashMap;
use std::sync::Arc;
use stratum_core::{ConfigErrorKind, Driver, Error, Identity, Result, TypeError};
use stratum_query::{CollectionPlan, FetchPlan, FetchPlanner};
use stratum_schema::{GroupId, PropId, SchemaRegistry, TypeId};

/// Engine-level configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// How many times a failing fetch is retried before the failure is
    /// surfaced. Writes are never retried.
    pub fetch_retry_limit: u32,
    /// Include all-null optional columns in primary-table inserts. When
    /// false, null columns are omitted from the column list; the row
    /// itself is always inserted.
    pub insert_null_primary_columns: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            fetch_retry_limit: 3,
            insert_null_primary_columns: true,
        }
    }
}

impl EngineConfig {
    /// Default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the fetch retry bound.
    pub fn fetch_retry_limit(mut self, limit: u32) -> Self {
        self.fetch_retry_limit = limit.max(1);
        self
    }

    /// Set whether primary inserts carry all-null optional columns.
    pub fn insert_null_primary_columns(mut self, value: bool) -> Self {
        self.insert_null_primary_columns = value;
        self
    }
}

/// The persistence engine.
///
/// One engine serves the whole process: it owns the resolved schema
/// registry, the relational driver, the identity map and the precomputed
/// fetch plans. Units of work are [`Transaction`]s handed out by
/// [`begin`](Engine::begin).
pub struct Engine {
    registry: Arc<SchemaRegistry>,
    driver: Box<dyn Driver>,
    pub(crate) map: IdentityMap,
    plans: HashMap<(TypeId, GroupId), FetchPlan>,
    collection_plans: HashMap<(TypeId, PropId), CollectionPlan>,
    config: EngineConfig,
}

impl Engine {
    /// Build an engine over a resolved registry and a driver.
    pub fn new(registry: SchemaRegistry, driver: Box<dyn Driver>) -> Result<Self> {
        Self::with_config(registry, driver, EngineConfig::default())
    }

    /// Build an engine with explicit configuration.
    pub fn with_config(
        registry: SchemaRegistry,
        driver: Box<dyn Driver>,
        config: EngineConfig,
    ) -> Result<Self> {
        if !registry.is_resolved() {
            return Err(Error::config(
                ConfigErrorKind::NotResolved,
                "registry must be resolved before the engine starts",
            ));
        }

        // Precompute the per-group fetch plans and the collection plans.
        let mut plans = HashMap::new();
        let mut collection_plans = HashMap::new();
        {
            let planner = FetchPlanner::new(&registry);
            for type_id in registry.type_ids() {
                let td = registry.descriptor(type_id);
                for group_index in 0..td.fetch_groups.len() {
                    let group = GroupId(group_index);
                    plans.insert((type_id, group), planner.plan(type_id, group)?);
                }
                for prop in td.collection_properties() {
                    match planner.collection_plan(type_id, prop) {
                        Ok(plan) => {
                            collection_plans.insert((type_id, prop), plan);
                        }
                        Err(e) => {
                            // unresolved member type: the property is
                            // unusable, the rest of the type still works
                            tracing::warn!(
                                type_name = %td.name,
                                property = %td.property_at(prop).name,
                                error = %e,
                                "collection left unplanned"
                            );
                        }
                    }
                }
            }
        }

        let type_count = registry.len();
        Ok(Self {
            registry: Arc::new(registry),
            driver,
            map: IdentityMap::new(type_count),
            plans,
            collection_plans,
            config,
        })
    }

    /// The schema registry.
    pub fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    /// Engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub(crate) fn driver(&self) -> &dyn Driver {
        self.driver.as_ref()
    }

    pub(crate) fn plan(&self, type_id: TypeId, group: GroupId) -> Result<&FetchPlan> {
        self.plans.get(&(type_id, group)).ok_or_else(|| {
            Error::config(
                ConfigErrorKind::Invalid,
                format!("no fetch plan for type {} group {}", type_id.0, group.0),
            )
        })
    }

    pub(crate) fn collection_plan(
        &self,
        type_id: TypeId,
        prop: PropId,
    ) -> Option<&CollectionPlan> {
        self.collection_plans.get(&(type_id, prop))
    }

    /// Begin a new unit of work.
    pub fn begin(&self) -> Transaction<'_> {
        Transaction::new(self)
    }

    /// Resolve a type name.
    pub fn type_id(&self, name: &str) -> Result<TypeId> {
        self.registry.type_by_name(name)
    }

    /// Return the single live instance for an identity, constructing a
    /// prototype (exists-by-reference, not yet loaded) if none is cached.
    pub fn get_by_id(&self, type_id: TypeId, identity: Identity) -> Result<Arc<PersistentObject>> {
        let td = self.registry.descriptor(type_id);
        let id_prop = td.identity_property();
        let width = td.property_at(id_prop).columns.len();
        if identity.width() != width {
            return Err(Error::Type(TypeError {
                expected: "identity matching the declared column count",
                actual: format!(
                    "{} components for {} identity columns",
                    identity.width(),
                    width
                ),
                column: None,
            }));
        }
        let slot_count = td.properties.len();
        Ok(self.map.get_or_insert_with(type_id, &identity, || {
            PersistentObject::new_prototype(type_id, slot_count, id_prop, identity.clone())
        }))
    }

    /// Probe the identity map without constructing an instance.
    pub fn lookup_inst_by_id(
        &self,
        type_id: TypeId,
        identity: &Identity,
    ) -> Option<Arc<PersistentObject>> {
        self.map.lookup(type_id, identity)
    }

    /// Probe a base type and its registered subtypes for an identity.
    pub(crate) fn lookup_polymorphic(
        &self,
        base: TypeId,
        identity: &Identity,
    ) -> Option<Arc<PersistentObject>> {
        if let Some(found) = self.map.lookup(base, identity) {
            return Some(found);
        }
        self.registry
            .type_ids()
            .filter(|t| self.registry.descriptor(*t).base_resolved == Some(base))
            .find_map(|t| self.map.lookup(t, identity))
    }

    /// Create a transient instance of a type.
    pub fn new_object(&self, type_id: TypeId) -> Arc<PersistentObject> {
        let slot_count = self.registry.descriptor(type_id).properties.len();
        Arc::new(PersistentObject::new_transient(type_id, slot_count))
    }

    /// Number of live instances in the identity map.
    pub fn cached_instances(&self) -> usize {
        self.map.len()
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("types", &self.registry.len())
            .field("plans", &self.plans.len())
            .field("cached_instances", &self.map.len())
            .finish()
    }
}
