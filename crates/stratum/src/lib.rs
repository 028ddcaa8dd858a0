//! # Stratum
//!
//! An object-relational persistence runtime. Stratum maps live objects
//! to rows across primary, auxiliary and multi-row tables, loads object
//! state lazily one fetch group at a time, buffers mutations in a
//! per-transaction operation log, and keeps bidirectional associations
//! consistent in memory.
//!
//! Schema metadata is produced by an external generator and registered
//! into a [`SchemaRegistry`] once at startup; the relational driver sits
//! behind the [`Driver`] trait. The engine guarantees one live instance
//! per (type, identity), at most one physical query per (object, fetch
//! group) under arbitrary concurrency, transaction-local visibility of
//! uncommitted writes, and strict row-count checking on every write.
//!
//! ```ignore
//! let mut registry = SchemaRegistry::new();
//! registry.register(note_descriptor())?;
//! registry.resolve()?;
//! let engine = Engine::new(registry, Box::new(driver))?;
//!
//! let note_type = engine.type_id("Note")?;
//! let mut txn = engine.begin();
//! let note = engine.get_by_id(note_type, Identity::from(1))?;
//! let body = txn.get(&note, "body")?;          // lazy fetch
//! txn.set(&note, "body", Value::Text("hi".into()))?;
//! txn.commit()?;
//! ```

pub use stratum_core::{
    CompositeId, ConfigError, ConfigErrorKind, Connection, ConnectionConfig, Driver, Error,
    FromValue, IdPart, Identity, IntegrityError, IntegrityErrorKind, LifecycleError,
    LifecycleErrorKind, Result, Row, SqlType, StaleError, StorageError, StorageErrorKind,
    TypeError, Value, quote_ident,
};
pub use stratum_query::{Filter, OrderBy, Paging};
pub use stratum_schema::{
    ColumnSpec, FetchGroup, GroupId, MAX_FETCH_GROUPS, PropId, PropertyDescriptor, PropertyKind,
    PropertySlots, SchemaRegistry, TableDescriptor, TypeDescriptor, TypeId,
};
pub use stratum_session::{
    Engine, EngineConfig, FetchState, IdentityMap, MemberKey, ObjectFlags, PendingCounts,
    PersistentObject, StagedCollection, Transaction, WriteOutcome,
};
