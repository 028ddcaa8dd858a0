//! Fetch/select assembly for the Stratum persistence runtime.
//!
//! This crate turns schema metadata into parameterized SQL: per-group
//! SELECTs over the primary table and its auxiliary tables (plus eager
//! reference joins), collection selects over multi-row tables, and the
//! INSERT/UPDATE/DELETE statements the pending-operation log executes.
//! Result rows are decoded back into neutral value/identity bundles that
//! the session layer applies to live objects.

pub mod clause;
pub mod decode;
pub mod expr;
pub mod select;
pub mod statement;

pub use clause::{OrderBy, Paging};
pub use decode::{DecodedObject, DecodedReference, decode_all, decode_members, decode_unique};
pub use expr::Filter;
pub use select::{CollectionPlan, FetchPlan, FetchPlanner, PlanEntry};
pub use statement::{
    build_delete, build_insert, build_insert_returning, build_update, build_update_versioned,
};
