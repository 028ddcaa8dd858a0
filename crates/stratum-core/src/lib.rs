//! Core types for the Stratum persistence runtime.
//!
//! This crate provides the foundational pieces shared by every layer:
//!
//! - `Value` for dynamically typed SQL parameters and results
//! - `Identity` for scalar and composite object identities
//! - `Row` for result-set access
//! - `Driver`/`Connection` traits for the external relational driver
//! - the `Error` taxonomy used across the engine

pub mod driver;
pub mod error;
pub mod identity;
pub mod quoting;
pub mod row;
pub mod types;
pub mod value;

pub use driver::{Connection, ConnectionConfig, Driver};
pub use error::{
    ConfigError, ConfigErrorKind, Error, IntegrityError, IntegrityErrorKind, LifecycleError,
    LifecycleErrorKind, Result, StaleError, StorageError, StorageErrorKind, TypeError,
};
pub use identity::{CompositeId, IdPart, Identity};
pub use quoting::quote_ident;
pub use row::{ColumnInfo, FromValue, Row};
pub use types::SqlType;
pub use value::Value;
