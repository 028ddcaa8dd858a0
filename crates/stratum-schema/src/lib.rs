//! Schema metadata model for the Stratum persistence runtime.
//!
//! Descriptors are built by an external generator, registered into a
//! [`SchemaRegistry`], resolved once (cross-references wired, accessor
//! tables built) and immutable afterwards. Nothing in this crate talks to
//! a database; it is pure metadata plus lookup.

pub mod accessor;
pub mod descriptor;
pub mod property;
pub mod registry;
pub mod table;

pub use accessor::PropertySlots;
pub use descriptor::{FetchGroup, GroupId, TypeDescriptor, MAX_FETCH_GROUPS};
pub use property::{ColumnSpec, PropId, PropertyDescriptor, PropertyKind};
pub use registry::{SchemaRegistry, TypeId};
pub use table::TableDescriptor;
