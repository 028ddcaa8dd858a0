//! Identity cache, object lifecycle and transactions for Stratum.
//!
//! This crate is the runtime heart of the engine:
//!
//! - **Identity map**: one live instance per (type, identity), with
//!   per-type construction serialization and insertion-time
//!   reconciliation of racing creators.
//! - **Object lifecycle**: per-instance flags and a 2-bit-per-group
//!   fetch-state word with a single-flight wait/wake protocol, so a
//!   group is physically fetched at most once no matter how many
//!   concurrent readers ask for it.
//! - **Transactions**: thread-affine units of work holding one cached
//!   connection per data source, an ordered pending-operation log with a
//!   by-object index, staged collection views, and the flush/commit/
//!   rollback protocol.
//! - **Relationship synchronization**: writes to one side of a
//!   bidirectional association mirror onto the in-memory reverse side.

pub mod engine;
pub mod fetch_state;
pub mod identity_map;
pub mod object;
mod operation;
mod relationship;
pub mod staged;
pub mod transaction;

pub use engine::{Engine, EngineConfig};
pub use fetch_state::{Claim, FetchLatch, FetchState};
pub use identity_map::IdentityMap;
pub use object::{ObjectFlags, PersistentObject};
pub use staged::{MemberKey, StagedCollection};
pub use transaction::{PendingCounts, Transaction, WriteOutcome};
