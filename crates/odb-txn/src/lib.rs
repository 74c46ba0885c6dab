//! Collaborators consumed by the identity cache and graph-copy engine: the
//! schema, the [`Transaction`] trait, and an in-memory store implementing it.

pub mod memory;
pub mod schema;
pub mod traits;

pub use memory::{MemoryStore, MemoryTransaction};
pub use schema::{ElementKind, FieldDef, FieldKind, ObjType, ReferenceOptions, Schema};
pub use traits::{ChangeListener, CreateListener, FieldChange, Transaction};
