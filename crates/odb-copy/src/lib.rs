//! Graph copy between object transactions.
//!
//! [`GraphCopier`] copies the objects a [`CascadePlan`] reaches from one or
//! more roots, deduplicating through a [`CopyState`] so that cycles and
//! overlapping cascades do each piece of work once. References into objects
//! absent from the destination are deferred and surfaced by
//! [`CopyState::drain_deleted_assignments`].

pub mod cascade;
pub mod copy_state;
pub mod graph_copy;

pub use cascade::CascadePlan;
pub use copy_state::{CopyHistory, CopyState, DeletedAssignment, DeletedAssignments, ObjIdMap};
pub use graph_copy::{CopyStats, GraphCopier, copy_graph};
