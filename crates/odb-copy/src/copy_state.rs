//! Deduplication and diagnostics state for graph copies.
//!
//! A [`CopyState`] composes two parts with different lifetimes:
//!
//! - [`CopyHistory`]: which source objects were copied and which reference
//!   paths were already walked from which object. It only grows, and it is
//!   what a clone carries over.
//! - [`DeletedAssignments`]: references written to the destination whose
//!   target was absent there. These belong to one copy operation, are never
//!   cloned, and must be drained with [`CopyState::drain_deleted_assignments`].
//!
//! The optional [`ObjIdMap`] is fixed when the state is built and shared by
//! clones.
//!
//! A state may be reused for several sequential copies; history accumulates
//! so objects copied by an earlier call are not copied again. There is no
//! partial reset: start from a fresh state, or clone one to branch.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use odb_error::{OdbError, Result};
use odb_txn::Transaction;
use odb_types::{FieldId, FieldPath, ObjId};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

// ---------------------------------------------------------------------------
// ObjIdMap
// ---------------------------------------------------------------------------

/// Source-to-destination identifier remapping. Unmapped ids copy in place.
///
/// Every entry maps to an identifier of the same type.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjIdMap {
    entries: BTreeMap<ObjId, ObjId>,
}

impl ObjIdMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Map `source` to `destination`. Both must share a type, and a source id
    /// may be mapped only once.
    pub fn insert(&mut self, source: ObjId, destination: ObjId) -> Result<()> {
        if source.type_id() != destination.type_id() {
            return Err(OdbError::invalid_argument(format!(
                "remap {source} -> {destination} changes object type"
            )));
        }
        if let Some(existing) = self.entries.get(&source) {
            if *existing != destination {
                return Err(OdbError::invalid_argument(format!(
                    "{source} already remapped to {existing}"
                )));
            }
        }
        self.entries.insert(source, destination);
        Ok(())
    }

    /// Build a map from `(source, destination)` pairs.
    pub fn from_pairs(pairs: impl IntoIterator<Item = (ObjId, ObjId)>) -> Result<Self> {
        let mut map = Self::new();
        for (source, destination) in pairs {
            map.insert(source, destination)?;
        }
        Ok(map)
    }

    pub fn get(&self, source: ObjId) -> Option<ObjId> {
        self.entries.get(&source).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (ObjId, ObjId)> + '_ {
        self.entries.iter().map(|(s, d)| (*s, *d))
    }
}

// ---------------------------------------------------------------------------
// CopyHistory
// ---------------------------------------------------------------------------

/// Monotone record of copied objects and walked reference paths.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CopyHistory {
    copied: HashSet<ObjId>,
    /// Path -> objects it has been walked from. Closed under prefixes: if a
    /// path is present for an object, so is every shorter prefix.
    traversed: BTreeMap<FieldPath, HashSet<ObjId>>,
}

impl CopyHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `id` copied. Returns `true` if it was not already.
    pub fn mark_copied(&mut self, id: ObjId) -> bool {
        self.copied.insert(id)
    }

    pub fn is_copied(&self, id: ObjId) -> bool {
        self.copied.contains(&id)
    }

    pub fn copied_len(&self) -> usize {
        self.copied.len()
    }

    /// Mark `path` walked from `id`. Returns `true` iff this exact pair was
    /// not already marked, directly or as the prefix of a longer walked path.
    ///
    /// Marking a path also marks each of its shorter prefixes.
    pub fn mark_traversed(&mut self, id: ObjId, path: &[FieldId]) -> Result<bool> {
        let full = FieldPath::new(path.iter().copied())
            .ok_or_else(|| OdbError::invalid_argument("traversal path must not be empty"))?;
        if !self.traversed.entry(full).or_default().insert(id) {
            return Ok(false);
        }
        // Prefix closure means the first already-marked prefix implies the rest.
        for len in (1..path.len()).rev() {
            let Some(prefix) = FieldPath::new(path[..len].iter().copied()) else {
                break;
            };
            if !self.traversed.entry(prefix).or_default().insert(id) {
                break;
            }
        }
        Ok(true)
    }

    /// Whether `path` has been walked from `id`.
    pub fn is_traversed(&self, id: ObjId, path: &[FieldId]) -> bool {
        FieldPath::new(path.iter().copied())
            .and_then(|p| self.traversed.get(&p))
            .is_some_and(|ids| ids.contains(&id))
    }
}

// ---------------------------------------------------------------------------
// DeletedAssignments
// ---------------------------------------------------------------------------

/// A reference written to the destination whose target was absent there.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeletedAssignment {
    /// Destination object holding the reference.
    pub referrer: ObjId,
    pub field: FieldId,
    /// Destination identifier of the missing target.
    pub target: ObjId,
}

impl DeletedAssignment {
    fn into_error(self, unresolved: usize) -> OdbError {
        OdbError::DanglingReference {
            referrer: self.referrer.get(),
            field: self.field.get(),
            target: self.target.get(),
            unresolved,
        }
    }
}

/// Pending deleted-target assignments of one copy operation, in recording
/// order.
#[derive(Debug, Default)]
pub struct DeletedAssignments {
    pending: Vec<DeletedAssignment>,
}

impl DeletedAssignments {
    pub fn record(&mut self, assignment: DeletedAssignment) {
        self.pending.push(assignment);
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &DeletedAssignment> {
        self.pending.iter()
    }

    /// Empty the list, failing with the first assignment whose target is
    /// still absent from `dest`.
    ///
    /// If `dest` itself fails, the list is left untouched so the drain can
    /// be retried.
    pub fn drain(&mut self, dest: &dyn Transaction) -> Result<()> {
        let total = self.pending.len();
        let mut unresolved = Vec::new();
        for assignment in &self.pending {
            if !dest.exists(assignment.target)? {
                unresolved.push(*assignment);
            }
        }
        self.pending.clear();
        debug!(
            total,
            unresolved = unresolved.len(),
            "drained deleted-target assignments"
        );
        match unresolved.first() {
            Some(first) => Err(first.into_error(unresolved.len())),
            None => Ok(()),
        }
    }
}

// ---------------------------------------------------------------------------
// CopyState
// ---------------------------------------------------------------------------

/// State carried through one copy operation or a sequence of related ones.
///
/// Not internally synchronized: give each concurrent branch its own clone.
#[derive(Debug, Default)]
pub struct CopyState {
    history: CopyHistory,
    remap: Option<Arc<ObjIdMap>>,
    suppress_notifications: bool,
    deleted: DeletedAssignments,
}

impl CopyState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy objects to the identifiers given by `remap`.
    #[must_use]
    pub fn with_remap(mut self, remap: ObjIdMap) -> Self {
        self.remap = Some(Arc::new(remap));
        self
    }

    /// Write to the destination without firing create or change listeners.
    #[must_use]
    pub fn with_suppressed_notifications(mut self, suppress: bool) -> Self {
        self.suppress_notifications = suppress;
        self
    }

    pub fn suppress_notifications(&self) -> bool {
        self.suppress_notifications
    }

    pub fn remap(&self) -> Option<&ObjIdMap> {
        self.remap.as_deref()
    }

    pub fn history(&self) -> &CopyHistory {
        &self.history
    }

    pub fn mark_copied(&mut self, id: ObjId) -> bool {
        self.history.mark_copied(id)
    }

    pub fn is_copied(&self, id: ObjId) -> bool {
        self.history.is_copied(id)
    }

    /// See [`CopyHistory::mark_traversed`].
    pub fn mark_traversed(&mut self, id: ObjId, path: &[FieldId]) -> Result<bool> {
        self.history.mark_traversed(id, path)
    }

    /// Destination identifier for `source`: its remap entry, or `source`.
    pub fn destination_id_for(&self, source: ObjId) -> ObjId {
        self.remap
            .as_ref()
            .and_then(|map| map.get(source))
            .unwrap_or(source)
    }

    pub fn record_deleted_assignment(&mut self, referrer: ObjId, field: FieldId, target: ObjId) {
        debug!(%referrer, %field, %target, "deferred assignment of absent target");
        self.deleted.record(DeletedAssignment {
            referrer,
            field,
            target,
        });
    }

    pub fn deleted_assignments(&self) -> &DeletedAssignments {
        &self.deleted
    }

    /// Check every recorded assignment against `dest`.
    ///
    /// Assignments whose target now exists are dropped. If any remain, fails
    /// with [`OdbError::DanglingReference`] naming the first one recorded.
    /// The list is empty afterwards either way.
    pub fn drain_deleted_assignments(&mut self, dest: &dyn Transaction) -> Result<()> {
        self.deleted.drain(dest)
    }
}

impl Clone for CopyState {
    /// Clones history and remap; pending assignments stay with the parent.
    fn clone(&self) -> Self {
        Self {
            history: self.history.clone(),
            remap: self.remap.clone(),
            suppress_notifications: self.suppress_notifications,
            deleted: DeletedAssignments::default(),
        }
    }
}

impl Drop for CopyState {
    fn drop(&mut self) {
        if !self.deleted.is_empty() {
            warn!(
                pending = self.deleted.len(),
                "copy state dropped with undrained deleted-target assignments"
            );
        }
    }
}
