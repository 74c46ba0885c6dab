//! Graph copy between two transactions.
//!
//! Starting from one or more roots, [`GraphCopier`] copies every object the
//! [`CascadePlan`] reaches from the source transaction into the destination.
//! Work is driven by an explicit FIFO queue, so deep chains and cycles never
//! grow the native stack:
//!
//! - `Visit` copies an object once per [`CopyState`] and queues its recursive
//!   cascade fields;
//! - `Walk` advances one step along an explicit path, guarded by
//!   [`CopyState::mark_traversed`] so a path suffix is walked from a given
//!   object at most once.
//!
//! References are rewritten through [`CopyState::destination_id_for`]. A
//! strict reference whose target is not (yet) in the destination is recorded
//! as a deleted-target assignment; callers drain those once the whole batch
//! has been copied. A failure mid-object leaves that object marked copied and
//! possibly partially written.

use std::collections::VecDeque;

use odb_error::{OdbError, Result};
use odb_txn::Transaction;
use odb_types::{Cx, FieldId, FieldPath, ObjId};
use serde::Serialize;
use smallvec::SmallVec;
use tracing::{debug, info, trace};

use crate::cascade::CascadePlan;
use crate::copy_state::CopyState;

/// Counters for the copies run by one [`GraphCopier`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CopyStats {
    /// Objects copied (each at most once per state).
    pub objects_copied: u64,
    /// Objects that did not exist in the destination before the copy.
    pub objects_created: u64,
    pub fields_written: u64,
    /// Path steps walked; skipped repeats are not counted.
    pub path_steps: u64,
    /// References skipped because their target is absent from the source.
    pub source_dangling: u64,
}

enum Work {
    Visit {
        id: ObjId,
        depth: usize,
    },
    Walk {
        at: ObjId,
        path: FieldPath,
        step: usize,
        depth: usize,
    },
}

/// Copies object graphs from `source` into `dest` along a cascade plan.
pub struct GraphCopier<'a> {
    source: &'a dyn Transaction,
    dest: &'a dyn Transaction,
    plan: &'a CascadePlan,
    stats: CopyStats,
}

impl<'a> GraphCopier<'a> {
    /// Fails if `plan` names fields that cannot carry references in the
    /// source schema.
    pub fn new(
        source: &'a dyn Transaction,
        dest: &'a dyn Transaction,
        plan: &'a CascadePlan,
    ) -> Result<Self> {
        plan.validate(source.schema())?;
        Ok(Self {
            source,
            dest,
            plan,
            stats: CopyStats::default(),
        })
    }

    pub fn stats(&self) -> CopyStats {
        self.stats
    }

    /// Copy `root` and everything the plan reaches from it. Returns the
    /// root's destination identifier.
    ///
    /// A root already copied under `state` is not revisited. Deleted-target
    /// assignments are left in `state` for the caller to drain.
    pub fn copy(&mut self, cx: &Cx, root: ObjId, state: &mut CopyState) -> Result<ObjId> {
        let before = self.stats;
        let dest_root = self.copy_root(cx, root, state)?;
        self.log_summary(&before, 1, state);
        Ok(dest_root)
    }

    /// Copy several roots sharing one state. Returns their destination
    /// identifiers in input order.
    pub fn copy_all(
        &mut self,
        cx: &Cx,
        roots: impl IntoIterator<Item = ObjId>,
        state: &mut CopyState,
    ) -> Result<Vec<ObjId>> {
        let before = self.stats;
        let mut out = Vec::new();
        for root in roots {
            out.push(self.copy_root(cx, root, state)?);
        }
        self.log_summary(&before, out.len(), state);
        Ok(out)
    }

    fn copy_root(&mut self, cx: &Cx, root: ObjId, state: &mut CopyState) -> Result<ObjId> {
        cx.checkpoint()?;
        if state.is_copied(root) {
            trace!(%root, "root already copied");
            return Ok(state.destination_id_for(root));
        }
        if !self.source.exists(root)? {
            return Err(OdbError::DeletedObject { id: root.get() });
        }

        let plan = self.plan;
        let mut work = VecDeque::new();
        work.push_back(Work::Visit { id: root, depth: 0 });
        for path in plan.paths_for(root.type_id()) {
            work.push_back(Work::Walk {
                at: root,
                path: path.clone(),
                step: 0,
                depth: 0,
            });
        }
        self.run(cx, &mut work, state)?;
        Ok(state.destination_id_for(root))
    }

    fn run(&mut self, cx: &Cx, work: &mut VecDeque<Work>, state: &mut CopyState) -> Result<()> {
        let plan = self.plan;
        while let Some(item) = work.pop_front() {
            cx.checkpoint()?;
            match item {
                Work::Visit { id, depth } => {
                    if !state.mark_copied(id) {
                        continue;
                    }
                    self.copy_object(id, state)?;
                    if !plan.may_descend(depth) {
                        continue;
                    }
                    for field in plan.recursive_fields_for(id.type_id()) {
                        if !state.mark_traversed(id, &[field])? {
                            continue;
                        }
                        for target in self.source_targets(id, field)? {
                            work.push_back(Work::Visit {
                                id: target,
                                depth: depth + 1,
                            });
                        }
                    }
                }
                Work::Walk {
                    at,
                    path,
                    step,
                    depth,
                } => {
                    let rest = &path.as_slice()[step..];
                    let Some(&field) = rest.first() else {
                        continue;
                    };
                    if !self.carries_references(at, field) {
                        trace!(%at, %path, step, "path does not apply to object type");
                        continue;
                    }
                    if !state.mark_traversed(at, rest)? {
                        trace!(%at, %path, step, "path suffix already walked");
                        continue;
                    }
                    self.stats.path_steps += 1;
                    let next = step + 1;
                    for target in self.source_targets(at, field)? {
                        work.push_back(Work::Visit {
                            id: target,
                            depth: depth + 1,
                        });
                        if next < path.len() {
                            work.push_back(Work::Walk {
                                at: target,
                                path: path.clone(),
                                step: next,
                                depth: depth + 1,
                            });
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Whether the source type of `id` has a reference-bearing `field`.
    /// Paths through mixed-type collections reach objects it does not apply to.
    fn carries_references(&self, id: ObjId, field: FieldId) -> bool {
        self.source
            .schema()
            .field(id.type_id(), field)
            .is_ok_and(|def| def.kind.is_reference_bearing())
    }

    /// Objects referenced by `field` of source object `id` that exist in the
    /// source.
    fn source_targets(&mut self, id: ObjId, field: FieldId) -> Result<SmallVec<[ObjId; 4]>> {
        let mut targets = SmallVec::new();
        for target in self.source.references(id, field)? {
            if self.source.exists(target)? {
                targets.push(target);
            } else {
                self.stats.source_dangling += 1;
                debug!(referrer = %id, %field, %target, "skipping reference to object absent from source");
            }
        }
        Ok(targets)
    }

    /// Create `id` at its destination identifier if needed and copy every
    /// field of its type.
    fn copy_object(&mut self, id: ObjId, state: &mut CopyState) -> Result<()> {
        let dest_id = state.destination_id_for(id);
        let notify = !state.suppress_notifications();
        let obj_type = self.source.schema().object_type(id.type_id())?;

        if self.dest.create(dest_id, notify)? {
            self.stats.objects_created += 1;
        }
        for field in obj_type.fields() {
            let mut value = self.source.read_field(id, field.id)?;
            if field.kind.is_reference_bearing() {
                value = value.map_references(&mut |r| state.destination_id_for(r));
                for target in field.kind.strict_references(&value) {
                    if !self.dest.exists(target)? {
                        state.record_deleted_assignment(dest_id, field.id, target);
                    }
                }
            }
            self.dest.write_field(dest_id, field.id, value, notify)?;
            self.stats.fields_written += 1;
        }
        self.stats.objects_copied += 1;
        debug!(source = %id, dest = %dest_id, type_name = %obj_type.name, "copied object");
        Ok(())
    }

    fn log_summary(&self, before: &CopyStats, roots: usize, state: &CopyState) {
        info!(
            roots,
            objects = self.stats.objects_copied - before.objects_copied,
            created = self.stats.objects_created - before.objects_created,
            fields = self.stats.fields_written - before.fields_written,
            path_steps = self.stats.path_steps - before.path_steps,
            source_dangling = self.stats.source_dangling - before.source_dangling,
            pending_deleted = state.deleted_assignments().len(),
            "graph copy finished"
        );
    }
}

impl std::fmt::Debug for GraphCopier<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphCopier")
            .field("source_txn", &self.source.txn_id())
            .field("dest_txn", &self.dest.txn_id())
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

/// Copy `root` from `source` into `dest` along `plan`.
///
/// Shorthand for a single [`GraphCopier::copy`]; the caller still drains
/// `state` afterwards.
pub fn copy_graph(
    cx: &Cx,
    source: &dyn Transaction,
    dest: &dyn Transaction,
    root: ObjId,
    plan: &CascadePlan,
    state: &mut CopyState,
) -> Result<ObjId> {
    GraphCopier::new(source, dest, plan)?.copy(cx, root, state)
}
