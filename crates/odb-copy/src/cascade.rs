//! Cascade plans: which references a graph copy follows.
//!
//! A plan combines two kinds of instruction, both keyed by the type of the
//! object they start from:
//!
//! - explicit paths: finite field sequences walked left to right, e.g. `1.2`
//!   follows field 1, then field 2 of each object reached;
//! - recursive fields: followed from every copied object of the type until
//!   closure, optionally bounded by a recursion limit.

use std::collections::{BTreeMap, BTreeSet};

use odb_error::{OdbError, Result};
use odb_txn::Schema;
use odb_types::{FieldId, FieldPath, TypeId};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CascadePlan {
    paths: BTreeMap<TypeId, BTreeSet<FieldPath>>,
    recursive: BTreeMap<TypeId, BTreeSet<FieldId>>,
    /// Maximum reference hops from a root. `None` is unbounded.
    recursion_limit: Option<usize>,
}

impl CascadePlan {
    /// A plan that copies only the roots.
    pub fn new() -> Self {
        Self::default()
    }

    /// Follow every reference-bearing field of every type, to closure.
    pub fn full(schema: &Schema) -> Self {
        let mut plan = Self::new();
        for obj_type in schema.types() {
            for field in obj_type.reference_fields() {
                plan.add_recursive_field(obj_type.id, field.id);
            }
        }
        plan
    }

    #[must_use]
    pub fn with_path(mut self, type_id: TypeId, path: FieldPath) -> Self {
        self.add_path(type_id, path);
        self
    }

    #[must_use]
    pub fn with_recursive_field(mut self, type_id: TypeId, field: FieldId) -> Self {
        self.add_recursive_field(type_id, field);
        self
    }

    #[must_use]
    pub fn with_recursion_limit(mut self, limit: usize) -> Self {
        self.recursion_limit = Some(limit);
        self
    }

    pub fn add_path(&mut self, type_id: TypeId, path: FieldPath) {
        self.paths.entry(type_id).or_default().insert(path);
    }

    pub fn add_recursive_field(&mut self, type_id: TypeId, field: FieldId) {
        self.recursive.entry(type_id).or_default().insert(field);
    }

    /// Explicit paths starting at objects of `type_id`, in path order.
    pub fn paths_for(&self, type_id: TypeId) -> impl Iterator<Item = &FieldPath> {
        self.paths.get(&type_id).into_iter().flatten()
    }

    pub fn recursive_fields_for(&self, type_id: TypeId) -> impl Iterator<Item = FieldId> + '_ {
        self.recursive.get(&type_id).into_iter().flatten().copied()
    }

    pub fn recursion_limit(&self) -> Option<usize> {
        self.recursion_limit
    }

    /// Whether objects reached at `depth` hops may follow further references.
    pub fn may_descend(&self, depth: usize) -> bool {
        self.recursion_limit.is_none_or(|limit| depth < limit)
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty() && self.recursive.is_empty()
    }

    /// Check that every path's first field and every recursive field is a
    /// reference-bearing field of its starting type.
    ///
    /// Later path steps depend on the runtime target type and are checked
    /// during the walk.
    pub fn validate(&self, schema: &Schema) -> Result<()> {
        let starts = self
            .paths
            .iter()
            .flat_map(|(t, paths)| paths.iter().map(move |p| (*t, p.first())));
        let recursive = self
            .recursive
            .iter()
            .flat_map(|(t, fields)| fields.iter().map(move |f| (*t, *f)));
        for (type_id, field) in starts.chain(recursive) {
            let def = schema.field(type_id, field)?;
            if !def.kind.is_reference_bearing() {
                return Err(OdbError::invalid_argument(format!(
                    "cascade field {} of type {type_id} is a {} field",
                    def.name,
                    def.kind.name()
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use odb_txn::{FieldDef, ObjType, ReferenceOptions};

    use super::*;

    fn tid(n: u32) -> TypeId {
        TypeId::new(n).unwrap()
    }

    fn fid(n: u32) -> FieldId {
        FieldId::new(n).unwrap()
    }

    fn schema() -> Schema {
        Schema::new()
            .with_type(
                ObjType::new(tid(1), "Folder")
                    .with_field(FieldDef::simple(fid(1), "name"))
                    .with_field(FieldDef::reference(fid(2), "parent", ReferenceOptions::STRICT)),
            )
            .with_type(
                ObjType::new(tid(2), "Doc")
                    .with_field(FieldDef::reference(fid(1), "folder", ReferenceOptions::ALLOW_DELETED)),
            )
    }

    #[test]
    fn test_full_plan_follows_every_reference_field() {
        let plan = CascadePlan::full(&schema());
        assert_eq!(plan.recursive_fields_for(tid(1)).collect::<Vec<_>>(), vec![fid(2)]);
        assert_eq!(plan.recursive_fields_for(tid(2)).collect::<Vec<_>>(), vec![fid(1)]);
        assert_eq!(plan.paths_for(tid(1)).count(), 0);
        assert!(plan.may_descend(1_000));
        assert!(plan.validate(&schema()).is_ok());
    }

    #[test]
    fn test_paths_are_ordered_and_deduplicated() {
        let long = FieldPath::new([fid(2), fid(2)]).unwrap();
        let short = FieldPath::single(fid(2));
        let plan = CascadePlan::new()
            .with_path(tid(1), long.clone())
            .with_path(tid(1), short.clone())
            .with_path(tid(1), long.clone());
        assert_eq!(plan.paths_for(tid(1)).collect::<Vec<_>>(), vec![&short, &long]);
        assert!(!plan.is_empty());
        assert!(CascadePlan::new().is_empty());
    }

    #[test]
    fn test_recursion_limit() {
        let plan = CascadePlan::new().with_recursion_limit(2);
        assert!(plan.may_descend(0));
        assert!(plan.may_descend(1));
        assert!(!plan.may_descend(2));
        assert_eq!(plan.recursion_limit(), Some(2));
    }

    #[test]
    fn test_validate_rejects_non_reference_start() {
        let plan = CascadePlan::new().with_path(tid(1), FieldPath::single(fid(1)));
        assert!(matches!(
            plan.validate(&schema()),
            Err(OdbError::InvalidArgument(_))
        ));
        let plan = CascadePlan::new().with_recursive_field(tid(2), fid(9));
        assert!(matches!(
            plan.validate(&schema()),
            Err(OdbError::UnknownField { .. })
        ));
    }

    #[test]
    fn test_plan_serde_round_trip() {
        let plan = CascadePlan::new()
            .with_path(tid(1), FieldPath::new([fid(2), fid(2)]).unwrap())
            .with_recursive_field(tid(2), fid(1))
            .with_recursion_limit(3);
        let json = serde_json::to_string(&plan).unwrap();
        let back: CascadePlan = serde_json::from_str(&json).unwrap();
        assert_eq!(back, plan);

        let empty: CascadePlan = serde_json::from_str("{}").unwrap();
        assert!(empty.is_empty());
        assert_eq!(empty.recursion_limit(), None);
    }
}
