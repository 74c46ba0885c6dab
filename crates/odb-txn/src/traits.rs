//! The transaction collaborator consumed by the identity cache and the graph
//! copy engine.
//!
//! A [`Transaction`] is a field-level view over a store: existence checks,
//! creation, and typed field reads and writes keyed by [`ObjId`]. All methods
//! take `&self`; implementations synchronize internally so one transaction can
//! be shared by every thread working through its identity cache.

use std::collections::BTreeSet;
use std::sync::Arc;

use odb_error::{OdbError, Result};
use odb_types::{FieldId, ObjId, TypeId, Value};

use crate::schema::{FieldDef, FieldKind, Schema};

/// A field-level change delivered to change listeners.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldChange {
    pub id: ObjId,
    pub field: FieldId,
    pub old: Value,
    pub new: Value,
}

/// Listener invoked after an object is created with notification enabled.
pub type CreateListener = Arc<dyn Fn(ObjId) + Send + Sync>;

/// Listener invoked after a field value changes with notification enabled.
pub type ChangeListener = Arc<dyn Fn(&FieldChange) + Send + Sync>;

/// Field-level access to one transactional view of the store.
pub trait Transaction: Send + Sync {
    /// Identifier of this transaction, for diagnostics.
    fn txn_id(&self) -> u64;

    /// Schema shared by every object in this view.
    fn schema(&self) -> &Arc<Schema>;

    /// Whether this is a standalone view not attached to a store.
    fn is_detached(&self) -> bool;

    /// Whether `id` exists in this view.
    fn exists(&self, id: ObjId) -> Result<bool>;

    /// Create `id` if absent. Returns `true` if it was created.
    ///
    /// Create listeners fire only when `notify` is set and the object is new.
    fn create(&self, id: ObjId, notify: bool) -> Result<bool>;

    /// Create a fresh object of `type_id` with an unused identifier.
    fn create_new(&self, type_id: TypeId, notify: bool) -> Result<ObjId>;

    /// Delete `id`. Returns `true` if it existed.
    fn delete(&self, id: ObjId) -> Result<bool>;

    /// Read a field; unset fields read as the kind's default value.
    fn read_field(&self, id: ObjId, field: FieldId) -> Result<Value>;

    /// Write a field after validating `value` against the field kind.
    ///
    /// Change listeners fire only when `notify` is set and the value changed.
    fn write_field(&self, id: ObjId, field: FieldId, value: Value, notify: bool) -> Result<()>;

    /// Existing identifiers in ascending order, optionally limited to one type.
    fn object_ids(&self, type_id: Option<TypeId>) -> Result<Vec<ObjId>>;

    // --- Typed helpers ---

    /// Schema definition of `field` on the type of `id`.
    fn field_def(&self, id: ObjId, field: FieldId) -> Result<&FieldDef> {
        self.schema().field(id.type_id(), field)
    }

    /// Read a simple or counter field.
    fn read_scalar(&self, id: ObjId, field: FieldId) -> Result<Value> {
        let kind = self.field_def(id, field)?.kind;
        if !matches!(kind, FieldKind::Simple | FieldKind::Counter) {
            return Err(OdbError::type_mismatch("simple", kind.name()));
        }
        self.read_field(id, field)
    }

    /// Read a list, set or map field.
    fn read_collection(&self, id: ObjId, field: FieldId) -> Result<Value> {
        let kind = self.field_def(id, field)?.kind;
        if !kind.is_collection() {
            return Err(OdbError::type_mismatch("collection", kind.name()));
        }
        self.read_field(id, field)
    }

    /// Read a singular reference field.
    fn read_reference(&self, id: ObjId, field: FieldId) -> Result<Option<ObjId>> {
        let kind = self.field_def(id, field)?.kind;
        if !matches!(kind, FieldKind::Reference(_)) {
            return Err(OdbError::type_mismatch("reference", kind.name()));
        }
        Ok(self.read_field(id, field)?.as_ref_id())
    }

    /// Write a singular reference field.
    fn write_reference(
        &self,
        id: ObjId,
        field: FieldId,
        target: Option<ObjId>,
        notify: bool,
    ) -> Result<()> {
        let kind = self.field_def(id, field)?.kind;
        if !matches!(kind, FieldKind::Reference(_)) {
            return Err(OdbError::type_mismatch("reference", kind.name()));
        }
        self.write_field(id, field, Value::from(target), notify)
    }

    /// Every distinct object referenced by `field`, whether singular or held
    /// in a collection.
    fn references(&self, id: ObjId, field: FieldId) -> Result<BTreeSet<ObjId>> {
        let kind = self.field_def(id, field)?.kind;
        if !kind.is_reference_bearing() {
            return Err(OdbError::type_mismatch("reference", kind.name()));
        }
        Ok(self.read_field(id, field)?.references())
    }
}
