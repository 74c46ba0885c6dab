//! Schema descriptors: object types and their typed fields.
//!
//! The schema is what lets the copy engine tell reference fields from scalar
//! ones without interpreting field names. Descriptors are plain serde types so
//! a schema can be loaded from configuration.

use std::collections::{BTreeMap, BTreeSet};

use odb_error::{OdbError, Result};
use odb_types::{FieldId, ObjId, TypeId, Value};
use serde::{Deserialize, Serialize};

/// Options attached to a reference (or reference element) field.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceOptions {
    /// Whether the field may point at an object absent from the transaction.
    /// Such assignments are never reported as dangling by the copy engine.
    #[serde(default)]
    pub allow_deleted: bool,
}

impl ReferenceOptions {
    /// References must point at existing objects.
    pub const STRICT: Self = Self {
        allow_deleted: false,
    };

    /// References may point at deleted objects.
    pub const ALLOW_DELETED: Self = Self {
        allow_deleted: true,
    };
}

/// Kind of a collection element, map key or map value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElementKind {
    Simple,
    Reference(ReferenceOptions),
}

impl ElementKind {
    fn check(self, value: &Value) -> bool {
        match self {
            Self::Simple => !matches!(value, Value::Ref(_)) && !value.is_collection(),
            Self::Reference(_) => matches!(value, Value::Null | Value::Ref(_)),
        }
    }

    const fn reference_options(self) -> Option<ReferenceOptions> {
        match self {
            Self::Simple => None,
            Self::Reference(opts) => Some(opts),
        }
    }
}

/// Kind of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    /// Scalar value: null, bool, int, text or bytes.
    Simple,
    /// Integer counter.
    Counter,
    /// Singular reference to another object.
    Reference(ReferenceOptions),
    List(ElementKind),
    Set(ElementKind),
    Map { key: ElementKind, value: ElementKind },
}

impl FieldKind {
    /// Value an unset field reads as.
    pub fn default_value(self) -> Value {
        match self {
            Self::Simple | Self::Reference(_) => Value::Null,
            Self::Counter => Value::Int(0),
            Self::List(_) => Value::List(Vec::new()),
            Self::Set(_) => Value::Set(Default::default()),
            Self::Map { .. } => Value::Map(Default::default()),
        }
    }

    /// Whether values of this kind may contain references.
    pub const fn is_reference_bearing(self) -> bool {
        match self {
            Self::Simple | Self::Counter => false,
            Self::Reference(_) => true,
            Self::List(elem) | Self::Set(elem) => elem.reference_options().is_some(),
            Self::Map { key, value } => {
                key.reference_options().is_some() || value.reference_options().is_some()
            }
        }
    }

    /// Whether every reference this field can hold may point at a deleted
    /// object. `false` for fields that hold no references.
    pub const fn allows_deleted(self) -> bool {
        match self {
            Self::Simple | Self::Counter => false,
            Self::Reference(opts) => opts.allow_deleted,
            Self::List(elem) | Self::Set(elem) => match elem.reference_options() {
                Some(opts) => opts.allow_deleted,
                None => false,
            },
            Self::Map { key, value } => {
                let key_ok = match key.reference_options() {
                    Some(opts) => opts.allow_deleted,
                    None => true,
                };
                let value_ok = match value.reference_options() {
                    Some(opts) => opts.allow_deleted,
                    None => true,
                };
                self.is_reference_bearing() && key_ok && value_ok
            }
        }
    }

    /// References in `value` that must point at existing objects, i.e. those
    /// held where this kind does not allow deleted targets.
    pub fn strict_references(self, value: &Value) -> BTreeSet<ObjId> {
        let strict =
            |elem: ElementKind| matches!(elem.reference_options(), Some(opts) if !opts.allow_deleted);
        let mut out = BTreeSet::new();
        let mut collect = |v: &Value| {
            v.for_each_reference(&mut |id| {
                out.insert(id);
            });
        };
        match self {
            Self::Reference(opts) if !opts.allow_deleted => collect(value),
            Self::List(elem) | Self::Set(elem) if strict(elem) => collect(value),
            Self::Map { key, value: val } => {
                if let Value::Map(entries) = value {
                    for (k, v) in entries {
                        if strict(key) {
                            collect(k);
                        }
                        if strict(val) {
                            collect(v);
                        }
                    }
                }
            }
            _ => {}
        }
        out
    }

    pub const fn is_collection(self) -> bool {
        matches!(self, Self::List(_) | Self::Set(_) | Self::Map { .. })
    }

    /// Short name used in diagnostics.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Simple => "simple",
            Self::Counter => "counter",
            Self::Reference(_) => "reference",
            Self::List(_) => "list",
            Self::Set(_) => "set",
            Self::Map { .. } => "map",
        }
    }

    /// Validate `value` against this kind.
    pub fn check(self, value: &Value) -> Result<()> {
        let ok = match (self, value) {
            (Self::Simple, v) => ElementKind::Simple.check(v),
            (Self::Counter, Value::Int(_)) => true,
            (Self::Reference(_), Value::Null | Value::Ref(_)) => true,
            (Self::List(elem), Value::List(items)) => items.iter().all(|v| elem.check(v)),
            (Self::Set(elem), Value::Set(items)) => items.iter().all(|v| elem.check(v)),
            (Self::Map { key, value: val }, Value::Map(entries)) => entries
                .iter()
                .all(|(k, v)| key.check(k) && val.check(v)),
            _ => false,
        };
        if ok {
            Ok(())
        } else {
            Err(OdbError::type_mismatch(self.name(), value.kind_name()))
        }
    }
}

/// One field of an object type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDef {
    pub id: FieldId,
    pub name: String,
    pub kind: FieldKind,
}

impl FieldDef {
    pub fn new(id: FieldId, name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            id,
            name: name.into(),
            kind,
        }
    }

    pub fn simple(id: FieldId, name: impl Into<String>) -> Self {
        Self::new(id, name, FieldKind::Simple)
    }

    pub fn reference(id: FieldId, name: impl Into<String>, opts: ReferenceOptions) -> Self {
        Self::new(id, name, FieldKind::Reference(opts))
    }
}

/// An object type: storage id, name and fields ordered by storage id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjType {
    pub id: TypeId,
    pub name: String,
    fields: BTreeMap<FieldId, FieldDef>,
}

impl ObjType {
    pub fn new(id: TypeId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            fields: BTreeMap::new(),
        }
    }

    /// Add a field, replacing any previous field with the same id.
    #[must_use]
    pub fn with_field(mut self, field: FieldDef) -> Self {
        self.fields.insert(field.id, field);
        self
    }

    pub fn field(&self, field: FieldId) -> Result<&FieldDef> {
        self.fields.get(&field).ok_or(OdbError::UnknownField {
            type_id: self.id.get(),
            field: field.get(),
        })
    }

    pub fn field_by_name(&self, name: &str) -> Option<&FieldDef> {
        self.fields.values().find(|f| f.name == name)
    }

    /// All fields in storage id order.
    pub fn fields(&self) -> impl Iterator<Item = &FieldDef> {
        self.fields.values()
    }

    /// Fields that may hold references, in storage id order.
    pub fn reference_fields(&self) -> impl Iterator<Item = &FieldDef> {
        self.fields.values().filter(|f| f.kind.is_reference_bearing())
    }
}

/// The full set of object types known to a store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    types: BTreeMap<TypeId, ObjType>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an object type, replacing any previous type with the same id.
    #[must_use]
    pub fn with_type(mut self, obj_type: ObjType) -> Self {
        self.types.insert(obj_type.id, obj_type);
        self
    }

    pub fn object_type(&self, type_id: TypeId) -> Result<&ObjType> {
        self.types.get(&type_id).ok_or(OdbError::UnknownType {
            type_id: type_id.get(),
        })
    }

    pub fn type_by_name(&self, name: &str) -> Option<&ObjType> {
        self.types.values().find(|t| t.name == name)
    }

    pub fn types(&self) -> impl Iterator<Item = &ObjType> {
        self.types.values()
    }

    /// Convenience: the definition of `field` on `type_id`.
    pub fn field(&self, type_id: TypeId, field: FieldId) -> Result<&FieldDef> {
        self.object_type(type_id)?.field(field)
    }
}
