//! Field values stored in object records.
//!
//! Values are totally ordered so that set and map fields have a deterministic
//! iteration order. References may appear at the top level or nested inside
//! collections; [`Value::references`] and [`Value::map_references`] walk both.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ObjId;

/// A single field value.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Text(String),
    Bytes(Vec<u8>),
    Ref(ObjId),
    List(Vec<Value>),
    Set(BTreeSet<Value>),
    Map(BTreeMap<Value, Value>),
}

impl Value {
    /// Short name of the variant, used in type-mismatch diagnostics.
    pub const fn kind_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Text(_) => "text",
            Self::Bytes(_) => "bytes",
            Self::Ref(_) => "reference",
            Self::List(_) => "list",
            Self::Set(_) => "set",
            Self::Map(_) => "map",
        }
    }

    #[inline]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// The referenced object, if this is a top-level reference.
    #[inline]
    pub const fn as_ref_id(&self) -> Option<ObjId> {
        match self {
            Self::Ref(id) => Some(*id),
            _ => None,
        }
    }

    #[inline]
    pub const fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    #[inline]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Whether this is a list, set or map.
    #[inline]
    pub const fn is_collection(&self) -> bool {
        matches!(self, Self::List(_) | Self::Set(_) | Self::Map(_))
    }

    /// Visit every reference, including those nested in collections, in
    /// iteration order. Duplicates are visited once per occurrence.
    pub fn for_each_reference(&self, f: &mut impl FnMut(ObjId)) {
        match self {
            Self::Ref(id) => f(*id),
            Self::List(items) => items.iter().for_each(|v| v.for_each_reference(f)),
            Self::Set(items) => items.iter().for_each(|v| v.for_each_reference(f)),
            Self::Map(entries) => {
                for (k, v) in entries {
                    k.for_each_reference(f);
                    v.for_each_reference(f);
                }
            }
            Self::Null | Self::Bool(_) | Self::Int(_) | Self::Text(_) | Self::Bytes(_) => {}
        }
    }

    /// All distinct references, sorted.
    pub fn references(&self) -> BTreeSet<ObjId> {
        let mut out = BTreeSet::new();
        self.for_each_reference(&mut |id| {
            out.insert(id);
        });
        out
    }

    /// Whether any reference occurs in this value.
    pub fn has_references(&self) -> bool {
        let mut found = false;
        self.for_each_reference(&mut |_| found = true);
        found
    }

    /// Rewrite every reference through `f`.
    ///
    /// Set elements and map keys that collapse onto the same rewritten value
    /// are merged; for maps the entry visited last wins.
    #[must_use]
    pub fn map_references(&self, f: &mut impl FnMut(ObjId) -> ObjId) -> Self {
        match self {
            Self::Ref(id) => Self::Ref(f(*id)),
            Self::List(items) => Self::List(items.iter().map(|v| v.map_references(f)).collect()),
            Self::Set(items) => Self::Set(items.iter().map(|v| v.map_references(f)).collect()),
            Self::Map(entries) => Self::Map(
                entries
                    .iter()
                    .map(|(k, v)| (k.map_references(f), v.map_references(f)))
                    .collect(),
            ),
            Self::Null | Self::Bool(_) | Self::Int(_) | Self::Text(_) | Self::Bytes(_) => {
                self.clone()
            }
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Text(s) => write!(f, "{s:?}"),
            Self::Bytes(b) => write!(f, "<{} bytes>", b.len()),
            Self::Ref(id) => write!(f, "@{id}"),
            Self::List(items) => write!(f, "list[{}]", items.len()),
            Self::Set(items) => write!(f, "set[{}]", items.len()),
            Self::Map(entries) => write!(f, "map[{}]", entries.len()),
        }
    }
}

impl From<ObjId> for Value {
    fn from(id: ObjId) -> Self {
        Self::Ref(id)
    }
}

impl From<Option<ObjId>> for Value {
    fn from(id: Option<ObjId>) -> Self {
        id.map_or(Self::Null, Self::Ref)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Text(v.to_owned())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TypeId;

    fn oid(t: u32, n: u32) -> ObjId {
        ObjId::new(TypeId::new(t).unwrap(), n)
    }

    #[test]
    fn test_references_walk_nested_collections() {
        let a = oid(1, 1);
        let b = oid(1, 2);
        let c = oid(2, 3);
        let value = Value::Map(BTreeMap::from([
            (Value::Ref(a), Value::List(vec![Value::Ref(b), Value::Int(4)])),
            (
                Value::Text("k".into()),
                Value::Set(BTreeSet::from([Value::Ref(c), Value::Ref(a)])),
            ),
        ]));
        assert_eq!(value.references(), BTreeSet::from([a, b, c]));
        assert!(value.has_references());
        assert!(!Value::Int(3).has_references());
    }

    #[test]
    fn test_map_references_rewrites_and_collapses() {
        let a = oid(1, 1);
        let b = oid(1, 2);
        let x = oid(1, 9);
        let set = Value::Set(BTreeSet::from([Value::Ref(a), Value::Ref(b)]));
        let mapped = set.map_references(&mut |id| if id == a || id == b { x } else { id });
        assert_eq!(mapped, Value::Set(BTreeSet::from([Value::Ref(x)])));

        let list = Value::List(vec![Value::Ref(a), Value::Null, Value::Ref(a)]);
        let mapped = list.map_references(&mut |_| b);
        assert_eq!(
            mapped,
            Value::List(vec![Value::Ref(b), Value::Null, Value::Ref(b)])
        );
    }

    #[test]
    fn test_scalar_accessors() {
        assert_eq!(Value::from(7_i64).as_int(), Some(7));
        assert_eq!(Value::from("hi").as_text(), Some("hi"));
        assert_eq!(Value::from(None::<ObjId>), Value::Null);
        assert_eq!(Value::from(oid(2, 2)).as_ref_id(), Some(oid(2, 2)));
        assert!(Value::default().is_null());
        assert!(Value::List(Vec::new()).is_collection());
        assert_eq!(Value::Bytes(vec![1, 2]).kind_name(), "bytes");
    }

    #[test]
    fn test_display() {
        assert_eq!(Value::Ref(oid(1, 0x10)).to_string(), "@0000000100000010");
        assert_eq!(Value::Text("x".into()).to_string(), "\"x\"");
        assert_eq!(Value::List(vec![Value::Null]).to_string(), "list[1]");
    }
}
