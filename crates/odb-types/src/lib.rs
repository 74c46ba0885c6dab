//! Identifier, value and context types shared by every layer of the object
//! database binding.
//!
//! An [`ObjId`] is the opaque, totally ordered address of one record. Its high
//! 32 bits carry the [`TypeId`] of the record's object type, so all objects of
//! one type occupy a contiguous identifier range.

pub mod cx;
pub mod value;

pub use cx::Cx;
pub use value::Value;

use std::fmt;
use std::num::NonZeroU32;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

// ---------------------------------------------------------------------------
// TypeId / FieldId
// ---------------------------------------------------------------------------

/// Storage id of an object type. Never zero.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[repr(transparent)]
pub struct TypeId(NonZeroU32);

impl TypeId {
    /// Returns `None` if `n` is 0.
    #[inline]
    pub const fn new(n: u32) -> Option<Self> {
        match NonZeroU32::new(n) {
            Some(v) => Some(Self(v)),
            None => None,
        }
    }

    #[inline]
    pub const fn get(self) -> u32 {
        self.0.get()
    }
}

impl fmt::Display for TypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Storage id of a field within an object type. Never zero.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[repr(transparent)]
pub struct FieldId(NonZeroU32);

impl FieldId {
    /// Returns `None` if `n` is 0.
    #[inline]
    pub const fn new(n: u32) -> Option<Self> {
        match NonZeroU32::new(n) {
            Some(v) => Some(Self(v)),
            None => None,
        }
    }

    #[inline]
    pub const fn get(self) -> u32 {
        self.0.get()
    }
}

impl fmt::Display for FieldId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// ObjId
// ---------------------------------------------------------------------------

/// Opaque identifier of one logical record.
///
/// Layout: `type_id << 32 | instance`. Ordering is the numeric order of the
/// raw value, which groups identifiers by type and then by instance.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u64", into = "u64")]
#[repr(transparent)]
pub struct ObjId(u64);

impl ObjId {
    /// Build an identifier from its type and per-type instance number.
    #[inline]
    pub const fn new(type_id: TypeId, instance: u32) -> Self {
        Self(((type_id.get() as u64) << 32) | instance as u64)
    }

    /// Reinterpret a raw value. Returns `None` if the type bits are zero.
    #[inline]
    pub const fn from_raw(raw: u64) -> Option<Self> {
        if raw >> 32 == 0 { None } else { Some(Self(raw)) }
    }

    /// The raw 64-bit value.
    #[inline]
    pub const fn get(self) -> u64 {
        self.0
    }

    /// The object type encoded in the high bits.
    #[inline]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn type_id(self) -> TypeId {
        match TypeId::new((self.0 >> 32) as u32) {
            Some(t) => t,
            // Construction guarantees non-zero type bits.
            None => unreachable!(),
        }
    }

    /// The per-type instance number encoded in the low bits.
    #[inline]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn instance(self) -> u32 {
        self.0 as u32
    }

    /// Smallest identifier of `type_id`.
    #[inline]
    pub const fn min_for_type(type_id: TypeId) -> Self {
        Self::new(type_id, 0)
    }

    /// Largest identifier of `type_id`.
    #[inline]
    pub const fn max_for_type(type_id: TypeId) -> Self {
        Self::new(type_id, u32::MAX)
    }
}

impl fmt::Debug for ObjId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjId({:016x})", self.0)
    }
}

impl fmt::Display for ObjId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

impl From<ObjId> for u64 {
    fn from(id: ObjId) -> Self {
        id.0
    }
}

impl TryFrom<u64> for ObjId {
    type Error = InvalidObjId;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        Self::from_raw(value).ok_or(InvalidObjId)
    }
}

impl FromStr for ObjId {
    type Err = InvalidObjId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != 16 || !s.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(InvalidObjId);
        }
        let raw = u64::from_str_radix(s, 16).map_err(|_| InvalidObjId)?;
        Self::from_raw(raw).ok_or(InvalidObjId)
    }
}

/// Error returned for a malformed or zero-typed object identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidObjId;

impl fmt::Display for InvalidObjId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("invalid object id: expected 16 hex digits with a non-zero type")
    }
}

impl std::error::Error for InvalidObjId {}

// ---------------------------------------------------------------------------
// FieldPath
// ---------------------------------------------------------------------------

/// Non-empty sequence of reference fields, followed left to right.
///
/// `Ord` is lexicographic over the field ids, so a path sorts immediately
/// before all of its strict extensions.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FieldPath(SmallVec<[FieldId; 4]>);

impl FieldPath {
    /// Returns `None` if `fields` is empty.
    pub fn new(fields: impl IntoIterator<Item = FieldId>) -> Option<Self> {
        let fields: SmallVec<[FieldId; 4]> = fields.into_iter().collect();
        if fields.is_empty() {
            None
        } else {
            Some(Self(fields))
        }
    }

    /// Single-field path.
    pub fn single(field: FieldId) -> Self {
        Self(smallvec::smallvec![field])
    }

    #[inline]
    pub fn as_slice(&self) -> &[FieldId] {
        &self.0
    }

    #[inline]
    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[inline]
    pub fn first(&self) -> FieldId {
        self.0[0]
    }

    /// The leading `len` fields. Returns `None` if `len` is 0 or too long.
    pub fn prefix(&self, len: usize) -> Option<Self> {
        if len == 0 || len > self.0.len() {
            return None;
        }
        Some(Self(self.0[..len].iter().copied().collect()))
    }

    /// Whether `self` is a (non-strict) prefix of `other`.
    pub fn is_prefix_of(&self, other: &Self) -> bool {
        other.0.starts_with(&self.0)
    }
}

impl fmt::Debug for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FieldPath({self})")
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, field) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(".")?;
            }
            write!(f, "{field}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn tid(n: u32) -> TypeId {
        TypeId::new(n).unwrap()
    }

    fn fid(n: u32) -> FieldId {
        FieldId::new(n).unwrap()
    }

    #[test]
    fn test_obj_id_layout() {
        let id = ObjId::new(tid(7), 42);
        assert_eq!(id.type_id(), tid(7));
        assert_eq!(id.instance(), 42);
        assert_eq!(id.get(), (7_u64 << 32) | 42);
    }

    #[test]
    fn test_obj_id_rejects_zero_type() {
        assert!(ObjId::from_raw(0).is_none());
        assert!(ObjId::from_raw(u64::from(u32::MAX)).is_none());
        assert!(ObjId::from_raw(1 << 32).is_some());
        assert!(TypeId::new(0).is_none());
        assert!(FieldId::new(0).is_none());
    }

    #[test]
    fn test_obj_id_display_and_parse() {
        let id = ObjId::new(tid(1), 0x2a);
        assert_eq!(id.to_string(), "000000010000002a");
        assert_eq!("000000010000002a".parse::<ObjId>(), Ok(id));
        assert_eq!("00000001000002a".parse::<ObjId>(), Err(InvalidObjId));
        assert_eq!("000000000000002a".parse::<ObjId>(), Err(InvalidObjId));
        assert_eq!("00000001000000zz".parse::<ObjId>(), Err(InvalidObjId));
    }

    #[test]
    fn test_obj_id_type_range() {
        let t = tid(3);
        let id = ObjId::new(t, 99);
        assert!(ObjId::min_for_type(t) <= id && id <= ObjId::max_for_type(t));
        assert!(ObjId::max_for_type(tid(2)) < ObjId::min_for_type(t));
    }

    #[test]
    fn test_obj_id_serde_roundtrip_rejects_zero_type() {
        let id = ObjId::new(tid(5), 1);
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, id.get().to_string());
        assert_eq!(serde_json::from_str::<ObjId>(&json).unwrap(), id);
        assert!(serde_json::from_str::<ObjId>("17").is_err());
    }

    #[test]
    fn test_field_path_basics() {
        assert!(FieldPath::new(std::iter::empty()).is_none());
        let p = FieldPath::new([fid(1), fid(2), fid(3)]).unwrap();
        assert_eq!(p.len(), 3);
        assert_eq!(p.first(), fid(1));
        assert_eq!(p.to_string(), "1.2.3");
        let pre = p.prefix(2).unwrap();
        assert!(pre.is_prefix_of(&p));
        assert!(!p.is_prefix_of(&pre));
        assert!(p.prefix(0).is_none());
        assert!(p.prefix(4).is_none());
        assert_eq!(p.prefix(3).unwrap(), p);
    }

    #[test]
    fn test_field_path_lexicographic_order() {
        let a = FieldPath::new([fid(1)]).unwrap();
        let ab = FieldPath::new([fid(1), fid(2)]).unwrap();
        let b = FieldPath::new([fid(2)]).unwrap();
        let big = FieldPath::new([fid(1), fid(300)]).unwrap();
        assert!(a < ab);
        assert!(ab < big);
        assert!(big < b);
    }

    proptest! {
        #[test]
        fn prop_obj_id_order_matches_raw(a in 1_u64 << 32..u64::MAX, b in 1_u64 << 32..u64::MAX) {
            let x = ObjId::from_raw(a).unwrap();
            let y = ObjId::from_raw(b).unwrap();
            prop_assert_eq!(x.cmp(&y), a.cmp(&b));
            prop_assert_eq!(x.to_string().parse::<ObjId>().unwrap(), x);
        }

        #[test]
        fn prop_prefix_sorts_before_extension(
            fields in proptest::collection::vec(1_u32..50, 1..6),
            extra in 1_u32..50,
        ) {
            let path = FieldPath::new(fields.iter().map(|&f| fid(f))).unwrap();
            let longer = FieldPath::new(
                fields.iter().chain(std::iter::once(&extra)).map(|&f| fid(f)),
            )
            .unwrap();
            prop_assert!(path < longer);
            prop_assert!(path.is_prefix_of(&longer));
        }
    }
}
