//! The core [`JValue`] type: a single tagged pointer covering every JSON
//! kind plus the [`Invalid`](ValueType::Invalid) sentinel.

use std::cmp::Ordering;
use std::collections::hash_map::DefaultHasher;
use std::fmt::{self, Debug, Formatter};
use std::hash::{Hash, Hasher};
use std::mem;
use std::ptr::NonNull;

use super::array::JArray;
use super::number::JNumber;
use super::object::JObject;
use super::string::JString;

/// A JSON value.
///
/// A `JValue` is guaranteed to be pointer-sized and has a niche, so
/// `Option<JValue>` is also pointer-sized. `Null`, the booleans and the
/// `Invalid` sentinel are stored inline; numbers, strings, arrays and
/// objects live behind a pointer to a reference-counted header.
///
/// Cloning a `JValue` bumps a reference count and is always cheap; use
/// [`JValue::duplicate`] for an independent deep copy. Mutating a shared
/// container first detaches it, so each holder of a shared subtree observes
/// a logical copy.
#[repr(transparent)]
pub struct JValue {
    ptr: NonNull<u8>,
}

pub(crate) const ALIGNMENT: usize = 4;

// Inline sentinels occupy pointer values below `2 * ALIGNMENT`; no
// allocation or static can live there, so `ptr_usize() >= 8` identifies a
// real header.
const SENTINEL_LIMIT: usize = 2 * ALIGNMENT;

#[repr(usize)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum TypeTag {
    NumberOrInvalid = 0,
    StringOrNull = 1,
    ArrayOrFalse = 2,
    ObjectOrTrue = 3,
}

impl From<usize> for TypeTag {
    fn from(other: usize) -> Self {
        // Safety: `% ALIGNMENT` can only return valid variants
        unsafe { mem::transmute(other % ALIGNMENT) }
    }
}

/// The kind of a [`JValue`].
///
/// The variant order is the kind rank used by [`Ord`] on `JValue`: values
/// of different kinds order by this rank.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ValueType {
    /// The "no value produced" sentinel. Distinct from `Null`.
    Invalid,
    /// JSON `null`.
    Null,
    /// JSON `true` or `false`.
    Bool,
    /// A JSON number.
    Number,
    /// A JSON string.
    String,
    /// A JSON array.
    Array,
    /// A JSON object.
    Object,
}

impl ValueType {
    pub(crate) fn name(self) -> &'static str {
        match self {
            ValueType::Invalid => "invalid",
            ValueType::Null => "null",
            ValueType::Bool => "boolean",
            ValueType::Number => "number",
            ValueType::String => "string",
            ValueType::Array => "array",
            ValueType::Object => "object",
        }
    }
}

unsafe impl Send for JValue {}
unsafe impl Sync for JValue {}

static INVALID_SINGLETON: JValue = JValue::INVALID;

impl JValue {
    // Safety: value must be an inline sentinel (non-zero, below
    // SENTINEL_LIMIT)
    const unsafe fn new_inline(value: usize) -> Self {
        Self {
            ptr: NonNull::new_unchecked(value as *mut u8),
        }
    }
    // Safety: Pointer must be non-null and aligned to at least ALIGNMENT
    pub(crate) const unsafe fn new_ptr(p: *mut u8, tag: TypeTag) -> Self {
        Self {
            ptr: NonNull::new_unchecked(p.offset(tag as isize)),
        }
    }
    // Safety: Reference must be aligned to at least ALIGNMENT
    pub(crate) const unsafe fn new_ref<T>(r: &T, tag: TypeTag) -> Self {
        Self::new_ptr(r as *const _ as *mut u8, tag)
    }

    /// JSON `null`.
    pub const NULL: Self = unsafe { Self::new_inline(TypeTag::StringOrNull as usize) };
    /// JSON `false`.
    pub const FALSE: Self = unsafe { Self::new_inline(TypeTag::ArrayOrFalse as usize) };
    /// JSON `true`.
    pub const TRUE: Self = unsafe { Self::new_inline(TypeTag::ObjectOrTrue as usize) };
    /// The "no value produced" sentinel: returned by failed lookups and
    /// failed conversions. Unequal to [`JValue::NULL`].
    pub const INVALID: Self = unsafe { Self::new_inline(ALIGNMENT) };

    /// Borrows the shared `Invalid` singleton.
    #[must_use]
    pub fn invalid_ref() -> &'static JValue {
        &INVALID_SINGLETON
    }

    fn ptr_usize(&self) -> usize {
        self.ptr.as_ptr() as usize
    }
    // Safety: Must only be called on non-sentinel values
    pub(crate) unsafe fn ptr(&self) -> *mut u8 {
        self.ptr
            .as_ptr()
            .wrapping_offset(-((self.ptr_usize() % ALIGNMENT) as isize))
    }
    // Safety: Pointer must be non-null and aligned to at least ALIGNMENT
    pub(crate) unsafe fn set_ptr(&mut self, ptr: *mut u8) {
        let tag = self.type_tag();
        self.ptr = NonNull::new_unchecked(ptr.offset(tag as isize));
    }
    // Safety: Reference must be aligned to at least ALIGNMENT
    pub(crate) unsafe fn set_ref<T>(&mut self, r: &T) {
        self.set_ptr(r as *const T as *mut u8)
    }
    pub(crate) unsafe fn raw_copy(&self) -> Self {
        Self { ptr: self.ptr }
    }
    pub(crate) fn raw_eq(&self, other: &Self) -> bool {
        self.ptr == other.ptr
    }
    fn is_ptr(&self) -> bool {
        self.ptr_usize() >= SENTINEL_LIMIT
    }
    fn type_tag(&self) -> TypeTag {
        self.ptr_usize().into()
    }

    /// Returns the kind of this value.
    pub fn type_(&self) -> ValueType {
        match (self.type_tag(), self.is_ptr()) {
            // Pointers
            (TypeTag::NumberOrInvalid, true) => ValueType::Number,
            (TypeTag::StringOrNull, true) => ValueType::String,
            (TypeTag::ArrayOrFalse, true) => ValueType::Array,
            (TypeTag::ObjectOrTrue, true) => ValueType::Object,

            // Sentinels
            (TypeTag::NumberOrInvalid, false) => ValueType::Invalid,
            (TypeTag::StringOrNull, false) => ValueType::Null,
            (TypeTag::ArrayOrFalse, false) => ValueType::Bool,
            (TypeTag::ObjectOrTrue, false) => ValueType::Bool,
        }
    }

    /// Returns `true` unless this is the `Invalid` sentinel.
    pub fn is_valid(&self) -> bool {
        self.ptr != Self::INVALID.ptr
    }

    /// Returns `true` for both `null` and the `Invalid` sentinel.
    pub fn is_null(&self) -> bool {
        self.ptr == Self::NULL.ptr || self.ptr == Self::INVALID.ptr
    }

    /// Returns `true` if this value is a boolean.
    pub fn is_bool(&self) -> bool {
        self.ptr == Self::TRUE.ptr || self.ptr == Self::FALSE.ptr
    }

    /// Returns `true` if this value is a number.
    pub fn is_number(&self) -> bool {
        self.type_tag() == TypeTag::NumberOrInvalid && self.is_ptr()
    }

    /// Returns `true` if this value is a string.
    pub fn is_string(&self) -> bool {
        self.type_tag() == TypeTag::StringOrNull && self.is_ptr()
    }

    /// Returns `true` if this value is an array.
    pub fn is_array(&self) -> bool {
        self.type_tag() == TypeTag::ArrayOrFalse && self.is_ptr()
    }

    /// Returns `true` if this value is an object.
    pub fn is_object(&self) -> bool {
        self.type_tag() == TypeTag::ObjectOrTrue && self.is_ptr()
    }

    /// Returns `true` if this value is `true`.
    pub fn is_true(&self) -> bool {
        self.ptr == Self::TRUE.ptr
    }

    /// Returns `true` if this value is `false`.
    pub fn is_false(&self) -> bool {
        self.ptr == Self::FALSE.ptr
    }

    /// Converts this value to a `bool` if it is a boolean.
    pub fn to_bool(&self) -> Option<bool> {
        if self.is_bool() {
            Some(self.is_true())
        } else {
            None
        }
    }

    // Safety: Must be an array
    pub(crate) unsafe fn as_array_unchecked(&self) -> &JArray {
        mem::transmute(self)
    }

    // Safety: Must be an array
    unsafe fn as_array_unchecked_mut(&mut self) -> &mut JArray {
        mem::transmute(self)
    }

    /// Borrows this value as an array if it is one.
    pub fn as_array(&self) -> Option<&JArray> {
        if self.is_array() {
            // Safety: JArray is a `#[repr(transparent)]` wrapper around JValue
            Some(unsafe { self.as_array_unchecked() })
        } else {
            None
        }
    }

    /// Mutably borrows this value as an array if it is one.
    pub fn as_array_mut(&mut self) -> Option<&mut JArray> {
        if self.is_array() {
            // Safety: JArray is a `#[repr(transparent)]` wrapper around JValue
            Some(unsafe { self.as_array_unchecked_mut() })
        } else {
            None
        }
    }

    // Safety: Must be a string
    pub(crate) unsafe fn as_string_unchecked(&self) -> &JString {
        mem::transmute(self)
    }

    // Safety: Must be a string
    unsafe fn as_string_unchecked_mut(&mut self) -> &mut JString {
        mem::transmute(self)
    }

    /// Borrows this value as a string if it is one.
    pub fn as_string(&self) -> Option<&JString> {
        if self.is_string() {
            // Safety: JString is a `#[repr(transparent)]` wrapper around JValue
            Some(unsafe { self.as_string_unchecked() })
        } else {
            None
        }
    }

    // Safety: Must be a number
    pub(crate) unsafe fn as_number_unchecked(&self) -> &JNumber {
        mem::transmute(self)
    }

    // Safety: Must be a number
    unsafe fn as_number_unchecked_mut(&mut self) -> &mut JNumber {
        mem::transmute(self)
    }

    /// Borrows this value as a number if it is one.
    pub fn as_number(&self) -> Option<&JNumber> {
        if self.is_number() {
            // Safety: JNumber is a `#[repr(transparent)]` wrapper around JValue
            Some(unsafe { self.as_number_unchecked() })
        } else {
            None
        }
    }

    // Safety: Must be an object
    pub(crate) unsafe fn as_object_unchecked(&self) -> &JObject {
        mem::transmute(self)
    }

    // Safety: Must be an object
    unsafe fn as_object_unchecked_mut(&mut self) -> &mut JObject {
        mem::transmute(self)
    }

    /// Borrows this value as an object if it is one.
    pub fn as_object(&self) -> Option<&JObject> {
        if self.is_object() {
            // Safety: JObject is a `#[repr(transparent)]` wrapper around JValue
            Some(unsafe { self.as_object_unchecked() })
        } else {
            None
        }
    }

    /// Mutably borrows this value as an object if it is one.
    pub fn as_object_mut(&mut self) -> Option<&mut JObject> {
        if self.is_object() {
            // Safety: JObject is a `#[repr(transparent)]` wrapper around JValue
            Some(unsafe { self.as_object_unchecked_mut() })
        } else {
            None
        }
    }

    /// Converts this value into a number, or returns it unchanged.
    pub fn into_number(self) -> Result<JNumber, JValue> {
        if self.is_number() {
            Ok(JNumber(self))
        } else {
            Err(self)
        }
    }

    /// Converts this value into a string, or returns it unchanged.
    pub fn into_string(self) -> Result<JString, JValue> {
        if self.is_string() {
            Ok(JString(self))
        } else {
            Err(self)
        }
    }

    /// Converts this value into an array, or returns it unchanged.
    pub fn into_array(self) -> Result<JArray, JValue> {
        if self.is_array() {
            Ok(JArray(self))
        } else {
            Err(self)
        }
    }

    /// Converts this value into an object, or returns it unchanged.
    pub fn into_object(self) -> Result<JObject, JValue> {
        if self.is_object() {
            Ok(JObject(self))
        } else {
            Err(self)
        }
    }

    /// Destructures a borrow of this value by kind.
    pub fn destructure_ref(&self) -> DestructuredRef<'_> {
        // Safety: we dispatch on the checked type
        unsafe {
            match self.type_() {
                ValueType::Invalid => DestructuredRef::Invalid,
                ValueType::Null => DestructuredRef::Null,
                ValueType::Bool => DestructuredRef::Bool(self.is_true()),
                ValueType::Number => DestructuredRef::Number(self.as_number_unchecked()),
                ValueType::String => DestructuredRef::String(self.as_string_unchecked()),
                ValueType::Array => DestructuredRef::Array(self.as_array_unchecked()),
                ValueType::Object => DestructuredRef::Object(self.as_object_unchecked()),
            }
        }
    }

    /// Looks up an index or key, returning the `Invalid` singleton on a
    /// miss or a kind mismatch.
    pub fn get(&self, index: impl ValueIndex) -> &JValue {
        index.index_into(self)
    }

    /// Returns an independent deep copy of this value.
    ///
    /// Containers are rebuilt with fresh headers all the way down; mutating
    /// the copy can never be observed through `self`. Scalars are immutable
    /// and share their storage.
    #[must_use]
    pub fn duplicate(&self) -> JValue {
        match self.destructure_ref() {
            DestructuredRef::Array(a) => {
                let mut res = JArray::with_capacity(a.len());
                for v in a.iter() {
                    res.push_internal(v.duplicate());
                }
                res.into()
            }
            DestructuredRef::Object(o) => {
                let mut res = JObject::with_capacity(o.len());
                for (k, v) in o.iter() {
                    res.insert_internal(k.clone(), v.duplicate());
                }
                res.into()
            }
            _ => self.clone(),
        }
    }

    /// Walks this value's subtree looking for `target` by pointer identity.
    /// This is the acyclicity guard run before container insertion.
    pub(crate) fn contains_ref(&self, target: &JValue) -> bool {
        if self.raw_eq(target) {
            return true;
        }
        match self.destructure_ref() {
            DestructuredRef::Array(a) => a.iter().any(|v| v.contains_ref(target)),
            DestructuredRef::Object(o) => o.values().any(|v| v.contains_ref(target)),
            _ => false,
        }
    }
}

/// A borrow of a [`JValue`] destructured by kind.
#[derive(Debug)]
pub enum DestructuredRef<'a> {
    /// The `Invalid` sentinel.
    Invalid,
    /// JSON `null`.
    Null,
    /// A boolean.
    Bool(bool),
    /// A number.
    Number(&'a JNumber),
    /// A string.
    String(&'a JString),
    /// An array.
    Array(&'a JArray),
    /// An object.
    Object(&'a JObject),
}

impl Clone for JValue {
    fn clone(&self) -> Self {
        match self.type_() {
            // Sentinels can be trivially copied
            ValueType::Invalid | ValueType::Null | ValueType::Bool => Self { ptr: self.ptr },
            // Safety: We checked the type
            ValueType::Array => unsafe { self.as_array_unchecked() }.clone_impl(),
            ValueType::Object => unsafe { self.as_object_unchecked() }.clone_impl(),
            ValueType::String => unsafe { self.as_string_unchecked() }.clone_impl(),
            ValueType::Number => unsafe { self.as_number_unchecked() }.clone_impl(),
        }
    }
}

impl Drop for JValue {
    fn drop(&mut self) {
        match self.type_() {
            // Sentinels can be trivially dropped
            ValueType::Invalid | ValueType::Null | ValueType::Bool => {}
            // Safety: We checked the type
            ValueType::Array => unsafe { self.as_array_unchecked_mut() }.drop_impl(),
            ValueType::Object => unsafe { self.as_object_unchecked_mut() }.drop_impl(),
            ValueType::String => unsafe { self.as_string_unchecked_mut() }.drop_impl(),
            ValueType::Number => unsafe { self.as_number_unchecked_mut() }.drop_impl(),
        }
    }
}

impl Hash for JValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self.destructure_ref() {
            DestructuredRef::Invalid | DestructuredRef::Null | DestructuredRef::Bool(_) => {
                self.ptr.hash(state)
            }
            DestructuredRef::Number(n) => n.hash(state),
            DestructuredRef::String(s) => s.hash(state),
            DestructuredRef::Array(a) => a.hash(state),
            DestructuredRef::Object(o) => {
                // Entry order must not affect the hash
                let mut acc: u64 = 0;
                for (k, v) in o.iter() {
                    let mut entry = DefaultHasher::new();
                    k.hash(&mut entry);
                    v.hash(&mut entry);
                    acc = acc.wrapping_add(entry.finish());
                }
                state.write_usize(o.len());
                state.write_u64(acc);
            }
        }
    }
}

impl PartialEq for JValue {
    fn eq(&self, other: &Self) -> bool {
        if self.raw_eq(other) {
            return true;
        }
        let (t1, t2) = (self.type_(), other.type_());
        if t1 != t2 {
            return false;
        }
        // Safety: Only methods for the appropriate type are called
        unsafe {
            match t1 {
                // Sentinels compare by pointer, which already failed
                ValueType::Invalid | ValueType::Null | ValueType::Bool => false,
                ValueType::Number => self.as_number_unchecked() == other.as_number_unchecked(),
                ValueType::String => self.as_string_unchecked() == other.as_string_unchecked(),
                ValueType::Array => self.as_array_unchecked() == other.as_array_unchecked(),
                ValueType::Object => self.as_object_unchecked() == other.as_object_unchecked(),
            }
        }
    }
}

impl Eq for JValue {}

impl Ord for JValue {
    fn cmp(&self, other: &Self) -> Ordering {
        let (t1, t2) = (self.type_(), other.type_());
        if t1 != t2 {
            return t1.cmp(&t2);
        }
        // Safety: Only methods for the appropriate type are called
        unsafe {
            match t1 {
                ValueType::Invalid | ValueType::Null => Ordering::Equal,
                ValueType::Bool => self.is_true().cmp(&other.is_true()),
                ValueType::Number => self.as_number_unchecked().cmp(other.as_number_unchecked()),
                ValueType::String => self.as_string_unchecked().cmp(other.as_string_unchecked()),
                ValueType::Array => self.as_array_unchecked().cmp(other.as_array_unchecked()),
                ValueType::Object => self.as_object_unchecked().cmp(other.as_object_unchecked()),
            }
        }
    }
}

impl PartialOrd for JValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Default for JValue {
    fn default() -> Self {
        Self::NULL
    }
}

impl Debug for JValue {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self.destructure_ref() {
            DestructuredRef::Invalid => f.write_str("<invalid>"),
            DestructuredRef::Null => f.write_str("null"),
            DestructuredRef::Bool(b) => Debug::fmt(&b, f),
            DestructuredRef::Number(n) => Debug::fmt(n, f),
            DestructuredRef::String(s) => Debug::fmt(s, f),
            DestructuredRef::Array(a) => Debug::fmt(a, f),
            DestructuredRef::Object(o) => Debug::fmt(o, f),
        }
    }
}

impl From<bool> for JValue {
    fn from(other: bool) -> Self {
        if other {
            Self::TRUE
        } else {
            Self::FALSE
        }
    }
}

impl From<()> for JValue {
    fn from(_: ()) -> Self {
        Self::NULL
    }
}

typed_conversions! {
    JNumber: u8, u16, u32, u64, i8, i16, i32, i64;
    JString: &str, &mut str, String, &String, &mut String;
    JArray: Vec<T> where (T: Into<JValue>), &[T] where (T: Into<JValue> + Clone);
}

/// A type that can index into a [`JValue`]: `usize` for arrays, `&str` for
/// objects. Misses and kind mismatches yield the `Invalid` singleton.
pub trait ValueIndex: private::Sealed {
    #[doc(hidden)]
    fn index_into<'a>(&self, v: &'a JValue) -> &'a JValue;
}

impl ValueIndex for usize {
    fn index_into<'a>(&self, v: &'a JValue) -> &'a JValue {
        match v.as_array() {
            Some(a) => a.get(*self),
            None => JValue::invalid_ref(),
        }
    }
}

impl ValueIndex for &str {
    fn index_into<'a>(&self, v: &'a JValue) -> &'a JValue {
        match v.as_object() {
            Some(o) => o.get(*self).unwrap_or_else(|| JValue::invalid_ref()),
            None => JValue::invalid_ref(),
        }
    }
}

mod private {
    pub trait Sealed {}
    impl Sealed for usize {}
    impl Sealed for &str {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::convert::TryFrom;

    #[mockalloc::test]
    fn sentinels_are_distinct() {
        assert_ne!(JValue::NULL, JValue::INVALID);
        assert!(JValue::NULL.is_null());
        assert!(JValue::INVALID.is_null());
        assert!(JValue::NULL.is_valid());
        assert!(!JValue::INVALID.is_valid());
        assert_eq!(JValue::INVALID.type_(), ValueType::Invalid);
    }

    #[mockalloc::test]
    fn kind_rank_orders_mixed_kinds() {
        let mut values = vec![
            JValue::from(JArray::new()),
            JValue::from("a"),
            JValue::from(1),
            JValue::TRUE,
            JValue::NULL,
        ];
        values.sort();
        assert_eq!(values[0], JValue::NULL);
        assert!(values[1].is_bool());
        assert!(values[2].is_number());
        assert!(values[3].is_string());
        assert!(values[4].is_array());
    }

    #[mockalloc::test]
    fn equal_values_hash_alike() {
        fn hash_of(v: &JValue) -> u64 {
            let mut h = DefaultHasher::new();
            v.hash(&mut h);
            h.finish()
        }
        let a = JValue::from(vec![1, 2, 3]);
        let b = JValue::from(vec![1, 2, 3]);
        assert_eq!(a, b);
        assert_eq!(hash_of(&a), hash_of(&b));

        let n = JValue::from(2);
        let m = JValue::from(JNumber::try_from(2.0).unwrap());
        assert_eq!(n, m);
        assert_eq!(hash_of(&n), hash_of(&m));
    }

    #[mockalloc::test]
    fn compare_is_antisymmetric() {
        let samples = vec![
            JValue::NULL,
            JValue::TRUE,
            JValue::from(-3),
            JValue::from("x"),
            JValue::from(vec![1, 2]),
            JValue::from(vec![1, 2, 3]),
        ];
        for a in &samples {
            for b in &samples {
                assert_eq!(a.cmp(b), b.cmp(a).reverse());
                assert_eq!(a.cmp(b) == Ordering::Equal, a == b);
            }
        }
    }

    #[mockalloc::test]
    fn duplicate_is_independent() {
        let mut original = JArray::new();
        original.push(1).unwrap();
        original.push("two").unwrap();
        let original = JValue::from(original);

        let mut copy = original.duplicate();
        assert_eq!(original, copy);
        copy.as_array_mut().unwrap().push(JValue::NULL).unwrap();
        assert_ne!(original, copy);
        assert_eq!(original.as_array().unwrap().len(), 2);
    }

    #[mockalloc::test]
    fn shared_mutation_detaches() {
        let mut a = JValue::from(vec![1, 2]);
        let b = a.clone();
        a.as_array_mut().unwrap().push(3).unwrap();
        assert_eq!(a.as_array().unwrap().len(), 3);
        assert_eq!(b.as_array().unwrap().len(), 2);
    }

    #[mockalloc::test]
    fn get_misses_are_invalid() {
        let v = JValue::from(vec![1]);
        assert!(v.get(0_usize).is_valid());
        assert!(!v.get(7_usize).is_valid());
        assert!(!v.get("key").is_valid());
    }
}
