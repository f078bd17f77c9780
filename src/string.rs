//! Functionality relating to the JSON string type

use std::alloc::{alloc, dealloc, Layout, LayoutError};
use std::borrow::Borrow;
use std::cmp::Ordering;
use std::fmt::{self, Debug, Formatter};
use std::hash::{Hash, Hasher};
use std::mem::ManuallyDrop;
use std::ops::{Deref, Range};
use std::ptr::{copy_nonoverlapping, NonNull};
use std::sync::atomic::{fence, AtomicUsize, Ordering as AtomicOrdering};

use dashmap::{DashSet, SharedValue};
use lazy_static::lazy_static;

use super::buffer::Buffer;
use super::error::Error;
use super::value::{JValue, TypeTag};

// Shard index marking a no-copy header; the intern cache never has this
// many shards.
const NO_COPY_SHARD: u16 = u16::MAX;

#[repr(C)]
#[repr(align(4))]
struct Header {
    rc: AtomicUsize,
    // We use 48 bits for the length and 16 bits for the shard index.
    len_lower: u32,
    len_upper: u16,
    shard_index: u16,
}

// A string borrowing its bytes from a shared buffer, which it keeps alive.
#[repr(C)]
struct NoCopyHeader {
    hd: Header,
    ptr: *const u8,
    buffer: ManuallyDrop<Buffer>,
}

impl Header {
    fn len(&self) -> usize {
        (u64::from(self.len_lower) | (u64::from(self.len_upper) << 32)) as usize
    }
    fn set_len(&mut self, len: usize) {
        assert!((len as u64) < (1 << 48));
        self.len_lower = len as u32;
        self.len_upper = ((len as u64) >> 32) as u16;
    }
    fn is_no_copy(&self) -> bool {
        self.shard_index == NO_COPY_SHARD
    }
    fn shard_index(&self) -> usize {
        self.shard_index as usize
    }
    fn as_ptr(&self) -> *const u8 {
        if self.is_no_copy() {
            // Safety: no-copy headers are always allocated as NoCopyHeader
            unsafe { (*(self as *const Header as *const NoCopyHeader)).ptr }
        } else {
            // Safety: pointers to the end of structs are allowed
            unsafe { (self as *const Header).add(1) as *const u8 }
        }
    }
    fn as_bytes(&self) -> &[u8] {
        // Safety: Header `len` must be accurate
        unsafe { std::slice::from_raw_parts(self.as_ptr(), self.len()) }
    }
    fn as_str(&self) -> &str {
        // Safety: UTF-8 enforced on construction
        unsafe { std::str::from_utf8_unchecked(self.as_bytes()) }
    }
}

/// The hash used for object keys: djb2 over the string bytes.
pub(crate) fn djb2(bytes: &[u8]) -> usize {
    let mut h: usize = 5381;
    for &b in bytes {
        h = (h << 5).wrapping_add(h).wrapping_add(b as usize);
    }
    h
}

lazy_static! {
    static ref STRING_CACHE: DashSet<WeakJString> = DashSet::new();
}

// Eagerly initialize the string cache during tests or when the
// `ctor` feature is enabled.
#[cfg(any(test, feature = "ctor"))]
#[ctor::ctor]
fn ctor_init_cache() {
    lazy_static::initialize(&STRING_CACHE);
}

#[doc(hidden)]
pub fn init_cache() {
    lazy_static::initialize(&STRING_CACHE);
}

struct WeakJString {
    ptr: NonNull<Header>,
}

unsafe impl Send for WeakJString {}
unsafe impl Sync for WeakJString {}
impl PartialEq for WeakJString {
    fn eq(&self, other: &Self) -> bool {
        **self == **other
    }
}
impl Eq for WeakJString {}
impl Hash for WeakJString {
    fn hash<H: Hasher>(&self, state: &mut H) {
        (**self).hash(state);
    }
}

impl Deref for WeakJString {
    type Target = str;
    fn deref(&self) -> &str {
        self.borrow()
    }
}

impl Borrow<str> for WeakJString {
    fn borrow(&self) -> &str {
        unsafe { self.ptr.as_ref().as_str() }
    }
}
impl WeakJString {
    fn upgrade(&self) -> JString {
        unsafe {
            self.ptr.as_ref().rc.fetch_add(1, AtomicOrdering::Relaxed);
            JString(JValue::new_ptr(
                self.ptr.as_ptr().cast::<u8>(),
                TypeTag::StringOrNull,
            ))
        }
    }
}

/// The `JString` type is an immutable UTF-8 string with two storage
/// strategies behind one representation.
///
/// Owned strings are interned in a global cache: the bytes live in a single
/// allocation right after the header, cloning is a reference count bump,
/// and the memory is reclaimed when the last handle drops. No-copy strings
/// instead borrow their bytes from a shared [`Buffer`] which they keep
/// alive; the DOM builder produces them when told the input buffer outlives
/// the tree.
///
/// Equality takes a pointer fast path (interned strings with equal bytes
/// share a header) and otherwise compares bytes, so a no-copy `"abc"`
/// equals an interned `"abc"`.
#[repr(transparent)]
#[derive(Clone)]
pub struct JString(pub(crate) JValue);

value_subtype_impls!(JString, into_string, as_string);

static EMPTY_HEADER: Header = Header {
    len_lower: 0,
    len_upper: 0,
    shard_index: 0,
    rc: AtomicUsize::new(0),
};

impl JString {
    fn layout(len: usize) -> Result<Layout, LayoutError> {
        Ok(Layout::new::<Header>()
            .extend(Layout::array::<u8>(len)?)?
            .0
            .pad_to_align())
    }

    fn alloc(s: &str, shard_index: usize) -> *mut Header {
        assert!((s.len() as u64) < (1 << 48));
        assert!(shard_index < NO_COPY_SHARD as usize);
        unsafe {
            let ptr = alloc(Self::layout(s.len()).unwrap()).cast::<Header>();
            (*ptr).set_len(s.len());
            (*ptr).shard_index = shard_index as u16;
            (*ptr).rc = AtomicUsize::new(0);
            copy_nonoverlapping(s.as_ptr(), (*ptr).as_ptr() as *mut u8, s.len());
            ptr
        }
    }

    fn dealloc(ptr: *mut Header) {
        unsafe {
            let layout = Self::layout((*ptr).len()).unwrap();
            dealloc(ptr.cast::<u8>(), layout);
        }
    }

    /// Converts a `&str` to a `JString` by interning it in the global
    /// string cache.
    #[must_use]
    pub fn intern(s: &str) -> Self {
        if s.is_empty() {
            return Self::new();
        }
        let cache = &*STRING_CACHE;
        let shard_index = cache.determine_map(s);

        // Safety: `determine_map` should only return valid shard indices
        let shard = unsafe { cache.shards().get_unchecked(shard_index) };
        let mut guard = shard.write();
        if let Some((k, _)) = guard.get_key_value(s) {
            k.upgrade()
        } else {
            let k = unsafe {
                WeakJString {
                    ptr: NonNull::new_unchecked(Self::alloc(s, shard_index)),
                }
            };
            let res = k.upgrade();
            guard.insert(k, SharedValue::new(()));
            res
        }
    }

    /// Constructs a no-copy string borrowing `range` of `buffer`.
    ///
    /// The buffer is retained for the string's lifetime. Fails unless the
    /// range is in bounds and holds valid UTF-8.
    pub fn from_buffer(buffer: &Buffer, range: Range<usize>) -> Result<Self, Error> {
        let bytes = buffer
            .as_bytes()
            .get(range.clone())
            .ok_or_else(|| Error::Generic("string range out of buffer bounds".into()))?;
        std::str::from_utf8(bytes)
            .map_err(|e| Error::Generic(format!("string is not valid UTF-8: {e}")))?;
        if bytes.is_empty() {
            return Ok(Self::new());
        }
        unsafe {
            let ptr = alloc(Layout::new::<NoCopyHeader>()).cast::<NoCopyHeader>();
            std::ptr::write(
                ptr,
                NoCopyHeader {
                    hd: Header {
                        rc: AtomicUsize::new(1),
                        len_lower: 0,
                        len_upper: 0,
                        shard_index: NO_COPY_SHARD,
                    },
                    ptr: buffer.as_bytes().as_ptr().add(range.start),
                    buffer: ManuallyDrop::new(buffer.clone()),
                },
            );
            (*ptr).hd.set_len(range.end - range.start);
            Ok(JString(JValue::new_ptr(
                ptr.cast::<u8>(),
                TypeTag::StringOrNull,
            )))
        }
    }

    fn header(&self) -> &Header {
        unsafe { &*(self.0.ptr() as *const Header) }
    }

    /// Returns the length (in bytes) of this string.
    #[must_use]
    pub fn len(&self) -> usize {
        self.header().len()
    }

    /// Returns `true` if this is the empty string "".
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Obtains a `&str` from this `JString`. This is a cheap operation.
    #[must_use]
    pub fn as_str(&self) -> &str {
        self.header().as_str()
    }

    /// Obtains a byte slice from this `JString`. This is a cheap operation.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        self.header().as_bytes()
    }

    /// Returns the empty string.
    #[must_use]
    pub fn new() -> Self {
        unsafe { JString(JValue::new_ref(&EMPTY_HEADER, TypeTag::StringOrNull)) }
    }

    pub(crate) fn clone_impl(&self) -> JValue {
        if self.is_empty() {
            Self::new().0
        } else {
            self.header().rc.fetch_add(1, AtomicOrdering::Relaxed);
            unsafe { self.0.raw_copy() }
        }
    }

    pub(crate) fn drop_impl(&mut self) {
        if self.is_empty() {
            return;
        }
        let hd = self.header();
        if hd.is_no_copy() {
            if hd.rc.fetch_sub(1, AtomicOrdering::Release) == 1 {
                fence(AtomicOrdering::Acquire);
                unsafe {
                    let ptr = self.0.ptr() as *mut NoCopyHeader;
                    ManuallyDrop::drop(&mut (*ptr).buffer);
                    dealloc(ptr.cast::<u8>(), Layout::new::<NoCopyHeader>());
                    self.0.set_ref(&EMPTY_HEADER);
                }
            }
            return;
        }

        // If the reference count is greater than 1, we can safely decrement it without
        // locking the string cache.
        let mut rc = hd.rc.load(AtomicOrdering::Relaxed);
        while rc > 1 {
            match hd.rc.compare_exchange_weak(
                rc,
                rc - 1,
                AtomicOrdering::Relaxed,
                AtomicOrdering::Relaxed,
            ) {
                Ok(_) => return,
                Err(new_rc) => rc = new_rc,
            }
        }

        // Slow path: we observed a reference count of 1, so we need to lock the string cache
        let cache = &*STRING_CACHE;
        // Safety: the number of shards is fixed
        let shard = unsafe { cache.shards().get_unchecked(hd.shard_index()) };
        let mut guard = shard.write();
        if hd.rc.fetch_sub(1, AtomicOrdering::Relaxed) == 1 {
            // Reference count reached zero, free the string
            assert!(guard.remove(hd.as_str()).is_some());

            // Shrink the shard if it's mostly empty.
            // The second condition is necessary because `HashMap` sometimes
            // reports a capacity of zero even when it's still backed by an
            // allocation.
            if guard.len() * 3 < guard.capacity() || guard.is_empty() {
                guard.shrink_to_fit();
            }
            drop(guard);

            Self::dealloc(hd as *const _ as *mut _);
        }
    }
}

impl Deref for JString {
    type Target = str;
    fn deref(&self) -> &str {
        self.as_str()
    }
}

impl Borrow<str> for JString {
    fn borrow(&self) -> &str {
        self.as_str()
    }
}

impl From<&str> for JString {
    fn from(other: &str) -> Self {
        Self::intern(other)
    }
}

impl From<&mut str> for JString {
    fn from(other: &mut str) -> Self {
        Self::intern(other)
    }
}

impl From<String> for JString {
    fn from(other: String) -> Self {
        Self::intern(other.as_str())
    }
}

impl From<&String> for JString {
    fn from(other: &String) -> Self {
        Self::intern(other.as_str())
    }
}

impl From<&mut String> for JString {
    fn from(other: &mut String) -> Self {
        Self::intern(other.as_str())
    }
}

impl From<JString> for String {
    fn from(other: JString) -> Self {
        other.as_str().into()
    }
}

impl PartialEq for JString {
    fn eq(&self, other: &Self) -> bool {
        // Interned strings with equal bytes share a header; no-copy
        // strings need the byte comparison.
        self.0.raw_eq(&other.0) || self.as_bytes() == other.as_bytes()
    }
}

impl PartialEq<str> for JString {
    fn eq(&self, other: &str) -> bool {
        self.as_str() == other
    }
}

impl PartialEq<JString> for str {
    fn eq(&self, other: &JString) -> bool {
        self == other.as_str()
    }
}

impl PartialEq<String> for JString {
    fn eq(&self, other: &String) -> bool {
        self.as_str() == other
    }
}

impl PartialEq<JString> for String {
    fn eq(&self, other: &JString) -> bool {
        self == other.as_str()
    }
}

impl Default for JString {
    fn default() -> Self {
        Self::new()
    }
}

impl Eq for JString {}
impl Ord for JString {
    fn cmp(&self, other: &Self) -> Ordering {
        if self.0.raw_eq(&other.0) {
            Ordering::Equal
        } else {
            self.as_str().cmp(other.as_str())
        }
    }
}
impl PartialOrd for JString {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Hash for JString {
    fn hash<H: Hasher>(&self, state: &mut H) {
        // By bytes, not by pointer: equality spans storage strategies
        self.as_str().hash(state);
    }
}

impl Debug for JString {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Debug::fmt(self.as_str(), f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[mockalloc::test]
    fn can_intern() {
        let x = JString::intern("foo");
        let y = JString::intern("bar");
        let z = JString::intern("foo");

        assert_eq!(x.as_str().as_ptr(), z.as_str().as_ptr());
        assert_ne!(x.as_str().as_ptr(), y.as_str().as_ptr());
        assert_eq!(x.as_str(), "foo");
        assert_eq!(y.as_str(), "bar");
    }

    #[mockalloc::test]
    fn default_interns_string() {
        let x = JString::intern("");
        let y = JString::new();
        let z = JString::intern("foo");

        assert_eq!(x.as_str().as_ptr(), y.as_str().as_ptr());
        assert_ne!(x.as_str().as_ptr(), z.as_str().as_ptr());
    }

    #[mockalloc::test]
    fn no_copy_equals_interned() {
        let buffer = Buffer::from("hello world");
        let no_copy = JString::from_buffer(&buffer, 0..5).unwrap();
        let interned = JString::intern("hello");

        assert_ne!(no_copy.as_str().as_ptr(), interned.as_str().as_ptr());
        assert_eq!(no_copy, interned);
        assert_eq!(no_copy.as_str(), "hello");

        // The string keeps the buffer alive on its own
        drop(buffer);
        assert_eq!(no_copy.as_str(), "hello");
    }

    #[mockalloc::test]
    fn no_copy_rejects_bad_input() {
        let buffer = Buffer::from(&[0xffu8, 0xfe][..]);
        assert!(JString::from_buffer(&buffer, 0..2).is_err());
        assert!(JString::from_buffer(&buffer, 0..9).is_err());
    }

    #[mockalloc::test]
    fn multibyte_utf8_round_trips() {
        let s = JString::intern("påskeæg 🦀");
        assert_eq!(s.as_str(), "påskeæg 🦀");
        assert_eq!(s.len(), "påskeæg 🦀".len());
    }
}
