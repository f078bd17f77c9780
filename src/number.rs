//! Functionality relating to the JSON number type

use std::alloc::{alloc, dealloc, Layout, LayoutError};
use std::cmp::Ordering;
use std::convert::{TryFrom, TryInto};
use std::fmt::{self, Debug, Formatter};
use std::hash::Hash;
use std::sync::atomic::{fence, AtomicU8, AtomicU64, AtomicUsize, Ordering as AtomicOrdering};

use bitflags::bitflags;

use super::error::Error;
use super::value::{JValue, TypeTag};

bitflags! {
    /// Outcome mask of a numeric conversion.
    ///
    /// An empty mask ([`ConvResult::OK`]) is a lossless conversion. Lossy
    /// conversions set bits without failing; the caller decides whether a
    /// given loss matters. For raw numbers the resolution outcome is sticky:
    /// once a lexeme has been converted, later reads reuse the cached result
    /// and its flags.
    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    pub struct ConvResult: u8 {
        /// The result was clamped to the target type's range.
        const OVERFLOW = 1;
        /// The target type cannot represent the value exactly.
        const PRECISION = 2;
        /// A fractional part was dropped.
        const TRUNCATED = 4;
        /// The number is not stored in raw lexical form.
        const NOT_A_RAW_NUM = 8;
        /// The arguments were unusable.
        const BAD_ARGS = 16;
        /// Unclassified conversion failure.
        const GENERIC = 32;
    }
}

impl ConvResult {
    /// The lossless outcome: no flag set.
    pub const OK: ConvResult = ConvResult::empty();

    /// Returns `true` if the conversion was lossless.
    #[must_use]
    pub fn is_ok(self) -> bool {
        self.is_empty()
    }
}

#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum NumberForm {
    Static,
    I64,
    F64,
    Raw,
}

// Raw resolution state, stored in `Header::flags`.
const RAW_INT: u8 = 1; // cache holds i64 bits, conversion was exact
const RAW_FLOAT: u8 = 2; // cache holds f64 bits
const RAW_CLAMPED: u8 = 4; // the f64 conversion clamped an overflow

#[repr(C)]
#[repr(align(4))]
struct Header {
    rc: AtomicUsize,
    form: NumberForm,
    small: i8,
    flags: AtomicU8,
}

#[repr(C)]
struct I64Header {
    hd: Header,
    value: i64,
}

#[repr(C)]
struct F64Header {
    hd: Header,
    value: f64,
}

#[repr(C)]
struct RawHeader {
    hd: Header,
    cache: AtomicU64,
    len: usize,
}

impl RawHeader {
    fn bytes_ptr(&self) -> *const u8 {
        // Safety: pointers to the end of structs are allowed
        unsafe { (self as *const RawHeader).add(1) as *const u8 }
    }
    fn as_str(&self) -> &str {
        // Safety: `len` is accurate and the lexeme is ASCII by construction
        unsafe {
            std::str::from_utf8_unchecked(std::slice::from_raw_parts(self.bytes_ptr(), self.len))
        }
    }
}

fn can_represent_as_f64(x: u64) -> bool {
    x.leading_zeros() + x.trailing_zeros() >= 11
}

fn can_represent_as_f32(x: u64) -> bool {
    x.leading_zeros() + x.trailing_zeros() >= 40
}

fn cmp_i64_to_f64(a: i64, b: f64) -> Ordering {
    if a < 0 {
        cmp_u64_to_f64(a.unsigned_abs(), -b).reverse()
    } else {
        cmp_u64_to_f64(a as u64, b)
    }
}

fn cmp_u64_to_f64(a: u64, b: f64) -> Ordering {
    if can_represent_as_f64(a) {
        // If we can represent as an f64, we can just cast and compare
        (a as f64).partial_cmp(&b).unwrap()
    } else if b <= (0x0020_0000_0000_0000_u64 as f64) {
        // If the floating point number is less than all non-representable
        // integers, and our integer is non-representable, then we know
        // the integer is greater.
        Ordering::Greater
    } else if b >= u64::MAX as f64 {
        // If the floating point number is larger than the largest u64, then
        // the integer is smaller.
        Ordering::Less
    } else {
        // The remaining floating point values can be losslessly converted to u64.
        a.cmp(&(b as u64))
    }
}

/// Checks the RFC 8259 number grammar.
pub(crate) fn is_json_number(s: &[u8]) -> bool {
    let mut i = 0;
    if s.get(i) == Some(&b'-') {
        i += 1;
    }
    match s.get(i) {
        Some(b'0') => i += 1,
        Some(b'1'..=b'9') => {
            while matches!(s.get(i), Some(b'0'..=b'9')) {
                i += 1;
            }
        }
        _ => return false,
    }
    if s.get(i) == Some(&b'.') {
        i += 1;
        if !matches!(s.get(i), Some(b'0'..=b'9')) {
            return false;
        }
        while matches!(s.get(i), Some(b'0'..=b'9')) {
            i += 1;
        }
    }
    if matches!(s.get(i), Some(b'e') | Some(b'E')) {
        i += 1;
        if matches!(s.get(i), Some(b'+') | Some(b'-')) {
            i += 1;
        }
        if !matches!(s.get(i), Some(b'0'..=b'9')) {
            return false;
        }
        while matches!(s.get(i), Some(b'0'..=b'9')) {
            i += 1;
        }
    }
    i == s.len()
}

// The mathematical value a number resolves to for comparison and hashing.
#[derive(Copy, Clone)]
enum Resolved {
    Int(i64),
    Float(f64),
}

macro_rules! define_static_numbers {
    ($($v:expr)*) => {
        [$(Header {
            rc: AtomicUsize::new(0),
            form: NumberForm::Static,
            small: ($v as u8) as i8,
            flags: AtomicU8::new(0),
        }),*]
    };
}

static STATIC_NUMBERS: [Header; 256] = define_static_numbers!(
    0x00 0x01 0x02 0x03 0x04 0x05 0x06 0x07 0x08 0x09 0x0a 0x0b 0x0c 0x0d 0x0e 0x0f
    0x10 0x11 0x12 0x13 0x14 0x15 0x16 0x17 0x18 0x19 0x1a 0x1b 0x1c 0x1d 0x1e 0x1f
    0x20 0x21 0x22 0x23 0x24 0x25 0x26 0x27 0x28 0x29 0x2a 0x2b 0x2c 0x2d 0x2e 0x2f
    0x30 0x31 0x32 0x33 0x34 0x35 0x36 0x37 0x38 0x39 0x3a 0x3b 0x3c 0x3d 0x3e 0x3f
    0x40 0x41 0x42 0x43 0x44 0x45 0x46 0x47 0x48 0x49 0x4a 0x4b 0x4c 0x4d 0x4e 0x4f
    0x50 0x51 0x52 0x53 0x54 0x55 0x56 0x57 0x58 0x59 0x5a 0x5b 0x5c 0x5d 0x5e 0x5f
    0x60 0x61 0x62 0x63 0x64 0x65 0x66 0x67 0x68 0x69 0x6a 0x6b 0x6c 0x6d 0x6e 0x6f
    0x70 0x71 0x72 0x73 0x74 0x75 0x76 0x77 0x78 0x79 0x7a 0x7b 0x7c 0x7d 0x7e 0x7f
    0x80 0x81 0x82 0x83 0x84 0x85 0x86 0x87 0x88 0x89 0x8a 0x8b 0x8c 0x8d 0x8e 0x8f
    0x90 0x91 0x92 0x93 0x94 0x95 0x96 0x97 0x98 0x99 0x9a 0x9b 0x9c 0x9d 0x9e 0x9f
    0xa0 0xa1 0xa2 0xa3 0xa4 0xa5 0xa6 0xa7 0xa8 0xa9 0xaa 0xab 0xac 0xad 0xae 0xaf
    0xb0 0xb1 0xb2 0xb3 0xb4 0xb5 0xb6 0xb7 0xb8 0xb9 0xba 0xbb 0xbc 0xbd 0xbe 0xbf
    0xc0 0xc1 0xc2 0xc3 0xc4 0xc5 0xc6 0xc7 0xc8 0xc9 0xca 0xcb 0xcc 0xcd 0xce 0xcf
    0xd0 0xd1 0xd2 0xd3 0xd4 0xd5 0xd6 0xd7 0xd8 0xd9 0xda 0xdb 0xdc 0xdd 0xde 0xdf
    0xe0 0xe1 0xe2 0xe3 0xe4 0xe5 0xe6 0xe7 0xe8 0xe9 0xea 0xeb 0xec 0xed 0xee 0xef
    0xf0 0xf1 0xf2 0xf3 0xf4 0xf5 0xf6 0xf7 0xf8 0xf9 0xfa 0xfb 0xfc 0xfd 0xfe 0xff
);

/// The `JNumber` type represents a JSON number in one of three forms: an
/// exact 64-bit integer, a finite IEEE-754 double, or the original lexical
/// string ("raw"), which converts lazily on first numeric access.
///
/// Non-finite doubles are rejected at construction. Comparison is by
/// mathematical value regardless of form, so `2`, `2.0` and a raw `"2"`
/// are all equal.
#[repr(transparent)]
#[derive(Clone)]
pub struct JNumber(pub(crate) JValue);

value_subtype_impls!(JNumber, into_number, as_number);

impl JNumber {
    fn layout(form: NumberForm, raw_len: usize) -> Result<Layout, LayoutError> {
        Ok(match form {
            NumberForm::Static => unreachable!(),
            NumberForm::I64 => Layout::new::<I64Header>(),
            NumberForm::F64 => Layout::new::<F64Header>(),
            NumberForm::Raw => {
                Layout::new::<RawHeader>()
                    .extend(Layout::array::<u8>(raw_len)?)?
                    .0
                    .pad_to_align()
            }
        })
    }

    fn alloc(form: NumberForm, raw_len: usize) -> *mut Header {
        unsafe {
            let ptr = alloc(Self::layout(form, raw_len).unwrap()) as *mut Header;
            std::ptr::write(
                ptr,
                Header {
                    rc: AtomicUsize::new(1),
                    form,
                    small: 0,
                    flags: AtomicU8::new(0),
                },
            );
            ptr
        }
    }

    fn dealloc(ptr: *mut Header) {
        unsafe {
            let raw_len = if (*ptr).form == NumberForm::Raw {
                (*(ptr as *mut RawHeader)).len
            } else {
                0
            };
            let layout = Self::layout((*ptr).form, raw_len).unwrap();
            dealloc(ptr as *mut u8, layout);
        }
    }

    /// Constructs the number zero.
    #[must_use]
    pub fn new() -> Self {
        Self::new_static(0)
    }

    fn new_static(value: i8) -> Self {
        unsafe {
            JNumber(JValue::new_ref(
                &STATIC_NUMBERS[value as u8 as usize],
                TypeTag::NumberOrInvalid,
            ))
        }
    }

    fn new_i64(value: i64) -> Self {
        if value >= i8::MIN as i64 && value <= i8::MAX as i64 {
            return Self::new_static(value as i8);
        }
        let ptr = Self::alloc(NumberForm::I64, 0);
        unsafe {
            (*(ptr as *mut I64Header)).value = value;
            JNumber(JValue::new_ptr(ptr as *mut u8, TypeTag::NumberOrInvalid))
        }
    }

    fn new_f64(value: f64) -> Self {
        debug_assert!(value.is_finite());
        let ptr = Self::alloc(NumberForm::F64, 0);
        unsafe {
            (*(ptr as *mut F64Header)).value = value;
            JNumber(JValue::new_ptr(ptr as *mut u8, TypeTag::NumberOrInvalid))
        }
    }

    fn new_raw(lexeme: &str) -> Self {
        let ptr = Self::alloc(NumberForm::Raw, lexeme.len());
        unsafe {
            let raw = ptr as *mut RawHeader;
            std::ptr::addr_of_mut!((*raw).cache).write(AtomicU64::new(0));
            std::ptr::addr_of_mut!((*raw).len).write(lexeme.len());
            std::ptr::copy_nonoverlapping(
                lexeme.as_ptr(),
                (*raw).bytes_ptr() as *mut u8,
                lexeme.len(),
            );
            JNumber(JValue::new_ptr(ptr as *mut u8, TypeTag::NumberOrInvalid))
        }
    }

    /// Constructs a number from its original lexical form, which is kept
    /// verbatim and converted lazily on first numeric access.
    ///
    /// The lexeme must satisfy the RFC 8259 number grammar.
    pub fn from_raw(lexeme: &str) -> Result<Self, Error> {
        if is_json_number(lexeme.as_bytes()) {
            Ok(Self::from_lexeme(lexeme))
        } else {
            Err(Error::Conversion(format!(
                "\"{lexeme}\" is not a JSON number"
            )))
        }
    }

    // The parser has already checked the grammar.
    pub(crate) fn from_lexeme(lexeme: &str) -> Self {
        // Small integer lexemes skip the raw representation entirely.
        if lexeme.len() < 19 && !lexeme.contains(&['.', 'e', 'E'][..]) {
            if let Ok(v) = lexeme.parse::<i64>() {
                return Self::new_i64(v);
            }
        }
        Self::new_raw(lexeme)
    }

    fn header(&self) -> &Header {
        unsafe { &*(self.0.ptr() as *const Header) }
    }

    fn is_static(&self) -> bool {
        self.header().form == NumberForm::Static
    }

    // Safety: form must match
    unsafe fn i64_header(&self) -> &I64Header {
        &*(self.0.ptr() as *const I64Header)
    }
    unsafe fn f64_header(&self) -> &F64Header {
        &*(self.0.ptr() as *const F64Header)
    }
    unsafe fn raw_header(&self) -> &RawHeader {
        &*(self.0.ptr() as *const RawHeader)
    }

    pub(crate) fn clone_impl(&self) -> JValue {
        if !self.is_static() {
            self.header().rc.fetch_add(1, AtomicOrdering::Relaxed);
        }
        unsafe { self.0.raw_copy() }
    }

    pub(crate) fn drop_impl(&mut self) {
        if self.is_static() {
            return;
        }
        let hd = self.header();
        if hd.rc.fetch_sub(1, AtomicOrdering::Release) == 1 {
            fence(AtomicOrdering::Acquire);
            unsafe {
                Self::dealloc(self.0.ptr() as *mut Header);
                self.0.set_ref(&STATIC_NUMBERS[0]);
            }
        }
    }

    /// Resolves a raw lexeme to a numeric value, caching the outcome in the
    /// header so every later read agrees with the first.
    fn resolve_raw(&self, raw: &RawHeader) -> (Resolved, ConvResult) {
        let flags = raw.hd.flags.load(AtomicOrdering::Acquire);
        if flags & RAW_INT != 0 {
            return (
                Resolved::Int(raw.cache.load(AtomicOrdering::Relaxed) as i64),
                ConvResult::OK,
            );
        }
        if flags & RAW_FLOAT != 0 {
            let conv = if flags & RAW_CLAMPED != 0 {
                ConvResult::OVERFLOW
            } else {
                ConvResult::OK
            };
            return (
                Resolved::Float(f64::from_bits(raw.cache.load(AtomicOrdering::Relaxed))),
                conv,
            );
        }

        let lexeme = raw.as_str();
        if let Ok(v) = lexeme.parse::<i64>() {
            raw.cache.store(v as u64, AtomicOrdering::Relaxed);
            raw.hd.flags.fetch_or(RAW_INT, AtomicOrdering::Release);
            return (Resolved::Int(v), ConvResult::OK);
        }

        // The grammar was checked at construction, so parsing can only
        // produce a number or an overflow to infinity.
        let parsed = lexeme.parse::<f64>().unwrap_or(f64::NAN);
        let (v, new_flags, conv) = if parsed.is_finite() {
            (parsed, RAW_FLOAT, ConvResult::OK)
        } else {
            let clamped = if lexeme.starts_with('-') {
                f64::MIN
            } else {
                f64::MAX
            };
            log::warn!("number lexeme \"{lexeme}\" exceeds double range; clamped");
            (clamped, RAW_FLOAT | RAW_CLAMPED, ConvResult::OVERFLOW)
        };
        raw.cache.store(v.to_bits(), AtomicOrdering::Relaxed);
        raw.hd.flags.fetch_or(new_flags, AtomicOrdering::Release);
        (Resolved::Float(v), conv)
    }

    fn resolve(&self) -> (Resolved, ConvResult) {
        let hd = self.header();
        // Safety: we dispatch on the stored form
        unsafe {
            match hd.form {
                NumberForm::Static => (Resolved::Int(hd.small as i64), ConvResult::OK),
                NumberForm::I64 => (Resolved::Int(self.i64_header().value), ConvResult::OK),
                NumberForm::F64 => (Resolved::Float(self.f64_header().value), ConvResult::OK),
                NumberForm::Raw => self.resolve_raw(self.raw_header()),
            }
        }
    }

    /// Converts to `i64` if the mathematical value is exactly representable.
    pub fn to_i64(&self) -> Option<i64> {
        match self.resolve() {
            (Resolved::Int(v), _) => Some(v),
            (Resolved::Float(v), conv) if conv.is_ok() => {
                if v.fract() == 0.0 && v >= -(2f64.powi(63)) && v < 2f64.powi(63) {
                    Some(v as i64)
                } else {
                    None
                }
            }
            _ => None,
        }
    }

    /// Converts to `i32` if the mathematical value is exactly representable.
    pub fn to_i32(&self) -> Option<i32> {
        self.to_i64().and_then(|x| x.try_into().ok())
    }

    /// Converts to `f64` if the mathematical value is exactly representable.
    pub fn to_f64(&self) -> Option<f64> {
        match self.resolve() {
            (Resolved::Float(v), conv) if conv.is_ok() => Some(v),
            (Resolved::Int(v), _) => {
                let representable = if v < 0 {
                    can_represent_as_f64(v.unsigned_abs())
                } else {
                    can_represent_as_f64(v as u64)
                };
                if representable {
                    Some(v as f64)
                } else {
                    None
                }
            }
            _ => None,
        }
    }

    /// Converts to `f32` if the mathematical value is exactly representable.
    pub fn to_f32(&self) -> Option<f32> {
        match self.resolve() {
            (Resolved::Int(v), _) => {
                let representable = if v < 0 {
                    can_represent_as_f32(v.unsigned_abs())
                } else {
                    can_represent_as_f32(v as u64)
                };
                if representable {
                    Some(v as f32)
                } else {
                    None
                }
            }
            (Resolved::Float(v), conv) if conv.is_ok() => {
                let narrowed = v as f32;
                if f64::from(narrowed) == v {
                    Some(narrowed)
                } else {
                    None
                }
            }
            _ => None,
        }
    }

    /// Converts to `f64`, accepting loss.
    pub fn to_f64_lossy(&self) -> f64 {
        match self.resolve().0 {
            Resolved::Int(v) => v as f64,
            Resolved::Float(v) => v,
        }
    }

    /// Converts to `i64`, reporting loss through the [`ConvResult`] mask:
    /// fractional parts are truncated and out-of-range values clamp.
    pub fn get_i64(&self) -> (i64, ConvResult) {
        match self.resolve() {
            (Resolved::Int(v), conv) => (v, conv),
            (Resolved::Float(v), conv) => {
                let mut flags = conv;
                let mut whole = v;
                if v.fract() != 0.0 {
                    flags |= ConvResult::TRUNCATED;
                    whole = v.trunc();
                }
                if whole >= 2f64.powi(63) {
                    (i64::MAX, flags | ConvResult::OVERFLOW)
                } else if whole < -(2f64.powi(63)) {
                    (i64::MIN, flags | ConvResult::OVERFLOW)
                } else {
                    (whole as i64, flags)
                }
            }
        }
    }

    /// Converts to `i32`, reporting loss through the [`ConvResult`] mask.
    pub fn get_i32(&self) -> (i32, ConvResult) {
        let (v, mut flags) = self.get_i64();
        match i32::try_from(v) {
            Ok(narrowed) => (narrowed, flags),
            Err(_) => {
                flags |= ConvResult::OVERFLOW;
                if v < 0 {
                    (i32::MIN, flags)
                } else {
                    (i32::MAX, flags)
                }
            }
        }
    }

    /// Converts to `f64`, reporting loss through the [`ConvResult`] mask:
    /// large integers lose precision and huge raw lexemes clamp.
    pub fn get_f64(&self) -> (f64, ConvResult) {
        match self.resolve() {
            (Resolved::Float(v), conv) => (v, conv),
            (Resolved::Int(v), conv) => {
                let representable = if v < 0 {
                    can_represent_as_f64(v.unsigned_abs())
                } else {
                    can_represent_as_f64(v as u64)
                };
                if representable {
                    (v as f64, conv)
                } else {
                    (v as f64, conv | ConvResult::PRECISION)
                }
            }
        }
    }

    /// Returns the original lexical form, or `NOT_A_RAW_NUM` when the
    /// number was not constructed from one.
    pub fn get_raw(&self) -> (Option<&str>, ConvResult) {
        if self.header().form == NumberForm::Raw {
            // Safety: form checked
            (Some(unsafe { self.raw_header() }.as_str()), ConvResult::OK)
        } else {
            (None, ConvResult::NOT_A_RAW_NUM)
        }
    }

    /// Returns the original lexical form if the number has one.
    pub fn as_raw(&self) -> Option<&str> {
        self.get_raw().0
    }

    /// Returns `true` if the mathematical value is an integer.
    ///
    /// This inspects the value, not the representation: a double `2.0` and
    /// a raw `"2e1"` are both integers.
    pub fn is_integer(&self) -> bool {
        match self.resolve().0 {
            Resolved::Int(_) => true,
            Resolved::Float(v) => v.fract() == 0.0,
        }
    }
}

impl Default for JNumber {
    fn default() -> Self {
        Self::new()
    }
}

impl Hash for JNumber {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        // Equal values must hash alike across forms, so integral floats
        // hash through their integer value where one exists.
        match self.resolve().0 {
            Resolved::Int(v) => v.hash(state),
            Resolved::Float(v) => {
                if v.fract() == 0.0 && v >= -(2f64.powi(63)) && v < 2f64.powi(63) {
                    (v as i64).hash(state);
                } else if v == 0.0 {
                    0i64.hash(state);
                } else {
                    v.to_bits().hash(state);
                }
            }
        }
    }
}

impl From<u64> for JNumber {
    fn from(v: u64) -> Self {
        match i64::try_from(v) {
            Ok(v) => Self::new_i64(v),
            // Beyond i64 the decimal lexeme is the lossless representation
            Err(_) => Self::new_raw(&v.to_string()),
        }
    }
}
impl From<u32> for JNumber {
    fn from(v: u32) -> Self {
        Self::new_i64(v.into())
    }
}
impl From<u16> for JNumber {
    fn from(v: u16) -> Self {
        Self::new_i64(v.into())
    }
}
impl From<u8> for JNumber {
    fn from(v: u8) -> Self {
        Self::new_i64(v.into())
    }
}

impl From<i64> for JNumber {
    fn from(v: i64) -> Self {
        Self::new_i64(v)
    }
}
impl From<i32> for JNumber {
    fn from(v: i32) -> Self {
        Self::new_i64(v.into())
    }
}
impl From<i16> for JNumber {
    fn from(v: i16) -> Self {
        Self::new_i64(v.into())
    }
}
impl From<i8> for JNumber {
    fn from(v: i8) -> Self {
        Self::new_static(v)
    }
}

impl TryFrom<f64> for JNumber {
    type Error = Error;
    fn try_from(v: f64) -> Result<Self, Error> {
        if v.is_finite() {
            Ok(Self::new_f64(v))
        } else {
            Err(Error::Conversion("number must be finite".into()))
        }
    }
}

impl TryFrom<f32> for JNumber {
    type Error = Error;
    fn try_from(v: f32) -> Result<Self, Error> {
        if v.is_finite() {
            Ok(Self::new_f64(v.into()))
        } else {
            Err(Error::Conversion("number must be finite".into()))
        }
    }
}

impl PartialEq for JNumber {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for JNumber {}
impl Ord for JNumber {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self.resolve().0, other.resolve().0) {
            (Resolved::Int(a), Resolved::Int(b)) => a.cmp(&b),
            // Both finite by construction
            (Resolved::Float(a), Resolved::Float(b)) => a.partial_cmp(&b).unwrap(),
            (Resolved::Int(a), Resolved::Float(b)) => cmp_i64_to_f64(a, b),
            (Resolved::Float(a), Resolved::Int(b)) => cmp_i64_to_f64(b, a).reverse(),
        }
    }
}
impl PartialOrd for JNumber {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Debug for JNumber {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if let Some(raw) = self.as_raw() {
            f.write_str(raw)
        } else {
            match self.resolve().0 {
                Resolved::Int(v) => Debug::fmt(&v, f),
                Resolved::Float(v) => Debug::fmt(&v, f),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[mockalloc::test]
    fn small_integers_are_static() {
        let a = JNumber::from(3);
        let b = JNumber::from(3i8);
        assert_eq!(a, b);
        assert_eq!(a.to_i64(), Some(3));
    }

    #[mockalloc::test]
    fn i64_boundaries_are_exact() {
        for v in [i64::MAX, i64::MIN, i64::MAX - 1, i64::MIN + 1] {
            let n = JNumber::from(v);
            assert_eq!(n.to_i64(), Some(v));
            let (got, conv) = n.get_i64();
            assert_eq!(got, v);
            assert!(conv.is_ok());
        }
    }

    #[mockalloc::test]
    fn raw_resolution_is_lazy_and_sticky() {
        let n = JNumber::from_raw("9223372036854775807").unwrap();
        assert_eq!(n.to_i64(), Some(i64::MAX));
        // A second read hits the cache and agrees
        assert_eq!(n.to_i64(), Some(i64::MAX));

        let big = JNumber::from_raw("1e999").unwrap();
        let (v, conv) = big.get_f64();
        assert_eq!(v, f64::MAX);
        assert!(conv.contains(ConvResult::OVERFLOW));
        let (v2, conv2) = big.get_f64();
        assert_eq!(v2, f64::MAX);
        assert_eq!(conv2, conv);
    }

    #[mockalloc::test]
    fn rejects_bad_lexemes_and_non_finite() {
        assert!(JNumber::from_raw("01").is_err());
        assert!(JNumber::from_raw("1.").is_err());
        assert!(JNumber::from_raw("+1").is_err());
        assert!(JNumber::from_raw("1e").is_err());
        assert!(JNumber::from_raw("").is_err());
        assert!(JNumber::try_from(f64::NAN).is_err());
        assert!(JNumber::try_from(f64::INFINITY).is_err());
    }

    #[mockalloc::test]
    fn lossy_conversions_set_flags() {
        let frac = JNumber::try_from(2.5).unwrap();
        let (v, conv) = frac.get_i64();
        assert_eq!(v, 2);
        assert!(conv.contains(ConvResult::TRUNCATED));

        let wide = JNumber::from(i64::MAX);
        let (_, conv) = wide.get_f64();
        assert!(conv.contains(ConvResult::PRECISION));

        let (_, conv) = wide.get_i32();
        assert!(conv.contains(ConvResult::OVERFLOW));

        let (raw, conv) = wide.get_raw();
        assert!(raw.is_none());
        assert!(conv.contains(ConvResult::NOT_A_RAW_NUM));
    }

    #[mockalloc::test]
    fn comparison_spans_forms() {
        let int = JNumber::from(2);
        let float = JNumber::try_from(2.0).unwrap();
        let raw = JNumber::from_raw("2").unwrap();
        let raw_float = JNumber::from_raw("2.0").unwrap();
        assert_eq!(int, float);
        assert_eq!(int, raw);
        assert_eq!(int, raw_float);
        assert!(JNumber::from(1) < JNumber::try_from(1.5).unwrap());
        assert!(JNumber::from(i64::MAX) > JNumber::try_from(9.2e18).unwrap());

        // Values where double rounding would lie
        let a = JNumber::from(i64::MAX);
        let b = JNumber::from(i64::MAX - 1);
        assert!(b < a);
    }

    #[mockalloc::test]
    fn integer_test_inspects_value() {
        assert!(JNumber::from(7).is_integer());
        assert!(JNumber::try_from(2.0).unwrap().is_integer());
        assert!(!JNumber::try_from(2.5).unwrap().is_integer());
        assert!(JNumber::from_raw("2e1").unwrap().is_integer());
        assert!(!JNumber::from_raw("0.5").unwrap().is_integer());
    }
}
