//! This crate is a JSON document library built around a single-pointer,
//! reference-counted value tree.
//!
//! JSON text parses into a [`JValue`] tree; trees are built and queried
//! programmatically, serialized back to text, and validated against JSON
//! Schema (draft-04 family). Validation is wired into the parse itself: a
//! SAX event stream drives the DOM builder and a push-down schema
//! validator simultaneously, so invalid input is rejected while it is
//! being read and schema `default`s are injected into the tree as
//! omissions are detected.
//!
//! ```
//! use vjson::{parse_with_schema, Schema};
//!
//! let schema = Schema::parse(r#"{
//!     "type": "object",
//!     "properties": {"port": {"type": "integer", "default": 8080}},
//!     "required": ["host"]
//! }"#)?;
//! let config = parse_with_schema(r#"{"host": "localhost"}"#, &schema)?;
//! assert_eq!(config.get("port").as_number().and_then(|n| n.to_i64()), Some(8080));
//! # Ok::<(), vjson::Error>(())
//! ```
//!
//! A [`JValue`] is guaranteed to be pointer-sized and has a niche (so
//! `Option<JValue>` is also pointer-sized). Cloning any value bumps an
//! atomic reference count; deep copies are explicit via
//! [`JValue::duplicate`].
#![deny(missing_docs, missing_debug_implementations)]

#[macro_use]
mod macros;

pub mod array;
pub mod buffer;
pub mod dom;
pub mod error;
pub mod generate;
pub mod number;
pub mod object;
pub mod sax;
pub mod schema;
pub mod string;
pub mod traverse;
mod value;

pub use array::{JArray, SpliceOwnership};
pub use buffer::Buffer;
pub use dom::{parse, parse_buffer, parse_file, parse_with_schema, DomOptions, DomParser};
pub use error::{Error, ErrorCode};
pub use generate::{to_string, to_string_pretty, Generator};
pub use number::{ConvResult, JNumber};
pub use object::JObject;
pub use schema::{Resolver, Schema};
pub use string::JString;
pub use value::{DestructuredRef, JValue, ValueIndex, ValueType};

mod de;
mod ser;
pub use de::from_value;
pub use ser::to_value;

#[cfg(test)]
mod tests {
    use mockalloc::Mockalloc;
    use std::alloc::System;

    #[global_allocator]
    static ALLOCATOR: Mockalloc<System> = Mockalloc(System);
}
