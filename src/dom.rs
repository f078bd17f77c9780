//! Building a value tree from SAX events, with optional validation during
//! the parse.

use std::fmt::{self, Debug, Formatter};
use std::path::Path;

use crate::buffer::Buffer;
use crate::error::Error;
use crate::object::JObject;
use crate::sax::{self, Event, Handler, ParserOptions, Text};
use crate::schema::state::{Injection, ValidationState};
use crate::schema::Schema;
use crate::string::JString;
use crate::value::JValue;
use crate::JArray;

/// Options controlling how the DOM builder materializes values.
#[derive(Clone, Debug, Default)]
pub struct DomOptions {
    /// Build no-copy strings over the input buffer instead of interning,
    /// for strings that need no unescaping. Only takes effect when the
    /// input is handed over as a [`Buffer`], which the resulting tree then
    /// keeps alive.
    pub no_copy_strings: bool,
}

enum Open {
    Object(JObject),
    Array(JArray),
}

/// An incremental DOM builder; a SAX [`Handler`] that assembles the value
/// tree.
pub struct Builder {
    stack: Vec<Open>,
    pending_key: Option<JString>,
    root: Option<JValue>,
    source: Option<Buffer>,
    no_copy: bool,
}

impl Builder {
    /// Creates a builder that interns all strings.
    #[must_use]
    pub fn new() -> Self {
        Builder {
            stack: Vec::new(),
            pending_key: None,
            root: None,
            source: None,
            no_copy: false,
        }
    }

    /// Creates a builder reading from `source`, so string values can alias
    /// the buffer instead of copying when `opts` ask for it.
    #[must_use]
    pub fn for_buffer(source: Buffer, opts: &DomOptions) -> Self {
        Builder {
            stack: Vec::new(),
            pending_key: None,
            root: None,
            source: Some(source),
            no_copy: opts.no_copy_strings,
        }
    }

    fn make_string(&self, text: &Text<'_>) -> Result<JString, Error> {
        if self.no_copy {
            if let (Some(buffer), Some(span)) = (&self.source, text.span()) {
                return JString::from_buffer(buffer, span);
            }
        }
        Ok(JString::intern(text.as_str()))
    }

    fn attach(&mut self, value: JValue) -> Result<(), Error> {
        match self.stack.last_mut() {
            Some(Open::Object(o)) => {
                let key = self
                    .pending_key
                    .take()
                    .ok_or_else(|| Error::Generic("value without a pending key".into()))?;
                // A repeated key replaces the earlier entry
                o.insert_internal(key, value);
            }
            Some(Open::Array(a)) => a.push_internal(value),
            None => {
                if self.root.is_some() {
                    return Err(Error::Generic("multiple root values".into()));
                }
                self.root = Some(value);
            }
        }
        Ok(())
    }

    // Applies a validator-supplied default to the container being closed.
    fn inject(&mut self, injection: Injection) -> Result<(), Error> {
        match (self.stack.last_mut(), injection.key) {
            (Some(Open::Object(o)), Some(key)) => {
                o.insert_internal(JString::intern(&key), injection.value);
                Ok(())
            }
            (Some(Open::Array(a)), None) => {
                a.push_internal(injection.value);
                Ok(())
            }
            _ => Err(Error::Generic("default injected outside a container".into())),
        }
    }

    /// Returns the completed tree.
    pub fn finish(mut self) -> Result<JValue, Error> {
        self.root
            .take()
            .ok_or_else(|| Error::Generic("input contained no value".into()))
    }
}

impl Default for Builder {
    fn default() -> Self {
        Self::new()
    }
}

impl Debug for Builder {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Builder")
            .field("depth", &self.stack.len())
            .field("has_root", &self.root.is_some())
            .finish()
    }
}

impl Handler for Builder {
    fn event(&mut self, event: Event<'_>) -> Result<(), Error> {
        match event {
            Event::ObjectBegin => {
                self.stack.push(Open::Object(JObject::new()));
                Ok(())
            }
            Event::ObjectKey(text) => {
                self.pending_key = Some(self.make_string(&text)?);
                Ok(())
            }
            Event::ObjectEnd => match self.stack.pop() {
                Some(Open::Object(o)) => self.attach(o.into()),
                _ => Err(Error::Generic("mismatched object end".into())),
            },
            Event::ArrayBegin => {
                self.stack.push(Open::Array(JArray::new()));
                Ok(())
            }
            Event::ArrayEnd => match self.stack.pop() {
                Some(Open::Array(a)) => self.attach(a.into()),
                _ => Err(Error::Generic("mismatched array end".into())),
            },
            Event::String(text) => {
                let s = self.make_string(&text)?;
                self.attach(s.into())
            }
            Event::Number(lexeme) => self.attach(crate::JNumber::from_lexeme(lexeme).into()),
            Event::Bool(b) => self.attach(JValue::from(b)),
            Event::Null => self.attach(JValue::NULL),
        }
    }
}

// Fans each event out to the validator first, then to the builder, so a
// validation failure aborts before the tree grows.
struct Pipeline<'a, 's> {
    builder: &'a mut Builder,
    validation: Option<&'a mut ValidationState<'s>>,
}

impl Handler for Pipeline<'_, '_> {
    fn event(&mut self, event: Event<'_>) -> Result<(), Error> {
        if let Some(state) = self.validation.as_mut() {
            for injection in state.check(&event)? {
                self.builder.inject(injection)?;
            }
        }
        self.builder.event(event)
    }
}

/// A streaming DOM parser: feed input in chunks, optionally validating
/// against a schema as the bytes arrive, and collect the tree at the end.
pub struct DomParser<'s> {
    parser: sax::Parser,
    builder: Builder,
    validation: Option<ValidationState<'s>>,
}

impl<'s> DomParser<'s> {
    /// Begins a parse. With a schema, validation runs during the parse and
    /// the first violation aborts it.
    #[must_use]
    pub fn begin(schema: Option<&'s Schema>) -> Self {
        DomParser {
            parser: sax::Parser::new(),
            builder: Builder::new(),
            validation: schema.map(ValidationState::new),
        }
    }

    /// Feeds a chunk of input.
    pub fn feed(&mut self, bytes: &[u8]) -> Result<(), Error> {
        let mut pipeline = Pipeline {
            builder: &mut self.builder,
            validation: self.validation.as_mut(),
        };
        self.parser.feed(bytes, &mut pipeline)
    }

    /// Finishes the parse and returns the tree.
    pub fn end(mut self) -> Result<JValue, Error> {
        let mut pipeline = Pipeline {
            builder: &mut self.builder,
            validation: self.validation.as_mut(),
        };
        self.parser.end(&mut pipeline)?;
        if let Some(state) = self.validation.as_ref() {
            state.ensure_finished()?;
        }
        self.builder.finish()
    }
}

impl Debug for DomParser<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("DomParser")
            .field("parser", &self.parser)
            .finish()
    }
}

fn parse_events(
    bytes: &[u8],
    parser_opts: ParserOptions,
    mut builder: Builder,
    schema: Option<&Schema>,
) -> Result<JValue, Error> {
    let mut validation = schema.map(ValidationState::new);
    {
        let mut pipeline = Pipeline {
            builder: &mut builder,
            validation: validation.as_mut(),
        };
        sax::parse_bytes(bytes, parser_opts, &mut pipeline)?;
    }
    if let Some(state) = validation.as_ref() {
        state.ensure_finished()?;
    }
    builder.finish()
}

/// Parses a JSON document.
pub fn parse(input: &str) -> Result<JValue, Error> {
    parse_events(
        input.as_bytes(),
        ParserOptions::default(),
        Builder::new(),
        None,
    )
}

/// Parses a JSON document, validating it against `schema` as it is read.
/// Validation failures abort the parse and release the partial tree.
pub fn parse_with_schema(input: &str, schema: &Schema) -> Result<JValue, Error> {
    parse_events(
        input.as_bytes(),
        ParserOptions::default(),
        Builder::new(),
        Some(schema),
    )
}

/// Parses a JSON document from a shared buffer. With
/// [`DomOptions::no_copy_strings`] set, string values alias the buffer
/// instead of copying, and the tree keeps the buffer alive.
pub fn parse_buffer(
    buffer: &Buffer,
    schema: Option<&Schema>,
    opts: &DomOptions,
) -> Result<JValue, Error> {
    parse_events(
        buffer.as_bytes(),
        ParserOptions::default(),
        Builder::for_buffer(buffer.clone(), opts),
        schema,
    )
}

/// Reads and parses a JSON file.
pub fn parse_file(path: impl AsRef<Path>, schema: Option<&Schema>) -> Result<JValue, Error> {
    let buffer = Buffer::from_file(path)?;
    parse_buffer(&buffer, schema, &DomOptions::default())
}

// Schema documents are JSON with comments allowed.
pub(crate) fn parse_schema_text(text: &str) -> Result<JValue, Error> {
    parse_events(
        text.as_bytes(),
        ParserOptions {
            allow_comments: true,
        },
        Builder::new(),
        None,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generate::to_string;
    use crate::vjson;

    #[test]
    fn round_trips_document() {
        let input = r#"{"a":[1,2.5,"x",null,true],"b":{}}"#;
        let parsed = parse(input).unwrap();
        let expected = vjson!({"a": [1, 2.5, "x", null, true], "b": {}});
        assert_eq!(parsed, expected);
        let regenerated = to_string(&parsed).unwrap();
        assert_eq!(parse(&regenerated).unwrap(), parsed);
    }

    #[test]
    fn pretty_and_compact_parse_equal() {
        let v = vjson!({"k": [1, {"n": 2.5}, "s"]});
        let compact = to_string(&v).unwrap();
        let pretty = crate::generate::to_string_pretty(&v, "\t").unwrap();
        assert_eq!(parse(&compact).unwrap(), parse(&pretty).unwrap());
    }

    #[test]
    fn numbers_keep_raw_fidelity() {
        let parsed = parse("[1e2, 0.1000, 18446744073709551615]").unwrap();
        let arr = parsed.as_array().unwrap();
        assert_eq!(arr.get(0).as_number().unwrap().as_raw(), Some("1e2"));
        assert_eq!(arr.get(1).as_number().unwrap().as_raw(), Some("0.1000"));
        assert_eq!(
            to_string(&parsed).unwrap(),
            "[1e2,0.1000,18446744073709551615]"
        );
    }

    #[test]
    fn streaming_matches_one_shot() {
        let input = r#"{"big": [1, 2, 3, 4, 5], "s": "chunked input"}"#;
        let mut dom = DomParser::begin(None);
        for chunk in input.as_bytes().chunks(3) {
            dom.feed(chunk).unwrap();
        }
        assert_eq!(dom.end().unwrap(), parse(input).unwrap());
    }

    #[test]
    fn no_copy_strings_alias_the_buffer() {
        let buffer = Buffer::from(r#"{"name": "plain value", "esc": "a\nb"}"#);
        let opts = DomOptions {
            no_copy_strings: true,
        };
        let parsed = parse_buffer(&buffer, None, &opts).unwrap();
        let name = parsed.get("name").as_string().unwrap();
        assert_eq!(name.as_str(), "plain value");

        // The aliased bytes point into the buffer
        let buf_range = buffer.as_bytes().as_ptr_range();
        assert!(buf_range.contains(&name.as_str().as_ptr()));

        // Escaped strings fall back to interning
        let esc = parsed.get("esc").as_string().unwrap();
        assert_eq!(esc.as_str(), "a\nb");
        assert!(!buf_range.contains(&esc.as_str().as_ptr()));
    }

    #[test]
    fn lexical_errors_surface_offsets() {
        let err = parse(r#"{"a": 12, }"#).unwrap_err();
        match err {
            Error::Lexical { offset, .. } => assert_eq!(offset, 10),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn scalar_root_documents() {
        assert_eq!(parse("true").unwrap(), JValue::TRUE);
        assert_eq!(parse("\"s\"").unwrap(), JValue::from("s"));
        assert!(parse("  42 ").unwrap().as_number().is_some());
    }
}
