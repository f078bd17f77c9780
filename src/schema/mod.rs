//! JSON Schema (draft-04 family) compilation, resolution and validation.
//!
//! A [`Schema`] owns a tree of validator nodes plus a URI registry mapping
//! every registered subschema (canonical JSON Pointer URIs and declared
//! `id`s) to its node. `$ref` nodes hold only their absolute target URI
//! and resolve through the registry at check time, so reference cycles
//! between schemas cannot leak: the registry owns the nodes, references do
//! not.

use std::collections::{BTreeSet, HashMap, HashSet};

use url::Url;

use crate::dom;
use crate::error::Error;
use crate::value::JValue;

pub(crate) mod parser;
pub(crate) mod state;
pub(crate) mod uri;
pub(crate) mod validator;

use uri::{normalize_key, split_fragment, DEFAULT_BASE};
use validator::{Kind, NodeRef, Validator};

/// Supplies the bytes of externally referenced schema documents during
/// [`Schema::resolve`].
pub trait Resolver {
    /// Fetches the document at `uri`.
    fn resolve(&mut self, uri: &str) -> Result<Vec<u8>, Error>;
}

/// A compiled schema.
///
/// Freshly parsed schemas have their internal references (same-document
/// pointers and `id`s) available immediately; references to other
/// documents stay unresolved until [`Schema::resolve`] fetches them.
/// Validating through an unresolved reference fails with
/// [`Unresolved`](crate::ErrorCode::Unresolved).
///
/// A fully resolved schema is immutable and `Sync`: it can validate any
/// number of parses concurrently.
#[derive(Debug)]
pub struct Schema {
    root: NodeRef,
    registry: HashMap<String, NodeRef>,
    // Document URIs whose registrations are already merged
    loaded: HashSet<String>,
}

impl Schema {
    /// Parses a schema document. Schema documents may contain
    /// JavaScript-style comments.
    pub fn parse(text: &str) -> Result<Self, Error> {
        let value = dom::parse_schema_text(text)?;
        Self::from_value(&value)
    }

    /// Compiles a schema from an already parsed value tree.
    pub fn from_value(value: &JValue) -> Result<Self, Error> {
        Self::build(value, Url::parse(DEFAULT_BASE).expect("default base parses"))
    }

    /// Reads and parses a schema file. Relative references resolve
    /// against the file's location.
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self, Error> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let value = dom::parse_schema_text(&text)?;
        let base = path
            .as_ref()
            .canonicalize()
            .ok()
            .and_then(|p| Url::from_file_path(p).ok())
            .unwrap_or_else(|| Url::parse(DEFAULT_BASE).expect("default base parses"));
        Self::build(&value, base)
    }

    fn build(value: &JValue, base: Url) -> Result<Self, Error> {
        let document = parser::parse_document(value, base.clone())?;
        let mut registry = HashMap::new();
        for (key, node) in document.registrations {
            registry.entry(key).or_insert(node);
        }
        let mut loaded = HashSet::new();
        loaded.insert(normalize_key(base.as_str()).to_owned());
        Ok(Schema {
            root: document.root,
            registry,
            loaded,
        })
    }

    /// The schema that accepts any value.
    #[must_use]
    pub fn any() -> Self {
        Schema {
            root: std::sync::Arc::new(Validator::new(Kind::Any)),
            registry: HashMap::new(),
            loaded: HashSet::new(),
        }
    }

    pub(crate) fn root_validator(&self) -> &Validator {
        self.root.as_ref()
    }

    pub(crate) fn lookup(&self, target: &str) -> Option<&Validator> {
        self.registry.get(normalize_key(target)).map(|n| n.as_ref())
    }

    /// Validates a finished value tree against this schema.
    pub fn validate(&self, value: &JValue) -> Result<(), Error> {
        state::validate_with_root(self, self.root_validator(), value)
    }

    fn for_each_node(&self, f: &mut impl FnMut(&Validator)) {
        let mut pending: Vec<NodeRef> = Vec::with_capacity(self.registry.len() + 1);
        pending.push(self.root.clone());
        pending.extend(self.registry.values().cloned());
        let mut visited = HashSet::new();
        while let Some(node) = pending.pop() {
            if !visited.insert(std::sync::Arc::as_ptr(&node)) {
                continue;
            }
            f(&node);
            node.for_each_child(&mut |child| pending.push(child.clone()));
        }
    }

    // Reference targets with no registry entry.
    fn unresolved_targets(&self) -> BTreeSet<String> {
        let mut missing = BTreeSet::new();
        self.for_each_node(&mut |node| {
            if let Kind::Reference(target) = &node.kind {
                if self.lookup(target).is_none() {
                    missing.insert(target.clone());
                }
            }
        });
        missing
    }

    /// Returns `true` when every `$ref` resolves through the registry.
    /// Only a fully resolved schema is guaranteed to validate without
    /// [`Unresolved`](crate::ErrorCode::Unresolved) errors.
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        self.unresolved_targets().is_empty()
    }

    /// Fetches and links external references through `resolver`, repeating
    /// until a fixed point: documents brought in by one round may
    /// reference further documents. The operation is idempotent.
    pub fn resolve(&mut self, resolver: &mut dyn Resolver) -> Result<(), Error> {
        loop {
            let missing: BTreeSet<String> = self
                .unresolved_targets()
                .into_iter()
                .map(|target| split_fragment(&target).0.to_owned())
                .filter(|doc| !doc.is_empty() && !self.loaded.contains(doc))
                .collect();
            if missing.is_empty() {
                return Ok(());
            }
            for doc in missing {
                let bytes = resolver.resolve(&doc)?;
                let text = std::str::from_utf8(&bytes)
                    .map_err(|_| Error::Resource(format!("{doc}: resolver returned non-UTF-8")))?;
                let value = dom::parse_schema_text(text)?;
                let base = Url::parse(&doc)
                    .map_err(|e| Error::Unresolved(format!("{doc} ({e})")))?;
                let document = parser::parse_document(&value, base)?;
                for (key, node) in document.registrations {
                    self.registry.entry(key).or_insert(node);
                }
                self.loaded.insert(doc);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::{parse, parse_with_schema};
    use crate::error::ErrorCode;
    use crate::vjson;

    fn schema(text: &str) -> Schema {
        Schema::parse(text).unwrap()
    }

    fn code_of(result: Result<JValue, Error>) -> ErrorCode {
        result.unwrap_err().code()
    }

    #[test]
    fn allow_any_accepts_everything() {
        let any = Schema::any();
        for doc in ["null", "true", "-2.75", "\"s\"", "[1,[2],{}]", "{\"k\":null}"] {
            parse_with_schema(doc, &any).unwrap();
            any.validate(&parse(doc).unwrap()).unwrap();
        }
        // The empty schema means the same thing
        let empty = schema("{}");
        parse_with_schema("[{\"deep\": [1]}]", &empty).unwrap();
    }

    #[test]
    fn type_checks_reject_mismatches() {
        let s = schema(r#"{"type": "object"}"#);
        parse_with_schema("{}", &s).unwrap();
        assert_eq!(code_of(parse_with_schema("[]", &s)), ErrorCode::TypeMismatch);
        assert_eq!(code_of(parse_with_schema("3", &s)), ErrorCode::TypeMismatch);

        let union = schema(r#"{"type": ["string", "null"]}"#);
        parse_with_schema("\"x\"", &union).unwrap();
        parse_with_schema("null", &union).unwrap();
        assert_eq!(
            code_of(parse_with_schema("1", &union)),
            ErrorCode::TypeMismatch
        );
    }

    #[test]
    fn missing_required_key_is_reported() {
        let s = schema(r#"{"type": "object", "required": ["x"]}"#);
        parse_with_schema(r#"{"x": 1}"#, &s).unwrap();

        let err = parse_with_schema("{}", &s).unwrap_err();
        assert_eq!(err.code(), ErrorCode::MissingRequired);
        assert!(err.to_string().contains("\"x\""));
    }

    #[test]
    fn properties_dispatch_by_key() {
        let s = schema(
            r#"{
                "type": "object",
                "properties": {
                    "n": {"type": "integer", "minimum": 0},
                    "s": {"type": "string", "minLength": 2}
                }
            }"#,
        );
        parse_with_schema(r#"{"n": 3, "s": "ab", "extra": true}"#, &s).unwrap();
        assert_eq!(
            code_of(parse_with_schema(r#"{"n": -1}"#, &s)),
            ErrorCode::Range
        );
        assert_eq!(
            code_of(parse_with_schema(r#"{"s": 5}"#, &s)),
            ErrorCode::TypeMismatch
        );
    }

    #[test]
    fn pattern_and_additional_properties() {
        let s = schema(
            r#"{
                "type": "object",
                "properties": {"exact": {"type": "boolean"}},
                "patternProperties": {"^num_": {"type": "number"}},
                "additionalProperties": false
            }"#,
        );
        parse_with_schema(r#"{"exact": true, "num_a": 1.5}"#, &s).unwrap();
        assert_eq!(
            code_of(parse_with_schema(r#"{"other": 1}"#, &s)),
            ErrorCode::Generic
        );
        assert_eq!(
            code_of(parse_with_schema(r#"{"num_a": "no"}"#, &s)),
            ErrorCode::TypeMismatch
        );
    }

    #[test]
    fn object_count_bounds() {
        let s = schema(r#"{"type": "object", "minProperties": 1, "maxProperties": 2}"#);
        parse_with_schema(r#"{"a": 1}"#, &s).unwrap();
        assert_eq!(code_of(parse_with_schema("{}", &s)), ErrorCode::Range);
        assert_eq!(
            code_of(parse_with_schema(r#"{"a":1,"b":2,"c":3}"#, &s)),
            ErrorCode::Range
        );
    }

    #[test]
    fn key_dependencies() {
        let s = schema(
            r#"{"type": "object", "dependencies": {"card": ["cvv", "expiry"]}}"#,
        );
        parse_with_schema(r#"{"other": 1}"#, &s).unwrap();
        parse_with_schema(r#"{"card": "4", "cvv": "1", "expiry": "2"}"#, &s).unwrap();
        assert_eq!(
            code_of(parse_with_schema(r#"{"card": "4"}"#, &s)),
            ErrorCode::MissingRequired
        );
    }

    #[test]
    fn schema_dependencies_see_the_whole_object() {
        let s = schema(
            r#"{
                "type": "object",
                "dependencies": {
                    "credit": {"required": ["limit"], "properties": {"limit": {"type": "number"}}}
                }
            }"#,
        );
        parse_with_schema(r#"{"cash": true}"#, &s).unwrap();
        parse_with_schema(r#"{"credit": true, "limit": 100}"#, &s).unwrap();
        assert_eq!(
            code_of(parse_with_schema(r#"{"credit": true}"#, &s)),
            ErrorCode::MissingRequired
        );
    }

    #[test]
    fn array_items_and_bounds() {
        let s = schema(
            r#"{"type": "array", "items": {"type": "integer"}, "minItems": 1, "maxItems": 3}"#,
        );
        parse_with_schema("[1, 2]", &s).unwrap();
        assert_eq!(code_of(parse_with_schema("[]", &s)), ErrorCode::Range);
        assert_eq!(
            code_of(parse_with_schema("[1,2,3,4]", &s)),
            ErrorCode::Range
        );
        assert_eq!(
            code_of(parse_with_schema("[1, \"x\"]", &s)),
            ErrorCode::TypeMismatch
        );
    }

    #[test]
    fn tuple_items_with_additional() {
        let s = schema(
            r#"{
                "type": "array",
                "items": [{"type": "string"}, {"type": "integer"}],
                "additionalItems": false
            }"#,
        );
        parse_with_schema(r#"["a"]"#, &s).unwrap();
        parse_with_schema(r#"["a", 1]"#, &s).unwrap();
        assert_eq!(
            code_of(parse_with_schema(r#"["a", 1, true]"#, &s)),
            ErrorCode::Range
        );
        assert_eq!(
            code_of(parse_with_schema(r#"[1, 1]"#, &s)),
            ErrorCode::TypeMismatch
        );
    }

    #[test]
    fn unique_items_compare_structurally() {
        let s = schema(r#"{"type": "array", "uniqueItems": true}"#);
        // 1 and "1" are different values; the two 1s are duplicates
        assert_eq!(
            code_of(parse_with_schema(r#"[1, "1", 1]"#, &s)),
            ErrorCode::Duplicate
        );
        parse_with_schema(r#"[1, "1", 1.5]"#, &s).unwrap();
        // A number equals itself across representations
        assert_eq!(
            code_of(parse_with_schema(r#"[2, 2.0]"#, &s)),
            ErrorCode::Duplicate
        );
        // Structural comparison covers containers
        assert_eq!(
            code_of(parse_with_schema(r#"[{"a": [1]}, {"a": [1]}]"#, &s)),
            ErrorCode::Duplicate
        );
        parse_with_schema(r#"[{"a": [1]}, {"a": [2]}]"#, &s).unwrap();
    }

    #[test]
    fn combinators() {
        let all = schema(r#"{"allOf": [{"type": "integer"}, {"minimum": 3}]}"#);
        parse_with_schema("5", &all).unwrap();
        assert_eq!(code_of(parse_with_schema("1", &all)), ErrorCode::Range);

        let any = schema(r#"{"anyOf": [{"type": "string"}, {"type": "integer"}]}"#);
        parse_with_schema("\"x\"", &any).unwrap();
        parse_with_schema("3", &any).unwrap();
        assert!(parse_with_schema("1.5", &any).is_err());

        let one = schema(r#"{"oneOf": [{"type": "integer"}, {"minimum": 0}]}"#);
        parse_with_schema("-1", &one).unwrap(); // integer only
        parse_with_schema("0.5", &one).unwrap(); // minimum only
        assert_eq!(code_of(parse_with_schema("1", &one)), ErrorCode::Generic);

        let not = schema(r#"{"not": {"type": "string"}}"#);
        parse_with_schema("1", &not).unwrap();
        assert_eq!(
            code_of(parse_with_schema("\"s\"", &not)),
            ErrorCode::Generic
        );
    }

    #[test]
    fn enums_compare_structurally() {
        let s = schema(r#"{"enum": [1, "one", {"n": 1}, [1, 2]]}"#);
        parse_with_schema("1", &s).unwrap();
        parse_with_schema("\"one\"", &s).unwrap();
        parse_with_schema(r#"{"n": 1}"#, &s).unwrap();
        parse_with_schema("[1, 2]", &s).unwrap();
        assert_eq!(code_of(parse_with_schema("2", &s)), ErrorCode::Generic);
        assert_eq!(
            code_of(parse_with_schema(r#"{"n": 2}"#, &s)),
            ErrorCode::Generic
        );
    }

    #[test]
    fn defaults_inject_into_the_dom() {
        let s = schema(r#"{"properties": {"n": {"type": "integer", "default": 42}}}"#);
        let parsed = parse_with_schema("{}", &s).unwrap();
        assert_eq!(parsed, vjson!({"n": 42}));

        // A present value wins over the default
        let parsed = parse_with_schema(r#"{"n": 7}"#, &s).unwrap();
        assert_eq!(parsed, vjson!({"n": 7}));
    }

    #[test]
    fn tuple_tail_defaults_inject() {
        let s = schema(
            r#"{"type": "array", "items": [{"type": "string"}, {"type": "integer", "default": 9}]}"#,
        );
        let parsed = parse_with_schema(r#"["a"]"#, &s).unwrap();
        assert_eq!(parsed, vjson!(["a", 9]));
    }

    #[test]
    fn internal_refs_resolve_immediately() {
        let s = schema(
            r##"{
                "properties": {"person": {"$ref": "#/definitions/Person"}},
                "definitions": {
                    "Person": {"type": "object", "required": ["name"]}
                }
            }"##,
        );
        assert!(s.is_resolved());
        parse_with_schema(r#"{"person": {"name": "b"}}"#, &s).unwrap();
        assert_eq!(
            code_of(parse_with_schema(r#"{"person": {}}"#, &s)),
            ErrorCode::MissingRequired
        );
    }

    #[test]
    fn recursive_refs_do_not_loop() {
        let s = schema(
            r##"{
                "$ref": "#/definitions/Node",
                "definitions": {
                    "Node": {
                        "type": "object",
                        "properties": {"next": {"$ref": "#/definitions/Node"}}
                    }
                }
            }"##,
        );
        assert!(s.is_resolved());
        parse_with_schema(r#"{"next": {"next": {}}}"#, &s).unwrap();
        assert_eq!(
            code_of(parse_with_schema(r#"{"next": 1}"#, &s)),
            ErrorCode::TypeMismatch
        );
    }

    struct MapResolver(HashMap<String, String>);

    impl Resolver for MapResolver {
        fn resolve(&mut self, target: &str) -> Result<Vec<u8>, Error> {
            self.0
                .get(target)
                .map(|text| text.as_bytes().to_vec())
                .ok_or_else(|| Error::Unresolved(target.to_owned()))
        }
    }

    #[test]
    fn external_refs_need_resolution() {
        let mut s = schema(r#"{"$ref": "b.json#/definitions/Foo"}"#);
        assert!(!s.is_resolved());

        // Without resolution, validation reports the dangling reference
        let err = parse_with_schema(r#"{"foo": 1}"#, &s).unwrap_err();
        assert_eq!(err.code(), ErrorCode::Unresolved);

        let mut resolver = MapResolver(HashMap::from([(
            "file:///b.json".to_owned(),
            r#"{"definitions": {"Foo": {"type": "object", "required": ["foo"]}}}"#.to_owned(),
        )]));
        s.resolve(&mut resolver).unwrap();
        assert!(s.is_resolved());

        parse_with_schema(r#"{"foo": 1}"#, &s).unwrap();
        assert_eq!(
            code_of(parse_with_schema(r#"{}"#, &s)),
            ErrorCode::MissingRequired
        );

        // Resolution is idempotent
        s.resolve(&mut resolver).unwrap();
        assert!(s.is_resolved());
    }

    #[test]
    fn resolution_chases_transitive_documents() {
        let mut s = schema(r#"{"$ref": "b.json"}"#);
        let mut resolver = MapResolver(HashMap::from([
            (
                "file:///b.json".to_owned(),
                r#"{"$ref": "c.json"}"#.to_owned(),
            ),
            (
                "file:///c.json".to_owned(),
                r#"{"type": "integer"}"#.to_owned(),
            ),
        ]));
        s.resolve(&mut resolver).unwrap();
        assert!(s.is_resolved());
        parse_with_schema("3", &s).unwrap();
        assert_eq!(
            code_of(parse_with_schema("3.5", &s)),
            ErrorCode::TypeMismatch
        );
    }

    #[test]
    fn schema_documents_may_contain_comments() {
        let s = schema(
            "{\n// the shape of a point\n\"type\": \"object\", /* exact */ \"required\": [\"x\"]\n}",
        );
        parse_with_schema(r#"{"x": 0}"#, &s).unwrap();
    }

    #[test]
    fn validation_failure_aborts_streaming_parse() {
        let s = schema(r#"{"type": "array", "items": {"type": "integer"}}"#);
        let mut dom = crate::dom::DomParser::begin(Some(&s));
        dom.feed(b"[1, 2, ").unwrap();
        // The violation surfaces as soon as the offending token arrives
        assert_eq!(
            dom.feed(b"\"three\", 4]").unwrap_err().code(),
            ErrorCode::TypeMismatch
        );
    }

    #[test]
    fn resolved_schemas_validate_concurrently() {
        let s = schema(r#"{"type": "array", "items": {"type": "integer"}}"#);
        let shared = std::sync::Arc::new(s);
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let schema = shared.clone();
                std::thread::spawn(move || {
                    let doc = format!("[{i}, {i}, {i}]");
                    parse_with_schema(&doc, &schema).unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
    }
}
