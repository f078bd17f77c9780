//! Compiling a schema document (itself a parsed value tree) into a
//! validator tree.
//!
//! Every schema object is accumulated by a [`SchemaParsing`] builder: each
//! recognized keyword contributes a feature, and finalization assembles the
//! concrete validator node. Unknown keywords are ignored. `$ref` supersedes
//! sibling keywords, as draft-04 prescribes.

use std::mem;
use std::sync::Arc;

use regex::Regex;
use url::Url;

use crate::error::Error;
use crate::object::JObject;
use crate::value::JValue;

use super::uri::UriScope;
use super::validator::{
    Additional, ArrayChecks, Dependency, Items, Kind, NodeRef, NumberChecks, ObjectChecks,
    StringChecks, Validator,
};

pub(crate) struct ParsedDocument {
    pub root: NodeRef,
    /// URI → node bindings collected while parsing: one per canonical
    /// pointer, plus one per `id`.
    pub registrations: Vec<(String, NodeRef)>,
}

pub(crate) fn parse_document(value: &JValue, base: Url) -> Result<ParsedDocument, Error> {
    let mut parser = DocumentParser {
        scope: UriScope::new(base),
        registrations: Vec::new(),
    };
    let root = parser.parse_schema(value)?;
    Ok(ParsedDocument {
        root,
        registrations: parser.registrations,
    })
}

fn schema_error(message: impl Into<String>) -> Error {
    Error::Generic(format!("schema: {}", message.into()))
}

struct DocumentParser {
    scope: UriScope,
    registrations: Vec<(String, NodeRef)>,
}

impl DocumentParser {
    fn parse_schema(&mut self, value: &JValue) -> Result<NodeRef, Error> {
        let obj = value
            .as_object()
            .ok_or_else(|| schema_error("a schema must be an object"))?;

        // The canonical pointer key is relative to the enclosing document
        let pointer_key = self.scope.current_uri();
        let id = obj
            .get("id")
            .map(|v| {
                v.as_string()
                    .map(|s| s.as_str().to_owned())
                    .ok_or_else(|| schema_error("\"id\" must be a string"))
            })
            .transpose()?;
        if let Some(id) = &id {
            self.scope.push_id(id)?;
        }

        let result = self.parse_body(obj);
        if let Some(node) = result.as_ref().ok() {
            self.registrations.push((pointer_key, node.clone()));
            if id.is_some() {
                self.registrations
                    .push((self.scope.current_id(), node.clone()));
            }
        }
        if id.is_some() {
            self.scope.pop_id();
        }
        result
    }

    fn parse_nested(&mut self, segment: &str, value: &JValue) -> Result<NodeRef, Error> {
        self.scope.push_segment(segment);
        let result = self.parse_schema(value);
        self.scope.pop_segment();
        result
    }

    fn parse_indexed(&mut self, segment: &str, index: usize, value: &JValue) -> Result<NodeRef, Error> {
        self.scope.push_segment(segment);
        self.scope.push_index(index);
        let result = self.parse_schema(value);
        self.scope.pop_segment();
        self.scope.pop_segment();
        result
    }

    fn parse_keyed(&mut self, segment: &str, key: &str, value: &JValue) -> Result<NodeRef, Error> {
        self.scope.push_segment(segment);
        self.scope.push_segment(key);
        let result = self.parse_schema(value);
        self.scope.pop_segment();
        self.scope.pop_segment();
        result
    }

    fn parse_schema_list(&mut self, keyword: &str, value: &JValue) -> Result<Vec<NodeRef>, Error> {
        let arr = value
            .as_array()
            .ok_or_else(|| schema_error(format!("\"{keyword}\" must be an array of schemas")))?;
        if arr.is_empty() {
            return Err(schema_error(format!("\"{keyword}\" must not be empty")));
        }
        let mut nodes = Vec::with_capacity(arr.len());
        for (i, sub) in arr.iter().enumerate() {
            nodes.push(self.parse_indexed(keyword, i, sub)?);
        }
        Ok(nodes)
    }

    fn parse_body(&mut self, obj: &JObject) -> Result<NodeRef, Error> {
        // Definitions register even next to a $ref, which may point into
        // them
        if let Some(defs) = obj.get("definitions") {
            let defs = defs
                .as_object()
                .ok_or_else(|| schema_error("\"definitions\" must be an object"))?;
            for (name, sub) in defs.iter() {
                self.parse_keyed("definitions", name.as_str(), sub)?;
            }
        }

        if let Some(reference) = obj.get("$ref") {
            let reference = reference
                .as_string()
                .ok_or_else(|| schema_error("\"$ref\" must be a string"))?;
            let target = self.scope.resolve_reference(reference.as_str())?;
            return Ok(Arc::new(Validator::new(Kind::Reference(target))));
        }

        let mut parsing = SchemaParsing::default();
        self.collect_features(obj, &mut parsing)?;
        parsing.finish()
    }

    fn collect_features(&mut self, obj: &JObject, p: &mut SchemaParsing) -> Result<(), Error> {
        if let Some(v) = obj.get("type") {
            p.types = Some(parse_type_spec(v)?);
        }

        if let Some(v) = obj.get("minimum") {
            p.number.minimum = Some(as_number(v, "minimum")?);
        }
        if let Some(v) = obj.get("maximum") {
            p.number.maximum = Some(as_number(v, "maximum")?);
        }
        p.number.exclusive_minimum = as_opt_bool(obj.get("exclusiveMinimum"), "exclusiveMinimum")?;
        p.number.exclusive_maximum = as_opt_bool(obj.get("exclusiveMaximum"), "exclusiveMaximum")?;
        if let Some(v) = obj.get("multipleOf") {
            let step = as_number(v, "multipleOf")?;
            if step.cmp(&crate::JNumber::new()) != std::cmp::Ordering::Greater {
                return Err(schema_error("\"multipleOf\" must be positive"));
            }
            p.number.multiple_of = Some(step);
        }

        if let Some(v) = obj.get("minLength") {
            p.string.min_length = Some(as_usize(v, "minLength")?);
        }
        if let Some(v) = obj.get("maxLength") {
            p.string.max_length = Some(as_usize(v, "maxLength")?);
        }
        if let Some(v) = obj.get("pattern") {
            let pattern = v
                .as_string()
                .ok_or_else(|| schema_error("\"pattern\" must be a string"))?;
            let compiled = Regex::new(pattern.as_str())
                .map_err(|e| schema_error(format!("bad pattern: {e}")))?;
            p.string.pattern = Some(compiled);
        }

        if let Some(v) = obj.get("items") {
            p.array.items = if v.is_array() {
                let tuple = v.as_array().expect("checked kind");
                let mut nodes = Vec::with_capacity(tuple.len());
                for (i, sub) in tuple.iter().enumerate() {
                    nodes.push(self.parse_indexed("items", i, sub)?);
                }
                let additional = match obj.get("additionalItems") {
                    None => Additional::Any,
                    Some(b) if b.is_bool() => {
                        if b.is_true() {
                            Additional::Any
                        } else {
                            Additional::Forbidden
                        }
                    }
                    Some(sub) => Additional::Schema(self.parse_nested("additionalItems", sub)?),
                };
                Items::Tuple(nodes, additional)
            } else {
                Items::Single(self.parse_nested("items", v)?)
            };
        }
        if let Some(v) = obj.get("minItems") {
            p.array.min_items = Some(as_usize(v, "minItems")?);
        }
        if let Some(v) = obj.get("maxItems") {
            p.array.max_items = Some(as_usize(v, "maxItems")?);
        }
        p.array.unique_items = as_opt_bool(obj.get("uniqueItems"), "uniqueItems")?;

        if let Some(v) = obj.get("properties") {
            let props = v
                .as_object()
                .ok_or_else(|| schema_error("\"properties\" must be an object"))?;
            for (name, sub) in props.iter() {
                let node = self.parse_keyed("properties", name.as_str(), sub)?;
                p.object.properties.insert(name.as_str().to_owned(), node);
            }
        }
        if let Some(v) = obj.get("patternProperties") {
            let props = v
                .as_object()
                .ok_or_else(|| schema_error("\"patternProperties\" must be an object"))?;
            for (pattern, sub) in props.iter() {
                let compiled = Regex::new(pattern.as_str())
                    .map_err(|e| schema_error(format!("bad patternProperties key: {e}")))?;
                let node = self.parse_keyed("patternProperties", pattern.as_str(), sub)?;
                p.object.pattern_properties.push((compiled, node));
            }
        }
        if let Some(v) = obj.get("additionalProperties") {
            p.object.additional = if v.is_bool() {
                if v.is_true() {
                    Additional::Any
                } else {
                    Additional::Forbidden
                }
            } else {
                Additional::Schema(self.parse_nested("additionalProperties", v)?)
            };
        }
        if let Some(v) = obj.get("required") {
            let names = v
                .as_array()
                .ok_or_else(|| schema_error("\"required\" must be an array"))?;
            for name in names.iter() {
                let name = name
                    .as_string()
                    .ok_or_else(|| schema_error("\"required\" entries must be strings"))?;
                p.object.required.insert(name.as_str().to_owned());
            }
        }
        if let Some(v) = obj.get("minProperties") {
            p.object.min_properties = Some(as_usize(v, "minProperties")?);
        }
        if let Some(v) = obj.get("maxProperties") {
            p.object.max_properties = Some(as_usize(v, "maxProperties")?);
        }
        if let Some(v) = obj.get("dependencies") {
            let deps = v
                .as_object()
                .ok_or_else(|| schema_error("\"dependencies\" must be an object"))?;
            for (name, spec) in deps.iter() {
                let dep = if let Some(keys) = spec.as_array() {
                    let mut list = Vec::with_capacity(keys.len());
                    for key in keys.iter() {
                        let key = key.as_string().ok_or_else(|| {
                            schema_error("\"dependencies\" key lists must hold strings")
                        })?;
                        list.push(key.as_str().to_owned());
                    }
                    Dependency::Keys(list)
                } else if spec.is_object() {
                    Dependency::Schema(self.parse_keyed("dependencies", name.as_str(), spec)?)
                } else {
                    return Err(schema_error(
                        "\"dependencies\" entries must be arrays or schemas",
                    ));
                };
                p.object.dependencies.insert(name.as_str().to_owned(), dep);
            }
        }

        if let Some(v) = obj.get("enum") {
            let members = v
                .as_array()
                .ok_or_else(|| schema_error("\"enum\" must be an array"))?;
            if members.is_empty() {
                return Err(schema_error("\"enum\" must not be empty"));
            }
            p.enum_ = Some(members.iter().cloned().collect());
        }

        if let Some(v) = obj.get("allOf") {
            p.all_of = self.parse_schema_list("allOf", v)?;
        }
        if let Some(v) = obj.get("anyOf") {
            p.any_of = self.parse_schema_list("anyOf", v)?;
        }
        if let Some(v) = obj.get("oneOf") {
            p.one_of = self.parse_schema_list("oneOf", v)?;
        }
        if let Some(v) = obj.get("not") {
            p.not = Some(self.parse_nested("not", v)?);
        }

        if let Some(v) = obj.get("default") {
            p.default_ = Some(v.clone());
        }

        Ok(())
    }
}

fn parse_type_spec(value: &JValue) -> Result<Vec<String>, Error> {
    if let Some(s) = value.as_string() {
        return Ok(vec![s.as_str().to_owned()]);
    }
    let names = value
        .as_array()
        .ok_or_else(|| schema_error("\"type\" must be a string or an array"))?;
    if names.is_empty() {
        return Err(schema_error("\"type\" must not be empty"));
    }
    names
        .iter()
        .map(|name| {
            name.as_string()
                .map(|s| s.as_str().to_owned())
                .ok_or_else(|| schema_error("\"type\" entries must be strings"))
        })
        .collect()
}

fn as_number(value: &JValue, keyword: &str) -> Result<crate::JNumber, Error> {
    value
        .as_number()
        .cloned()
        .ok_or_else(|| schema_error(format!("\"{keyword}\" must be a number")))
}

fn as_usize(value: &JValue, keyword: &str) -> Result<usize, Error> {
    value
        .as_number()
        .and_then(|n| n.to_i64())
        .and_then(|v| usize::try_from(v).ok())
        .ok_or_else(|| schema_error(format!("\"{keyword}\" must be a non-negative integer")))
}

fn as_opt_bool(value: Option<&JValue>, keyword: &str) -> Result<bool, Error> {
    match value {
        None => Ok(false),
        Some(v) => v
            .to_bool()
            .ok_or_else(|| schema_error(format!("\"{keyword}\" must be a boolean"))),
    }
}

/// Build-time accumulator: features land here as keywords are read, and
/// [`SchemaParsing::finish`] applies them to produce the validator node.
#[derive(Default)]
struct SchemaParsing {
    types: Option<Vec<String>>,
    number: NumberChecks,
    string: StringChecks,
    array: ArrayChecks,
    object: ObjectChecks,
    enum_: Option<Vec<JValue>>,
    all_of: Vec<NodeRef>,
    any_of: Vec<NodeRef>,
    one_of: Vec<NodeRef>,
    not: Option<NodeRef>,
    default_: Option<JValue>,
}

impl SchemaParsing {
    fn typed_kind(&mut self, name: &str, with_checks: bool) -> Result<Kind, Error> {
        Ok(match name {
            "null" => Kind::Null,
            "boolean" => Kind::Boolean,
            "number" | "integer" => {
                let mut checks = if with_checks {
                    mem::take(&mut self.number)
                } else {
                    NumberChecks::default()
                };
                checks.strict = true;
                checks.integer |= name == "integer";
                Kind::Number(checks)
            }
            "string" => {
                let mut checks = if with_checks {
                    mem::take(&mut self.string)
                } else {
                    StringChecks::default()
                };
                checks.strict = true;
                Kind::String(checks)
            }
            "array" => {
                let mut checks = if with_checks {
                    mem::take(&mut self.array)
                } else {
                    ArrayChecks::default()
                };
                checks.strict = true;
                Kind::Array(checks)
            }
            "object" => {
                let mut checks = if with_checks {
                    mem::take(&mut self.object)
                } else {
                    ObjectChecks::default()
                };
                checks.strict = true;
                Kind::Object(checks)
            }
            other => return Err(schema_error(format!("unknown type \"{other}\""))),
        })
    }

    fn finish(mut self) -> Result<NodeRef, Error> {
        let mut parts: Vec<NodeRef> = Vec::new();
        let part = |kind: Kind| Arc::new(Validator::new(kind));

        match self.types.take() {
            Some(types) if types.len() == 1 => {
                let kind = self.typed_kind(&types[0], true)?;
                parts.push(part(kind));
            }
            Some(types) => {
                // With a type union, each alternative asserts only the
                // kind; constraint groups apply alongside.
                let mut alternatives = Vec::with_capacity(types.len());
                for name in &types {
                    alternatives.push(part(self.typed_kind(name, false)?));
                }
                parts.push(part(Kind::AnyOf(alternatives)));
            }
            None => {}
        }

        // Constraint groups left over apply only to values of their kind
        if !self.number.is_empty() {
            parts.push(part(Kind::Number(mem::take(&mut self.number))));
        }
        if !self.string.is_empty() {
            parts.push(part(Kind::String(mem::take(&mut self.string))));
        }
        if !self.array.is_empty() {
            parts.push(part(Kind::Array(mem::take(&mut self.array))));
        }
        if !self.object.is_empty() {
            parts.push(part(Kind::Object(mem::take(&mut self.object))));
        }

        if let Some(members) = self.enum_.take() {
            parts.push(part(Kind::Enum(members)));
        }
        if !self.all_of.is_empty() {
            parts.push(part(Kind::AllOf(mem::take(&mut self.all_of))));
        }
        if !self.any_of.is_empty() {
            parts.push(part(Kind::AnyOf(mem::take(&mut self.any_of))));
        }
        if !self.one_of.is_empty() {
            parts.push(part(Kind::OneOf(mem::take(&mut self.one_of))));
        }
        if let Some(not) = self.not.take() {
            parts.push(part(Kind::Not(not)));
        }

        let kind = match parts.len() {
            0 => Kind::Any,
            1 => {
                return Ok(match self.default_.take() {
                    None => parts.pop().expect("one part"),
                    Some(default) => {
                        let only = parts.pop().expect("one part");
                        // Re-wrap to attach the default; the bare node may
                        // already be shared via registration? It is not:
                        // registration happens after `finish`.
                        match Arc::try_unwrap(only) {
                            Ok(v) => Arc::new(Validator {
                                kind: v.kind,
                                default: Some(default),
                            }),
                            Err(shared) => Arc::new(Validator {
                                kind: Kind::AllOf(vec![shared]),
                                default: Some(default),
                            }),
                        }
                    }
                });
            }
            _ => Kind::AllOf(parts),
        };
        Ok(Arc::new(Validator {
            kind,
            default: self.default_.take(),
        }))
    }
}
