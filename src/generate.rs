//! Serializing a value tree back to JSON text.

use std::fmt::Write;

use crate::error::Error;
use crate::number::JNumber;
use crate::string::JString;
use crate::traverse::{traverse, Visitor};
use crate::value::JValue;

/// Returns the lexical form a number serializes as: the original lexeme
/// when one is available, else a decimal integer, else the shortest
/// round-trippable double form.
pub(crate) fn number_lexeme(n: &JNumber) -> String {
    if let Some(raw) = n.as_raw() {
        raw.to_owned()
    } else if let Some(i) = n.to_i64() {
        i.to_string()
    } else {
        n.to_f64_lossy().to_string()
    }
}

fn escape_into(out: &mut String, s: &str) {
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\u{8}' => out.push_str("\\b"),
            '\u{c}' => out.push_str("\\f"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 => {
                let _ = write!(out, "\\u{:04x}", c as u32);
            }
            c => out.push(c),
        }
    }
    out.push('"');
}

// What the generator last emitted at the current nesting level, so it
// knows when a separator is due.
#[derive(Copy, Clone, PartialEq)]
enum Slot {
    First,
    Item,
    Key,
}

/// A stateful JSON text generator.
///
/// Values are appended with [`Generator::value`]; the generator tracks the
/// open container stack so separators and indentation come out right, and
/// [`Generator::finish`] returns the accumulated buffer.
///
/// Serialization fails if the tree contains the `Invalid` sentinel
/// anywhere.
pub struct Generator {
    out: String,
    indent: Option<String>,
    stack: Vec<Slot>,
    failed: bool,
}

impl Generator {
    /// Creates a generator producing compact output.
    #[must_use]
    pub fn new() -> Self {
        Generator {
            out: String::new(),
            indent: None,
            stack: Vec::new(),
            failed: false,
        }
    }

    /// Creates a generator producing pretty output with the given
    /// indentation unit.
    #[must_use]
    pub fn pretty(indent: &str) -> Self {
        Generator {
            out: String::new(),
            indent: Some(indent.to_owned()),
            stack: Vec::new(),
            failed: false,
        }
    }

    /// Appends a value to the output.
    pub fn value(&mut self, value: &JValue) -> &mut Self {
        if !traverse(value, self) {
            self.failed = true;
        }
        self
    }

    /// Finishes generation, returning the buffer.
    pub fn finish(self) -> Result<String, Error> {
        if self.failed {
            Err(Error::Generic("cannot serialize an invalid value".into()))
        } else {
            Ok(self.out)
        }
    }

    fn newline(&mut self) {
        if let Some(indent) = &self.indent {
            self.out.push('\n');
            for _ in 0..self.stack.len() {
                self.out.push_str(indent);
            }
        }
    }

    // Emits whatever comes before a value or key at the current position.
    fn lead_in(&mut self) {
        match self.stack.last().copied() {
            None => {}
            Some(Slot::First) => {
                *self.stack.last_mut().unwrap() = Slot::Item;
                self.newline();
            }
            Some(Slot::Item) => {
                self.out.push(',');
                self.newline();
            }
            Some(Slot::Key) => {
                *self.stack.last_mut().unwrap() = Slot::Item;
                self.out.push(':');
                if self.indent.is_some() {
                    self.out.push(' ');
                }
            }
        }
    }

    fn close(&mut self, bracket: char) {
        let slot = self.stack.pop();
        if slot == Some(Slot::Item) {
            self.newline();
        }
        self.out.push(bracket);
    }
}

impl Default for Generator {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Generator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Generator")
            .field("len", &self.out.len())
            .field("depth", &self.stack.len())
            .finish()
    }
}

impl Visitor for Generator {
    fn null(&mut self) -> bool {
        self.lead_in();
        self.out.push_str("null");
        true
    }

    fn boolean(&mut self, value: bool) -> bool {
        self.lead_in();
        self.out.push_str(if value { "true" } else { "false" });
        true
    }

    fn number(&mut self, value: &JNumber) -> bool {
        self.lead_in();
        let lexeme = number_lexeme(value);
        self.out.push_str(&lexeme);
        true
    }

    fn string(&mut self, value: &JString) -> bool {
        self.lead_in();
        escape_into(&mut self.out, value.as_str());
        true
    }

    fn begin_array(&mut self, _len: usize) -> bool {
        self.lead_in();
        self.out.push('[');
        self.stack.push(Slot::First);
        true
    }

    fn end_array(&mut self) -> bool {
        self.close(']');
        true
    }

    fn begin_object(&mut self, _len: usize) -> bool {
        self.lead_in();
        self.out.push('{');
        self.stack.push(Slot::First);
        true
    }

    fn key(&mut self, key: &JString) -> bool {
        self.lead_in();
        escape_into(&mut self.out, key.as_str());
        *self.stack.last_mut().unwrap() = Slot::Key;
        true
    }

    fn end_object(&mut self) -> bool {
        self.close('}');
        true
    }

    fn invalid(&mut self) -> bool {
        false
    }
}

/// Serializes a value as compact JSON text (no whitespace).
pub fn to_string(value: &JValue) -> Result<String, Error> {
    let mut gen = Generator::new();
    gen.value(value);
    gen.finish()
}

/// Serializes a value as indented JSON text.
pub fn to_string_pretty(value: &JValue, indent: &str) -> Result<String, Error> {
    let mut gen = Generator::pretty(indent);
    gen.value(value);
    gen.finish()
}

impl std::fmt::Display for JValue {
    /// Formats as compact JSON; fails on the `Invalid` sentinel.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match to_string(self) {
            Ok(text) => f.write_str(&text),
            Err(_) => Err(std::fmt::Error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vjson;

    #[test]
    fn compact_has_no_whitespace() {
        let v = vjson!({"a": [1, true, null], "b": ""});
        assert_eq!(to_string(&v).unwrap(), r#"{"a":[1,true,null],"b":""}"#);
    }

    #[test]
    fn pretty_is_indented() {
        let v = vjson!({"a": [1]});
        let text = to_string_pretty(&v, "  ").unwrap();
        assert_eq!(text, "{\n  \"a\": [\n    1\n  ]\n}");
    }

    #[test]
    fn empty_containers_stay_tight() {
        let v = vjson!({"a": [], "b": {}});
        assert_eq!(to_string_pretty(&v, "  ").unwrap(), "{\n  \"a\": [],\n  \"b\": {}\n}");
    }

    #[test]
    fn strings_are_escaped() {
        let v = vjson!(["a\"b", "back\\slash", "tab\there", "\u{1}"]);
        assert_eq!(
            to_string(&v).unwrap(),
            r#"["a\"b","back\\slash","tab\there","\u0001"]"#
        );
    }

    #[test]
    fn raw_numbers_round_trip_verbatim() {
        let n = crate::JNumber::from_raw("1.2300e2").unwrap();
        assert_eq!(to_string(n.as_ref()).unwrap(), "1.2300e2");
    }

    #[test]
    fn doubles_round_trip() {
        let n = crate::JNumber::try_from(0.1f64).unwrap();
        assert_eq!(to_string(n.as_ref()).unwrap(), "0.1");
    }

    #[test]
    fn invalid_values_fail() {
        let mut arr = crate::JArray::new();
        arr.push(crate::JValue::INVALID).unwrap();
        assert!(to_string(&arr.into()).is_err());
    }
}
