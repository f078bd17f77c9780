//! Validator tree nodes and their per-kind constraint checks.

use std::sync::Arc;

use indexmap::{IndexMap, IndexSet};
use regex::Regex;

use crate::error::Error;
use crate::number::JNumber;
use crate::value::JValue;

pub(crate) type NodeRef = Arc<Validator>;

/// A node of a compiled schema: a kind-specific behaviour plus an optional
/// `default` used for injection when the matching input is omitted.
#[derive(Debug)]
pub struct Validator {
    pub(crate) kind: Kind,
    pub(crate) default: Option<JValue>,
}

pub(crate) static ANY: Validator = Validator {
    kind: Kind::Any,
    default: None,
};

impl Validator {
    pub(crate) fn new(kind: Kind) -> Self {
        Validator {
            kind,
            default: None,
        }
    }

    /// The default value injected when this schema's input is omitted.
    pub fn default_value(&self) -> Option<&JValue> {
        self.default.as_ref()
    }

    /// Invokes `f` for every direct child node.
    pub(crate) fn for_each_child(&self, f: &mut impl FnMut(&NodeRef)) {
        match &self.kind {
            Kind::Any | Kind::Null | Kind::Boolean | Kind::Enum(_) | Kind::Reference(_) => {}
            Kind::Number(_) | Kind::String(_) => {}
            Kind::Array(checks) => {
                match &checks.items {
                    Items::Any => {}
                    Items::Single(node) => f(node),
                    Items::Tuple(nodes, additional) => {
                        nodes.iter().for_each(&mut *f);
                        if let Additional::Schema(node) = additional {
                            f(node);
                        }
                    }
                }
            }
            Kind::Object(checks) => {
                checks.properties.values().for_each(&mut *f);
                for (_, node) in &checks.pattern_properties {
                    f(node);
                }
                if let Additional::Schema(node) = &checks.additional {
                    f(node);
                }
                for dep in checks.dependencies.values() {
                    if let Dependency::Schema(node) = dep {
                        f(node);
                    }
                }
            }
            Kind::AllOf(nodes) | Kind::AnyOf(nodes) | Kind::OneOf(nodes) => {
                nodes.iter().for_each(&mut *f)
            }
            Kind::Not(node) => f(node),
        }
    }
}

#[derive(Debug)]
pub(crate) enum Kind {
    /// Accepts any value.
    Any,
    Null,
    Boolean,
    Number(NumberChecks),
    String(StringChecks),
    Array(ArrayChecks),
    Object(ObjectChecks),
    AllOf(Vec<NodeRef>),
    AnyOf(Vec<NodeRef>),
    OneOf(Vec<NodeRef>),
    Not(NodeRef),
    Enum(Vec<JValue>),
    /// A `$ref`, holding its absolute target URI. Resolved through the
    /// schema registry at check time; the registry owns the target.
    Reference(String),
}

/// Whether a keyword set also asserts its type.
///
/// `{"minimum": 5}` constrains numbers but lets any other kind pass;
/// `{"type": "number", "minimum": 5}` rejects other kinds.
#[derive(Debug, Default)]
pub(crate) struct NumberChecks {
    pub strict: bool,
    pub integer: bool,
    pub minimum: Option<JNumber>,
    pub exclusive_minimum: bool,
    pub maximum: Option<JNumber>,
    pub exclusive_maximum: bool,
    pub multiple_of: Option<JNumber>,
}

impl NumberChecks {
    pub(crate) fn is_empty(&self) -> bool {
        !self.integer
            && self.minimum.is_none()
            && self.maximum.is_none()
            && self.multiple_of.is_none()
    }

    pub(crate) fn check(&self, n: &JNumber) -> Result<(), Error> {
        if self.integer && !n.is_integer() {
            return Err(Error::TypeMismatch {
                expected: "integer",
                found: "number",
            });
        }
        if let Some(min) = &self.minimum {
            let below = if self.exclusive_minimum {
                n <= min
            } else {
                n < min
            };
            if below {
                return Err(Error::Range(format!(
                    "{n:?} is below the minimum {min:?}"
                )));
            }
        }
        if let Some(max) = &self.maximum {
            let above = if self.exclusive_maximum {
                n >= max
            } else {
                n > max
            };
            if above {
                return Err(Error::Range(format!(
                    "{n:?} is above the maximum {max:?}"
                )));
            }
        }
        if let Some(step) = &self.multiple_of {
            if !is_multiple_of(n, step) {
                return Err(Error::Range(format!(
                    "{n:?} is not a multiple of {step:?}"
                )));
            }
        }
        Ok(())
    }
}

fn is_multiple_of(n: &JNumber, step: &JNumber) -> bool {
    if let (Some(a), Some(b)) = (n.to_i64(), step.to_i64()) {
        if b != 0 {
            return a % b == 0;
        }
    }
    let a = n.to_f64_lossy();
    let b = step.to_f64_lossy();
    if b == 0.0 {
        return false;
    }
    let quotient = a / b;
    (quotient - quotient.round()).abs() <= f64::EPSILON * quotient.abs().max(1.0)
}

#[derive(Debug, Default)]
pub(crate) struct StringChecks {
    pub strict: bool,
    pub min_length: Option<usize>,
    pub max_length: Option<usize>,
    pub pattern: Option<Regex>,
}

impl StringChecks {
    pub(crate) fn is_empty(&self) -> bool {
        self.min_length.is_none() && self.max_length.is_none() && self.pattern.is_none()
    }

    pub(crate) fn check(&self, s: &str) -> Result<(), Error> {
        if self.min_length.is_some() || self.max_length.is_some() {
            // Lengths count code points, not bytes
            let chars = s.chars().count();
            if let Some(min) = self.min_length {
                if chars < min {
                    return Err(Error::Range(format!(
                        "string is {chars} characters long, minimum is {min}"
                    )));
                }
            }
            if let Some(max) = self.max_length {
                if chars > max {
                    return Err(Error::Range(format!(
                        "string is {chars} characters long, maximum is {max}"
                    )));
                }
            }
        }
        if let Some(pattern) = &self.pattern {
            if !pattern.is_match(s) {
                return Err(Error::Range(format!(
                    "string does not match pattern {:?}",
                    pattern.as_str()
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug)]
pub(crate) enum Items {
    Any,
    /// One schema applied to every element.
    Single(NodeRef),
    /// Positional schemas, with `additionalItems` governing the tail.
    Tuple(Vec<NodeRef>, Additional),
}

#[derive(Debug)]
pub(crate) enum Additional {
    Any,
    Forbidden,
    Schema(NodeRef),
}

#[derive(Debug)]
pub(crate) struct ArrayChecks {
    pub strict: bool,
    pub min_items: Option<usize>,
    pub max_items: Option<usize>,
    pub unique_items: bool,
    pub items: Items,
}

impl Default for ArrayChecks {
    fn default() -> Self {
        ArrayChecks {
            strict: false,
            min_items: None,
            max_items: None,
            unique_items: false,
            items: Items::Any,
        }
    }
}

impl ArrayChecks {
    pub(crate) fn is_empty(&self) -> bool {
        self.min_items.is_none()
            && self.max_items.is_none()
            && !self.unique_items
            && matches!(self.items, Items::Any)
    }

    pub(crate) fn check_len(&self, len: usize) -> Result<(), Error> {
        if let Some(min) = self.min_items {
            if len < min {
                return Err(Error::Range(format!(
                    "array has {len} items, minimum is {min}"
                )));
            }
        }
        if let Some(max) = self.max_items {
            if len > max {
                return Err(Error::Range(format!(
                    "array has {len} items, maximum is {max}"
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug)]
pub(crate) enum Dependency {
    /// These keys must be present whenever the dependent key is.
    Keys(Vec<String>),
    /// The whole object must match this schema whenever the key is present.
    Schema(NodeRef),
}

#[derive(Debug)]
pub(crate) struct ObjectChecks {
    pub strict: bool,
    pub min_properties: Option<usize>,
    pub max_properties: Option<usize>,
    pub properties: IndexMap<String, NodeRef>,
    pub pattern_properties: Vec<(Regex, NodeRef)>,
    pub additional: Additional,
    pub required: IndexSet<String>,
    pub dependencies: IndexMap<String, Dependency>,
}

impl Default for ObjectChecks {
    fn default() -> Self {
        ObjectChecks {
            strict: false,
            min_properties: None,
            max_properties: None,
            properties: IndexMap::new(),
            pattern_properties: Vec::new(),
            additional: Additional::Any,
            required: IndexSet::new(),
            dependencies: IndexMap::new(),
        }
    }
}

impl ObjectChecks {
    pub(crate) fn is_empty(&self) -> bool {
        self.min_properties.is_none()
            && self.max_properties.is_none()
            && self.properties.is_empty()
            && self.pattern_properties.is_empty()
            && matches!(self.additional, Additional::Any)
            && self.required.is_empty()
            && self.dependencies.is_empty()
    }

    pub(crate) fn check_count(&self, count: usize) -> Result<(), Error> {
        if let Some(min) = self.min_properties {
            if count < min {
                return Err(Error::Range(format!(
                    "object has {count} properties, minimum is {min}"
                )));
            }
        }
        if let Some(max) = self.max_properties {
            if count > max {
                return Err(Error::Range(format!(
                    "object has {count} properties, maximum is {max}"
                )));
            }
        }
        Ok(())
    }

    /// Needs the whole object value materialized at `ObjectEnd`?
    pub(crate) fn needs_value(&self) -> bool {
        self.dependencies
            .values()
            .any(|dep| matches!(dep, Dependency::Schema(_)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::convert::TryFrom;

    #[test]
    fn multiple_of_handles_forms() {
        let three = JNumber::from(3);
        assert!(is_multiple_of(&JNumber::from(9), &three));
        assert!(!is_multiple_of(&JNumber::from(10), &three));

        let half = JNumber::try_from(0.5).unwrap();
        assert!(is_multiple_of(&JNumber::try_from(2.5).unwrap(), &half));
        assert!(!is_multiple_of(&JNumber::try_from(2.7).unwrap(), &half));

        let raw = JNumber::from_raw("100").unwrap();
        assert!(is_multiple_of(&raw, &JNumber::from(10)));
        assert!(!is_multiple_of(&raw, &JNumber::from(0)));
    }

    #[test]
    fn string_lengths_count_code_points() {
        let checks = StringChecks {
            strict: true,
            min_length: Some(3),
            max_length: Some(3),
            pattern: None,
        };
        assert!(checks.check("abc").is_ok());
        assert!(checks.check("åäö").is_ok());
        assert!(checks.check("ab").is_err());
        assert!(checks.check("abcd").is_err());
    }

    #[test]
    fn bounds_respect_exclusivity() {
        let checks = NumberChecks {
            strict: true,
            minimum: Some(JNumber::from(2)),
            exclusive_minimum: true,
            ..NumberChecks::default()
        };
        assert!(checks.check(&JNumber::from(3)).is_ok());
        assert!(checks.check(&JNumber::from(2)).is_err());
        let code = checks.check(&JNumber::from(1)).unwrap_err().code();
        assert_eq!(code, crate::ErrorCode::Range);
    }
}
