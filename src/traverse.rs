//! Uniform visitor traversal over a value tree.

use crate::number::JNumber;
use crate::string::JString;
use crate::value::{DestructuredRef, JValue};

/// Callbacks invoked while walking a value tree in document order.
///
/// Every callback returns `true` to continue; returning `false` stops the
/// traversal immediately. All callbacks default to `true` except
/// [`invalid`](Visitor::invalid), so a visitor only overrides what it
/// cares about.
pub trait Visitor {
    /// Called for `null`.
    fn null(&mut self) -> bool {
        true
    }
    /// Called for a boolean.
    fn boolean(&mut self, _value: bool) -> bool {
        true
    }
    /// Called for a number.
    fn number(&mut self, _value: &JNumber) -> bool {
        true
    }
    /// Called for a string.
    fn string(&mut self, _value: &JString) -> bool {
        true
    }
    /// Called before the elements of an array.
    fn begin_array(&mut self, _len: usize) -> bool {
        true
    }
    /// Called after the elements of an array.
    fn end_array(&mut self) -> bool {
        true
    }
    /// Called before the entries of an object.
    fn begin_object(&mut self, _len: usize) -> bool {
        true
    }
    /// Called for each object key, before the corresponding value.
    fn key(&mut self, _key: &JString) -> bool {
        true
    }
    /// Called after the entries of an object.
    fn end_object(&mut self) -> bool {
        true
    }
    /// Called for the `Invalid` sentinel. Defaults to stopping.
    fn invalid(&mut self) -> bool {
        false
    }
}

/// Walks `value` depth-first, invoking `visitor` for every node.
///
/// Returns `false` as soon as any callback returns `false`, leaving the
/// rest of the tree unvisited.
pub fn traverse(value: &JValue, visitor: &mut impl Visitor) -> bool {
    match value.destructure_ref() {
        DestructuredRef::Invalid => visitor.invalid(),
        DestructuredRef::Null => visitor.null(),
        DestructuredRef::Bool(b) => visitor.boolean(b),
        DestructuredRef::Number(n) => visitor.number(n),
        DestructuredRef::String(s) => visitor.string(s),
        DestructuredRef::Array(a) => {
            if !visitor.begin_array(a.len()) {
                return false;
            }
            for v in a.iter() {
                if !traverse(v, visitor) {
                    return false;
                }
            }
            visitor.end_array()
        }
        DestructuredRef::Object(o) => {
            if !visitor.begin_object(o.len()) {
                return false;
            }
            for (k, v) in o.iter() {
                if !visitor.key(k) {
                    return false;
                }
                if !traverse(v, visitor) {
                    return false;
                }
            }
            visitor.end_object()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vjson;

    #[derive(Default)]
    struct Counter {
        nodes: usize,
        stop_at: Option<usize>,
    }

    impl Counter {
        fn tick(&mut self) -> bool {
            self.nodes += 1;
            self.stop_at != Some(self.nodes)
        }
    }

    impl Visitor for Counter {
        fn null(&mut self) -> bool {
            self.tick()
        }
        fn boolean(&mut self, _: bool) -> bool {
            self.tick()
        }
        fn number(&mut self, _: &JNumber) -> bool {
            self.tick()
        }
        fn string(&mut self, _: &JString) -> bool {
            self.tick()
        }
        fn begin_array(&mut self, _: usize) -> bool {
            self.tick()
        }
        fn begin_object(&mut self, _: usize) -> bool {
            self.tick()
        }
    }

    #[test]
    fn visits_every_node() {
        let v = vjson!({"a": [1, true, null], "b": "x"});
        let mut counter = Counter::default();
        assert!(traverse(&v, &mut counter));
        // object, array, 1, true, null, "x"
        assert_eq!(counter.nodes, 6);
    }

    #[test]
    fn short_circuits() {
        let v = vjson!([1, 2, 3, 4]);
        let mut counter = Counter {
            nodes: 0,
            stop_at: Some(3),
        };
        assert!(!traverse(&v, &mut counter));
        assert_eq!(counter.nodes, 3);
    }

    #[test]
    fn invalid_stops_by_default() {
        let mut arr = crate::JArray::new();
        arr.push(JValue::INVALID).unwrap();
        let mut counter = Counter::default();
        assert!(!traverse(&arr.into(), &mut counter));
    }
}
