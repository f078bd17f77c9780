//! The validation state machine: a push-down automaton over SAX events
//! whose frame stack mirrors the JSON nesting of the document.

use std::collections::HashSet;
use std::mem;

use crate::dom::Builder;
use crate::error::Error;
use crate::number::JNumber;
use crate::sax::{replay, Event, Handler};
use crate::value::JValue;

use super::validator::{Additional, ArrayChecks, Items, Kind, ObjectChecks, Validator, ANY};
use super::Schema;

/// A default value the builder must add to the container being closed.
pub(crate) struct Injection {
    /// The property name, or `None` for an array element.
    pub key: Option<String>,
    pub value: JValue,
}

fn event_kind(ev: &Event<'_>) -> &'static str {
    match ev {
        Event::ObjectBegin | Event::ObjectEnd | Event::ObjectKey(_) => "object",
        Event::ArrayBegin | Event::ArrayEnd => "array",
        Event::String(_) => "string",
        Event::Number(_) => "number",
        Event::Bool(_) => "boolean",
        Event::Null => "null",
    }
}

struct ObjectFrame<'s> {
    checks: &'s ObjectChecks,
    seen: HashSet<String>,
    pending: Vec<&'s Validator>,
    count: usize,
    // Materializes the whole object when schema dependencies need it
    capture: Option<Builder>,
}

struct ArrayFrame<'s> {
    checks: &'s ArrayChecks,
    index: usize,
    // uniqueItems: rebuild each element and remember the ones seen
    witness: Option<(Builder, HashSet<JValue>)>,
}

#[derive(Copy, Clone, PartialEq)]
enum BranchKind {
    All,
    Any,
    One,
    Not,
}

struct BranchState<'s> {
    state: ValidationState<'s>,
    error: Option<Error>,
}

struct BranchFrame<'s> {
    kind: BranchKind,
    branches: Vec<BranchState<'s>>,
    depth: usize,
}

struct CaptureFrame<'s> {
    builder: Builder,
    depth: usize,
    members: &'s [JValue],
}

enum Frame<'s> {
    Object(ObjectFrame<'s>),
    Array(ArrayFrame<'s>),
    // Depth counter inside an unconstrained subtree
    Skip(usize),
    Branch(BranchFrame<'s>),
    Capture(CaptureFrame<'s>),
}

/// The push-down automaton validating one value against a schema.
pub(crate) struct ValidationState<'s> {
    schema: &'s Schema,
    root: &'s Validator,
    stack: Vec<Frame<'s>>,
    finished: bool,
}

impl<'s> ValidationState<'s> {
    pub fn new(schema: &'s Schema) -> Self {
        Self::with_root(schema, schema.root_validator())
    }

    pub fn with_root(schema: &'s Schema, root: &'s Validator) -> Self {
        ValidationState {
            schema,
            root,
            stack: Vec::new(),
            finished: false,
        }
    }

    /// Checks one event, returning default injections for the container
    /// the event just closed.
    pub fn check(&mut self, ev: &Event<'_>) -> Result<Vec<Injection>, Error> {
        if self.finished {
            return Err(Error::Generic("event after the document completed".into()));
        }
        self.feed_captures(ev)?;
        self.dispatch(ev)
    }

    /// Fails unless a complete, valid value was consumed.
    pub fn ensure_finished(&self) -> Result<(), Error> {
        if self.finished {
            Ok(())
        } else {
            Err(Error::Generic(
                "input ended before the schema was satisfied".into(),
            ))
        }
    }

    // Object frames materializing their value and array frames tracking
    // uniqueness each get a copy of every event in their subtree.
    fn feed_captures(&mut self, ev: &Event<'_>) -> Result<(), Error> {
        let top = self.stack.len();
        for (i, frame) in self.stack.iter_mut().enumerate() {
            let is_top = i + 1 == top;
            match frame {
                Frame::Object(f) => {
                    if let Some(builder) = &mut f.capture {
                        builder.event(ev.clone())?;
                    }
                }
                Frame::Array(f) => {
                    if let Some((builder, _)) = &mut f.witness {
                        // The array's own closing bracket is not part of
                        // any element
                        if !(is_top && matches!(ev, Event::ArrayEnd)) {
                            builder.event(ev.clone())?;
                        }
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn dispatch(&mut self, ev: &Event<'_>) -> Result<Vec<Injection>, Error> {
        match self.stack.last() {
            Some(Frame::Branch(_)) => return self.branch_event(ev),
            Some(Frame::Capture(_)) => return self.capture_event(ev),
            Some(Frame::Skip(_)) => return self.skip_event(ev),
            _ => {}
        }
        match ev {
            Event::ObjectKey(key) => {
                self.object_key(key.as_str())?;
                Ok(Vec::new())
            }
            Event::ObjectEnd => self.object_end(),
            Event::ArrayEnd => self.array_end(),
            _ => {
                self.value_event(ev)?;
                Ok(Vec::new())
            }
        }
    }

    /// Follows reference nodes through the registry.
    fn deref(&self, mut v: &'s Validator) -> Result<&'s Validator, Error> {
        let mut hops = 0;
        while let Kind::Reference(uri) = &v.kind {
            hops += 1;
            if hops > 32 {
                return Err(Error::Unresolved(format!("reference loop via {uri}")));
            }
            v = self
                .schema
                .lookup(uri)
                .ok_or_else(|| Error::Unresolved(uri.clone()))?;
        }
        Ok(v)
    }

    // The validators the next value event must satisfy. An empty list
    // means anything goes.
    fn expected_validators(&self) -> Result<Vec<&'s Validator>, Error> {
        match self.stack.last() {
            None => Ok(vec![self.root]),
            Some(Frame::Object(f)) => Ok(f.pending.clone()),
            Some(Frame::Array(f)) => match &f.checks.items {
                Items::Any => Ok(Vec::new()),
                Items::Single(node) => Ok(vec![node.as_ref()]),
                Items::Tuple(nodes, additional) => {
                    if let Some(node) = nodes.get(f.index) {
                        Ok(vec![node.as_ref()])
                    } else {
                        match additional {
                            Additional::Any => Ok(Vec::new()),
                            Additional::Schema(node) => Ok(vec![node.as_ref()]),
                            Additional::Forbidden => Err(Error::Range(format!(
                                "array has more than {} items",
                                nodes.len()
                            ))),
                        }
                    }
                }
            },
            _ => Err(Error::Generic("unexpected value".into())),
        }
    }

    fn value_event(&mut self, ev: &Event<'_>) -> Result<(), Error> {
        let expected = self.expected_validators()?;
        match expected.len() {
            0 => self.begin_single(&ANY, ev),
            1 => {
                let v = self.deref(expected[0])?;
                self.begin_single(v, ev)
            }
            _ => {
                // properties and patternProperties can all apply to one
                // value: run them as an implicit allOf
                self.push_branch(BranchKind::All, &expected);
                self.branch_event(ev).map(drop)
            }
        }
    }

    fn push_branch(&mut self, kind: BranchKind, validators: &[&'s Validator]) {
        let branches = validators
            .iter()
            .copied()
            .map(|v| BranchState {
                state: ValidationState::with_root(self.schema, v),
                error: None,
            })
            .collect();
        self.stack.push(Frame::Branch(BranchFrame {
            kind,
            branches,
            depth: 0,
        }));
    }

    fn type_mismatch(&self, expected: &'static str, ev: &Event<'_>) -> Error {
        Error::TypeMismatch {
            expected,
            found: event_kind(ev),
        }
    }

    // Consumes one value with no constraints: scalars finish immediately,
    // containers are skipped wholesale.
    fn any_value(&mut self, ev: &Event<'_>) -> Result<(), Error> {
        match ev {
            Event::ObjectBegin | Event::ArrayBegin => {
                self.stack.push(Frame::Skip(1));
                Ok(())
            }
            _ => self.value_completed(),
        }
    }

    fn begin_single(&mut self, v: &'s Validator, ev: &Event<'_>) -> Result<(), Error> {
        match &v.kind {
            Kind::Any => self.any_value(ev),
            Kind::Null => match ev {
                Event::Null => self.value_completed(),
                _ => Err(self.type_mismatch("null", ev)),
            },
            Kind::Boolean => match ev {
                Event::Bool(_) => self.value_completed(),
                _ => Err(self.type_mismatch("boolean", ev)),
            },
            Kind::Number(checks) => match ev {
                Event::Number(lexeme) => {
                    checks.check(&JNumber::from_lexeme(lexeme))?;
                    self.value_completed()
                }
                _ if !checks.strict => self.any_value(ev),
                _ => Err(self.type_mismatch(
                    if checks.integer { "integer" } else { "number" },
                    ev,
                )),
            },
            Kind::String(checks) => match ev {
                Event::String(text) => {
                    checks.check(text.as_str())?;
                    self.value_completed()
                }
                _ if !checks.strict => self.any_value(ev),
                _ => Err(self.type_mismatch("string", ev)),
            },
            Kind::Array(checks) => match ev {
                Event::ArrayBegin => {
                    let witness = checks
                        .unique_items
                        .then(|| (Builder::new(), HashSet::new()));
                    self.stack.push(Frame::Array(ArrayFrame {
                        checks,
                        index: 0,
                        witness,
                    }));
                    Ok(())
                }
                _ if !checks.strict => self.any_value(ev),
                _ => Err(self.type_mismatch("array", ev)),
            },
            Kind::Object(checks) => match ev {
                Event::ObjectBegin => {
                    let capture = if checks.needs_value() {
                        let mut builder = Builder::new();
                        builder.event(Event::ObjectBegin)?;
                        Some(builder)
                    } else {
                        None
                    };
                    self.stack.push(Frame::Object(ObjectFrame {
                        checks,
                        seen: HashSet::new(),
                        pending: Vec::new(),
                        count: 0,
                        capture,
                    }));
                    Ok(())
                }
                _ if !checks.strict => self.any_value(ev),
                _ => Err(self.type_mismatch("object", ev)),
            },
            Kind::AllOf(children) => self.begin_combinator(BranchKind::All, children, ev),
            Kind::AnyOf(children) => self.begin_combinator(BranchKind::Any, children, ev),
            Kind::OneOf(children) => self.begin_combinator(BranchKind::One, children, ev),
            Kind::Not(child) => {
                self.push_branch(BranchKind::Not, &[child.as_ref()]);
                self.branch_event(ev).map(drop)
            }
            Kind::Enum(members) => {
                self.stack.push(Frame::Capture(CaptureFrame {
                    builder: Builder::new(),
                    depth: 0,
                    members,
                }));
                self.capture_event(ev).map(drop)
            }
            Kind::Reference(_) => {
                let v = self.deref(v)?;
                self.begin_single(v, ev)
            }
        }
    }

    fn begin_combinator(
        &mut self,
        kind: BranchKind,
        children: &'s [super::validator::NodeRef],
        ev: &Event<'_>,
    ) -> Result<(), Error> {
        let refs: Vec<&'s Validator> = children.iter().map(|c| c.as_ref()).collect();
        self.push_branch(kind, &refs);
        self.branch_event(ev).map(drop)
    }

    fn branch_event(&mut self, ev: &Event<'_>) -> Result<Vec<Injection>, Error> {
        let frame = match self.stack.last_mut() {
            Some(Frame::Branch(f)) => f,
            _ => return Err(Error::Generic("validator state out of sync".into())),
        };

        for branch in frame.branches.iter_mut().filter(|b| b.error.is_none()) {
            // Branch outcomes are speculative, so their default
            // injections are discarded
            if let Err(e) = branch.state.check(ev) {
                branch.error = Some(e);
            }
        }
        match ev {
            Event::ObjectBegin | Event::ArrayBegin => frame.depth += 1,
            Event::ObjectEnd | Event::ArrayEnd => frame.depth -= 1,
            _ => {}
        }

        let alive = frame.branches.iter().filter(|b| b.error.is_none()).count();
        let total = frame.branches.len();
        let first_error = || {
            frame
                .branches
                .iter()
                .find_map(|b| b.error.clone())
                .unwrap_or_else(|| Error::Generic("no schema matched".into()))
        };
        match frame.kind {
            BranchKind::All if alive < total => return Err(first_error()),
            BranchKind::Any | BranchKind::One if alive == 0 => return Err(first_error()),
            _ => {}
        }

        if frame.depth > 0 {
            return Ok(Vec::new());
        }

        // The value is complete: settle the combinator
        let frame = match self.stack.pop() {
            Some(Frame::Branch(f)) => f,
            _ => unreachable!("the branch frame was just on top"),
        };
        let alive = frame.branches.iter().filter(|b| b.error.is_none()).count();
        match frame.kind {
            BranchKind::All | BranchKind::Any => {}
            BranchKind::One => {
                if alive != 1 {
                    return Err(Error::Generic(format!(
                        "expected exactly one schema to match, {alive} did"
                    )));
                }
            }
            BranchKind::Not => {
                if alive != 0 {
                    return Err(Error::Generic("value matches a forbidden schema".into()));
                }
            }
        }
        self.value_completed()?;
        Ok(Vec::new())
    }

    fn capture_event(&mut self, ev: &Event<'_>) -> Result<Vec<Injection>, Error> {
        let frame = match self.stack.last_mut() {
            Some(Frame::Capture(f)) => f,
            _ => return Err(Error::Generic("validator state out of sync".into())),
        };
        frame.builder.event(ev.clone())?;
        match ev {
            Event::ObjectBegin | Event::ArrayBegin => frame.depth += 1,
            Event::ObjectEnd | Event::ArrayEnd => frame.depth -= 1,
            _ => {}
        }
        if frame.depth > 0 {
            return Ok(Vec::new());
        }

        let frame = match self.stack.pop() {
            Some(Frame::Capture(f)) => f,
            _ => unreachable!("the capture frame was just on top"),
        };
        let value = frame.builder.finish()?;
        if !frame.members.iter().any(|m| m == &value) {
            return Err(Error::Generic(
                "value is not one of the enumerated values".into(),
            ));
        }
        self.value_completed()?;
        Ok(Vec::new())
    }

    fn skip_event(&mut self, ev: &Event<'_>) -> Result<Vec<Injection>, Error> {
        let depth = match self.stack.last_mut() {
            Some(Frame::Skip(depth)) => depth,
            _ => return Err(Error::Generic("validator state out of sync".into())),
        };
        match ev {
            Event::ObjectBegin | Event::ArrayBegin => *depth += 1,
            Event::ObjectEnd | Event::ArrayEnd => {
                *depth -= 1;
                if *depth == 0 {
                    self.stack.pop();
                    self.value_completed()?;
                }
            }
            _ => {}
        }
        Ok(Vec::new())
    }

    fn object_key(&mut self, key: &str) -> Result<(), Error> {
        let frame = match self.stack.last_mut() {
            Some(Frame::Object(f)) => f,
            _ => return Err(Error::Generic("unexpected object key".into())),
        };
        frame.count += 1;
        frame.seen.insert(key.to_owned());

        let mut pending: Vec<&'s Validator> = Vec::new();
        if let Some(node) = frame.checks.properties.get(key) {
            pending.push(node.as_ref());
        }
        for (pattern, node) in &frame.checks.pattern_properties {
            if pattern.is_match(key) {
                pending.push(node.as_ref());
            }
        }
        if pending.is_empty() {
            match &frame.checks.additional {
                Additional::Any => {}
                Additional::Schema(node) => pending.push(node.as_ref()),
                Additional::Forbidden => {
                    return Err(Error::Generic(format!(
                        "property \"{key}\" is not allowed"
                    )))
                }
            }
        }
        frame.pending = pending;
        Ok(())
    }

    fn object_end(&mut self) -> Result<Vec<Injection>, Error> {
        let frame = match self.stack.pop() {
            Some(Frame::Object(f)) => f,
            _ => return Err(Error::Generic("unexpected end of object".into())),
        };
        let checks = frame.checks;

        for required in &checks.required {
            if !frame.seen.contains(required) {
                return Err(Error::MissingRequired(required.clone()));
            }
        }
        checks.check_count(frame.count)?;

        let captured = frame.capture.map(Builder::finish).transpose()?;
        for (key, dependency) in &checks.dependencies {
            if !frame.seen.contains(key) {
                continue;
            }
            match dependency {
                super::validator::Dependency::Keys(names) => {
                    for name in names {
                        if !frame.seen.contains(name) {
                            return Err(Error::MissingRequired(name.clone()));
                        }
                    }
                }
                super::validator::Dependency::Schema(node) => {
                    let value = captured
                        .as_ref()
                        .expect("capture is active when schema dependencies exist");
                    validate_with_root(self.schema, node, value)?;
                }
            }
        }

        let mut injections = Vec::new();
        for (name, node) in &checks.properties {
            if !frame.seen.contains(name) {
                if let Some(default) = node.default_value() {
                    injections.push(Injection {
                        key: Some(name.clone()),
                        value: default.clone(),
                    });
                }
            }
        }

        self.value_completed()?;
        Ok(injections)
    }

    fn array_end(&mut self) -> Result<Vec<Injection>, Error> {
        let frame = match self.stack.pop() {
            Some(Frame::Array(f)) => f,
            _ => return Err(Error::Generic("unexpected end of array".into())),
        };
        frame.checks.check_len(frame.index)?;

        // Defaults fill the omitted tuple tail, as far as they run
        // contiguously
        let mut injections = Vec::new();
        if let Items::Tuple(nodes, _) = &frame.checks.items {
            for node in nodes.iter().skip(frame.index) {
                match node.default_value() {
                    Some(default) => injections.push(Injection {
                        key: None,
                        value: default.clone(),
                    }),
                    None => break,
                }
            }
        }

        self.value_completed()?;
        Ok(injections)
    }

    // A complete value was consumed at the current level.
    fn value_completed(&mut self) -> Result<(), Error> {
        match self.stack.last_mut() {
            None => {
                self.finished = true;
                Ok(())
            }
            Some(Frame::Object(f)) => {
                f.pending.clear();
                Ok(())
            }
            Some(Frame::Array(f)) => {
                f.index += 1;
                if let Some((builder, seen)) = &mut f.witness {
                    let element = mem::replace(builder, Builder::new()).finish()?;
                    if !seen.insert(element) {
                        return Err(Error::Duplicate("array items are not unique".into()));
                    }
                }
                Ok(())
            }
            Some(_) => Ok(()),
        }
    }
}

/// Validates a finished value against a validator node by replaying it as
/// SAX events.
pub(crate) fn validate_with_root(
    schema: &Schema,
    root: &Validator,
    value: &JValue,
) -> Result<(), Error> {
    let mut state = ValidationState::with_root(schema, root);
    struct Check<'a, 's>(&'a mut ValidationState<'s>);
    impl Handler for Check<'_, '_> {
        fn event(&mut self, event: Event<'_>) -> Result<(), Error> {
            self.0.check(&event).map(drop)
        }
    }
    replay(value, &mut Check(&mut state))?;
    state.ensure_finished()
}
