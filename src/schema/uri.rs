//! URI scopes and JSON Pointer handling for schema registration and
//! `$ref` resolution.

use url::Url;

use crate::error::Error;

// Base for documents that do not declare an `id` of their own.
pub(crate) const DEFAULT_BASE: &str = "file:///";

/// Escapes a JSON Pointer segment: `~` becomes `~0`, `/` becomes `~1`.
pub(crate) fn escape_pointer_segment(segment: &str) -> String {
    segment.replace('~', "~0").replace('/', "~1")
}

/// Canonicalizes a registry key: a bare trailing `#` is the document
/// itself.
pub(crate) fn normalize_key(uri: &str) -> &str {
    uri.strip_suffix('#').unwrap_or(uri)
}

/// The parse-time scope: a base-URI stack (`id` rebases it) and the JSON
/// Pointer path of the subschema being parsed.
pub(crate) struct UriScope {
    bases: Vec<Url>,
    segments: Vec<String>,
}

impl UriScope {
    pub fn new(base: Url) -> Self {
        UriScope {
            bases: vec![base],
            segments: Vec::new(),
        }
    }

    fn base(&self) -> &Url {
        self.bases.last().expect("scope stack is never empty")
    }

    /// Enters a subschema carrying an `id`, rebasing relative references.
    pub fn push_id(&mut self, id: &str) -> Result<(), Error> {
        let resolved = self
            .base()
            .join(id)
            .map_err(|e| Error::Generic(format!("invalid schema id \"{id}\": {e}")))?;
        self.bases.push(resolved);
        Ok(())
    }

    pub fn pop_id(&mut self) {
        self.bases.pop();
        debug_assert!(!self.bases.is_empty());
    }

    /// The absolute URI the current `id` resolves to.
    pub fn current_id(&self) -> String {
        normalize_key(self.base().as_str()).to_owned()
    }

    pub fn push_segment(&mut self, segment: &str) {
        self.segments.push(escape_pointer_segment(segment));
    }

    pub fn push_index(&mut self, index: usize) {
        self.segments.push(index.to_string());
    }

    pub fn pop_segment(&mut self) {
        self.segments.pop();
    }

    /// The canonical URI of the current subschema: the base plus the JSON
    /// Pointer fragment of the path down to it.
    pub fn current_uri(&self) -> String {
        let base = normalize_key(self.base().as_str());
        if self.segments.is_empty() {
            base.to_owned()
        } else {
            format!("{}#/{}", base, self.segments.join("/"))
        }
    }

    /// Resolves a `$ref` against the current base, yielding the absolute
    /// target URI captured at the reference's lexical site.
    pub fn resolve_reference(&self, reference: &str) -> Result<String, Error> {
        let resolved = self
            .base()
            .join(reference)
            .map_err(|e| Error::Unresolved(format!("{reference} ({e})")))?;
        Ok(normalize_key(resolved.as_str()).to_owned())
    }
}

/// Splits a URI into its document part and optional fragment.
pub(crate) fn split_fragment(uri: &str) -> (&str, Option<&str>) {
    match uri.split_once('#') {
        Some((doc, fragment)) => (doc, Some(fragment)),
        None => (uri, None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_pointer_segments() {
        assert_eq!(escape_pointer_segment("a/b"), "a~1b");
        assert_eq!(escape_pointer_segment("a~b"), "a~0b");
        assert_eq!(escape_pointer_segment("~/"), "~0~1");
        assert_eq!(escape_pointer_segment("plain"), "plain");
    }

    #[test]
    fn tracks_pointer_paths() {
        let mut scope = UriScope::new(Url::parse(DEFAULT_BASE).unwrap());
        scope.push_segment("definitions");
        scope.push_segment("Foo/Bar");
        assert_eq!(scope.current_uri(), "file:///#/definitions/Foo~1Bar");
        scope.pop_segment();
        scope.pop_segment();
        assert_eq!(scope.current_uri(), "file:///");
    }

    #[test]
    fn ids_rebase_references() {
        let mut scope = UriScope::new(Url::parse("file:///schemas/a.json").unwrap());
        assert_eq!(
            scope.resolve_reference("b.json#/definitions/Foo").unwrap(),
            "file:///schemas/b.json#/definitions/Foo"
        );

        scope.push_id("nested/c.json").unwrap();
        assert_eq!(
            scope.resolve_reference("#/x").unwrap(),
            "file:///schemas/nested/c.json#/x"
        );
        scope.pop_id();
        assert_eq!(
            scope.resolve_reference("#").unwrap(),
            "file:///schemas/a.json"
        );
    }
}
