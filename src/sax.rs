//! SAX event model and the incremental JSON tokenizer.
//!
//! The parser is byte-oriented and incremental: [`Parser::feed`] accepts
//! input in arbitrary chunks and pushes events to a [`Handler`] as soon as
//! complete tokens are available, [`Parser::end`] flushes the final token
//! and checks that the document is complete. Numbers keep their lexical
//! form, and strings that needed no unescaping report the byte span of the
//! input they alias, which is what makes no-copy DOM strings possible.

use std::fmt::{self, Debug, Formatter};
use std::ops::{Deref, Range};

use crate::error::Error;
use crate::generate::number_lexeme;
use crate::value::{DestructuredRef, JValue};

/// Decoded string text, plus the input byte span it aliases when the raw
/// bytes needed no unescaping.
#[derive(Clone)]
pub struct Text<'a> {
    text: &'a str,
    span: Option<Range<usize>>,
}

impl<'a> Text<'a> {
    /// Wraps decoded text with no backing span.
    #[must_use]
    pub fn new(text: &'a str) -> Self {
        Text { text, span: None }
    }

    fn with_span(text: &'a str, span: Range<usize>) -> Self {
        Text {
            text,
            span: Some(span),
        }
    }

    /// Borrows the decoded text.
    #[must_use]
    pub fn as_str(&self) -> &'a str {
        self.text
    }

    /// Returns the absolute byte range of the input this text aliases,
    /// when the raw bytes are the text (no escape sequences).
    #[must_use]
    pub fn span(&self) -> Option<Range<usize>> {
        self.span.clone()
    }
}

impl Deref for Text<'_> {
    type Target = str;
    fn deref(&self) -> &str {
        self.text
    }
}

impl Debug for Text<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Debug::fmt(self.text, f)
    }
}

/// A lexical event produced by the tokenizer.
#[derive(Clone, Debug)]
pub enum Event<'a> {
    /// `{`
    ObjectBegin,
    /// An object key.
    ObjectKey(Text<'a>),
    /// `}`
    ObjectEnd,
    /// `[`
    ArrayBegin,
    /// `]`
    ArrayEnd,
    /// A string value.
    String(Text<'a>),
    /// A number value, in its original lexical form.
    Number(&'a str),
    /// `true` or `false`.
    Bool(bool),
    /// `null`
    Null,
}

/// A consumer of SAX events.
///
/// Returning an error aborts the parse; whatever partial state the handler
/// accumulated is released when it drops.
pub trait Handler {
    /// Consumes one event.
    fn event(&mut self, event: Event<'_>) -> Result<(), Error>;
}

/// Replays a value tree as SAX events, as if it had just been parsed.
///
/// Fails on the `Invalid` sentinel.
pub fn replay(value: &JValue, handler: &mut impl Handler) -> Result<(), Error> {
    match value.destructure_ref() {
        DestructuredRef::Invalid => Err(Error::Generic("cannot replay an invalid value".into())),
        DestructuredRef::Null => handler.event(Event::Null),
        DestructuredRef::Bool(b) => handler.event(Event::Bool(b)),
        DestructuredRef::Number(n) => handler.event(Event::Number(&number_lexeme(n))),
        DestructuredRef::String(s) => handler.event(Event::String(Text::new(s.as_str()))),
        DestructuredRef::Array(a) => {
            handler.event(Event::ArrayBegin)?;
            for v in a.iter() {
                replay(v, handler)?;
            }
            handler.event(Event::ArrayEnd)
        }
        DestructuredRef::Object(o) => {
            handler.event(Event::ObjectBegin)?;
            for (k, v) in o.iter() {
                handler.event(Event::ObjectKey(Text::new(k.as_str())))?;
                replay(v, handler)?;
            }
            handler.event(Event::ObjectEnd)
        }
    }
}

/// Tokenizer options.
#[derive(Clone, Debug, Default)]
pub struct ParserOptions {
    /// Accept JavaScript-style `//` and `/* */` comments. Schema documents
    /// enable this; data JSON stays strict.
    pub allow_comments: bool,
}

#[derive(Copy, Clone, Debug, PartialEq)]
enum Ctx {
    Object,
    Array,
}

#[derive(Copy, Clone, Debug, PartialEq)]
enum Expect {
    Value,
    ValueOrArrayEnd,
    KeyOrObjectEnd,
    Key,
    Colon,
    CommaOrEnd,
}

enum Step {
    Progress,
    NeedMore,
}

// Outcome of scanning a string token.
enum StrLoc {
    // Local range of the raw bytes; no escapes.
    Plain(Range<usize>),
    // Escapes were decoded into the scratch buffer.
    Decoded,
}

/// The incremental JSON tokenizer.
pub struct Parser {
    opts: ParserOptions,
    buf: Vec<u8>,
    pos: usize,
    // Bytes already drained from the front of `buf`; absolute offset of
    // `buf[0]` in the input stream.
    consumed: usize,
    eof: bool,
    failed: bool,
    stack: Vec<Ctx>,
    expect: Expect,
    scratch: String,
}

impl Parser {
    /// Creates a strict parser.
    #[must_use]
    pub fn new() -> Self {
        Self::with_options(ParserOptions::default())
    }

    /// Creates a parser with explicit options.
    #[must_use]
    pub fn with_options(opts: ParserOptions) -> Self {
        Parser {
            opts,
            buf: Vec::new(),
            pos: 0,
            consumed: 0,
            eof: false,
            failed: false,
            stack: Vec::new(),
            expect: Expect::Value,
            scratch: String::new(),
        }
    }

    /// The absolute byte offset of the parse cursor.
    #[must_use]
    pub fn offset(&self) -> usize {
        self.consumed + self.pos
    }

    fn fail(&mut self, message: impl Into<String>) -> Error {
        self.failed = true;
        Error::Lexical {
            offset: self.offset(),
            message: message.into(),
        }
    }

    /// Feeds a chunk of input, pushing every completed event to `handler`.
    pub fn feed(&mut self, bytes: &[u8], handler: &mut impl Handler) -> Result<(), Error> {
        if self.failed {
            return Err(Error::Generic("parser already failed".into()));
        }
        self.buf.extend_from_slice(bytes);
        self.run(handler)
    }

    /// Marks the end of input, flushes any final token and verifies the
    /// document is complete.
    pub fn end(&mut self, handler: &mut impl Handler) -> Result<(), Error> {
        if self.failed {
            return Err(Error::Generic("parser already failed".into()));
        }
        self.eof = true;
        self.run(handler)?;
        if self.expect == Expect::CommaOrEnd && self.stack.is_empty() {
            Ok(())
        } else {
            Err(self.fail("unexpected end of input"))
        }
    }

    fn run(&mut self, handler: &mut impl Handler) -> Result<(), Error> {
        loop {
            match self.step(handler) {
                Ok(Step::Progress) => {}
                Ok(Step::NeedMore) => break,
                Err(e) => {
                    self.failed = true;
                    return Err(e);
                }
            }
        }
        // Keep the retained tail small in streaming use
        if self.pos > 4096 {
            self.buf.drain(..self.pos);
            self.consumed += self.pos;
            self.pos = 0;
        }
        Ok(())
    }

    fn skip_trivia(&mut self) -> Result<Step, Error> {
        loop {
            match self.buf.get(self.pos) {
                Some(b' ') | Some(b'\t') | Some(b'\n') | Some(b'\r') => self.pos += 1,
                Some(b'/') if self.opts.allow_comments => match self.buf.get(self.pos + 1) {
                    None if !self.eof => return Ok(Step::NeedMore),
                    Some(b'/') => {
                        match self.buf[self.pos..].iter().position(|&b| b == b'\n') {
                            Some(nl) => self.pos += nl + 1,
                            None if self.eof => {
                                self.pos = self.buf.len();
                                return Ok(Step::Progress);
                            }
                            None => return Ok(Step::NeedMore),
                        }
                    }
                    Some(b'*') => {
                        let body = &self.buf[self.pos + 2..];
                        match body.windows(2).position(|w| w == b"*/") {
                            Some(close) => self.pos += 2 + close + 2,
                            None if self.eof => return Err(self.fail("unterminated comment")),
                            None => return Ok(Step::NeedMore),
                        }
                    }
                    _ => return Err(self.fail("unexpected character '/'")),
                },
                _ => return Ok(Step::Progress),
            }
        }
    }

    fn after_value(&mut self) {
        self.expect = Expect::CommaOrEnd;
    }

    fn step(&mut self, handler: &mut impl Handler) -> Result<Step, Error> {
        if let Step::NeedMore = self.skip_trivia()? {
            return Ok(Step::NeedMore);
        }
        let c = match self.buf.get(self.pos) {
            Some(&c) => c,
            None => {
                // Completion or truncation is judged by `end`
                return Ok(Step::NeedMore);
            }
        };

        match self.expect {
            Expect::KeyOrObjectEnd | Expect::Key => match c {
                b'}' if self.expect == Expect::KeyOrObjectEnd => {
                    self.pos += 1;
                    self.stack.pop();
                    handler.event(Event::ObjectEnd)?;
                    self.after_value();
                    Ok(Step::Progress)
                }
                b'"' => {
                    let loc = match self.scan_string()? {
                        Some(loc) => loc,
                        None => return Ok(Step::NeedMore),
                    };
                    self.expect = Expect::Colon;
                    let text = self.resolve_text(loc);
                    handler.event(Event::ObjectKey(text))?;
                    Ok(Step::Progress)
                }
                _ => Err(self.fail("expected object key")),
            },
            Expect::Colon => {
                if c == b':' {
                    self.pos += 1;
                    self.expect = Expect::Value;
                    Ok(Step::Progress)
                } else {
                    Err(self.fail("expected ':'"))
                }
            }
            Expect::CommaOrEnd => match self.stack.last() {
                None => Err(self.fail("trailing characters after JSON document")),
                Some(Ctx::Array) => match c {
                    b',' => {
                        self.pos += 1;
                        self.expect = Expect::Value;
                        Ok(Step::Progress)
                    }
                    b']' => {
                        self.pos += 1;
                        self.stack.pop();
                        handler.event(Event::ArrayEnd)?;
                        self.after_value();
                        Ok(Step::Progress)
                    }
                    _ => Err(self.fail("expected ',' or ']'")),
                },
                Some(Ctx::Object) => match c {
                    b',' => {
                        self.pos += 1;
                        self.expect = Expect::Key;
                        Ok(Step::Progress)
                    }
                    b'}' => {
                        self.pos += 1;
                        self.stack.pop();
                        handler.event(Event::ObjectEnd)?;
                        self.after_value();
                        Ok(Step::Progress)
                    }
                    _ => Err(self.fail("expected ',' or '}'")),
                },
            },
            Expect::Value | Expect::ValueOrArrayEnd => {
                if c == b']' && self.expect == Expect::ValueOrArrayEnd {
                    self.pos += 1;
                    self.stack.pop();
                    handler.event(Event::ArrayEnd)?;
                    self.after_value();
                    return Ok(Step::Progress);
                }
                match c {
                    b'{' => {
                        self.pos += 1;
                        self.stack.push(Ctx::Object);
                        self.expect = Expect::KeyOrObjectEnd;
                        handler.event(Event::ObjectBegin)?;
                        Ok(Step::Progress)
                    }
                    b'[' => {
                        self.pos += 1;
                        self.stack.push(Ctx::Array);
                        self.expect = Expect::ValueOrArrayEnd;
                        handler.event(Event::ArrayBegin)?;
                        Ok(Step::Progress)
                    }
                    b'"' => {
                        let loc = match self.scan_string()? {
                            Some(loc) => loc,
                            None => return Ok(Step::NeedMore),
                        };
                        self.after_value();
                        let text = self.resolve_text(loc);
                        handler.event(Event::String(text))?;
                        Ok(Step::Progress)
                    }
                    b't' => self.scan_literal(b"true", handler, Event::Bool(true)),
                    b'f' => self.scan_literal(b"false", handler, Event::Bool(false)),
                    b'n' => self.scan_literal(b"null", handler, Event::Null),
                    b'-' | b'0'..=b'9' => self.scan_number(handler),
                    _ => Err(self.fail("expected a JSON value")),
                }
            }
        }
    }

    fn scan_literal(
        &mut self,
        literal: &'static [u8],
        handler: &mut impl Handler,
        event: Event<'static>,
    ) -> Result<Step, Error> {
        let end = self.pos + literal.len();
        if end > self.buf.len() {
            if self.eof {
                return Err(self.fail("invalid literal"));
            }
            return Ok(Step::NeedMore);
        }
        if &self.buf[self.pos..end] != literal {
            return Err(self.fail("invalid literal"));
        }
        self.pos = end;
        self.after_value();
        handler.event(event)?;
        Ok(Step::Progress)
    }

    fn scan_number(&mut self, handler: &mut impl Handler) -> Result<Step, Error> {
        let start = self.pos;
        let mut end = start;
        while let Some(&b) = self.buf.get(end) {
            match b {
                b'0'..=b'9' | b'-' | b'+' | b'.' | b'e' | b'E' => end += 1,
                _ => break,
            }
        }
        if end == self.buf.len() && !self.eof {
            // The number might continue in the next chunk
            return Ok(Step::NeedMore);
        }
        let lexeme = &self.buf[start..end];
        if !crate::number::is_json_number(lexeme) {
            return Err(self.fail("malformed number"));
        }
        self.pos = end;
        self.after_value();
        // Safety: the number grammar is pure ASCII
        let lexeme = unsafe { std::str::from_utf8_unchecked(&self.buf[start..end]) };
        handler.event(Event::Number(lexeme))?;
        Ok(Step::Progress)
    }

    /// Scans the string token starting at `pos` (which holds `"`).
    /// Returns `None` when the closing quote is not in the buffer yet.
    fn scan_string(&mut self) -> Result<Option<StrLoc>, Error> {
        let start = self.pos + 1;
        let mut i = start;
        let mut has_escape = false;
        loop {
            match self.buf.get(i) {
                None => {
                    if self.eof {
                        return Err(self.fail("unterminated string"));
                    }
                    return Ok(None);
                }
                Some(b'"') => break,
                Some(b'\\') => {
                    has_escape = true;
                    i += 2;
                }
                Some(&b) if b < 0x20 => {
                    return Err(self.fail("control character in string"));
                }
                Some(_) => i += 1,
            }
        }

        let range = start..i;
        self.pos = i + 1;
        if has_escape {
            self.decode_escapes(range)?;
            Ok(Some(StrLoc::Decoded))
        } else {
            if std::str::from_utf8(&self.buf[range.clone()]).is_err() {
                return Err(self.fail("invalid UTF-8 in string"));
            }
            Ok(Some(StrLoc::Plain(range)))
        }
    }

    fn resolve_text(&self, loc: StrLoc) -> Text<'_> {
        match loc {
            StrLoc::Plain(range) => {
                let absolute = self.consumed + range.start..self.consumed + range.end;
                // Safety: validated in `scan_string`
                let text = unsafe { std::str::from_utf8_unchecked(&self.buf[range]) };
                Text::with_span(text, absolute)
            }
            StrLoc::Decoded => Text::new(&self.scratch),
        }
    }

    fn decode_escapes(&mut self, range: Range<usize>) -> Result<(), Error> {
        let offset = self.consumed + range.start;
        let seg: &[u8] = &self.buf[range];
        let mut out = std::mem::take(&mut self.scratch);
        out.clear();

        let bad = |msg: &str, at: usize| Error::Lexical {
            offset: offset + at,
            message: msg.into(),
        };
        let hex4 = |k: usize| -> Result<u32, Error> {
            let digits = seg
                .get(k..k + 4)
                .ok_or_else(|| bad("truncated \\u escape", k))?;
            let text = std::str::from_utf8(digits).map_err(|_| bad("invalid \\u escape", k))?;
            u32::from_str_radix(text, 16).map_err(|_| bad("invalid \\u escape", k))
        };

        let mut k = 0;
        let mut result = Ok(());
        while k < seg.len() {
            if seg[k] != b'\\' {
                let next = seg[k..]
                    .iter()
                    .position(|&b| b == b'\\')
                    .map_or(seg.len(), |p| k + p);
                match std::str::from_utf8(&seg[k..next]) {
                    Ok(text) => out.push_str(text),
                    Err(_) => {
                        result = Err(bad("invalid UTF-8 in string", k));
                        break;
                    }
                }
                k = next;
                continue;
            }
            let esc = match seg.get(k + 1) {
                Some(&e) => e,
                None => {
                    result = Err(bad("truncated escape", k));
                    break;
                }
            };
            match esc {
                b'"' => out.push('"'),
                b'\\' => out.push('\\'),
                b'/' => out.push('/'),
                b'b' => out.push('\u{8}'),
                b'f' => out.push('\u{c}'),
                b'n' => out.push('\n'),
                b'r' => out.push('\r'),
                b't' => out.push('\t'),
                b'u' => {
                    let unit = match hex4(k + 2) {
                        Ok(u) => u,
                        Err(e) => {
                            result = Err(e);
                            break;
                        }
                    };
                    if (0xD800..0xDC00).contains(&unit) {
                        // High surrogate: a low surrogate must follow
                        if seg.get(k + 6) == Some(&b'\\') && seg.get(k + 7) == Some(&b'u') {
                            let low = match hex4(k + 8) {
                                Ok(u) => u,
                                Err(e) => {
                                    result = Err(e);
                                    break;
                                }
                            };
                            if !(0xDC00..0xE000).contains(&low) {
                                result = Err(bad("unpaired surrogate", k));
                                break;
                            }
                            let cp = 0x10000 + ((unit - 0xD800) << 10) + (low - 0xDC00);
                            out.push(char::from_u32(cp).expect("valid surrogate pair"));
                            k += 12;
                            continue;
                        }
                        result = Err(bad("unpaired surrogate", k));
                        break;
                    } else if (0xDC00..0xE000).contains(&unit) {
                        result = Err(bad("unpaired surrogate", k));
                        break;
                    } else {
                        out.push(char::from_u32(unit).expect("checked code point"));
                        k += 6;
                        continue;
                    }
                }
                _ => {
                    result = Err(bad("invalid escape", k));
                    break;
                }
            }
            k += 2;
        }

        self.scratch = out;
        if result.is_err() {
            self.failed = true;
        }
        result
    }
}

impl Default for Parser {
    fn default() -> Self {
        Self::new()
    }
}

impl Debug for Parser {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Parser")
            .field("offset", &self.offset())
            .field("depth", &self.stack.len())
            .finish()
    }
}

/// Parses a complete document in one call, pushing events to `handler`.
pub fn parse_bytes(
    bytes: &[u8],
    opts: ParserOptions,
    handler: &mut impl Handler,
) -> Result<(), Error> {
    let mut parser = Parser::with_options(opts);
    parser.feed(bytes, handler)?;
    parser.end(handler)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder(Vec<String>);

    impl Handler for Recorder {
        fn event(&mut self, event: Event<'_>) -> Result<(), Error> {
            self.0.push(match event {
                Event::ObjectBegin => "{".into(),
                Event::ObjectKey(k) => format!("key:{}", k.as_str()),
                Event::ObjectEnd => "}".into(),
                Event::ArrayBegin => "[".into(),
                Event::ArrayEnd => "]".into(),
                Event::String(s) => format!("str:{}", s.as_str()),
                Event::Number(n) => format!("num:{n}"),
                Event::Bool(b) => format!("bool:{b}"),
                Event::Null => "null".into(),
            });
            Ok(())
        }
    }

    fn events(input: &str) -> Vec<String> {
        let mut rec = Recorder::default();
        parse_bytes(input.as_bytes(), ParserOptions::default(), &mut rec).unwrap();
        rec.0
    }

    fn error_of(input: &str) -> Error {
        let mut rec = Recorder::default();
        parse_bytes(input.as_bytes(), ParserOptions::default(), &mut rec).unwrap_err()
    }

    #[test]
    fn tokenizes_nested_document() {
        assert_eq!(
            events(r#"{"a": [1, -2.5e3, "x", null, true], "b": {}}"#),
            [
                "{",
                "key:a",
                "[",
                "num:1",
                "num:-2.5e3",
                "str:x",
                "null",
                "bool:true",
                "]",
                "key:b",
                "{",
                "}",
                "}"
            ]
        );
    }

    #[test]
    fn scalar_roots_are_allowed() {
        assert_eq!(events("42"), ["num:42"]);
        assert_eq!(events(r#""hi""#), ["str:hi"]);
    }

    #[test]
    fn decodes_escapes_and_surrogates() {
        assert_eq!(
            events(r#""a\"\\\/\b\f\n\r\t\u0041\ud83e\udd80""#),
            ["str:a\"\\/\u{8}\u{c}\n\r\t\u{41}🦀"]
        );
    }

    #[test]
    fn plain_strings_carry_spans() {
        struct Spans(Vec<Option<Range<usize>>>);
        impl Handler for Spans {
            fn event(&mut self, event: Event<'_>) -> Result<(), Error> {
                if let Event::String(s) = event {
                    self.0.push(s.span());
                }
                Ok(())
            }
        }
        let mut spans = Spans(Vec::new());
        let input = br#"["plain", "esc\n"]"#;
        parse_bytes(input, ParserOptions::default(), &mut spans).unwrap();
        assert_eq!(spans.0, [Some(2..7), None]);
    }

    #[test]
    fn feed_boundaries_do_not_matter() {
        let input = r#"{"key": [12345, "split string", false]}"#;
        let whole = events(input);
        for split in 1..input.len() {
            let mut rec = Recorder::default();
            let mut parser = Parser::new();
            parser.feed(&input.as_bytes()[..split], &mut rec).unwrap();
            parser.feed(&input.as_bytes()[split..], &mut rec).unwrap();
            parser.end(&mut rec).unwrap();
            assert_eq!(rec.0, whole, "split at {split}");
        }
    }

    #[test]
    fn comments_only_when_enabled() {
        let input = "// leading\n{\"a\": /* inline */ 1}\n";
        let mut rec = Recorder::default();
        let opts = ParserOptions {
            allow_comments: true,
        };
        parse_bytes(input.as_bytes(), opts, &mut rec).unwrap();
        assert_eq!(rec.0, ["{", "key:a", "num:1", "}"]);

        assert_eq!(error_of(input).code(), crate::ErrorCode::Lexical);
    }

    #[test]
    fn reports_offsets() {
        match error_of("[1, 2, oops]") {
            Error::Lexical { offset, .. } => assert_eq!(offset, 7),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn rejects_malformed_documents() {
        for bad in [
            "", "{", "[1,", "[1 2]", "{\"a\" 1}", "{\"a\":}", "tru", "01", "1.", "\"\\q\"",
            "\"\\ud800\"", "[1]]", "{}{}",
        ] {
            let err = error_of(bad);
            assert_eq!(err.code(), crate::ErrorCode::Lexical, "input {bad:?}");
        }
    }

    #[test]
    fn failed_parser_stays_failed() {
        let mut rec = Recorder::default();
        let mut parser = Parser::new();
        assert!(parser.feed(b"nope", &mut rec).is_err());
        assert!(parser.feed(b"[]", &mut rec).is_err());
    }
}
