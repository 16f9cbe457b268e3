//! Generic model of PHP's `serialize()` format.
//!
//! Every token the format can produce is represented, so any blob accepted by
//! [`Value::parse`] is re-emitted byte-for-byte by [`Value::serialize`]. Floats
//! keep their original textual form for that reason.

use crate::error::{ErrorKind, Result};
use exn::{OptionExt, ResultExt};
use std::fmt::{Display, Formatter, Result as FmtResult, Write};

/// Nesting deeper than this is rejected instead of risking the stack.
const MAX_DEPTH: usize = 64;

/// A single serialized value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    /// `N;`
    Null,
    /// `b:0;` or `b:1;`
    Bool(bool),
    /// `i:42;`
    Int(i64),
    /// `d:0.5;`, text kept verbatim (including `INF`, `-INF` and `NAN`).
    Float(String),
    /// `s:5:"hello";`, the length prefix counts bytes.
    String(String),
    /// `a:1:{...}`
    Array(Array),
    /// `O:8:"stdClass":1:{...}`
    Object { class: String, properties: Array },
    /// `r:1;` (`strong: false`) or `R:1;` (`strong: true`).
    Reference { strong: bool, index: i64 },
}

/// Key of an [`Array`] entry; PHP only allows integers and strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Key {
    Int(i64),
    String(String),
}

/// An ordered PHP array (insertion order is significant when serialized).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Array {
    entries: Vec<(Key, Value)>,
}

impl Key {
    /// Returns the string content if this is a string key.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            Self::Int(_) => None,
        }
    }

    fn serialize_into(&self, out: &mut String) {
        match self {
            Self::Int(i) => _ = write!(out, "i:{i};"),
            Self::String(s) => _ = write!(out, "s:{}:\"{s}\";", s.len()),
        }
    }
}
impl Display for Key {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::Int(i) => write!(f, "{i}"),
            Self::String(s) => f.write_str(s),
        }
    }
}
impl From<&str> for Key {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl Array {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Look up an entry by string key.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.iter().find(|(k, _)| k.as_str() == Some(key)).map(|(_, v)| v)
    }

    /// Insert an entry, replacing (in place) any entry with the same key.
    pub fn insert(&mut self, key: impl Into<Key>, value: Value) {
        let key = key.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some((_, existing)) => *existing = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &(Key, Value)> {
        self.entries.iter()
    }

    fn serialize_into(&self, out: &mut String) {
        _ = write!(out, "{}:{{", self.entries.len());
        for (key, value) in &self.entries {
            key.serialize_into(out);
            value.serialize_into(out);
        }
        out.push('}');
    }
}
impl FromIterator<(Key, Value)> for Array {
    fn from_iter<T: IntoIterator<Item = (Key, Value)>>(iter: T) -> Self {
        let mut array = Self::new();
        for (key, value) in iter {
            array.insert(key, value);
        }
        array
    }
}
impl IntoIterator for Array {
    type Item = (Key, Value);
    type IntoIter = std::vec::IntoIter<(Key, Value)>;
    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

impl Value {
    /// Parse a complete serialized blob. Trailing whitespace is tolerated,
    /// anything else after the first value is not.
    pub fn parse(input: &str) -> Result<Self> {
        let mut parser = Parser { input: input.as_bytes(), pos: 0 };
        let value = parser.value(0)?;
        if parser.input[parser.pos..].iter().any(|b| !b.is_ascii_whitespace()) {
            exn::bail!(ErrorKind::TrailingData(parser.pos));
        }
        Ok(value)
    }

    /// Serialize back into PHP's `serialize()` format.
    pub fn serialize(&self) -> String {
        let mut out = String::new();
        self.serialize_into(&mut out);
        out
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&Array> {
        match self {
            Self::Array(a) => Some(a),
            _ => None,
        }
    }

    /// Best-effort unsigned integer view; WordPress stores dimensions as
    /// either integers or numeric strings depending on the plugin.
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Self::Int(i) => u64::try_from(*i).ok(),
            Self::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    fn serialize_into(&self, out: &mut String) {
        match self {
            Self::Null => out.push_str("N;"),
            Self::Bool(b) => _ = write!(out, "b:{};", u8::from(*b)),
            Self::Int(i) => _ = write!(out, "i:{i};"),
            Self::Float(raw) => _ = write!(out, "d:{raw};"),
            Self::String(s) => _ = write!(out, "s:{}:\"{s}\";", s.len()),
            Self::Array(array) => {
                out.push_str("a:");
                array.serialize_into(out);
            },
            Self::Object { class, properties } => {
                _ = write!(out, "O:{}:\"{class}\":", class.len());
                properties.serialize_into(out);
            },
            Self::Reference { strong, index } => _ = write!(out, "{}:{index};", if *strong { 'R' } else { 'r' }),
        }
    }
}
impl Display for Value {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(&self.serialize())
    }
}

struct Parser<'a> {
    input: &'a [u8],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn syntax(&self, reason: &'static str) -> ErrorKind {
        ErrorKind::Syntax { offset: self.pos, reason }
    }

    fn next(&mut self) -> Result<u8> {
        let byte = self.input.get(self.pos).copied().ok_or_raise(|| self.syntax("unexpected end of input"))?;
        self.pos += 1;
        Ok(byte)
    }

    fn expect(&mut self, expected: u8, reason: &'static str) -> Result<()> {
        if self.next()? != expected {
            self.pos -= 1;
            exn::bail!(self.syntax(reason));
        }
        Ok(())
    }

    /// Consume bytes up to (and including) `terminator`, returning the bytes before it.
    fn until(&mut self, terminator: u8) -> Result<&'a [u8]> {
        let rest = &self.input[self.pos..];
        let Some(len) = rest.iter().position(|b| *b == terminator) else {
            exn::bail!(self.syntax("unterminated token"));
        };
        self.pos += len + 1;
        Ok(&rest[..len])
    }

    fn integer(&mut self, terminator: u8) -> Result<i64> {
        let start = self.pos;
        let digits = self.until(terminator)?;
        std::str::from_utf8(digits)
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or_raise(|| ErrorKind::Syntax { offset: start, reason: "invalid integer" })
    }

    fn length(&mut self) -> Result<usize> {
        let start = self.pos;
        let value = self.integer(b':')?;
        usize::try_from(value).or_raise(|| ErrorKind::Syntax { offset: start, reason: "negative length" })
    }

    /// Reads `"<len bytes>"`, the quotes included.
    fn quoted(&mut self, len: usize) -> Result<String> {
        self.expect(b'"', "expected opening quote")?;
        let start = self.pos;
        let end = start.checked_add(len).filter(|end| *end <= self.input.len());
        let Some(end) = end else {
            exn::bail!(self.syntax("string length exceeds input"));
        };
        let bytes = &self.input[start..end];
        let text = std::str::from_utf8(bytes)
            .or_raise(|| ErrorKind::Syntax { offset: start, reason: "string is not valid UTF-8" })?;
        self.pos = end;
        self.expect(b'"', "string length does not match its content")?;
        Ok(text.to_string())
    }

    fn value(&mut self, depth: usize) -> Result<Value> {
        if depth > MAX_DEPTH {
            exn::bail!(self.syntax("nesting too deep"));
        }
        let tag = self.next()?;
        Ok(match tag {
            b'N' => {
                self.expect(b';', "expected ';'")?;
                Value::Null
            },
            b'b' => {
                self.expect(b':', "expected ':'")?;
                match self.integer(b';')? {
                    0 => Value::Bool(false),
                    1 => Value::Bool(true),
                    _ => exn::bail!(self.syntax("boolean must be 0 or 1")),
                }
            },
            b'i' => {
                self.expect(b':', "expected ':'")?;
                Value::Int(self.integer(b';')?)
            },
            b'd' => {
                self.expect(b':', "expected ':'")?;
                let start = self.pos;
                let raw = std::str::from_utf8(self.until(b';')?).unwrap_or_default();
                let valid = matches!(raw, "INF" | "-INF" | "NAN") || raw.parse::<f64>().is_ok();
                if !valid {
                    exn::bail!(ErrorKind::Syntax { offset: start, reason: "invalid float" });
                }
                Value::Float(raw.to_string())
            },
            b's' => {
                self.expect(b':', "expected ':'")?;
                let len = self.length()?;
                let text = self.quoted(len)?;
                self.expect(b';', "expected ';'")?;
                Value::String(text)
            },
            b'a' => {
                self.expect(b':', "expected ':'")?;
                Value::Array(self.entries(depth)?)
            },
            b'O' => {
                self.expect(b':', "expected ':'")?;
                let len = self.length()?;
                let class = self.quoted(len)?;
                self.expect(b':', "expected ':'")?;
                Value::Object { class, properties: self.entries(depth)? }
            },
            b'r' | b'R' => {
                self.expect(b':', "expected ':'")?;
                Value::Reference { strong: tag == b'R', index: self.integer(b';')? }
            },
            _ => {
                self.pos -= 1;
                exn::bail!(self.syntax("unknown type tag"));
            },
        })
    }

    /// Reads `<count>:{<key><value>...}`.
    fn entries(&mut self, depth: usize) -> Result<Array> {
        let count = self.length()?;
        self.expect(b'{', "expected '{'")?;
        // Don't trust the declared count for the allocation.
        let mut entries = Vec::with_capacity(count.min(64));
        for _ in 0..count {
            let key = match self.value(depth + 1)? {
                Value::Int(i) => Key::Int(i),
                Value::String(s) => Key::String(s),
                _ => exn::bail!(self.syntax("array keys must be integers or strings")),
            };
            let value = self.value(depth + 1)?;
            entries.push((key, value));
        }
        self.expect(b'}', "expected '}'")?;
        Ok(Array { entries })
    }
}
