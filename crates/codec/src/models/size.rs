use super::RemoteDescriptor;
use crate::error::{ErrorKind, Result};
use crate::fields::Fields;
use crate::value::{Array, Key, Value};

const FILE: &str = "file";
const REMOTE: &str = "s3";
const MIME_TYPE: &str = "mime-type";

/// A resized rendition of an attachment (`thumbnail`, `medium`, ...).
#[derive(Debug, Clone)]
pub struct SizeVariant {
    /// File name, relative to the directory of the attachment's primary file.
    pub file_name: String,
    pub remote: Option<RemoteDescriptor>,
    pub mime_type: Option<String>,
    fields: Fields,
}

/// One entry of the `sizes` map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SizeEntry {
    Variant(SizeVariant),
    /// Anything that doesn't look like a size variant; kept verbatim.
    Malformed(Value),
}

/// Ordered map of size name to [`SizeEntry`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Sizes {
    entries: Vec<(Key, SizeEntry)>,
}

impl SizeVariant {
    pub fn new(file_name: impl Into<String>) -> Self {
        Self { file_name: file_name.into(), remote: None, mime_type: None, fields: Fields::default() }
    }

    pub fn width(&self) -> Option<u64> {
        self.fields.get("width").and_then(Value::as_u64)
    }

    pub fn height(&self) -> Option<u64> {
        self.fields.get("height").and_then(Value::as_u64)
    }

    pub fn filesize(&self) -> Option<u64> {
        self.fields.get("filesize").and_then(Value::as_u64)
    }

    /// Pass-through field lookup.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Returns `true` when the variant carries a usable remote descriptor.
    pub fn is_migrated(&self) -> bool {
        self.remote.as_ref().is_some_and(RemoteDescriptor::is_valid)
    }

    /// A variant must be an array holding a non-empty `file` string.
    fn decode(value: Value) -> std::result::Result<Self, Value> {
        let Value::Array(array) = value else {
            return Err(value);
        };
        if !array.get(FILE).and_then(Value::as_str).is_some_and(|f| !f.is_empty()) {
            return Err(Value::Array(array));
        }
        let mut variant = Self::new(String::new());
        for (key, value) in array {
            match (key.as_str(), value) {
                (Some(FILE), Value::String(s)) => {
                    variant.file_name = s;
                    variant.fields.known(FILE);
                },
                (Some(REMOTE), Value::Array(a)) => {
                    variant.remote = Some(RemoteDescriptor::decode(a));
                    variant.fields.known(REMOTE);
                },
                (Some(MIME_TYPE), Value::String(s)) => {
                    variant.mime_type = Some(s);
                    variant.fields.known(MIME_TYPE);
                },
                (_, value) => variant.fields.unknown(key, value),
            }
        }
        Ok(variant)
    }

    fn encode(&self) -> Result<Value> {
        if self.file_name.is_empty() {
            exn::bail!(ErrorKind::Unencodable("size variant has an empty file name"));
        }
        Ok(Value::Array(self.fields.encode(self.typed())))
    }

    fn typed(&self) -> Vec<(&'static str, Option<Value>)> {
        vec![
            (FILE, Some(Value::String(self.file_name.clone()))),
            (MIME_TYPE, self.mime_type.clone().map(Value::String)),
            (REMOTE, self.remote.as_ref().map(RemoteDescriptor::encode)),
        ]
    }
}

impl PartialEq for SizeVariant {
    fn eq(&self, other: &Self) -> bool {
        let shadowed: Vec<&str> = self.typed().into_iter().filter(|(_, v)| v.is_some()).map(|(n, _)| n).collect();
        self.file_name == other.file_name
            && self.remote == other.remote
            && self.mime_type == other.mime_type
            && self.fields.same_unknowns(&other.fields, &shadowed)
    }
}
impl Eq for SizeVariant {}

impl Sizes {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Insert (or replace in place) a size variant.
    pub fn insert(&mut self, name: impl Into<Key>, variant: SizeVariant) {
        let name = name.into();
        match self.entries.iter_mut().find(|(k, _)| *k == name) {
            Some((_, entry)) => *entry = SizeEntry::Variant(variant),
            None => self.entries.push((name, SizeEntry::Variant(variant))),
        }
    }

    pub fn get(&self, name: &str) -> Option<&SizeVariant> {
        self.variants().find(|(k, _)| k.as_str() == Some(name)).map(|(_, v)| v)
    }

    /// Well-formed variants, in stored order.
    pub fn variants(&self) -> impl Iterator<Item = (&Key, &SizeVariant)> {
        self.entries.iter().filter_map(|(k, entry)| match entry {
            SizeEntry::Variant(v) => Some((k, v)),
            SizeEntry::Malformed(_) => None,
        })
    }

    pub fn variants_mut(&mut self) -> impl Iterator<Item = (&Key, &mut SizeVariant)> {
        self.entries.iter_mut().filter_map(|(k, entry)| match entry {
            SizeEntry::Variant(v) => Some((&*k, v)),
            SizeEntry::Malformed(_) => None,
        })
    }

    /// Names of entries that could not be read as a size variant.
    pub fn malformed(&self) -> impl Iterator<Item = &Key> {
        self.entries.iter().filter(|(_, entry)| matches!(entry, SizeEntry::Malformed(_))).map(|(k, _)| k)
    }

    pub(crate) fn decode(array: Array) -> Self {
        let entries = array
            .into_iter()
            .map(|(key, value)| {
                let entry = SizeVariant::decode(value).map_or_else(SizeEntry::Malformed, SizeEntry::Variant);
                (key, entry)
            })
            .collect();
        Self { entries }
    }

    pub(crate) fn encode(&self) -> Result<Value> {
        let mut array = Array::new();
        for (key, entry) in &self.entries {
            let value = match entry {
                SizeEntry::Variant(variant) => variant.encode()?,
                SizeEntry::Malformed(value) => value.clone(),
            };
            array.insert(key.clone(), value);
        }
        Ok(Value::Array(array))
    }
}
