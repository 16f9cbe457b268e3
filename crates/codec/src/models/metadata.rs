use super::{RemoteDescriptor, Sizes};
use crate::error::{ErrorKind, Result};
use crate::fields::Fields;
use crate::value::Value;
use exn::OptionExt;

const FILE: &str = "file";
const REMOTE: &str = "s3";
const SIZES: &str = "sizes";

/// Decoded `_wp_attachment_metadata` of a single attachment.
#[derive(Debug, Clone)]
pub struct Metadata {
    /// Path of the original upload, relative to the uploads root (`2024/01/a.jpg`).
    pub primary_file: String,
    /// Present once the primary file has been copied to object storage.
    pub remote: Option<RemoteDescriptor>,
    pub sizes: Sizes,
    fields: Fields,
}

impl Metadata {
    pub fn new(primary_file: impl Into<String>) -> Self {
        Self { primary_file: primary_file.into(), remote: None, sizes: Sizes::default(), fields: Fields::default() }
    }

    /// Directory of the primary file, without a trailing slash (empty when the
    /// file sits at the root of the uploads directory).
    pub fn directory(&self) -> &str {
        self.primary_file.rsplit_once('/').map_or("", |(dir, _)| dir)
    }

    /// Relative path of a size variant's file.
    pub fn variant_path(&self, file_name: &str) -> String {
        match self.directory() {
            "" => file_name.to_string(),
            dir => format!("{dir}/{file_name}"),
        }
    }

    /// Returns `true` when the primary file carries a usable remote descriptor.
    pub fn is_migrated(&self) -> bool {
        self.remote.as_ref().is_some_and(RemoteDescriptor::is_valid)
    }

    /// Pass-through field lookup.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    pub(crate) fn decode(value: Value) -> Result<Self> {
        let Value::Array(array) = value else {
            exn::bail!(ErrorKind::NotKeyed);
        };
        let file = array.get(FILE).ok_or_raise(|| ErrorKind::MissingField(FILE))?;
        match file.as_str() {
            None => exn::bail!(ErrorKind::InvalidField { field: FILE, reason: "not a string" }),
            Some("") => exn::bail!(ErrorKind::InvalidField { field: FILE, reason: "empty" }),
            Some(_) => {},
        }

        let mut metadata = Self::new(String::new());
        for (key, value) in array {
            match (key.as_str(), value) {
                (Some(FILE), Value::String(s)) => {
                    metadata.primary_file = s;
                    metadata.fields.known(FILE);
                },
                (Some(REMOTE), Value::Array(a)) => {
                    metadata.remote = Some(RemoteDescriptor::decode(a));
                    metadata.fields.known(REMOTE);
                },
                (Some(SIZES), Value::Array(a)) => {
                    metadata.sizes = Sizes::decode(a);
                    metadata.fields.known(SIZES);
                },
                (_, value) => metadata.fields.unknown(key, value),
            }
        }
        Ok(metadata)
    }

    pub(crate) fn encode(&self) -> Result<Value> {
        if self.primary_file.is_empty() {
            exn::bail!(ErrorKind::Unencodable("empty primary file"));
        }
        let typed = vec![
            (FILE, Some(Value::String(self.primary_file.clone()))),
            (SIZES, self.sizes_present().then(|| self.sizes.encode()).transpose()?),
            (REMOTE, self.remote.as_ref().map(RemoteDescriptor::encode)),
        ];
        Ok(Value::Array(self.fields.encode(typed)))
    }

    fn sizes_present(&self) -> bool {
        self.fields.has_known(SIZES) || !self.sizes.is_empty()
    }

    fn shadowed(&self) -> Vec<&'static str> {
        let mut names = vec![FILE];
        if self.sizes_present() {
            names.push(SIZES);
        }
        if self.remote.is_some() {
            names.push(REMOTE);
        }
        names
    }
}

impl PartialEq for Metadata {
    fn eq(&self, other: &Self) -> bool {
        self.primary_file == other.primary_file
            && self.remote == other.remote
            && self.sizes == other.sizes
            && self.fields.same_unknowns(&other.fields, &self.shadowed())
    }
}
impl Eq for Metadata {}
