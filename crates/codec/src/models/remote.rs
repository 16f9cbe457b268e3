use crate::fields::Fields;
use crate::value::{Array, Value};

/// Provider written into descriptors created by this tool.
pub const PROVIDER_S3: &str = "s3";
/// Access policy written into descriptors created by this tool.
pub const PUBLIC_READ: &str = "public-read";

const URL: &str = "url";
const BUCKET: &str = "bucket";
const KEY: &str = "key";
const PROVIDER: &str = "provider";
const MIME_TYPE: &str = "mime-type";
const PRIVACY: &str = "privacy";

/// Where an asset lives in object storage, stored under the `s3` key of both
/// the attachment and each of its size variants.
///
/// Empty strings stand for unset fields.
#[derive(Debug, Clone, Default)]
pub struct RemoteDescriptor {
    pub url: String,
    pub bucket: String,
    pub key: String,
    pub provider: String,
    pub mime_type: String,
    pub access_policy: String,
    fields: Fields,
}

impl RemoteDescriptor {
    /// Descriptor for an object that was just uploaded with a public-read policy.
    pub fn new(url: impl Into<String>, bucket: impl Into<String>, key: impl Into<String>, mime_type: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            bucket: bucket.into(),
            key: key.into(),
            provider: PROVIDER_S3.to_string(),
            mime_type: mime_type.into(),
            access_policy: PUBLIC_READ.to_string(),
            fields: Fields::default(),
        }
    }

    /// A descriptor is only usable when it names a URL, a bucket and a key.
    pub fn is_valid(&self) -> bool {
        !self.url.is_empty() && !self.bucket.is_empty() && !self.key.is_empty()
    }

    pub(crate) fn decode(array: Array) -> Self {
        let mut descriptor = Self::default();
        for (key, value) in array {
            let slot = match key.as_str() {
                Some(URL) => Some((URL, &mut descriptor.url)),
                Some(BUCKET) => Some((BUCKET, &mut descriptor.bucket)),
                Some(KEY) => Some((KEY, &mut descriptor.key)),
                Some(PROVIDER) => Some((PROVIDER, &mut descriptor.provider)),
                Some(MIME_TYPE) => Some((MIME_TYPE, &mut descriptor.mime_type)),
                Some(PRIVACY) => Some((PRIVACY, &mut descriptor.access_policy)),
                _ => None,
            };
            match (slot, value) {
                (Some((name, field)), Value::String(s)) => {
                    *field = s;
                    descriptor.fields.known(name);
                },
                (_, value) => descriptor.fields.unknown(key, value),
            }
        }
        descriptor
    }

    pub(crate) fn encode(&self) -> Value {
        Value::Array(self.fields.encode(self.typed()))
    }

    fn typed(&self) -> Vec<(&'static str, Option<Value>)> {
        vec![
            (URL, self.fields.string(URL, &self.url)),
            (BUCKET, self.fields.string(BUCKET, &self.bucket)),
            (KEY, self.fields.string(KEY, &self.key)),
            (PROVIDER, self.fields.string(PROVIDER, &self.provider)),
            (MIME_TYPE, self.fields.string(MIME_TYPE, &self.mime_type)),
            (PRIVACY, self.fields.string(PRIVACY, &self.access_policy)),
        ]
    }

    fn shadowed(&self) -> Vec<&'static str> {
        self.typed().into_iter().filter(|(_, v)| v.is_some()).map(|(name, _)| name).collect()
    }
}

impl PartialEq for RemoteDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.url == other.url
            && self.bucket == other.bucket
            && self.key == other.key
            && self.provider == other.provider
            && self.mime_type == other.mime_type
            && self.access_policy == other.access_policy
            && self.fields.same_unknowns(&other.fields, &self.shadowed())
    }
}
impl Eq for RemoteDescriptor {}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("https://b.s3/k", "b", "k", true)]
    #[case("", "b", "k", false)]
    #[case("https://b.s3/k", "", "k", false)]
    #[case("https://b.s3/k", "b", "", false)]
    fn test_is_valid(#[case] url: &str, #[case] bucket: &str, #[case] key: &str, #[case] expected: bool) {
        assert_eq!(RemoteDescriptor::new(url, bucket, key, "image/jpeg").is_valid(), expected);
    }

    #[test]
    fn test_new_descriptor_layout() {
        let descriptor = RemoteDescriptor::new("https://media.s3.eu-west-1.amazonaws.com/a.jpg", "media", "a.jpg", "image/jpeg");
        let Value::Array(array) = descriptor.encode() else {
            panic!("descriptor must encode as an array");
        };
        let keys: Vec<String> = array.iter().map(|(k, _)| k.to_string()).collect();
        assert_eq!(keys, ["url", "bucket", "key", "provider", "mime-type", "privacy"]);
        assert_eq!(array.get("provider").and_then(Value::as_str), Some("s3"));
        assert_eq!(array.get("privacy").and_then(Value::as_str), Some("public-read"));
    }

    #[test]
    fn test_extra_fields_survive() {
        let raw = "a:3:{s:3:\"key\";s:5:\"a.jpg\";s:6:\"region\";s:9:\"eu-west-1\";s:3:\"url\";i:0;}";
        let Value::Array(array) = Value::parse(raw).unwrap() else { unreachable!() };
        let descriptor = RemoteDescriptor::decode(array);
        assert_eq!(descriptor.key, "a.jpg");
        // A non-string url is passed through and the descriptor stays invalid.
        assert!(descriptor.url.is_empty());
        assert!(!descriptor.is_valid());
        assert_eq!(descriptor.encode().serialize(), raw);
    }
}
