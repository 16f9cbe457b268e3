pub mod error;
mod fields;
pub mod models;
pub mod value;

use tracing::instrument;

use crate::error::Result;
pub use crate::models::{Metadata, RemoteDescriptor, SizeVariant, Sizes};
pub use crate::value::{Array, Key, Value};

/// Decode a serialized `_wp_attachment_metadata` blob.
///
/// Fails when the blob is not valid PHP `serialize()` output, is not a keyed
/// structure, or lacks a non-empty string `file` entry. Entries that aren't
/// understood are retained and written back verbatim by [`encode`].
#[instrument(level = "trace", skip(blob), fields(blob_size = blob.len()))]
pub fn decode(blob: &str) -> Result<Metadata> {
    Metadata::decode(Value::parse(blob)?)
}

/// Serialize metadata back into PHP `serialize()` format.
///
/// Unchanged metadata encodes to exactly the bytes it was decoded from.
#[instrument(level = "trace", skip_all, fields(file = %metadata.primary_file))]
pub fn encode(metadata: &Metadata) -> Result<String> {
    Ok(metadata.encode()?.serialize())
}
