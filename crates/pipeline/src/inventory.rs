//! Statistics over every attachment's size variants.

use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use futures::StreamExt;
use offload_codec::Metadata;
use offload_db::Repository;
use std::collections::BTreeMap;
use tracing::instrument;

/// Aggregates for one size name (`thumbnail`, `medium`, ...).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SizeStats {
    pub count: u64,
    pub total_width: u64,
    pub total_height: u64,
    /// Number of variants per `(width, height)`.
    pub resolutions: BTreeMap<(u64, u64), u64>,
    /// Sum of the recorded file sizes; variants without one count as zero.
    pub total_bytes: u64,
}
impl SizeStats {
    fn record(&mut self, width: u64, height: u64, bytes: u64) {
        // Dimensions come straight from stored metadata; clamp instead of overflowing.
        self.count += 1;
        self.total_width = self.total_width.saturating_add(width);
        self.total_height = self.total_height.saturating_add(height);
        self.total_bytes = self.total_bytes.saturating_add(bytes);
        *self.resolutions.entry((width, height)).or_default() += 1;
    }

    pub fn average_width(&self) -> u64 {
        average(self.total_width, self.count)
    }

    pub fn average_height(&self) -> u64 {
        average(self.total_height, self.count)
    }

    /// The resolution seen most often; ties go to the smallest one.
    pub fn most_common_resolution(&self) -> Option<(u64, u64)> {
        self.resolutions
            .iter()
            .max_by(|(a, a_count), (b, b_count)| a_count.cmp(b_count).then_with(|| b.cmp(a)))
            .map(|(resolution, _)| *resolution)
    }
}

fn average(total: u64, count: u64) -> u64 {
    if count == 0 {
        return 0;
    }
    // Half up, without adding to a total that may already be saturated.
    let (quotient, remainder) = (total / count, total % count);
    quotient + u64::from(remainder >= count - remainder)
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Inventory {
    pub attachments: u64,
    /// Size variants counted, across all attachments.
    pub sizes: u64,
    /// Rows whose metadata couldn't be decoded.
    pub unparsable: u64,
    pub by_size: BTreeMap<String, SizeStats>,
}
impl Inventory {
    /// Add one attachment's variants. Variants without both dimensions are
    /// ignored.
    pub fn record(&mut self, metadata: &Metadata) {
        self.attachments += 1;
        for (name, variant) in metadata.sizes.variants() {
            let (Some(width), Some(height)) = (variant.width(), variant.height()) else {
                continue;
            };
            if width == 0 || height == 0 {
                continue;
            }
            self.sizes += 1;
            self.by_size.entry(name.to_string()).or_default().record(width, height, variant.filesize().unwrap_or(0));
        }
    }
}

/// Read every attachment once and aggregate its size variants.
#[instrument(skip_all)]
pub async fn inventory(repo: &Repository) -> Result<Inventory> {
    let mut inventory = Inventory::default();
    let mut rows = std::pin::pin!(repo.stream_attachments(0));
    while let Some(row) = rows.next().await {
        let row = row.or_raise(|| ErrorKind::Cursor)?;
        match offload_codec::decode(&row.meta_value) {
            Ok(metadata) => inventory.record(&metadata),
            Err(e) => {
                tracing::warn!(id = row.id, error = ?e, "Failed to parse metadata");
                inventory.unparsable += 1;
            },
        }
    }
    tracing::info!(
        attachments = inventory.attachments,
        sizes = inventory.sizes,
        unparsable = inventory.unparsable,
        "Inventory complete"
    );
    Ok(inventory)
}
