use sqlx::FromRow;

/// An attachment post joined with its `_wp_attachment_metadata` value.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct AttachmentRow {
    pub id: i64,
    /// Serialized metadata blob, exactly as stored.
    pub meta_value: String,
}

/// A single postmeta value.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct PostmetaRow {
    pub post_id: i64,
    pub meta_value: String,
}
