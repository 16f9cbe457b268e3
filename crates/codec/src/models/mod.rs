mod metadata;
mod remote;
mod size;

pub use self::metadata::Metadata;
pub use self::remote::{PROVIDER_S3, PUBLIC_READ, RemoteDescriptor};
pub use self::size::{SizeEntry, SizeVariant, Sizes};
