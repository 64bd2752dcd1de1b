//! Local-directory storage backend.
//!
//! [`FsBackend`] plays the role of a remote object store: uploads and
//! downloads move in chunks on tokio tasks, report progress through the
//! backend event channel, and honour pause/resume/cancel between chunks.

mod backend;
mod error;
mod store;

pub use backend::{FsBackend, FsConfig};
pub use error::FsError;
pub use store::{ObjectMetadata, ObjectStore, checksum_bytes, download_part_path};

/// Default chunk size: 256 KiB.
pub const DEFAULT_CHUNK_SIZE: usize = 256 * 1024;
