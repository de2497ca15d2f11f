//! Wire types for the FileHeap storage service.
//!
//! Everything in this crate must agree byte-for-byte with the service:
//! header names, batch limits, the digest header format and the JSON models.

pub mod constants;
pub mod digest;
pub mod models;

pub use constants::{BATCH_SIZE_LIMIT, PUT_FILE_SIZE_LIMIT};
pub use digest::{Digest, DigestError};
pub use models::{ApiError, Dataset, DatasetPatch, FileInfo, ManifestPage};
