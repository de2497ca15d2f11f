/// Maximum number of files that can be included in a batch request.
pub const BATCH_SIZE_LIMIT: usize = 500;

/// Maximum size of a file that can be uploaded within a batch request or put
/// directly (32 MiB). Larger files must go through the upload API.
pub const PUT_FILE_SIZE_LIMIT: u64 = 32 * 1024 * 1024;

/// Reports a failure that happened after a batch response started streaming.
///
/// The service sends it as a trailer; it may also appear as a response header
/// when the batch fails before the first part.
pub const HEADER_BATCH_ERROR: &str = "Batch-Error";

/// Path of a file within a batch upload or delete part.
pub const HEADER_PATH: &str = "Path";

/// Content hash of a resource, formatted as `<algorithm> <base64>`.
///
/// Example: `Digest: SHA256 qj7BbmrMgJ2LKBhmInYlar/S8bRBy1FXSTPz1L0RXRE=`
pub const HEADER_DIGEST: &str = "Digest";

/// Time after which an unfinished upload expires.
pub const HEADER_UPLOAD_EXPIRES: &str = "Upload-Expires";

/// ID of a newly created upload.
pub const HEADER_UPLOAD_ID: &str = "Upload-ID";

/// Total size of an upload in bytes.
pub const HEADER_UPLOAD_LENGTH: &str = "Upload-Length";

/// Byte offset of a chunk within an upload.
pub const HEADER_UPLOAD_OFFSET: &str = "Upload-Offset";

/// The only digest algorithm the service recognizes.
pub const SHA256: &str = "SHA256";
