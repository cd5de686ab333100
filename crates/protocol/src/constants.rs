/// Multipart field name used when none is configured.
pub const DEFAULT_FILE_POST_NAME: &str = "Filedata";

/// HTTP status accepted as success when none are configured.
pub const DEFAULT_HTTP_SUCCESS: u16 = 200;

/// MIME type sent for files whose type cannot be determined.
pub const DEFAULT_MIME_TYPE: &str = "application/octet-stream";

pub const BYTES_PER_KILOBYTE: u64 = 1024;
pub const BYTES_PER_MEGABYTE: u64 = BYTES_PER_KILOBYTE * 1024;
pub const BYTES_PER_GIGABYTE: u64 = BYTES_PER_MEGABYTE * 1024;
