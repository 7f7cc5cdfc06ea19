pub const DEFAULT_HOST: &str = "firebasestorage.googleapis.com";

pub const DEFAULT_PROTOCOL: &str = "https";

pub const EMULATOR_PROTOCOL: &str = "http";

pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Bytes sent per resumable upload request.
pub const RESUMABLE_UPLOAD_CHUNK_SIZE: usize = 256 * 1024;

pub const MAX_LIST_RESULTS: u32 = 1_000;

/// Attempts per resumable chunk before the task gives up.
pub const MAX_CHUNK_ATTEMPTS: u32 = 3;
