pub const DEFAULT_DATABASE_ID: &str = "(default)";
pub const FIRESTORE_API_HOST: &str = "https://firestore.googleapis.com";
pub const FIRESTORE_API_VERSION: &str = "v1";

/// Upper bound on writes per batch or transaction commit.
pub const MAX_BATCH_WRITES: usize = 500;
pub const AUTO_ID_LENGTH: usize = 20;
pub const DEFAULT_TRANSACTION_MAX_ATTEMPTS: u32 = 5;
