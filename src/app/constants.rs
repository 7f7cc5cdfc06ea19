pub const DEFAULT_ENTRY_NAME: &str = "[DEFAULT]";

pub const DEFAULT_FIRESTORE_EMULATOR_HOST: &str = "localhost";
pub const DEFAULT_FIRESTORE_EMULATOR_PORT: u16 = 8080;
pub const DEFAULT_STORAGE_EMULATOR_HOST: &str = "localhost";
pub const DEFAULT_STORAGE_EMULATOR_PORT: u16 = 9199;
pub const DEFAULT_AUTH_EMULATOR_URL: &str = "http://localhost:9099";

/// API key sent to the identity emulator when none is configured.
pub(crate) const EMULATOR_API_KEY: &str = "fake-api-key";
