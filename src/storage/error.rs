use std::error::Error;
use std::fmt::{Display, Formatter};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageErrorCode {
    Unknown,
    ObjectNotFound,
    BucketNotFound,
    Unauthorized,
    Canceled,
    InvalidArgument,
    InvalidRootOperation,
    ServerFileWrongSize,
    InternalError,
    AppDeleted,
    NoDownloadUrl,
    RetryLimitExceeded,
}

impl StorageErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageErrorCode::Unknown => "storage/unknown",
            StorageErrorCode::ObjectNotFound => "storage/object-not-found",
            StorageErrorCode::BucketNotFound => "storage/bucket-not-found",
            StorageErrorCode::Unauthorized => "storage/unauthorized",
            StorageErrorCode::Canceled => "storage/canceled",
            StorageErrorCode::InvalidArgument => "storage/invalid-argument",
            StorageErrorCode::InvalidRootOperation => "storage/invalid-root-operation",
            StorageErrorCode::ServerFileWrongSize => "storage/server-file-wrong-size",
            StorageErrorCode::InternalError => "storage/internal-error",
            StorageErrorCode::AppDeleted => "storage/app-deleted",
            StorageErrorCode::NoDownloadUrl => "storage/no-download-url",
            StorageErrorCode::RetryLimitExceeded => "storage/retry-limit-exceeded",
        }
    }
}

#[derive(Debug, Clone)]
pub struct StorageError {
    pub code: StorageErrorCode,
    message: String,
    pub status: Option<u16>,
    pub server_response: Option<String>,
}

impl StorageError {
    pub fn new(code: StorageErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            status: None,
            server_response: None,
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_server_response(mut self, response: impl Into<String>) -> Self {
        let response = response.into();
        if !response.trim().is_empty() {
            self.server_response = Some(response);
        }
        self
    }

    pub fn code_str(&self) -> &'static str {
        self.code.as_str()
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Transport failures and 5xx/408/429 responses; a resumable chunk may be re-sent after these.
    pub fn is_retryable(&self) -> bool {
        self.code == StorageErrorCode::Unknown
            && match self.status {
                None => true,
                Some(status) => status >= 500 || status == 408 || status == 429,
            }
    }
}

impl Display for StorageError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if let Some(server) = &self.server_response {
            write!(f, "{} ({}): {}", self.message, self.code_str(), server)
        } else {
            write!(f, "{} ({})", self.message, self.code_str())
        }
    }
}

impl Error for StorageError {}

pub type StorageResult<T> = Result<T, StorageError>;

pub fn unknown_error(message: impl Into<String>) -> StorageError {
    StorageError::new(StorageErrorCode::Unknown, message)
}

pub fn object_not_found(path: &str) -> StorageError {
    StorageError::new(
        StorageErrorCode::ObjectNotFound,
        format!("Object '{path}' does not exist."),
    )
}

pub fn bucket_not_found(bucket: &str) -> StorageError {
    StorageError::new(
        StorageErrorCode::BucketNotFound,
        format!("Bucket '{bucket}' does not exist."),
    )
}

pub fn unauthorized(path: &str) -> StorageError {
    StorageError::new(
        StorageErrorCode::Unauthorized,
        format!("User does not have permission to access '{path}'."),
    )
}

pub fn canceled() -> StorageError {
    StorageError::new(StorageErrorCode::Canceled, "User canceled the upload/download.")
}

pub fn invalid_argument(message: impl Into<String>) -> StorageError {
    StorageError::new(StorageErrorCode::InvalidArgument, message)
}

pub fn invalid_root_operation(operation: &str) -> StorageError {
    StorageError::new(
        StorageErrorCode::InvalidRootOperation,
        format!("'{operation}' cannot be performed on the storage root reference."),
    )
}

pub fn server_file_wrong_size(expected: u64, actual: u64) -> StorageError {
    StorageError::new(
        StorageErrorCode::ServerFileWrongSize,
        format!("Server recorded {actual} bytes for an upload of {expected} bytes."),
    )
}

pub fn internal_error(message: impl Into<String>) -> StorageError {
    StorageError::new(StorageErrorCode::InternalError, message)
}

pub fn app_deleted() -> StorageError {
    StorageError::new(
        StorageErrorCode::AppDeleted,
        "The app owning this storage client was torn down.",
    )
}

pub fn no_download_url() -> StorageError {
    StorageError::new(
        StorageErrorCode::NoDownloadUrl,
        "The requested object does not expose a download URL.",
    )
}

pub fn retry_limit_exceeded() -> StorageError {
    StorageError::new(
        StorageErrorCode::RetryLimitExceeded,
        "Max retry attempts exceeded for this operation.",
    )
}
