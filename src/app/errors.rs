use std::fmt;

pub type AppResult<T> = Result<T, AppError>;

/// Backend subsystem owned by an app instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Subsystem {
    Firestore,
    Storage,
    Auth,
}

impl Subsystem {
    pub fn as_str(&self) -> &'static str {
        match self {
            Subsystem::Firestore => "firestore",
            Subsystem::Storage => "storage",
            Subsystem::Auth => "auth",
        }
    }
}

impl fmt::Display for Subsystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A subsystem that failed to release its transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubsystemFailure {
    pub subsystem: Subsystem,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppError {
    BadAppName { app_name: String },
    DuplicateApp { app_name: String },
    AppDeleted { app_name: String },
    InvalidConfig { message: String },
    ConfigResolution { message: String },
    SubsystemInit { subsystem: Subsystem, message: String },
    Teardown { app_name: String, failures: Vec<SubsystemFailure> },
    TeardownAll { failures: Vec<AppError> },
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::BadAppName { app_name } => write!(f, "Illegal App name: '{app_name}'"),
            AppError::DuplicateApp { app_name } => {
                write!(f, "App named '{app_name}' already exists")
            }
            AppError::AppDeleted { app_name } => write!(f, "App named '{app_name}' already deleted"),
            AppError::InvalidConfig { message } => write!(f, "Invalid app configuration: {message}"),
            AppError::ConfigResolution { message } => {
                write!(f, "Failed to resolve app configuration: {message}")
            }
            AppError::SubsystemInit { subsystem, message } => {
                write!(f, "Failed to initialize {subsystem}: {message}")
            }
            AppError::Teardown { app_name, failures } => {
                write!(f, "Error deleting app '{app_name}':")?;
                for failure in failures {
                    write!(f, " [{}] {};", failure.subsystem, failure.message)?;
                }
                Ok(())
            }
            AppError::TeardownAll { failures } => {
                write!(f, "{} app(s) failed to shut down", failures.len())?;
                for failure in failures {
                    write!(f, "; {failure}")?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for AppError {}
