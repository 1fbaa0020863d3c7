//! Crate-wide error type.
//!
//! Most internal functions return [`AppResult`]; call sites in the registry
//! and preprocessors decide, per the four error kinds in the design notes,
//! whether a given error aborts the current preprocessor or is downgraded
//! into a [`crate::failure_tracker::FailureTracker`] entry instead.

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Zip error: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Parsing error: {0}")]
    Parsing(String),
    #[error("Subprocess `{tool}` failed (status {status:?}): {stderr}")]
    Subprocess {
        tool: String,
        status: Option<i32>,
        stderr: String,
    },
    #[error("{0}")]
    Generic(String),
}

pub type AppResult<T> = Result<T, AppError>;
