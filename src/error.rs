use thiserror::Error;

#[derive(Error, Debug)]
pub enum NgxError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("No such entry: {path}")]
    NotFound { path: String },

    #[error("Operation {op} not supported on {path}")]
    Unsupported { op: &'static str, path: String },

    #[error("Not a directory: {path}")]
    NotADirectory { path: String },

    /// The lock guarding `what` could not be acquired in time.
    #[error("Lock unavailable: {what}")]
    LockUnavailable { what: &'static str },

    #[error("Mount error: {0}")]
    Mount(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl NgxError {
    pub fn not_found(path: impl Into<String>) -> Self {
        NgxError::NotFound { path: path.into() }
    }

    pub fn unsupported(op: &'static str, path: impl Into<String>) -> Self {
        NgxError::Unsupported {
            op,
            path: path.into(),
        }
    }

    /// Infrastructure failures may succeed on retry; domain outcomes never do.
    pub fn is_retryable(&self) -> bool {
        matches!(self, NgxError::LockUnavailable { .. })
    }
}

pub type Result<T> = std::result::Result<T, NgxError>;
