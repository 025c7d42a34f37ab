use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error("{encoder} encoding failed: {message}")]
    Encoding {
        encoder: &'static str,
        message: String,
    },

    #[error("vector store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("answer synthesis failed: {0}")]
    Synthesis(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("{kind} not found: {name}")]
    NotFound { kind: &'static str, name: String },

    #[error("data directory does not exist and could not be created: {0}")]
    DataDir(PathBuf),
}

impl Error {
    pub fn encoding(encoder: &'static str, err: impl std::fmt::Display) -> Self {
        Self::Encoding {
            encoder,
            message: err.to_string(),
        }
    }

    /// Whether a failed external call is worth another attempt.
    ///
    /// Bad input and local configuration problems never get better on retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Encoding { .. } | Self::StoreUnavailable(_) | Self::Synthesis(_)
        )
    }
}

// Every redb failure means the collection could not be read or written.
macro_rules! store_error {
    ($($ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for Error {
                fn from(e: $ty) -> Self {
                    Error::StoreUnavailable(e.to_string())
                }
            }
        )*
    };
}

store_error!(
    redb::Error,
    redb::DatabaseError,
    redb::StorageError,
    redb::TransactionError,
    redb::TableError,
    redb::CommitError,
);
