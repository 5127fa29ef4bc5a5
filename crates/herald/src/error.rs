use thiserror::Error;

/// Errors returned by persistence stores.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Event not found: {0}")]
    NotFound(String),

    #[error("Query not supported by this store: {0}")]
    Unsupported(&'static str),
}

/// Errors surfaced to callers of the event manager.
#[derive(Error, Debug)]
pub enum BusError {
    #[error("Event manager already started")]
    AlreadyStarted,

    #[error("No persistence store configured")]
    NoPersistence,

    #[error("Persistence store does not support {0} queries")]
    UnsupportedQuery(&'static str),

    #[error("Persistence error: {0}")]
    Store(StoreError),

    #[error("No Tokio runtime to run background tasks on")]
    NoRuntime,

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),
}

impl From<StoreError> for BusError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Unsupported(query) => BusError::UnsupportedQuery(query),
            other => BusError::Store(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, BusError>;
