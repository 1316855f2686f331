use thiserror::Error;

/// Common error type for the cache core
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Configuration(String),
    #[error("Unknown bucket: {0}")]
    UnknownBucket(String),
    #[error("Invalid partition window [{start}, {end})")]
    InvalidWindow { start: i64, end: i64 },
    #[error("Schema drift: {0}")]
    SchemaDrift(String),
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("Backend error: {0}")]
    Backend(String),
    #[error("Settings encoding error: {0}")]
    Settings(#[from] serde_json::Error),
    #[error("Configuration parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl Error {
    /// Backend I/O failures may succeed on a later rotation pass. Everything
    /// else is a configuration or schema problem that retrying cannot fix.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Database(_) | Error::Backend(_) | Error::IoError(_))
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
