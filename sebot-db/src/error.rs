use thiserror::Error;
use tokio_rusqlite::rusqlite;

#[derive(Debug, Error)]
pub enum DbError {
  #[error("database error: {0}")]
  Sqlite(#[from] rusqlite::Error),

  #[error("database connection error: {0}")]
  Connection(#[from] tokio_rusqlite::Error),

  #[error("value for '{key}' could not be encoded: {source}")]
  Encode {
    key: String,
    #[source]
    source: serde_json::Error,
  },
}

pub type Result<T> = std::result::Result<T, DbError>;
