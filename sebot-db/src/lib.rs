mod error;
mod models;

pub use error::{DbError, Result};
pub use models::ConfigItem;

use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::Path;
use tokio_rusqlite::Connection;
use tokio_rusqlite::rusqlite::{OptionalExtension, params};
use tracing::{debug, warn};

/// Keyed configuration store. Every value is a JSON document stored under a
/// property name; callers pick the type they decode it as.
#[derive(Clone)]
pub struct ConfigStore {
  conn: Connection,
}

impl ConfigStore {
  /// Open or create a store at the given path.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = Connection::open(path).await.map_err(DbError::Sqlite)?;
    let store = Self { conn };
    store.initialize().await?;
    Ok(store)
  }

  /// Create an in-memory store (useful for testing).
  pub async fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .await
      .map_err(DbError::Sqlite)?;
    let store = Self { conn };
    store.initialize().await?;
    Ok(store)
  }

  async fn initialize(&self) -> Result<()> {
    self.conn
      .call(|conn| {
        conn.pragma_update(None, "journal_mode", "WAL")?;

        conn.execute_batch(
          r#"
          CREATE TABLE IF NOT EXISTS config_items (
              property_name TEXT PRIMARY KEY,
              value TEXT NOT NULL
          );
          "#,
        )?;

        Ok(())
      })
      .await?;

    Ok(())
  }

  /// Close the underlying connection.
  pub async fn close(self) -> Result<()> {
    self.conn.close().await?;
    debug!("config store closed");
    Ok(())
  }

  // ========================================================================
  // Raw items
  // ========================================================================

  /// Get the raw item stored under `key`.
  pub async fn get_item(&self, key: impl Into<String>) -> Result<Option<ConfigItem>> {
    let key = key.into();
    let item = self
      .conn
      .call(move |conn| {
        conn
          .prepare_cached("SELECT property_name, value FROM config_items WHERE property_name = ?1")?
          .query_row(params![&key], |row| {
            Ok(ConfigItem {
              property_name: row.get(0)?,
              value: row.get(1)?,
            })
          })
          .optional()
      })
      .await?;

    Ok(item)
  }

  /// All stored property names, sorted.
  pub async fn keys(&self) -> Result<Vec<String>> {
    let keys = self
      .conn
      .call(|conn| {
        let mut stmt =
          conn.prepare_cached("SELECT property_name FROM config_items ORDER BY property_name")?;
        let keys = stmt
          .query_map([], |row| row.get(0))?
          .collect::<std::result::Result<Vec<String>, _>>()?;
        Ok(keys)
      })
      .await?;

    Ok(keys)
  }

  /// Delete the value under `key`. Returns whether anything was removed.
  pub async fn remove(&self, key: impl Into<String>) -> Result<bool> {
    let key = key.into();
    let deleted = self
      .conn
      .call(move |conn| {
        let deleted = conn
          .prepare_cached("DELETE FROM config_items WHERE property_name = ?1")?
          .execute(params![&key])?;
        Ok(deleted)
      })
      .await?;

    Ok(deleted > 0)
  }

  // ========================================================================
  // Typed values
  // ========================================================================

  /// Load and decode the value under `key`.
  ///
  /// Returns `None` when the key is absent. A value that no longer decodes
  /// as `T` is logged and also reported as `None`, so callers fall back to
  /// their default instead of failing.
  pub async fn load<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
    let Some(item) = self.get_item(key).await? else {
      return Ok(None);
    };

    match serde_json::from_str(&item.value) {
      Ok(value) => Ok(Some(value)),
      Err(err) => {
        warn!(key, %err, "stored config value does not decode, using default");
        Ok(None)
      }
    }
  }

  /// Encode and upsert `value` under `key`.
  pub async fn save<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
    let encoded = serde_json::to_string(value).map_err(|source| DbError::Encode {
      key: key.to_string(),
      source,
    })?;
    let property_name = key.to_string();

    self
      .conn
      .call(move |conn| {
        conn
          .prepare_cached(
            r#"
            INSERT INTO config_items (property_name, value) VALUES (?1, ?2)
            ON CONFLICT(property_name) DO UPDATE SET value = excluded.value
            "#,
          )?
          .execute(params![&property_name, &encoded])?;
        Ok(())
      })
      .await?;

    debug!(key, "saved config value");
    Ok(())
  }

  /// Store `value` under `key` only if nothing is stored there yet.
  /// Returns whether the value was written.
  pub async fn add_default<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<bool> {
    let encoded = serde_json::to_string(value).map_err(|source| DbError::Encode {
      key: key.to_string(),
      source,
    })?;
    let property_name = key.to_string();

    let inserted = self
      .conn
      .call(move |conn| {
        let inserted = conn
          .prepare_cached("INSERT OR IGNORE INTO config_items (property_name, value) VALUES (?1, ?2)")?
          .execute(params![&property_name, &encoded])?;
        Ok(inserted)
      })
      .await?;

    if inserted == 0 {
      debug!(key, "config value already present, skipping add");
    }
    Ok(inserted > 0)
  }
}
