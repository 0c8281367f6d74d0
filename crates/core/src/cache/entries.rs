//! Key → JSON blob operations on the `entries` table.

use super::connection::CacheDb;
use crate::Error;
use tokio_rusqlite::params;
use tokio_rusqlite::rusqlite;

impl CacheDb {
    /// Get the JSON blob stored under `key`.
    ///
    /// Returns None if the key doesn't exist.
    pub async fn get_entry(&self, key: &str) -> Result<Option<String>, Error> {
        let key = key.to_string();
        self.conn
            .call(move |conn| -> Result<Option<String>, Error> {
                let mut stmt = conn.prepare("SELECT value_json FROM entries WHERE key = ?1")?;

                match stmt.query_row(params![key], |row| row.get(0)) {
                    Ok(json) => Ok(Some(json)),
                    Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                    Err(e) => Err(e.into()),
                }
            })
            .await
            .map_err(Error::from)
    }

    /// Insert or replace the JSON blob stored under `key`.
    pub async fn put_entry(&self, key: &str, value_json: &str) -> Result<(), Error> {
        let key = key.to_string();
        let value_json = value_json.to_string();
        let updated_at = chrono::Utc::now().to_rfc3339();

        self.conn
            .call(move |conn| -> Result<(), Error> {
                conn.execute(
                    "INSERT INTO entries (key, value_json, updated_at)
                    VALUES (?1, ?2, ?3)
                    ON CONFLICT(key) DO UPDATE SET
                        value_json = excluded.value_json,
                        updated_at = excluded.updated_at",
                    params![key, value_json, updated_at],
                )?;
                Ok(())
            })
            .await
            .map_err(Error::from)
    }

    /// Delete the entry stored under `key`. Returns whether a row was removed.
    pub async fn delete_entry(&self, key: &str) -> Result<bool, Error> {
        let key = key.to_string();
        self.conn
            .call(move |conn| -> Result<bool, Error> {
                let count = conn.execute("DELETE FROM entries WHERE key = ?1", params![key])?;
                Ok(count > 0)
            })
            .await
            .map_err(Error::from)
    }

    /// List keys starting with `prefix`, in key order.
    pub async fn entry_keys(&self, prefix: &str) -> Result<Vec<String>, Error> {
        let pattern = format!("{}%", escape_like(prefix));
        self.conn
            .call(move |conn| -> Result<Vec<String>, Error> {
                let mut stmt = conn.prepare("SELECT key FROM entries WHERE key LIKE ?1 ESCAPE '\\' ORDER BY key")?;
                let keys = stmt
                    .query_map(params![pattern], |row| row.get(0))?
                    .collect::<Result<Vec<String>, _>>()?;
                Ok(keys)
            })
            .await
            .map_err(Error::from)
    }

    /// Number of stored entries whose key starts with `prefix`.
    pub async fn count_entries(&self, prefix: &str) -> Result<u64, Error> {
        let pattern = format!("{}%", escape_like(prefix));
        self.conn
            .call(move |conn| -> Result<u64, Error> {
                let count: i64 =
                    conn.query_row("SELECT COUNT(*) FROM entries WHERE key LIKE ?1 ESCAPE '\\'", params![pattern], |row| {
                        row.get(0)
                    })?;
                Ok(count as u64)
            })
            .await
            .map_err(Error::from)
    }

    /// Delete every entry whose key starts with `prefix`.
    ///
    /// Returns the number of deleted entries.
    pub async fn purge_entries(&self, prefix: &str) -> Result<u64, Error> {
        let pattern = format!("{}%", escape_like(prefix));
        self.conn
            .call(move |conn| -> Result<u64, Error> {
                let count = conn.execute("DELETE FROM entries WHERE key LIKE ?1 ESCAPE '\\'", params![pattern])?;
                Ok(count as u64)
            })
            .await
            .map_err(Error::from)
    }
}

/// Escape LIKE wildcards so prefixes match literally.
fn escape_like(prefix: &str) -> String {
    prefix.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_and_get_entry() {
        let db = CacheDb::open_in_memory().await.unwrap();
        db.put_entry("entity:acme", r#"{"name":"Acme"}"#).await.unwrap();

        let retrieved = db.get_entry("entity:acme").await.unwrap().unwrap();
        assert_eq!(retrieved, r#"{"name":"Acme"}"#);
    }

    #[tokio::test]
    async fn test_get_missing_entry() {
        let db = CacheDb::open_in_memory().await.unwrap();
        assert!(db.get_entry("nonexistent").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_upsert_entry() {
        let db = CacheDb::open_in_memory().await.unwrap();
        db.put_entry("k", r#"{"old":1}"#).await.unwrap();
        db.put_entry("k", r#"{"new":2}"#).await.unwrap();

        assert_eq!(db.get_entry("k").await.unwrap().unwrap(), r#"{"new":2}"#);
        assert_eq!(db.count_entries("").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_delete_entry() {
        let db = CacheDb::open_in_memory().await.unwrap();
        db.put_entry("k", "{}").await.unwrap();

        assert!(db.delete_entry("k").await.unwrap());
        assert!(!db.delete_entry("k").await.unwrap());
        assert!(db.get_entry("k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_keys_and_purge_by_prefix() {
        let db = CacheDb::open_in_memory().await.unwrap();
        db.put_entry("entity:b", "{}").await.unwrap();
        db.put_entry("entity:a", "{}").await.unwrap();
        db.put_entry("collection:all", "{}").await.unwrap();

        let keys = db.entry_keys("entity:").await.unwrap();
        assert_eq!(keys, vec!["entity:a".to_string(), "entity:b".to_string()]);

        assert_eq!(db.count_entries("entity:").await.unwrap(), 2);
        let deleted = db.purge_entries("entity:").await.unwrap();
        assert_eq!(deleted, 2);
        assert_eq!(db.count_entries("").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_prefix_wildcards_are_literal() {
        let db = CacheDb::open_in_memory().await.unwrap();
        db.put_entry("a_b:1", "{}").await.unwrap();
        db.put_entry("axb:1", "{}").await.unwrap();

        let keys = db.entry_keys("a_b:").await.unwrap();
        assert_eq!(keys, vec!["a_b:1".to_string()]);
    }
}
