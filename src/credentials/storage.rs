//! Encrypted credential storage using SQLite.
//!
//! The store only ever sees ciphertext: encryption happens in the vault before
//! a record is saved.

use super::{CredentialRecord, CredentialStore, EncryptedSecret, Metadata};
use crate::error::{CloudError, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

/// SQLite-backed [`CredentialStore`].
///
/// # Schema
/// ```sql
/// CREATE TABLE credentials (
///     id TEXT PRIMARY KEY,
///     owner_id TEXT NOT NULL,
///     provider TEXT NOT NULL,
///     access_token TEXT NOT NULL,       -- base64 ciphertext
///     access_token_iv TEXT NOT NULL,
///     access_token_tag TEXT NOT NULL,
///     refresh_token TEXT,               -- base64 ciphertext (optional)
///     refresh_token_iv TEXT,
///     refresh_token_tag TEXT,
///     metadata TEXT NOT NULL,           -- JSON object
///     created_at TEXT NOT NULL,         -- RFC 3339
///     updated_at TEXT NOT NULL,         -- RFC 3339
///     UNIQUE(owner_id, provider)
/// );
/// ```
///
/// # Thread Safety
/// The connection is wrapped in a `Mutex`; SQLite provides ACID upserts.
pub struct SqliteCredentialStore {
    conn: Mutex<Connection>,
}

impl SqliteCredentialStore {
    /// Creates or opens a credential store. `":memory:"` gives a private
    /// in-memory database.
    pub fn open<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = Connection::open(db_path)?;

        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS credentials (
                id TEXT PRIMARY KEY,
                owner_id TEXT NOT NULL,
                provider TEXT NOT NULL,
                access_token TEXT NOT NULL,
                access_token_iv TEXT NOT NULL,
                access_token_tag TEXT NOT NULL,
                refresh_token TEXT,
                refresh_token_iv TEXT,
                refresh_token_tag TEXT,
                metadata TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                UNIQUE(owner_id, provider)
            )
            "#,
            [],
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| CloudError::Storage("credential store lock poisoned".into()))
    }
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| CloudError::Storage(format!("invalid timestamp '{}': {}", value, e)))
}

impl CredentialStore for SqliteCredentialStore {
    fn get(&self, owner_id: &str, provider_name: &str) -> Result<Option<CredentialRecord>> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                r#"
                SELECT id, access_token, access_token_iv, access_token_tag,
                       refresh_token, refresh_token_iv, refresh_token_tag,
                       metadata, created_at, updated_at
                FROM credentials
                WHERE owner_id = ?1 AND provider = ?2
                "#,
                params![owner_id, provider_name],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, Option<String>>(4)?,
                        row.get::<_, Option<String>>(5)?,
                        row.get::<_, Option<String>>(6)?,
                        row.get::<_, String>(7)?,
                        row.get::<_, String>(8)?,
                        row.get::<_, String>(9)?,
                    ))
                },
            )
            .optional()?;

        let Some((id, at, at_iv, at_tag, rt, rt_iv, rt_tag, metadata, created, updated)) = row
        else {
            return Ok(None);
        };

        let encrypted_refresh_token = match (rt, rt_iv, rt_tag) {
            (Some(ct), Some(iv), Some(tag)) => Some(EncryptedSecret::from_base64(&ct, &iv, &tag)?),
            _ => None,
        };
        let metadata: Metadata = serde_json::from_str(&metadata)
            .map_err(|e| CloudError::Storage(format!("invalid metadata: {}", e)))?;

        Ok(Some(CredentialRecord {
            id,
            owner_id: owner_id.to_string(),
            provider_name: provider_name.to_string(),
            encrypted_access_token: EncryptedSecret::from_base64(&at, &at_iv, &at_tag)?,
            encrypted_refresh_token,
            metadata,
            created_at: parse_timestamp(&created)?,
            updated_at: parse_timestamp(&updated)?,
        }))
    }

    fn save(
        &self,
        owner_id: &str,
        provider_name: &str,
        access_token: &EncryptedSecret,
        refresh_token: Option<&EncryptedSecret>,
        metadata: &Metadata,
    ) -> Result<()> {
        let (at, at_iv, at_tag) = access_token.to_base64();
        let (rt, rt_iv, rt_tag) = match refresh_token.map(EncryptedSecret::to_base64) {
            Some((ct, iv, tag)) => (Some(ct), Some(iv), Some(tag)),
            None => (None, None, None),
        };
        let metadata = serde_json::to_string(metadata)
            .map_err(|e| CloudError::Storage(format!("invalid metadata: {}", e)))?;
        let now = Utc::now().to_rfc3339();

        // Upsert keeps the original id and created_at.
        self.lock()?.execute(
            r#"
            INSERT INTO credentials (
                id, owner_id, provider,
                access_token, access_token_iv, access_token_tag,
                refresh_token, refresh_token_iv, refresh_token_tag,
                metadata, created_at, updated_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            ON CONFLICT(owner_id, provider) DO UPDATE SET
                access_token = excluded.access_token,
                access_token_iv = excluded.access_token_iv,
                access_token_tag = excluded.access_token_tag,
                refresh_token = excluded.refresh_token,
                refresh_token_iv = excluded.refresh_token_iv,
                refresh_token_tag = excluded.refresh_token_tag,
                metadata = excluded.metadata,
                updated_at = excluded.updated_at
            "#,
            params![
                Uuid::now_v7().to_string(),
                owner_id,
                provider_name,
                at,
                at_iv,
                at_tag,
                rt,
                rt_iv,
                rt_tag,
                metadata,
                now,
                now,
            ],
        )?;

        Ok(())
    }

    fn delete(&self, owner_id: &str, provider_name: &str) -> Result<bool> {
        let rows_affected = self.lock()?.execute(
            "DELETE FROM credentials WHERE owner_id = ?1 AND provider = ?2",
            params![owner_id, provider_name],
        )?;

        Ok(rows_affected > 0)
    }

    fn list_by_owner(&self, owner_id: &str) -> Result<Vec<String>> {
        let conn = self.lock()?;
        let mut stmt =
            conn.prepare("SELECT provider FROM credentials WHERE owner_id = ?1 ORDER BY provider")?;

        let providers = stmt
            .query_map(params![owner_id], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;

        Ok(providers)
    }
}
