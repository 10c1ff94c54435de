//! Encrypted credential storage for provider tokens.
//!
//! Tokens are encrypted with AES-256-GCM before they reach any store, and are
//! decrypted only transiently for the call that needs them.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │       TokenVault                         │
//! │  - save / has / get / revoke tokens      │
//! │  - refresh when expiring soon            │
//! └─────────────────────────────────────────┘
//!          ↓                    ↑
//!    (encrypt)            (decrypt)
//!          ↓                    ↑
//! ┌─────────────────────────────────────────┐
//! │       SecretCipher                       │
//! │  - AES-256-GCM, detached tag             │
//! │  - Fresh IV per secret                   │
//! └─────────────────────────────────────────┘
//!          ↓                    ↑
//! ┌─────────────────────────────────────────┐
//! │       CredentialStore (trait)            │
//! │  - SqliteCredentialStore bundled         │
//! │  - One record per (owner, provider)      │
//! └─────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```no_run
//! use cloudlink::credentials::{SecretCipher, SqliteCredentialStore, TokenVault};
//! use cloudlink::oauth::OAuthToken;
//! use std::sync::Arc;
//!
//! # fn main() -> anyhow::Result<()> {
//! let key = std::env::var("CLOUDLINK_ENCRYPTION_KEY")?;
//! let cipher = SecretCipher::from_base64_key(&key)?;
//! let store = Arc::new(SqliteCredentialStore::open("credentials.db")?);
//! let vault = TokenVault::new(cipher, store);
//!
//! let token = OAuthToken::issued_now("access", Some("refresh".into()), 3600, "Bearer");
//! vault.save_token("user1", "vercel", &token, Default::default())?;
//! assert!(vault.has_token("user1", "vercel")?);
//! let access = vault.get_token("user1", "vercel")?;
//! vault.revoke_token("user1", "vercel")?;
//! # drop(access);
//! # Ok(())
//! # }
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

mod encryption;
mod storage;
mod vault;

pub use encryption::{EncryptedSecret, SecretCipher};
pub use storage::SqliteCredentialStore;
pub use vault::TokenVault;

use crate::error::Result;

/// Opaque key-value metadata attached to a credential.
pub type Metadata = BTreeMap<String, String>;

/// A stored credential. Never holds plaintext tokens.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CredentialRecord {
    pub id: String,
    pub owner_id: String,
    pub provider_name: String,
    pub encrypted_access_token: EncryptedSecret,
    pub encrypted_refresh_token: Option<EncryptedSecret>,
    pub metadata: Metadata,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Persistence boundary for encrypted credentials.
///
/// Implementations keep at most one record per `(owner_id, provider_name)`;
/// `save` replaces an existing record for the same pair.
pub trait CredentialStore: Send + Sync {
    fn get(&self, owner_id: &str, provider_name: &str) -> Result<Option<CredentialRecord>>;

    fn save(
        &self,
        owner_id: &str,
        provider_name: &str,
        access_token: &EncryptedSecret,
        refresh_token: Option<&EncryptedSecret>,
        metadata: &Metadata,
    ) -> Result<()>;

    /// Returns `true` when a record was removed.
    fn delete(&self, owner_id: &str, provider_name: &str) -> Result<bool>;

    fn list_by_owner(&self, owner_id: &str) -> Result<Vec<String>>;
}
