//! Token vault: encrypts tokens on the way into a [`CredentialStore`] and
//! decrypts them transiently on the way out.

use super::{CredentialStore, Metadata, SecretCipher};
use crate::error::{CloudError, Result};
use crate::oauth::{OAuthManager, OAuthToken};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info};
use zeroize::Zeroizing;

const EXPIRES_AT_KEY: &str = "expires_at";
const TOKEN_TYPE_KEY: &str = "token_type";

pub struct TokenVault {
    cipher: SecretCipher,
    store: Arc<dyn CredentialStore>,
}

fn require(field: &'static str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(CloudError::validation(field, "must not be empty"));
    }
    Ok(())
}

impl TokenVault {
    pub fn new(cipher: SecretCipher, store: Arc<dyn CredentialStore>) -> Self {
        Self { cipher, store }
    }

    /// Encrypts and stores `token`, replacing any existing token for the pair.
    ///
    /// Expiry and token type are kept in the record metadata.
    pub fn save_token(
        &self,
        owner_id: &str,
        provider: &str,
        token: &OAuthToken,
        mut metadata: Metadata,
    ) -> Result<()> {
        require("owner_id", owner_id)?;
        require("provider", provider)?;
        require("access_token", &token.access_token)?;

        let access = self.cipher.encrypt_str(&token.access_token)?;
        let refresh = token
            .refresh_token
            .as_deref()
            .map(|t| self.cipher.encrypt_str(t))
            .transpose()?;

        metadata.remove(EXPIRES_AT_KEY);
        if let Some(expires_at) = token.expires_at {
            metadata.insert(EXPIRES_AT_KEY.to_string(), expires_at.to_rfc3339());
        }
        metadata.insert(TOKEN_TYPE_KEY.to_string(), token.token_type.clone());

        self.store.save(
            owner_id,
            &provider.to_lowercase(),
            &access,
            refresh.as_ref(),
            &metadata,
        )?;
        info!(owner_id = %owner_id, provider = %provider, "Stored credential");
        Ok(())
    }

    pub fn has_token(&self, owner_id: &str, provider: &str) -> Result<bool> {
        Ok(self.store.get(owner_id, &provider.to_lowercase())?.is_some())
    }

    /// Decrypted access token. Fails with `NotFound` when nothing is stored.
    pub fn get_token(&self, owner_id: &str, provider: &str) -> Result<Zeroizing<String>> {
        let token = self.load_token(owner_id, provider)?;
        Ok(Zeroizing::new(token.access_token.clone()))
    }

    pub fn get_refresh_token(
        &self,
        owner_id: &str,
        provider: &str,
    ) -> Result<Option<Zeroizing<String>>> {
        let token = self.load_token(owner_id, provider)?;
        Ok(token.refresh_token.clone().map(Zeroizing::new))
    }

    /// Decrypts the full stored token, expiry included.
    pub fn load_token(&self, owner_id: &str, provider: &str) -> Result<OAuthToken> {
        let record = self
            .store
            .get(owner_id, &provider.to_lowercase())?
            .ok_or_else(|| {
                CloudError::NotFound(format!(
                    "no credential for owner '{}' and provider '{}'",
                    owner_id, provider
                ))
            })?;

        let access_token = self.cipher.decrypt_to_string(&record.encrypted_access_token)?;
        let refresh_token = record
            .encrypted_refresh_token
            .as_ref()
            .map(|secret| self.cipher.decrypt_to_string(secret))
            .transpose()?;

        let expires_at = record
            .metadata
            .get(EXPIRES_AT_KEY)
            .and_then(|v| DateTime::parse_from_rfc3339(v).ok())
            .map(|dt| dt.with_timezone(&Utc));

        Ok(OAuthToken {
            access_token: access_token.to_string(),
            refresh_token: refresh_token.map(|t| t.to_string()),
            expires_in: expires_at.map(|at| (at - record.updated_at).num_seconds()),
            expires_at,
            token_type: record
                .metadata
                .get(TOKEN_TYPE_KEY)
                .cloned()
                .unwrap_or_else(|| "Bearer".to_string()),
        })
    }

    /// Returns `true` when a credential was removed.
    pub fn revoke_token(&self, owner_id: &str, provider: &str) -> Result<bool> {
        let removed = self.store.delete(owner_id, &provider.to_lowercase())?;
        if removed {
            info!(owner_id = %owner_id, provider = %provider, "Revoked credential");
        }
        Ok(removed)
    }

    /// Access token that is not about to expire.
    ///
    /// Tokens inside the five-minute window are refreshed and re-stored. An
    /// expired token with no refresh token fails with `Authentication`.
    pub async fn get_valid_token(
        &self,
        owner_id: &str,
        provider: &str,
        oauth: &OAuthManager,
    ) -> Result<Zeroizing<String>> {
        let token = self.load_token(owner_id, provider)?;
        if !token.is_expiring_soon() {
            return Ok(Zeroizing::new(token.access_token.clone()));
        }

        match token.refresh_token.as_deref() {
            Some(refresh_token) => {
                debug!(owner_id = %owner_id, provider = %provider, "Refreshing expiring token");
                let refreshed = oauth
                    .refresh_access_token(refresh_token)
                    .await
                    .map_err(|e| e.context(format!("refresh token for {}", provider)))?;
                let metadata = self
                    .store
                    .get(owner_id, &provider.to_lowercase())?
                    .map(|record| record.metadata)
                    .unwrap_or_default();
                self.save_token(owner_id, provider, &refreshed, metadata)?;
                Ok(Zeroizing::new(refreshed.access_token.clone()))
            }
            None if token.is_expired() => Err(CloudError::Authentication(format!(
                "stored token for provider '{}' has expired and cannot be refreshed",
                provider
            ))),
            None => Ok(Zeroizing::new(token.access_token.clone())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::SqliteCredentialStore;
    use crate::oauth::OAuthConfig;
    use chrono::Duration;
    use mockito::Server;

    fn test_vault() -> TokenVault {
        let cipher = SecretCipher::new(&[3u8; 32]).unwrap();
        let store = Arc::new(SqliteCredentialStore::open(":memory:").unwrap());
        TokenVault::new(cipher, store)
    }

    fn oauth_for(server_url: &str) -> OAuthManager {
        OAuthManager::new(OAuthConfig {
            client_id: "id".to_string(),
            client_secret: Zeroizing::new("secret".to_string()),
            auth_url: format!("{}/authorize", server_url),
            token_url: format!("{}/token", server_url),
            redirect_uri: "http://localhost/callback".to_string(),
            scopes: vec![],
        })
        .unwrap()
    }

    #[test]
    fn test_store_never_sees_plaintext() {
        let cipher = SecretCipher::new(&[3u8; 32]).unwrap();
        let store = Arc::new(SqliteCredentialStore::open(":memory:").unwrap());
        let vault = TokenVault::new(cipher, store.clone());

        let token = OAuthToken::issued_now("plain-access", Some("plain-refresh".into()), 3600, "Bearer");
        vault.save_token("u1", "vercel", &token, Metadata::new()).unwrap();

        let record = store.get("u1", "vercel").unwrap().unwrap();
        assert_ne!(record.encrypted_access_token.ciphertext, b"plain-access".to_vec());
        assert!(record.metadata.contains_key("expires_at"));
        assert_eq!(record.metadata.get("token_type").map(String::as_str), Some("Bearer"));
    }

    #[test]
    fn test_provider_name_is_case_insensitive() {
        let vault = test_vault();
        let token = OAuthToken::issued_now("abc", None, None, "Bearer");
        vault.save_token("u1", "Vercel", &token, Metadata::new()).unwrap();

        assert!(vault.has_token("u1", "VERCEL").unwrap());
        assert_eq!(vault.get_token("u1", "vercel").unwrap().as_str(), "abc");
    }

    #[test]
    fn test_get_missing_is_not_found() {
        let vault = test_vault();
        assert!(matches!(
            vault.get_token("nobody", "vercel"),
            Err(CloudError::NotFound(_))
        ));
    }

    #[test]
    fn test_save_rejects_empty_owner() {
        let vault = test_vault();
        let token = OAuthToken::issued_now("abc", None, None, "Bearer");
        assert!(matches!(
            vault.save_token("", "vercel", &token, Metadata::new()),
            Err(CloudError::Validation { field: "owner_id", .. })
        ));
    }

    #[test]
    fn test_load_token_restores_expiry() {
        let vault = test_vault();
        let token = OAuthToken::issued_now("abc", Some("def".into()), 3600, "Bearer");
        vault.save_token("u1", "vercel", &token, Metadata::new()).unwrap();

        let loaded = vault.load_token("u1", "vercel").unwrap();
        assert_eq!(loaded.refresh_token.as_deref(), Some("def"));
        assert_eq!(
            loaded.expires_at.map(|t| t.timestamp()),
            token.expires_at.map(|t| t.timestamp())
        );
    }

    #[tokio::test]
    async fn test_get_valid_token_skips_refresh_when_fresh() {
        let mut server = Server::new_async().await;
        let mock = server.mock("POST", "/token").expect(0).create_async().await;

        let vault = test_vault();
        let token = OAuthToken::issued_now("fresh", Some("r".into()), 3600, "Bearer");
        vault.save_token("u1", "vercel", &token, Metadata::new()).unwrap();

        let access = vault
            .get_valid_token("u1", "vercel", &oauth_for(&server.url()))
            .await
            .unwrap();
        assert_eq!(access.as_str(), "fresh");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_get_valid_token_refreshes_expiring_token() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/token")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"access_token":"renewed","expires_in":3600}"#)
            .create_async()
            .await;

        let vault = test_vault();
        let mut metadata = Metadata::new();
        metadata.insert("team".to_string(), "acme".to_string());
        let token = OAuthToken::issued_now("stale", Some("r1".into()), 60, "Bearer");
        vault.save_token("u1", "vercel", &token, metadata).unwrap();

        let access = vault
            .get_valid_token("u1", "vercel", &oauth_for(&server.url()))
            .await
            .unwrap();
        assert_eq!(access.as_str(), "renewed");

        let stored = vault.load_token("u1", "vercel").unwrap();
        assert_eq!(stored.access_token, "renewed");
        assert_eq!(stored.refresh_token.as_deref(), Some("r1"));
        assert!(stored.expires_at.unwrap() > Utc::now() + Duration::minutes(30));
    }

    #[tokio::test]
    async fn test_expired_token_without_refresh_is_authentication_error() {
        let server = Server::new_async().await;
        let vault = test_vault();
        let token = OAuthToken::issued_now("old", None, -10, "Bearer");
        vault.save_token("u1", "vercel", &token, Metadata::new()).unwrap();

        let result = vault
            .get_valid_token("u1", "vercel", &oauth_for(&server.url()))
            .await;
        assert!(matches!(result, Err(CloudError::Authentication(_))));
    }
}
