//! Authorization-code flow from redirect to stored credential.

use super::{OAuthManager, StateEntry, StateManager};
use crate::config::OAuthSettings;
use crate::credentials::{Metadata, TokenVault};
use crate::error::{CloudError, Result};
use tracing::{info, warn};

/// Where to send the user, and the state the callback must echo back.
#[derive(Debug, Clone)]
pub struct AuthorizationRequest {
    pub state: String,
    pub url: String,
}

/// Ties each callback to the attempt that started it before any code is
/// exchanged.
pub struct AuthorizationFlow {
    oauth: OAuthManager,
    states: StateManager,
}

impl AuthorizationFlow {
    pub fn new(oauth: OAuthManager, settings: &OAuthSettings) -> Self {
        Self::with_states(oauth, StateManager::new(settings.state_expiry_seconds))
    }

    pub fn with_states(oauth: OAuthManager, states: StateManager) -> Self {
        Self { oauth, states }
    }

    pub fn oauth(&self) -> &OAuthManager {
        &self.oauth
    }

    pub fn pending(&self) -> usize {
        self.states.len()
    }

    /// Issues a state for `(owner_id, provider)` and the URL carrying it.
    pub fn begin_authorization(
        &self,
        owner_id: &str,
        provider: &str,
        scopes: &[String],
    ) -> Result<AuthorizationRequest> {
        if owner_id.trim().is_empty() {
            return Err(CloudError::validation("owner_id", "must not be empty"));
        }
        if provider.trim().is_empty() {
            return Err(CloudError::validation("provider", "must not be empty"));
        }

        let state = self.states.create_state(owner_id, provider);
        let url = self.oauth.generate_auth_url(&state, scopes)?;
        info!(owner_id = %owner_id, provider = %provider, "Authorization started");
        Ok(AuthorizationRequest { state, url })
    }

    /// Consumes `state`, exchanges `code` and stores the tokens for the
    /// owner and provider the state was issued to.
    ///
    /// An unknown, reused or lapsed state fails with `Authentication` and
    /// makes no network call.
    pub async fn complete_authorization(
        &self,
        state: &str,
        code: &str,
        vault: &TokenVault,
    ) -> Result<StateEntry> {
        let Some(entry) = self.states.validate_and_consume(state) else {
            warn!("Rejected OAuth callback with unknown or expired state");
            return Err(CloudError::Authentication(
                "OAuth state is unknown, already used or expired".to_string(),
            ));
        };

        let token = self
            .oauth
            .exchange_code_for_token(code)
            .await
            .map_err(|e| e.context(format!("authorize {}", entry.provider)))?;

        let mut metadata = Metadata::new();
        metadata.insert("authorized_at".to_string(), chrono::Utc::now().to_rfc3339());
        vault.save_token(&entry.owner_id, &entry.provider, &token, metadata)?;

        info!(owner_id = %entry.owner_id, provider = %entry.provider, "Authorization completed");
        Ok(entry)
    }
}
