//! OAuth 2.0 authorization-code and refresh-token lifecycle.
//!
//! Implements the authorization code flow:
//! 1. [`AuthorizationFlow::begin_authorization`] issues a CSRF `state` and
//!    builds the authorization URL
//! 2. User authorizes on the provider's site
//! 3. Provider redirects back with `code` + `state`
//! 4. [`AuthorizationFlow::complete_authorization`] consumes the state,
//!    exchanges the code for an [`OAuthToken`] and stores it encrypted
//! 5. Expiring tokens are refreshed with [`OAuthManager::refresh_access_token`]

mod flow;
mod manager;
mod state_manager;

pub use flow::{AuthorizationFlow, AuthorizationRequest};
pub use manager::{OAuthConfig, OAuthManager};
pub use state_manager::{StateEntry, StateManager};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

/// Default window used by [`OAuthToken::is_expiring_soon`].
pub const DEFAULT_EXPIRY_BUFFER: Duration = Duration::minutes(5);

/// Tokens issued by a code exchange or a refresh.
///
/// Token strings are zeroed on drop and redacted from `Debug` output.
#[derive(Clone, Serialize, Deserialize)]
pub struct OAuthToken {
    pub access_token: String,
    pub refresh_token: Option<String>,
    /// Lifetime in seconds as reported by the provider. `None` when the
    /// provider issues non-expiring tokens.
    pub expires_in: Option<i64>,
    /// `issued_at + expires_in`.
    pub expires_at: Option<DateTime<Utc>>,
    pub token_type: String,
}

impl OAuthToken {
    /// Builds a token whose expiry is computed from the current wall clock.
    pub fn issued_now(
        access_token: impl Into<String>,
        refresh_token: Option<String>,
        expires_in: impl Into<Option<i64>>,
        token_type: impl Into<String>,
    ) -> Self {
        let expires_in = expires_in.into();
        Self {
            access_token: access_token.into(),
            refresh_token,
            expires_in,
            expires_at: expires_in.map(|secs| Utc::now() + Duration::seconds(secs)),
            token_type: token_type.into(),
        }
    }

    /// `now >= expires_at` (boundary inclusive). Tokens without an expiry
    /// never expire.
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        matches!(self.expires_at, Some(expires_at) if now >= expires_at)
    }

    /// `now + 5 minutes >= expires_at`.
    pub fn is_expiring_soon(&self) -> bool {
        self.is_expiring_within(DEFAULT_EXPIRY_BUFFER)
    }

    /// `now + buffer >= expires_at`.
    pub fn is_expiring_within(&self, buffer: Duration) -> bool {
        self.is_expired_at(Utc::now() + buffer)
    }
}

impl std::fmt::Debug for OAuthToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthToken")
            .field("access_token", &"[redacted]")
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "[redacted]"),
            )
            .field("expires_in", &self.expires_in)
            .field("expires_at", &self.expires_at)
            .field("token_type", &self.token_type)
            .finish()
    }
}

impl Drop for OAuthToken {
    fn drop(&mut self) {
        self.access_token.zeroize();
        self.refresh_token.zeroize();
    }
}
