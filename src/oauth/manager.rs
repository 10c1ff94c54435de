//! OAuth token exchange and refresh against one provider's endpoints.

use super::OAuthToken;
use crate::error::{CloudError, Result};
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use serde::Deserialize;
use zeroize::Zeroizing;

/// OAuth client configuration for one provider.
#[derive(Clone)]
pub struct OAuthConfig {
    pub client_id: String,
    pub client_secret: Zeroizing<String>,
    /// OAuth authorization endpoint URL
    pub auth_url: String,
    /// OAuth token exchange endpoint URL
    pub token_url: String,
    pub redirect_uri: String,
    /// Scopes requested when the caller passes none
    pub scopes: Vec<String>,
}

impl OAuthConfig {
    /// Loads client id and secret from `CLOUDLINK_OAUTH_CLIENT_ID` /
    /// `CLOUDLINK_OAUTH_CLIENT_SECRET`; endpoints come from `settings`.
    pub fn from_env(settings: &crate::config::OAuthSettings) -> anyhow::Result<Self> {
        use anyhow::Context;

        let client_id = std::env::var("CLOUDLINK_OAUTH_CLIENT_ID")
            .context("CLOUDLINK_OAUTH_CLIENT_ID not set")?;
        let client_secret = std::env::var("CLOUDLINK_OAUTH_CLIENT_SECRET")
            .context("CLOUDLINK_OAUTH_CLIENT_SECRET not set")?;

        Ok(Self {
            client_id,
            client_secret: Zeroizing::new(client_secret),
            auth_url: settings.auth_url.clone(),
            token_url: settings.token_url.clone(),
            redirect_uri: settings.redirect_uri.clone(),
            scopes: settings.scopes.clone(),
        })
    }
}

impl std::fmt::Debug for OAuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthConfig")
            .field("client_id", &self.client_id)
            .field("client_secret", &"[redacted]")
            .field("auth_url", &self.auth_url)
            .field("token_url", &self.token_url)
            .field("redirect_uri", &self.redirect_uri)
            .field("scopes", &self.scopes)
            .finish()
    }
}

/// OAuth token response (standard OAuth 2.0). Some hosts answer 200 with an
/// `error` body instead of a token, so every field is optional here.
#[derive(Deserialize)]
struct TokenResponse {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    token_type: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
}

/// Drives the authorization-code and refresh-token grants.
pub struct OAuthManager {
    config: OAuthConfig,
    http_client: reqwest::Client,
}

impl OAuthManager {
    pub fn new(config: OAuthConfig) -> Result<Self> {
        Self::with_http_client(config, reqwest::Client::new())
    }

    /// Uses a caller-built client so the caller's HTTP timeout applies.
    pub fn with_http_client(config: OAuthConfig, http_client: reqwest::Client) -> Result<Self> {
        if config.client_id.trim().is_empty() {
            return Err(CloudError::validation("client_id", "must not be empty"));
        }
        if config.client_secret.trim().is_empty() {
            return Err(CloudError::validation("client_secret", "must not be empty"));
        }
        if config.token_url.trim().is_empty() {
            return Err(CloudError::validation("token_url", "must not be empty"));
        }
        Ok(Self {
            config,
            http_client,
        })
    }

    pub fn config(&self) -> &OAuthConfig {
        &self.config
    }

    /// Builds the authorization URL. Never includes the client secret.
    ///
    /// `scopes` falls back to the configured scopes when empty.
    pub fn generate_auth_url(&self, state: &str, scopes: &[String]) -> Result<String> {
        if state.trim().is_empty() {
            return Err(CloudError::validation("state", "must not be empty"));
        }
        let scopes = if scopes.is_empty() {
            self.config.scopes.join(" ")
        } else {
            scopes.join(" ")
        };
        let separator = if self.config.auth_url.contains('?') {
            '&'
        } else {
            '?'
        };

        Ok(format!(
            "{}{}client_id={}&redirect_uri={}&response_type=code&scope={}&state={}",
            self.config.auth_url,
            separator,
            urlencoding::encode(&self.config.client_id),
            urlencoding::encode(&self.config.redirect_uri),
            urlencoding::encode(&scopes),
            urlencoding::encode(state)
        ))
    }

    /// Exchanges an authorization code for tokens.
    ///
    /// An empty code fails with `Validation` before any network call.
    pub async fn exchange_code_for_token(&self, code: &str) -> Result<OAuthToken> {
        if code.trim().is_empty() {
            return Err(CloudError::validation("code", "must not be empty"));
        }

        let form = [
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
            ("code", code),
            ("redirect_uri", self.config.redirect_uri.as_str()),
            ("grant_type", "authorization_code"),
        ];

        tracing::debug!(token_url = %self.config.token_url, "Exchanging authorization code for token");
        let response = self.post_token_request(&form).await?;
        self.token_from_response(response, None)
    }

    /// Obtains a new access token. If the provider omits a new refresh
    /// token, the caller's original one is kept.
    pub async fn refresh_access_token(&self, refresh_token: &str) -> Result<OAuthToken> {
        if refresh_token.trim().is_empty() {
            return Err(CloudError::validation("refresh_token", "must not be empty"));
        }

        let form = [
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
            ("refresh_token", refresh_token),
            ("grant_type", "refresh_token"),
        ];

        tracing::debug!(token_url = %self.config.token_url, "Refreshing access token");
        let response = self.post_token_request(&form).await?;
        self.token_from_response(response, Some(refresh_token))
    }

    async fn post_token_request(&self, form: &[(&str, &str)]) -> Result<TokenResponse> {
        let response = self
            .http_client
            .post(&self.config.token_url)
            .header(ACCEPT, "application/json")
            .form(form)
            .send()
            .await
            .map_err(|e| CloudError::transport(e).context("oauth token request"))?;

        let status = response.status();
        let form_encoded = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.contains("application/x-www-form-urlencoded"))
            .unwrap_or(false);
        let body = response
            .text()
            .await
            .map_err(|e| CloudError::transport(e).context("oauth token response"))?;

        let parsed: Option<TokenResponse> = if form_encoded {
            serde_urlencoded::from_str(&body).ok()
        } else {
            serde_json::from_str(&body).ok()
        };

        if !status.is_success() {
            let message = parsed
                .and_then(|r| r.error_description.or(r.error))
                .unwrap_or_else(|| {
                    status
                        .canonical_reason()
                        .unwrap_or("token request failed")
                        .to_string()
                });
            return Err(CloudError::provider(status.as_u16(), self.redact(&message)));
        }

        parsed.ok_or_else(|| {
            CloudError::provider(status.as_u16(), "token response could not be parsed")
        })
    }

    fn token_from_response(
        &self,
        response: TokenResponse,
        previous_refresh: Option<&str>,
    ) -> Result<OAuthToken> {
        let Some(access_token) = response.access_token else {
            let message = response
                .error_description
                .or(response.error)
                .unwrap_or_else(|| "token response did not include an access token".to_string());
            return Err(CloudError::provider(400, self.redact(&message)));
        };

        tracing::debug!(
            has_refresh_token = response.refresh_token.is_some(),
            expires_in = ?response.expires_in,
            "Token issued"
        );

        let refresh_token = response
            .refresh_token
            .or_else(|| previous_refresh.map(str::to_string));

        Ok(OAuthToken::issued_now(
            access_token,
            refresh_token,
            response.expires_in,
            response.token_type.unwrap_or_else(|| "Bearer".to_string()),
        ))
    }

    /// Strips the client secret from upstream text before it is surfaced.
    fn redact(&self, message: &str) -> String {
        message.replace(self.config.client_secret.as_str(), "[redacted]")
    }
}
