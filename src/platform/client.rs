use super::rate_limit::RateLimitState;
use crate::config::PlatformSettings;
use crate::error::{CloudError, Result};
use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use std::time::Duration;
use zeroize::Zeroizing;

/// Structured error body: `{ "error": { "code": ..., "message": ... } }`.
#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ErrorDetail {
    Structured {
        #[serde(default)]
        code: Option<String>,
        #[serde(default)]
        message: Option<String>,
    },
    Plain(String),
}

/// Authenticated HTTP client for one provider and one token.
///
/// Sends a Bearer token and JSON content type on every request and tracks
/// the provider-reported rate-limit window. Not shared across users.
pub struct PlatformClient {
    token: Zeroizing<String>,
    base_url: String,
    team_id: Option<String>,
    http_client: Client,
    rate_limit: Mutex<RateLimitState>,
}

impl std::fmt::Debug for PlatformClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlatformClient")
            .field("base_url", &self.base_url)
            .field("team_id", &self.team_id)
            .finish_non_exhaustive()
    }
}

impl PlatformClient {
    /// Client against `settings.base_url`. An empty token is rejected.
    pub fn new(token: &str, settings: &PlatformSettings) -> Result<Self> {
        if token.trim().is_empty() {
            return Err(CloudError::validation("token", "must not be empty"));
        }

        let http_client = Client::builder()
            .user_agent(concat!("cloudlink/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(settings.request_timeout_seconds))
            .build()
            .map_err(|e| CloudError::transport(e).context("build http client"))?;

        Ok(Self {
            token: Zeroizing::new(token.to_string()),
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            team_id: settings.team_id.clone(),
            http_client,
            rate_limit: Mutex::new(RateLimitState::default()),
        })
    }

    /// Client with a custom base URL (for testing with a mock server).
    pub fn with_base_url(token: &str, base_url: impl Into<String>) -> Result<Self> {
        let settings = PlatformSettings {
            base_url: base_url.into(),
            ..PlatformSettings::default()
        };
        Self::new(token, &settings)
    }

    /// Snapshot of the last observed rate-limit window.
    pub fn rate_limit(&self) -> RateLimitState {
        *self.rate_limit.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// `remaining <= 0` or `now >= reset_at`.
    pub fn is_rate_limited(&self) -> bool {
        self.rate_limit().is_rate_limited()
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.request(Method::GET, path, None::<&()>).await
    }

    pub async fn post<B, T>(&self, path: &str, body: &B) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.request(Method::POST, path, Some(body)).await
    }

    pub async fn patch<B, T>(&self, path: &str, body: &B) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.request(Method::PATCH, path, Some(body)).await
    }

    pub async fn delete(&self, path: &str) -> Result<()> {
        self.request::<(), serde_json::Value>(Method::DELETE, path, None)
            .await
            .map(|_| ())
    }

    /// Executes one request.
    ///
    /// Rate-limit headers are read from every response, success or not.
    /// Non-2xx responses become `Provider` (or `RateLimited` for 429) errors
    /// carrying the status; network failures become `Transport` errors.
    pub async fn request<B, T>(&self, method: Method, path: &str, body: Option<&B>) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let operation = format!("{} {}", method, path);
        let url = format!("{}{}", self.base_url, path);

        let mut builder = self
            .http_client
            .request(method, &url)
            .bearer_auth(self.token.as_str())
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .header(reqwest::header::ACCEPT, "application/json");
        if let Some(team_id) = &self.team_id {
            builder = builder.query(&[("teamId", team_id)]);
        }
        if let Some(body) = body {
            builder = builder.json(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| CloudError::transport(e).context(&operation))?;

        let status = response.status();
        let rate_limit = {
            let mut state = self.rate_limit.lock().unwrap_or_else(|e| e.into_inner());
            state.observe(response.headers());
            *state
        };

        let text = response
            .text()
            .await
            .map_err(|e| CloudError::transport(e).context(&operation))?;

        if !status.is_success() {
            tracing::debug!(status = status.as_u16(), operation = %operation, "Provider rejected request");
            return Err(error_from_response(status, &text, rate_limit).context(&operation));
        }

        let payload = if text.trim().is_empty() { "null" } else { text.as_str() };
        serde_json::from_str(payload).map_err(|e| {
            CloudError::provider(
                status.as_u16(),
                format!("unexpected response body: {}", e),
            )
            .context(&operation)
        })
    }
}

/// Maps a non-2xx response to a typed error.
fn error_from_response(status: StatusCode, body: &str, rate_limit: RateLimitState) -> CloudError {
    let message = match serde_json::from_str::<ErrorEnvelope>(body).map(|e| e.error) {
        Ok(ErrorDetail::Structured {
            message: Some(message),
            ..
        }) => message,
        Ok(ErrorDetail::Structured {
            code: Some(code), ..
        }) => code,
        Ok(ErrorDetail::Plain(message)) => message,
        _ if !body.trim().is_empty() && body.len() <= 512 => body.trim().to_string(),
        _ => status
            .canonical_reason()
            .unwrap_or("request failed")
            .to_string(),
    };

    if status == StatusCode::TOO_MANY_REQUESTS {
        return CloudError::RateLimited {
            message,
            reset_at: rate_limit.reset_at,
            context: String::new(),
        };
    }
    CloudError::provider(status.as_u16(), message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::rate_limit::{REMAINING_HEADER, RESET_HEADER};
    use mockito::{Matcher, Server};
    use serde_json::json;

    #[derive(Debug, Deserialize)]
    struct Project {
        id: String,
        name: String,
    }

    #[test]
    fn test_empty_token_rejected() {
        let err = PlatformClient::with_base_url("", "http://localhost").unwrap_err();
        assert!(matches!(err, CloudError::Validation { field: "token", .. }));
        assert!(PlatformClient::with_base_url("   ", "http://localhost").is_err());
    }

    #[tokio::test]
    async fn test_request_sends_bearer_and_json() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/v9/projects")
            .match_header("authorization", "Bearer tok_123")
            .match_header("content-type", "application/json")
            .match_body(Matcher::Json(json!({"name": "site"})))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"id":"prj_1","name":"site"}"#)
            .create_async()
            .await;

        let client = PlatformClient::with_base_url("tok_123", server.url()).unwrap();
        let project: Project = client
            .post("/v9/projects", &json!({"name": "site"}))
            .await
            .unwrap();

        assert_eq!(project.id, "prj_1");
        assert_eq!(project.name, "site");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_team_id_is_appended() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/v9/projects")
            .match_query(Matcher::UrlEncoded("teamId".into(), "team_9".into()))
            .with_status(200)
            .with_body(r#"{"projects":[]}"#)
            .create_async()
            .await;

        let settings = PlatformSettings {
            base_url: server.url(),
            team_id: Some("team_9".to_string()),
            ..PlatformSettings::default()
        };
        let client = PlatformClient::new("tok", &settings).unwrap();
        let _: serde_json::Value = client.get("/v9/projects").await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_rate_limit_headers_tracked_and_retained() {
        let mut server = Server::new_async().await;
        let reset = chrono::Utc::now().timestamp() + 120;
        let _with_headers = server
            .mock("GET", "/first")
            .with_status(200)
            .with_header(REMAINING_HEADER, "7")
            .with_header(RESET_HEADER, &reset.to_string())
            .with_body("{}")
            .create_async()
            .await;
        let _without_headers = server
            .mock("GET", "/second")
            .with_status(200)
            .with_body("{}")
            .create_async()
            .await;

        let client = PlatformClient::with_base_url("tok", server.url()).unwrap();
        assert_eq!(client.rate_limit(), RateLimitState::default());

        let _: serde_json::Value = client.get("/first").await.unwrap();
        assert_eq!(client.rate_limit().remaining, Some(7));
        assert!(!client.is_rate_limited());

        let _: serde_json::Value = client.get("/second").await.unwrap();
        assert_eq!(client.rate_limit().remaining, Some(7));
        assert_eq!(
            client.rate_limit().reset_at.map(|t| t.timestamp()),
            Some(reset)
        );
    }

    #[tokio::test]
    async fn test_rate_limit_headers_read_on_error_responses() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("GET", "/limited")
            .with_status(429)
            .with_header(REMAINING_HEADER, "0")
            .with_header(RESET_HEADER, "4102444800")
            .with_body(r#"{"error":{"code":"rate_limited","message":"Too many requests"}}"#)
            .create_async()
            .await;

        let client = PlatformClient::with_base_url("tok", server.url()).unwrap();
        let err = client.get::<serde_json::Value>("/limited").await.unwrap_err();

        assert!(err.is_rate_limited());
        assert_eq!(err.status(), Some(429));
        match &err {
            CloudError::RateLimited { reset_at, .. } => {
                assert_eq!(reset_at.map(|t| t.timestamp()), Some(4_102_444_800))
            }
            other => panic!("expected RateLimited, got {other:?}"),
        }
        assert!(client.is_rate_limited());
    }

    #[tokio::test]
    async fn test_error_statuses_are_distinguishable() {
        let mut server = Server::new_async().await;
        let mut mocks = Vec::new();
        for (path, status) in [("/auth", 401), ("/forbidden", 403), ("/missing", 404), ("/down", 503)] {
            let mock = server
                .mock("GET", path)
                .with_status(status)
                .with_body(r#"{"error":{"code":"x","message":"upstream says no"}}"#)
                .create_async()
                .await;
            mocks.push(mock);
        }

        let client = PlatformClient::with_base_url("tok", server.url()).unwrap();

        let auth = client.get::<serde_json::Value>("/auth").await.unwrap_err();
        assert!(auth.is_auth_failure());
        assert!(auth.to_string().contains("upstream says no"));

        let forbidden = client.get::<serde_json::Value>("/forbidden").await.unwrap_err();
        assert_eq!(forbidden.status(), Some(403));

        let missing = client.get::<serde_json::Value>("/missing").await.unwrap_err();
        assert_eq!(missing.status(), Some(404));

        let down = client.get::<serde_json::Value>("/down").await.unwrap_err();
        assert!(down.is_upstream_failure());
        assert!(down.to_string().contains("GET /down"));
    }

    #[tokio::test]
    async fn test_unstructured_error_body() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("GET", "/plain")
            .with_status(500)
            .with_body("internal meltdown")
            .create_async()
            .await;

        let client = PlatformClient::with_base_url("tok", server.url()).unwrap();
        let err = client.get::<serde_json::Value>("/plain").await.unwrap_err();
        assert_eq!(err.status(), Some(500));
        assert!(err.to_string().contains("internal meltdown"));
    }

    #[tokio::test]
    async fn test_delete_with_empty_body() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("DELETE", "/v1/storage/stores/db_1")
            .with_status(204)
            .create_async()
            .await;

        let client = PlatformClient::with_base_url("tok", server.url()).unwrap();
        client.delete("/v1/storage/stores/db_1").await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_network_failure_is_transport_error() {
        let client = PlatformClient::with_base_url("tok", "http://127.0.0.1:9").unwrap();
        let err = client.get::<serde_json::Value>("/v9/projects").await.unwrap_err();
        assert!(matches!(err, CloudError::Transport { .. }));
        assert_eq!(err.status(), None);
    }
}
