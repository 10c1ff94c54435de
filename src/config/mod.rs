use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::PathBuf;

/// Complete cloudlink configuration.
///
/// Secrets (master key, OAuth client secret, tokens) are never read from
/// this file; they come from the environment.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CloudlinkConfig {
    #[serde(default)]
    pub oauth: OAuthSettings,
    #[serde(default)]
    pub platform: PlatformSettings,
    #[serde(default)]
    pub resources: ResourceSettings,
    #[serde(default)]
    pub build: BuildSettings,
    #[serde(default)]
    pub credentials: CredentialSettings,
}

/// OAuth endpoints (client id/secret come from env)
#[derive(Debug, Clone, Deserialize)]
pub struct OAuthSettings {
    #[serde(default = "default_auth_url")]
    pub auth_url: String,
    #[serde(default = "default_token_url")]
    pub token_url: String,
    #[serde(default = "default_redirect_uri")]
    pub redirect_uri: String,
    #[serde(default)]
    pub scopes: Vec<String>,
    /// How long an issued CSRF state stays valid (seconds)
    #[serde(default = "default_state_expiry")]
    pub state_expiry_seconds: i64,
}

fn default_auth_url() -> String {
    "https://vercel.com/oauth/authorize".to_string()
}

fn default_token_url() -> String {
    "https://api.vercel.com/v2/oauth/access_token".to_string()
}

fn default_redirect_uri() -> String {
    "http://localhost:3000/api/oauth/callback".to_string()
}

fn default_state_expiry() -> i64 {
    600
}

impl Default for OAuthSettings {
    fn default() -> Self {
        Self {
            auth_url: default_auth_url(),
            token_url: default_token_url(),
            redirect_uri: default_redirect_uri(),
            scopes: Vec::new(),
            state_expiry_seconds: default_state_expiry(),
        }
    }
}

/// Platform REST API
#[derive(Debug, Clone, Deserialize)]
pub struct PlatformSettings {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
    /// Scopes every request to a team when set
    #[serde(default)]
    pub team_id: Option<String>,
}

fn default_base_url() -> String {
    "https://api.vercel.com".to_string()
}

fn default_request_timeout() -> u64 {
    30
}

impl Default for PlatformSettings {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            request_timeout_seconds: default_request_timeout(),
            team_id: None,
        }
    }
}

/// Resource manager defaults
#[derive(Debug, Clone, Deserialize)]
pub struct ResourceSettings {
    #[serde(default = "default_region")]
    pub default_region: String,
    #[serde(default = "default_plan")]
    pub default_plan: String,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_seconds: u64,
    #[serde(default = "default_poll_timeout")]
    pub poll_timeout_seconds: u64,
}

fn default_region() -> String {
    "iad1".to_string()
}

fn default_plan() -> String {
    "hobby".to_string()
}

fn default_poll_interval() -> u64 {
    5
}

fn default_poll_timeout() -> u64 {
    300
}

impl Default for ResourceSettings {
    fn default() -> Self {
        Self {
            default_region: default_region(),
            default_plan: default_plan(),
            poll_interval_seconds: default_poll_interval(),
            poll_timeout_seconds: default_poll_timeout(),
        }
    }
}

/// A program plus its fixed arguments.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CommandSpec {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl CommandSpec {
    pub fn new(program: &str, args: &[&str]) -> Self {
        Self {
            program: program.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
        }
    }
}

/// Build pipeline
#[derive(Debug, Clone, Deserialize)]
pub struct BuildSettings {
    /// Parent directory for ephemeral workspaces (system temp dir when unset)
    #[serde(default)]
    pub work_root: Option<PathBuf>,
    /// Wall-clock budget for one build job (seconds)
    #[serde(default = "default_build_timeout")]
    pub timeout_seconds: u64,
    #[serde(default = "default_git")]
    pub git: CommandSpec,
    #[serde(default = "default_install")]
    pub install: CommandSpec,
    #[serde(default = "default_bundler")]
    pub bundler: CommandSpec,
    #[serde(default = "default_deploy")]
    pub deploy: CommandSpec,
    /// Env var the deploy CLI reads its token from
    #[serde(default = "default_deploy_token_env")]
    pub deploy_token_env: String,
    /// Existing `node_modules` to link instead of reinstalling
    #[serde(default)]
    pub dependency_cache: Option<PathBuf>,
}

fn default_build_timeout() -> u64 {
    300
}

fn default_git() -> CommandSpec {
    CommandSpec::new("git", &[])
}

fn default_install() -> CommandSpec {
    CommandSpec::new("npm", &["ci", "--prefer-offline", "--no-audit"])
}

fn default_bundler() -> CommandSpec {
    CommandSpec::new("npx", &["vite", "build"])
}

fn default_deploy() -> CommandSpec {
    CommandSpec::new("npx", &["vercel", "deploy", "--yes"])
}

fn default_deploy_token_env() -> String {
    "VERCEL_TOKEN".to_string()
}

impl Default for BuildSettings {
    fn default() -> Self {
        Self {
            work_root: None,
            timeout_seconds: default_build_timeout(),
            git: default_git(),
            install: default_install(),
            bundler: default_bundler(),
            deploy: default_deploy(),
            deploy_token_env: default_deploy_token_env(),
            dependency_cache: None,
        }
    }
}

/// Bundled SQLite credential store
#[derive(Debug, Clone, Deserialize)]
pub struct CredentialSettings {
    #[serde(default = "default_database_path")]
    pub database_path: String,
}

fn default_database_path() -> String {
    "credentials.db".to_string()
}

impl Default for CredentialSettings {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
        }
    }
}

impl CloudlinkConfig {
    /// Applies `CLOUDLINK_*` environment overrides on top of file values.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("CLOUDLINK_PLATFORM_BASE_URL") {
            self.platform.base_url = v;
        }
        if let Ok(v) = std::env::var("CLOUDLINK_TEAM_ID") {
            self.platform.team_id = Some(v);
        }
        if let Ok(v) = std::env::var("CLOUDLINK_CREDENTIALS_DB") {
            self.credentials.database_path = v;
        }
        if let Ok(v) = std::env::var("CLOUDLINK_BUILD_TIMEOUT_SECONDS") {
            if let Ok(n) = v.parse::<u64>() {
                self.build.timeout_seconds = n;
            }
        }
        if let Ok(v) = std::env::var("CLOUDLINK_DEPENDENCY_CACHE") {
            self.build.dependency_cache = Some(PathBuf::from(v));
        }
    }
}

/// Load configuration from a TOML file
pub fn load_config(path: &str) -> Result<CloudlinkConfig> {
    let contents =
        std::fs::read_to_string(path).with_context(|| format!("Failed to read config {}", path))?;
    let config: CloudlinkConfig =
        toml::from_str(&contents).with_context(|| format!("Failed to parse config {}", path))?;
    Ok(config)
}
