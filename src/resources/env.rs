use super::resource_error;
use super::validation::{validate_env_key, validate_id, validate_target, TARGETS};
use crate::error::{CloudError, Result};
use crate::platform::PlatformClient;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnvVarKind {
    Plain,
    #[default]
    Encrypted,
    Sensitive,
    System,
    Secret,
    #[serde(other)]
    Unknown,
}

/// A variable to write. Empty `targets` means every target.
#[derive(Clone, PartialEq)]
pub struct EnvVar {
    pub key: String,
    pub value: String,
    pub targets: Vec<String>,
    pub kind: EnvVarKind,
}

impl EnvVar {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            targets: Vec::new(),
            kind: EnvVarKind::default(),
        }
    }

    pub fn with_targets(mut self, targets: &[&str]) -> Self {
        self.targets = targets.iter().map(|t| t.to_string()).collect();
        self
    }

    fn resolved_targets(&self) -> Vec<&str> {
        if self.targets.is_empty() {
            TARGETS.to_vec()
        } else {
            self.targets.iter().map(String::as_str).collect()
        }
    }
}

// Values are often secrets.
impl std::fmt::Debug for EnvVar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnvVar")
            .field("key", &self.key)
            .field("targets", &self.targets)
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

/// A variable as the platform reports it back. Encrypted values are omitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredEnvVar {
    pub id: String,
    pub key: String,
    #[serde(default, skip_serializing)]
    pub value: Option<String>,
    #[serde(default)]
    pub target: Vec<String>,
    #[serde(rename = "type", default)]
    pub kind: EnvVarKind,
    #[serde(default)]
    pub created_at: Option<i64>,
}

#[derive(Serialize)]
struct EnvBody<'a> {
    key: &'a str,
    value: &'a str,
    target: Vec<&'a str>,
    #[serde(rename = "type")]
    kind: EnvVarKind,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    Many(Vec<StoredEnvVar>),
    One(Box<StoredEnvVar>),
}

#[derive(Debug, Deserialize)]
struct FailedEntry {
    error: FailedError,
}

#[derive(Debug, Deserialize)]
struct FailedError {
    #[serde(default)]
    key: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Deserialize)]
struct UpsertResponse {
    #[serde(default)]
    created: Option<OneOrMany>,
    #[serde(default)]
    failed: Vec<FailedEntry>,
}

#[derive(Deserialize)]
struct EnvsEnvelope {
    #[serde(default)]
    envs: Vec<StoredEnvVar>,
}

pub struct EnvManager<'a> {
    client: &'a PlatformClient,
}

impl<'a> EnvManager<'a> {
    pub fn new(client: &'a PlatformClient) -> Self {
        Self { client }
    }

    /// Creates or overwrites `vars` on a project in one request.
    ///
    /// The whole batch is validated first. If the platform rejects any entry
    /// the call fails with the rejected keys.
    pub async fn upsert(&self, project_id: &str, vars: &[EnvVar]) -> Result<Vec<StoredEnvVar>> {
        validate_id("project_id", project_id)?;
        validate_batch(vars)?;

        let body: Vec<EnvBody<'_>> = vars
            .iter()
            .map(|var| EnvBody {
                key: &var.key,
                value: &var.value,
                target: var.resolved_targets(),
                kind: var.kind,
            })
            .collect();

        let response: UpsertResponse = self
            .client
            .post(&format!("/v10/projects/{}/env?upsert=true", project_id), &body)
            .await
            .map_err(resource_error("update_env_vars", "project", project_id))?;

        if !response.failed.is_empty() {
            let rejected: Vec<String> = response
                .failed
                .iter()
                .map(|f| {
                    format!(
                        "{}: {}",
                        f.error.key.as_deref().unwrap_or("?"),
                        f.error.message.as_deref().unwrap_or("rejected")
                    )
                })
                .collect();
            warn!(project_id = %project_id, rejected = rejected.len(), "Platform rejected env vars");
            return Err(CloudError::provider(
                400,
                format!("rejected env vars: {}", rejected.join("; ")),
            )
            .context(format!("update_env_vars({})", project_id)));
        }

        let stored = match response.created {
            Some(OneOrMany::Many(vars)) => vars,
            Some(OneOrMany::One(var)) => vec![*var],
            None => Vec::new(),
        };
        info!(project_id = %project_id, count = stored.len(), "Updated env vars");
        Ok(stored)
    }

    pub async fn list(&self, project_id: &str) -> Result<Vec<StoredEnvVar>> {
        validate_id("project_id", project_id)?;
        let listed: EnvsEnvelope = self
            .client
            .get(&format!("/v9/projects/{}/env", project_id))
            .await
            .map_err(resource_error("list_env_vars", "project", project_id))?;
        Ok(listed.envs)
    }

    pub async fn delete(&self, project_id: &str, env_id: &str) -> Result<()> {
        validate_id("project_id", project_id)?;
        validate_id("env_id", env_id)?;
        self.client
            .delete(&format!("/v9/projects/{}/env/{}", project_id, env_id))
            .await
            .map_err(resource_error("delete_env_var", "env var", env_id))
    }
}

fn validate_batch(vars: &[EnvVar]) -> Result<()> {
    if vars.is_empty() {
        return Err(CloudError::validation("vars", "at least one variable is required"));
    }

    let mut seen = HashSet::new();
    for var in vars {
        validate_env_key(&var.key)?;
        for target in &var.targets {
            validate_target(target)?;
        }
        for target in var.resolved_targets() {
            if !seen.insert((var.key.as_str(), target)) {
                return Err(CloudError::validation(
                    "key",
                    format!("'{}' is set twice for target '{}'", var.key, target),
                ));
            }
        }
    }
    Ok(())
}
