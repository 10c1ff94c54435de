use super::validation::{validate_id, validate_name, validate_target};
use super::{resource_error, wait_for_ready, ReadyState, ResourceDefaults};
use crate::error::{Result, ResultExt};
use crate::platform::PlatformClient;
use serde::{Deserialize, Serialize};
use tracing::info;

const LIST_LIMIT: u32 = 20;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DeploymentState {
    Queued,
    Initializing,
    Building,
    Ready,
    Error,
    Canceled,
    #[default]
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "DeploymentPayload")]
pub struct Deployment {
    pub id: String,
    pub name: String,
    pub url: Option<String>,
    #[serde(rename = "readyState")]
    pub state: DeploymentState,
    pub target: Option<String>,
    pub project_id: Option<String>,
    pub created_at: Option<i64>,
}

/// Wire shape. v13 uses `id`/`readyState`/`createdAt`, v6 lists send
/// `uid`/`state`/`created`, and some responses carry both spellings.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeploymentPayload {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    uid: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    ready_state: Option<DeploymentState>,
    #[serde(default)]
    state: Option<DeploymentState>,
    #[serde(default)]
    target: Option<String>,
    #[serde(default)]
    project_id: Option<String>,
    #[serde(default)]
    created_at: Option<i64>,
    #[serde(default)]
    created: Option<i64>,
}

impl TryFrom<DeploymentPayload> for Deployment {
    type Error = String;

    fn try_from(raw: DeploymentPayload) -> std::result::Result<Self, Self::Error> {
        let id = raw
            .id
            .or(raw.uid)
            .ok_or_else(|| "deployment has neither `id` nor `uid`".to_string())?;
        Ok(Self {
            id,
            name: raw.name.unwrap_or_default(),
            url: raw.url,
            state: raw.ready_state.or(raw.state).unwrap_or_default(),
            target: raw.target,
            project_id: raw.project_id,
            created_at: raw.created_at.or(raw.created),
        })
    }
}

impl ReadyState for Deployment {
    fn is_terminal(&self) -> bool {
        matches!(
            self.state,
            DeploymentState::Ready | DeploymentState::Error | DeploymentState::Canceled
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GitSource {
    #[serde(rename = "type")]
    pub provider: String,
    pub repo_id: String,
    #[serde(rename = "ref")]
    pub reference: String,
}

#[derive(Debug, Clone, Default)]
pub struct CreateDeployment {
    pub name: String,
    /// Project id or name the deployment belongs to.
    pub project: String,
    pub target: Option<String>,
    pub git_source: Option<GitSource>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateBody<'a> {
    name: &'a str,
    project: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    target: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    git_source: Option<&'a GitSource>,
}

#[derive(Deserialize)]
struct DeploymentsEnvelope {
    #[serde(default)]
    deployments: Vec<Deployment>,
}

pub struct DeploymentManager<'a> {
    client: &'a PlatformClient,
    defaults: &'a ResourceDefaults,
}

impl<'a> DeploymentManager<'a> {
    pub fn new(client: &'a PlatformClient, defaults: &'a ResourceDefaults) -> Self {
        Self { client, defaults }
    }

    pub async fn create(&self, request: &CreateDeployment) -> Result<Deployment> {
        validate_name("name", &request.name)?;
        validate_id("project", &request.project)?;
        if let Some(target) = request.target.as_deref() {
            validate_target(target)?;
        }

        let body = CreateBody {
            name: &request.name,
            project: &request.project,
            target: request.target.as_deref(),
            git_source: request.git_source.as_ref(),
        };
        let deployment: Deployment = self
            .client
            .post("/v13/deployments", &body)
            .await
            .map_err(resource_error("create_deployment", "project", &request.project))?;

        info!(deployment_id = %deployment.id, project = %request.project, "Created deployment");
        Ok(deployment)
    }

    pub async fn get(&self, id: &str) -> Result<Deployment> {
        validate_id("id", id)?;
        self.client
            .get(&format!("/v13/deployments/{}", id))
            .await
            .map_err(resource_error("get_deployment", "deployment", id))
    }

    /// Most recent deployments, optionally restricted to one project.
    pub async fn list(&self, project_id: Option<&str>) -> Result<Vec<Deployment>> {
        let path = match project_id {
            Some(project_id) => {
                validate_id("project_id", project_id)?;
                format!(
                    "/v6/deployments?projectId={}&limit={}",
                    project_id, LIST_LIMIT
                )
            }
            None => format!("/v6/deployments?limit={}", LIST_LIMIT),
        };

        let listed: DeploymentsEnvelope = match project_id {
            Some(project_id) => self
                .client
                .get(&path)
                .await
                .map_err(resource_error("list_deployments", "project", project_id))?,
            None => self.client.get(&path).await.op_context("list_deployments")?,
        };
        Ok(listed.deployments)
    }

    /// Polls until the deployment is `READY`, `ERROR` or `CANCELED`.
    pub async fn wait_for_ready(&self, id: &str) -> Result<Deployment> {
        validate_id("id", id)?;
        wait_for_ready(&format!("deployment {}", id), self.defaults.poll, || self.get(id)).await
    }
}
