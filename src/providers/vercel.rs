use crate::config::{CloudlinkConfig, PlatformSettings};
use crate::error::{Result, ResultExt};
use crate::platform::PlatformClient;
use crate::provider::CloudProvider;
use crate::resources::{
    CreateDatabase, CreateDeployment, CreateProject, Database, DatabaseManager, Deployment,
    DeploymentManager, EnvManager, EnvVar, Project, ProjectManager, ResourceDefaults,
    StoredEnvVar,
};
use async_trait::async_trait;
use tracing::debug;

pub const NAME: &str = "vercel";

/// Vercel REST API provider.
pub struct VercelProvider {
    platform: PlatformSettings,
    defaults: ResourceDefaults,
}

impl VercelProvider {
    pub fn new(config: &CloudlinkConfig) -> Self {
        Self {
            platform: config.platform.clone(),
            defaults: ResourceDefaults::from(&config.resources),
        }
    }

    /// Create a provider with a custom API base URL (for testing).
    pub fn with_base_url(base_url: impl Into<String>, defaults: ResourceDefaults) -> Self {
        Self {
            platform: PlatformSettings {
                base_url: base_url.into(),
                ..PlatformSettings::default()
            },
            defaults,
        }
    }

    pub fn defaults(&self) -> &ResourceDefaults {
        &self.defaults
    }

    fn client(&self, token: &str) -> Result<PlatformClient> {
        PlatformClient::new(token, &self.platform)
    }
}

#[async_trait]
impl CloudProvider for VercelProvider {
    fn name(&self) -> &str {
        NAME
    }

    fn version(&self) -> &str {
        env!("CARGO_PKG_VERSION")
    }

    async fn validate_credentials(&self, token: &str) -> Result<bool> {
        let client = self.client(token)?;
        match client.get::<serde_json::Value>("/v2/user").await {
            Ok(_) => Ok(true),
            Err(e) if matches!(e.status(), Some(401 | 403)) => {
                debug!(provider = NAME, status = ?e.status(), "Token rejected");
                Ok(false)
            }
            Err(e) => Err(e.context(NAME)),
        }
    }

    async fn create_database(&self, token: &str, request: &CreateDatabase) -> Result<Database> {
        let client = self.client(token)?;
        DatabaseManager::new(&client, &self.defaults)
            .create(request)
            .await
            .op_context(NAME)
    }

    async fn list_databases(&self, token: &str) -> Result<Vec<Database>> {
        let client = self.client(token)?;
        DatabaseManager::new(&client, &self.defaults)
            .list()
            .await
            .op_context(NAME)
    }

    async fn delete_database(&self, token: &str, id: &str) -> Result<()> {
        let client = self.client(token)?;
        DatabaseManager::new(&client, &self.defaults)
            .delete(id)
            .await
            .op_context(NAME)
    }

    async fn update_env_vars(
        &self,
        token: &str,
        project_id: &str,
        vars: &[EnvVar],
    ) -> Result<Vec<StoredEnvVar>> {
        let client = self.client(token)?;
        EnvManager::new(&client)
            .upsert(project_id, vars)
            .await
            .op_context(NAME)
    }

    async fn create_deployment(
        &self,
        token: &str,
        request: &CreateDeployment,
    ) -> Result<Deployment> {
        let client = self.client(token)?;
        DeploymentManager::new(&client, &self.defaults)
            .create(request)
            .await
            .op_context(NAME)
    }

    async fn get_deployment(&self, token: &str, id: &str) -> Result<Deployment> {
        let client = self.client(token)?;
        DeploymentManager::new(&client, &self.defaults)
            .get(id)
            .await
            .op_context(NAME)
    }

    async fn list_deployments(
        &self,
        token: &str,
        project_id: Option<&str>,
    ) -> Result<Vec<Deployment>> {
        let client = self.client(token)?;
        DeploymentManager::new(&client, &self.defaults)
            .list(project_id)
            .await
            .op_context(NAME)
    }

    async fn list_projects(&self, token: &str) -> Result<Vec<Project>> {
        let client = self.client(token)?;
        ProjectManager::new(&client).list().await.op_context(NAME)
    }

    async fn create_project(&self, token: &str, request: &CreateProject) -> Result<Project> {
        let client = self.client(token)?;
        ProjectManager::new(&client)
            .create(request)
            .await
            .op_context(NAME)
    }
}
