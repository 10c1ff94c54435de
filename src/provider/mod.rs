//! Provider contract.
//!
//! Every cloud platform is addressed through [`CloudProvider`]. Providers
//! are stateless: the caller passes a decrypted access token into each
//! call and nothing about it outlives that call.

mod registry;

pub use registry::ProviderRegistry;

use crate::error::Result;
use crate::resources::{
    CreateDatabase, CreateDeployment, CreateProject, Database, Deployment, EnvVar, Project,
    StoredEnvVar,
};
use async_trait::async_trait;
use serde::Serialize;
use std::fmt;

/// Operations a provider supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    CreateDatabase,
    ListDatabases,
    DeleteDatabase,
    UpdateEnvVars,
    CreateDeployment,
    GetDeployment,
    ListDeployments,
    ListProjects,
    CreateProject,
    ValidateCredentials,
}

impl Capability {
    pub const ALL: &'static [Capability] = &[
        Capability::CreateDatabase,
        Capability::ListDatabases,
        Capability::DeleteDatabase,
        Capability::UpdateEnvVars,
        Capability::CreateDeployment,
        Capability::GetDeployment,
        Capability::ListDeployments,
        Capability::ListProjects,
        Capability::CreateProject,
        Capability::ValidateCredentials,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::CreateDatabase => "create_database",
            Capability::ListDatabases => "list_databases",
            Capability::DeleteDatabase => "delete_database",
            Capability::UpdateEnvVars => "update_env_vars",
            Capability::CreateDeployment => "create_deployment",
            Capability::GetDeployment => "get_deployment",
            Capability::ListDeployments => "list_deployments",
            Capability::ListProjects => "list_projects",
            Capability::CreateProject => "create_project",
            Capability::ValidateCredentials => "validate_credentials",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Static description of a registered provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProviderDescriptor {
    pub name: String,
    pub version: String,
    pub capabilities: Vec<Capability>,
}

/// Cloud platform integration.
///
/// # Example
/// ```no_run
/// use cloudlink::config::CloudlinkConfig;
/// use cloudlink::providers::VercelProvider;
/// use cloudlink::ProviderRegistry;
/// use std::sync::Arc;
///
/// # async fn example(token: &str) -> cloudlink::Result<()> {
/// let registry = ProviderRegistry::new();
/// registry.register(Arc::new(VercelProvider::new(&CloudlinkConfig::default())))?;
///
/// let vercel = registry.get("Vercel")?;
/// if vercel.validate_credentials(token).await? {
///     for project in vercel.list_projects(token).await? {
///         println!("{} {}", project.id, project.name);
///     }
/// }
/// # Ok(())
/// # }
/// ```
#[async_trait]
pub trait CloudProvider: Send + Sync {
    /// Registry key. Lookups are case-insensitive.
    fn name(&self) -> &str;

    fn version(&self) -> &str;

    fn capabilities(&self) -> &[Capability] {
        Capability::ALL
    }

    fn descriptor(&self) -> ProviderDescriptor {
        ProviderDescriptor {
            name: self.name().to_string(),
            version: self.version().to_string(),
            capabilities: self.capabilities().to_vec(),
        }
    }

    /// `Ok(false)` when the platform rejects the token (401/403). Other
    /// failures are errors.
    async fn validate_credentials(&self, token: &str) -> Result<bool>;

    async fn create_database(&self, token: &str, request: &CreateDatabase) -> Result<Database>;

    async fn list_databases(&self, token: &str) -> Result<Vec<Database>>;

    async fn delete_database(&self, token: &str, id: &str) -> Result<()>;

    async fn update_env_vars(
        &self,
        token: &str,
        project_id: &str,
        vars: &[EnvVar],
    ) -> Result<Vec<StoredEnvVar>>;

    async fn create_deployment(
        &self,
        token: &str,
        request: &CreateDeployment,
    ) -> Result<Deployment>;

    async fn get_deployment(&self, token: &str, id: &str) -> Result<Deployment>;

    async fn list_deployments(
        &self,
        token: &str,
        project_id: Option<&str>,
    ) -> Result<Vec<Deployment>>;

    async fn list_projects(&self, token: &str) -> Result<Vec<Project>>;

    async fn create_project(&self, token: &str, request: &CreateProject) -> Result<Project>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capability_names_are_unique() {
        let mut names: Vec<&str> = Capability::ALL.iter().map(Capability::as_str).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), Capability::ALL.len());
    }

    #[test]
    fn test_capability_serializes_as_snake_case() {
        let json = serde_json::to_string(&Capability::UpdateEnvVars).unwrap();
        assert_eq!(json, "\"update_env_vars\"");
        assert_eq!(Capability::UpdateEnvVars.to_string(), "update_env_vars");
    }
}
