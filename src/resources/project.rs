use super::validation::{validate_id, validate_name};
use super::resource_error;
use crate::error::{CloudError, Result, ResultExt};
use crate::platform::PlatformClient;
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub framework: Option<String>,
    #[serde(default)]
    pub created_at: Option<i64>,
    #[serde(default)]
    pub updated_at: Option<i64>,
}

/// Repository a project deploys from, e.g. `github` + `acme/site`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GitRepository {
    #[serde(rename = "type")]
    pub provider: String,
    pub repo: String,
}

#[derive(Debug, Clone, Default)]
pub struct CreateProject {
    pub name: String,
    pub framework: Option<String>,
    pub git_repository: Option<GitRepository>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateBody<'a> {
    name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    framework: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    git_repository: Option<&'a GitRepository>,
}

#[derive(Deserialize)]
struct ProjectsEnvelope {
    #[serde(default)]
    projects: Vec<Project>,
}

pub struct ProjectManager<'a> {
    client: &'a PlatformClient,
}

impl<'a> ProjectManager<'a> {
    pub fn new(client: &'a PlatformClient) -> Self {
        Self { client }
    }

    pub async fn list(&self) -> Result<Vec<Project>> {
        let listed: ProjectsEnvelope = self
            .client
            .get("/v9/projects")
            .await
            .op_context("list_projects")?;
        Ok(listed.projects)
    }

    pub async fn create(&self, request: &CreateProject) -> Result<Project> {
        validate_name("name", &request.name)?;
        if let Some(repository) = &request.git_repository {
            if repository.provider.is_empty() || !repository.repo.contains('/') {
                return Err(CloudError::validation(
                    "git_repository",
                    "expected a provider and an 'owner/name' repository",
                ));
            }
        }

        let body = CreateBody {
            name: &request.name,
            framework: request.framework.as_deref(),
            git_repository: request.git_repository.as_ref(),
        };
        let project: Project = self
            .client
            .post("/v9/projects", &body)
            .await
            .op_context(format!("create_project({})", request.name))?;

        info!(project_id = %project.id, name = %project.name, "Created project");
        Ok(project)
    }

    /// Looks a project up by id or name.
    pub async fn get(&self, id_or_name: &str) -> Result<Project> {
        validate_id("id", id_or_name)?;
        self.client
            .get(&format!("/v9/projects/{}", id_or_name))
            .await
            .map_err(resource_error("get_project", "project", id_or_name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server};
    use serde_json::json;

    #[tokio::test]
    async fn test_list_projects() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("GET", "/v9/projects")
            .with_status(200)
            .with_body(
                r#"{"projects":[{"id":"prj_1","name":"site","framework":"vite"}],"pagination":{"count":1}}"#,
            )
            .create_async()
            .await;

        let client = PlatformClient::with_base_url("tok", server.url()).unwrap();
        let projects = ProjectManager::new(&client).list().await.unwrap();

        assert_eq!(projects.len(), 1);
        assert_eq!(projects[0].framework.as_deref(), Some("vite"));
    }

    #[tokio::test]
    async fn test_create_project_omits_unset_fields() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/v9/projects")
            .match_body(Matcher::Json(json!({"name": "site"})))
            .with_status(200)
            .with_body(r#"{"id":"prj_2","name":"site"}"#)
            .create_async()
            .await;

        let client = PlatformClient::with_base_url("tok", server.url()).unwrap();
        let project = ProjectManager::new(&client)
            .create(&CreateProject {
                name: "site".to_string(),
                ..CreateProject::default()
            })
            .await
            .unwrap();

        assert_eq!(project.id, "prj_2");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_create_project_validation() {
        let mut server = Server::new_async().await;
        let mock = server.mock("POST", Matcher::Any).expect(0).create_async().await;

        let client = PlatformClient::with_base_url("tok", server.url()).unwrap();
        let manager = ProjectManager::new(&client);

        let too_long = manager
            .create(&CreateProject {
                name: "p".repeat(64),
                ..CreateProject::default()
            })
            .await;
        assert!(matches!(too_long, Err(CloudError::Validation { field: "name", .. })));

        let bad_repo = manager
            .create(&CreateProject {
                name: "site".to_string(),
                framework: None,
                git_repository: Some(GitRepository {
                    provider: "github".to_string(),
                    repo: "site".to_string(),
                }),
            })
            .await;
        assert!(matches!(
            bad_repo,
            Err(CloudError::Validation { field: "git_repository", .. })
        ));

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_create_conflict_keeps_status() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/v9/projects")
            .with_status(409)
            .with_body(r#"{"error":{"code":"conflict","message":"Project already exists"}}"#)
            .create_async()
            .await;

        let client = PlatformClient::with_base_url("tok", server.url()).unwrap();
        let err = ProjectManager::new(&client)
            .create(&CreateProject {
                name: "site".to_string(),
                ..CreateProject::default()
            })
            .await
            .unwrap_err();

        assert_eq!(err.status(), Some(409));
        assert!(err.to_string().contains("create_project(site)"));
        assert!(err.to_string().contains("Project already exists"));
    }

    #[tokio::test]
    async fn test_get_missing_project() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("GET", "/v9/projects/nope")
            .with_status(404)
            .with_body(r#"{"error":{"code":"not_found","message":"Project not found"}}"#)
            .create_async()
            .await;

        let client = PlatformClient::with_base_url("tok", server.url()).unwrap();
        let err = ProjectManager::new(&client)
            .get("nope")
            .await
            .unwrap_err();
        assert!(matches!(err, CloudError::NotFound(_)));
    }
}
