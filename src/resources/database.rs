use super::validation::{
    validate_database_kind, validate_id, validate_name, validate_plan, validate_region,
};
use super::{resource_error, wait_for_ready, ReadyState, ResourceDefaults};
use crate::error::{Result, ResultExt};
use crate::platform::PlatformClient;
use serde::{Deserialize, Serialize};
use tracing::info;

const STORES_PATH: &str = "/v1/storage/stores";
const DEFAULT_KIND: &str = "postgres";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseStatus {
    #[serde(alias = "available", alias = "READY")]
    Ready,
    #[serde(alias = "provisioning", alias = "creating", alias = "initializing")]
    Pending,
    #[serde(alias = "failed", alias = "ERROR")]
    Error,
    #[default]
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Database {
    pub id: String,
    pub name: String,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub plan: Option<String>,
    #[serde(default)]
    pub status: DatabaseStatus,
    #[serde(default)]
    pub created_at: Option<i64>,
}

impl ReadyState for Database {
    fn is_terminal(&self) -> bool {
        matches!(self.status, DatabaseStatus::Ready | DatabaseStatus::Error)
    }
}

/// Request for a new database. `None` fields take the configured defaults.
#[derive(Debug, Clone, Default)]
pub struct CreateDatabase {
    pub name: String,
    pub kind: Option<String>,
    pub region: Option<String>,
    pub plan: Option<String>,
}

impl CreateDatabase {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

#[derive(Serialize)]
struct CreateBody<'a> {
    name: &'a str,
    #[serde(rename = "type")]
    kind: &'a str,
    region: &'a str,
    plan: &'a str,
}

#[derive(Deserialize)]
struct StoreEnvelope {
    store: Database,
}

#[derive(Deserialize)]
struct StoresEnvelope {
    #[serde(default)]
    stores: Vec<Database>,
}

pub struct DatabaseManager<'a> {
    client: &'a PlatformClient,
    defaults: &'a ResourceDefaults,
}

impl<'a> DatabaseManager<'a> {
    pub fn new(client: &'a PlatformClient, defaults: &'a ResourceDefaults) -> Self {
        Self { client, defaults }
    }

    pub async fn create(&self, request: &CreateDatabase) -> Result<Database> {
        validate_name("name", &request.name)?;
        let kind = request.kind.as_deref().unwrap_or(DEFAULT_KIND);
        let region = request.region.as_deref().unwrap_or(&self.defaults.region);
        let plan = request.plan.as_deref().unwrap_or(&self.defaults.plan);
        validate_database_kind(kind)?;
        validate_region(region)?;
        validate_plan(plan)?;

        let body = CreateBody {
            name: &request.name,
            kind,
            region,
            plan,
        };
        let created: StoreEnvelope = self
            .client
            .post(STORES_PATH, &body)
            .await
            .op_context(format!("create_database({})", request.name))?;

        info!(database_id = %created.store.id, name = %request.name, region = %region, "Created database");
        Ok(created.store)
    }

    pub async fn list(&self) -> Result<Vec<Database>> {
        let listed: StoresEnvelope = self
            .client
            .get(STORES_PATH)
            .await
            .op_context("list_databases")?;
        Ok(listed.stores)
    }

    pub async fn get(&self, id: &str) -> Result<Database> {
        validate_id("id", id)?;
        let found: StoreEnvelope = self
            .client
            .get(&format!("{}/{}", STORES_PATH, id))
            .await
            .map_err(resource_error("get_database", "database", id))?;
        Ok(found.store)
    }

    pub async fn delete(&self, id: &str) -> Result<()> {
        validate_id("id", id)?;
        self.client
            .delete(&format!("{}/{}", STORES_PATH, id))
            .await
            .map_err(resource_error("delete_database", "database", id))?;
        info!(database_id = %id, "Deleted database");
        Ok(())
    }

    /// Polls until the database is `ready` or `error`.
    pub async fn wait_for_ready(&self, id: &str) -> Result<Database> {
        validate_id("id", id)?;
        wait_for_ready(&format!("database {}", id), self.defaults.poll, || self.get(id)).await
    }
}
