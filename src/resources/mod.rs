//! Resource managers layered on [`PlatformClient`](crate::platform::PlatformClient).
//!
//! Every manager validates its input before touching the network, applies
//! [`ResourceDefaults`] on create, and turns an upstream 404 into
//! [`CloudError::NotFound`]. Other provider errors keep their status and
//! gain the operation and resource id as context.

pub mod database;
pub mod deployment;
pub mod env;
mod poll;
pub mod project;
pub mod validation;

pub use database::{CreateDatabase, Database, DatabaseManager, DatabaseStatus};
pub use deployment::{CreateDeployment, Deployment, DeploymentManager, DeploymentState, GitSource};
pub use env::{EnvManager, EnvVar, EnvVarKind, StoredEnvVar};
pub use poll::{wait_for_ready, PollOptions, ReadyState};
pub use project::{CreateProject, GitRepository, Project, ProjectManager};

use crate::config::ResourceSettings;
use crate::error::CloudError;
use std::time::Duration;

/// Values applied when a create request leaves them out.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceDefaults {
    pub region: String,
    pub plan: String,
    pub poll: PollOptions,
}

impl Default for ResourceDefaults {
    fn default() -> Self {
        Self::from(&ResourceSettings::default())
    }
}

impl From<&ResourceSettings> for ResourceDefaults {
    fn from(settings: &ResourceSettings) -> Self {
        Self {
            region: settings.default_region.clone(),
            plan: settings.default_plan.clone(),
            poll: PollOptions {
                // Zero would busy-poll the API.
                interval: Duration::from_secs(settings.poll_interval_seconds.max(1)),
                timeout: Duration::from_secs(settings.poll_timeout_seconds),
            },
        }
    }
}

/// Error mapper for calls addressing one resource.
///
/// A 404 becomes `NotFound` naming the resource; anything else gets
/// `operation(id)` as context.
pub(crate) fn resource_error<'a>(
    operation: &'a str,
    resource: &'a str,
    id: &'a str,
) -> impl FnOnce(CloudError) -> CloudError + 'a {
    move |err| {
        if err.status() == Some(404) {
            CloudError::NotFound(format!("{} '{}': {}", resource, id, err))
        } else {
            err.context(format!("{}({})", operation, id))
        }
    }
}
