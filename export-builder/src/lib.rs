// Component scan and import resolution
pub mod discovery;

// Deadline-bounded build pipeline
pub mod orchestrator;

// Subprocess runner with merged line capture
pub mod process;

// Ephemeral per-job directories
pub mod workspace;

pub use discovery::{ComponentInfo, SourceDiscovery, SourceFile};
pub use orchestrator::{BuildConfig, BuildPhase, BuildResult, Orchestrator, SourceRef};
pub use workspace::Workspace;
