//! Build orchestrator: one synchronous, deadline-bounded export job.
//!
//! `pending -> cloning -> installing -> bundling -> deploying -> succeeded|failed`
//!
//! Every failure after the workspace exists is folded into the returned
//! [`BuildResult`]; the workspace is removed on every exit path.

use crate::discovery::SourceDiscovery;
use crate::process::{self, BuildLog, Invocation, RunError};
use crate::workspace::Workspace;
use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::{DateTime, Utc};
use cloudlink::config::{BuildSettings, CommandSpec};
use cloudlink::{CloudError, Result};
use serde::Serialize;
use serde_json::json;
use std::borrow::Cow;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;
use zeroize::Zeroizing;

const MANIFESTS: &[&str] = &["package.json", "tsconfig.json"];
/// Copied into a component export when the source has them.
const INSTALL_FILES: &[&str] = &[
    "package-lock.json",
    "npm-shrinkwrap.json",
    "pnpm-lock.yaml",
    "yarn.lock",
    ".npmrc",
];
const NPM_LOCKFILES: &[&str] = &["package-lock.json", "npm-shrinkwrap.json"];
const COPY_SKIPPED: &[&str] = &[".git", "node_modules"];

/// Where the source tree comes from.
#[derive(Debug, Clone, PartialEq)]
pub enum SourceRef {
    /// Remote repository, fetched shallowly at `revision` (default `HEAD`).
    Git { url: String, revision: Option<String> },
    /// Directory on this machine, copied into the workspace.
    Local(PathBuf),
}

pub struct BuildConfig {
    /// Credential for the deployment target workspace.
    pub credential_token: Zeroizing<String>,
    pub source: SourceRef,
    /// Read access to a private git source.
    pub source_token: Option<Zeroizing<String>>,
    /// Project directory inside the source tree; must stay inside it.
    pub output_root: PathBuf,
    /// Only export these components when non-empty.
    pub component_ids: Vec<String>,
}

impl BuildConfig {
    pub fn new(credential_token: impl Into<String>, source: SourceRef) -> Self {
        Self {
            credential_token: Zeroizing::new(credential_token.into()),
            source,
            source_token: None,
            output_root: PathBuf::from("."),
            component_ids: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildPhase {
    Pending,
    Cloning,
    Installing,
    Bundling,
    Deploying,
    Succeeded,
    Failed,
}

impl BuildPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            BuildPhase::Pending => "pending",
            BuildPhase::Cloning => "cloning",
            BuildPhase::Installing => "installing",
            BuildPhase::Bundling => "bundling",
            BuildPhase::Deploying => "deploying",
            BuildPhase::Succeeded => "succeeded",
            BuildPhase::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, BuildPhase::Succeeded | BuildPhase::Failed)
    }
}

impl fmt::Display for BuildPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// In-flight state of one build.
pub struct BuildJob {
    pub job_id: Uuid,
    pub work_dir: PathBuf,
    pub phase: BuildPhase,
    pub logs: BuildLog,
    pub deployment_url: Option<String>,
    pub started_at: DateTime<Utc>,
    pub deadline: Instant,
}

impl BuildJob {
    /// Moves to `next`, refusing backward moves and anything past the deadline.
    fn enter(&mut self, next: BuildPhase) -> Result<()> {
        if next <= self.phase || self.phase.is_terminal() {
            return Err(CloudError::Build {
                phase: self.phase.to_string(),
                message: format!("cannot move from {} to {}", self.phase, next),
            });
        }
        if Instant::now() >= self.deadline {
            return Err(CloudError::Timeout(format!(
                "build deadline exceeded before {}",
                next
            )));
        }
        info!(job_id = %self.job_id, phase = %next, "Entering build phase");
        self.logs.push(format!("==> {}", next));
        self.phase = next;
        Ok(())
    }

    fn finish(&mut self, outcome: &Result<String>) {
        match outcome {
            Ok(url) => {
                self.deployment_url = Some(url.clone());
                self.phase = BuildPhase::Succeeded;
            }
            Err(e) => {
                self.logs.push(format!("error: {}", e));
                self.phase = BuildPhase::Failed;
            }
        }
    }
}

/// Report handed back to the caller for every build, successful or not.
#[derive(Debug, Clone, Serialize)]
pub struct BuildResult {
    pub job_id: String,
    pub success: bool,
    pub phase: BuildPhase,
    pub logs: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deployment_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
}

pub struct Orchestrator {
    settings: BuildSettings,
}

impl Orchestrator {
    pub fn new(settings: BuildSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &BuildSettings {
        &self.settings
    }

    /// Runs one build to a terminal phase. Never returns an error: failures
    /// are reported through `success`, `error` and `logs`.
    pub async fn build(&self, config: BuildConfig) -> BuildResult {
        let job_id = Uuid::new_v4();
        let started = Instant::now();
        let started_at = Utc::now();
        let deadline = started + Duration::from_secs(self.settings.timeout_seconds);

        let mut logs = BuildLog::new();
        logs.add_secret(&config.credential_token);
        if let Some(token) = &config.source_token {
            logs.add_secret(token);
            logs.add_secret(&basic_credentials(token));
        }

        let workspace = match Workspace::create(self.settings.work_root.as_deref(), &job_id.to_string()) {
            Ok(workspace) => workspace,
            Err(e) => {
                warn!(job_id = %job_id, error = %e, "Failed to create build workspace");
                let error = CloudError::Build {
                    phase: BuildPhase::Pending.to_string(),
                    message: format!("failed to create workspace: {}", e),
                };
                logs.push(format!("error: {}", error));
                return BuildResult {
                    job_id: job_id.to_string(),
                    success: false,
                    phase: BuildPhase::Failed,
                    logs: logs.into_lines(),
                    deployment_url: None,
                    error: Some(error.to_string()),
                    started_at,
                    duration_ms: elapsed_ms(started),
                };
            }
        };

        let mut job = BuildJob {
            job_id,
            work_dir: workspace.path().to_path_buf(),
            phase: BuildPhase::Pending,
            logs,
            deployment_url: None,
            started_at,
            deadline,
        };
        info!(job_id = %job_id, work_dir = %job.work_dir.display(), "Build started");

        let outcome = self.run_phases(&mut job, &workspace, &config).await;
        job.finish(&outcome);

        if let Err(e) = workspace.release() {
            warn!(job_id = %job_id, error = %e, "Failed to remove build workspace");
            job.logs.push(format!("warning: workspace cleanup failed: {}", e));
        }

        let duration_ms = elapsed_ms(started);
        match &outcome {
            Ok(url) => info!(job_id = %job_id, url = %url, duration_ms, "Build succeeded"),
            Err(e) => warn!(job_id = %job_id, error = %e, duration_ms, "Build failed"),
        }

        BuildResult {
            job_id: job_id.to_string(),
            success: outcome.is_ok(),
            phase: job.phase,
            logs: job.logs.into_lines(),
            deployment_url: job.deployment_url,
            error: outcome.err().map(|e| e.to_string()),
            started_at,
            duration_ms,
        }
    }

    async fn run_phases(
        &self,
        job: &mut BuildJob,
        workspace: &Workspace,
        config: &BuildConfig,
    ) -> Result<String> {
        if config.credential_token.trim().is_empty() {
            return Err(CloudError::validation("credential_token", "must not be empty"));
        }
        validate_output_root(&config.output_root)?;

        job.enter(BuildPhase::Cloning)?;
        let checkout = workspace.checkout_dir();
        self.fetch_source(job, &checkout, config).await?;

        let project_dir = checkout.join(&config.output_root);
        if !project_dir.is_dir() {
            return Err(CloudError::Build {
                phase: job.phase.to_string(),
                message: format!(
                    "output root '{}' does not exist in the source",
                    config.output_root.display()
                ),
            });
        }

        let build_dir = if config.component_ids.is_empty() {
            project_dir
        } else {
            let export_dir = workspace.export_dir();
            let ids = config.component_ids.clone();
            let target = export_dir.clone();
            let exported = tokio::task::spawn_blocking(move || {
                export_components(&project_dir, &target, &ids)
            })
            .await
            .map_err(|e| build_error(job.phase, format!("export task failed: {}", e)))??;
            job.logs.push(format!(
                "exported {} component(s): {}",
                exported.len(),
                exported.join(", ")
            ));
            export_dir
        };

        job.enter(BuildPhase::Installing)?;
        self.install_dependencies(job, &build_dir).await?;

        job.enter(BuildPhase::Bundling)?;
        self.run_step(job, Invocation::new(&self.settings.bundler, &build_dir))
            .await?;

        job.enter(BuildPhase::Deploying)?;
        let first_line = job.logs.len();
        self.run_step(
            job,
            Invocation::new(&self.settings.deploy, &build_dir)
                .env(&self.settings.deploy_token_env, config.credential_token.as_str()),
        )
        .await?;

        extract_deployment_url(&job.logs.lines()[first_line..])
            .ok_or_else(|| build_error(job.phase, "deploy output contained no deployment URL"))
    }

    async fn fetch_source(&self, job: &mut BuildJob, checkout: &Path, config: &BuildConfig) -> Result<()> {
        match &config.source {
            SourceRef::Local(dir) => {
                let from = dir.clone();
                let to = checkout.to_path_buf();
                tokio::task::spawn_blocking(move || copy_tree(&from, &to))
                    .await
                    .map_err(|e| build_error(job.phase, format!("copy task failed: {}", e)))?
                    .map_err(|e| build_error(job.phase, format!("copy {}: {}", dir.display(), e)))?;
                job.logs.push(format!("copied {}", dir.display()));
                Ok(())
            }
            SourceRef::Git { url, revision } => {
                fs::create_dir_all(checkout)
                    .map_err(|e| build_error(job.phase, format!("{}: {}", checkout.display(), e)))?;
                let git = &self.settings.git;
                let revision = revision.as_deref().unwrap_or("HEAD");

                self.run_step(job, Invocation::new(git, checkout).arg("init").arg("--quiet"))
                    .await?;

                let mut fetch = Invocation::new(git, checkout)
                    .arg("fetch")
                    .arg("--depth")
                    .arg("1")
                    .arg(url.as_str())
                    .arg(revision);
                for (key, value) in git_env(config.source_token.as_deref().map(String::as_str)) {
                    fetch = fetch.env(key, value);
                }
                self.run_step(job, fetch).await?;

                self.run_step(
                    job,
                    Invocation::new(git, checkout)
                        .arg("checkout")
                        .arg("--quiet")
                        .arg("FETCH_HEAD"),
                )
                .await
            }
        }
    }

    /// Links the cached `node_modules` when one is configured, otherwise runs
    /// the install command.
    async fn install_dependencies(&self, job: &mut BuildJob, build_dir: &Path) -> Result<()> {
        let target = build_dir.join("node_modules");
        if target.exists() {
            job.logs.push("node_modules already present");
            return Ok(());
        }

        if let Some(cache) = &self.settings.dependency_cache {
            if cache.is_dir() {
                match link_dependencies(cache, &target) {
                    Ok(true) => {
                        job.logs.push(format!("linked dependencies from {}", cache.display()));
                        return Ok(());
                    }
                    Ok(false) => {}
                    Err(e) => warn!(
                        job_id = %job.job_id,
                        cache = %cache.display(),
                        error = %e,
                        "Failed to link dependency cache, installing instead"
                    ),
                }
            } else {
                warn!(job_id = %job.job_id, cache = %cache.display(), "Dependency cache missing");
            }
        }

        let install = install_command(&self.settings.install, build_dir);
        if *install != self.settings.install {
            job.logs.push("no npm lockfile, falling back to npm install");
        }
        self.run_step(job, Invocation::new(&install, build_dir)).await
    }

    async fn run_step(&self, job: &mut BuildJob, invocation: Invocation<'_>) -> Result<()> {
        let phase = job.phase;
        process::run(invocation, job.deadline, &mut job.logs)
            .await
            .map_err(|e| match e {
                RunError::DeadlineExceeded { program } => CloudError::Timeout(format!(
                    "build deadline exceeded while {} ran during {}",
                    program, phase
                )),
                other => build_error(phase, other.to_string()),
            })
    }
}

fn build_error(phase: BuildPhase, message: impl Into<String>) -> CloudError {
    CloudError::Build {
        phase: phase.to_string(),
        message: message.into(),
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

/// `npm ci` refuses to run without a lockfile; use `npm install` then.
fn install_command<'a>(configured: &'a CommandSpec, build_dir: &Path) -> Cow<'a, CommandSpec> {
    let is_npm_ci = configured.program == "npm" && configured.args.first().map(String::as_str) == Some("ci");
    let has_lockfile = NPM_LOCKFILES.iter().any(|name| build_dir.join(name).is_file());
    if !is_npm_ci || has_lockfile {
        return Cow::Borrowed(configured);
    }
    let mut args = vec!["install".to_string()];
    args.extend(configured.args.iter().skip(1).cloned());
    Cow::Owned(CommandSpec {
        program: configured.program.clone(),
        args,
    })
}

fn validate_output_root(root: &Path) -> Result<()> {
    let escapes = root
        .components()
        .any(|c| matches!(c, Component::ParentDir | Component::RootDir | Component::Prefix(_)));
    if escapes {
        return Err(CloudError::validation(
            "output_root",
            "must be a relative path inside the source tree",
        ));
    }
    Ok(())
}

fn basic_credentials(token: &str) -> String {
    STANDARD.encode(format!("x-access-token:{}", token))
}

/// Environment for git: no prompts, and the token as an extra HTTP header so
/// it never appears in argv or the remote URL.
fn git_env(token: Option<&str>) -> Vec<(String, String)> {
    let mut env = vec![("GIT_TERMINAL_PROMPT".to_string(), "0".to_string())];
    if let Some(token) = token.filter(|t| !t.is_empty()) {
        env.push(("GIT_CONFIG_COUNT".to_string(), "1".to_string()));
        env.push(("GIT_CONFIG_KEY_0".to_string(), "http.extraHeader".to_string()));
        env.push((
            "GIT_CONFIG_VALUE_0".to_string(),
            format!("Authorization: Basic {}", basic_credentials(token)),
        ));
    }
    env
}

/// Last `https://` URL printed, without trailing punctuation.
fn extract_deployment_url(lines: &[String]) -> Option<String> {
    lines.iter().rev().find_map(|line| {
        line.split_whitespace()
            .rev()
            .find_map(|word| {
                let start = word.find("https://")?;
                let url = word[start..].trim_end_matches(|c: char| !(c.is_alphanumeric() || c == '/'));
                (url.len() > "https://".len()).then(|| url.to_string())
            })
    })
}

fn copy_tree(from: &Path, to: &Path) -> io::Result<()> {
    fs::create_dir_all(to)?;
    for entry in fs::read_dir(from)? {
        let entry = entry?;
        let name = entry.file_name();
        if COPY_SKIPPED.iter().any(|skip| name == *skip) {
            continue;
        }
        let file_type = entry.file_type()?;
        let target = to.join(&name);
        if file_type.is_dir() {
            copy_tree(&entry.path(), &target)?;
        } else if file_type.is_file() {
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

#[cfg(unix)]
fn link_dependencies(cache: &Path, target: &Path) -> io::Result<bool> {
    std::os::unix::fs::symlink(cache, target)?;
    Ok(true)
}

#[cfg(not(unix))]
fn link_dependencies(_cache: &Path, _target: &Path) -> io::Result<bool> {
    Ok(false)
}

/// Writes the selected components, their internal dependencies, the project
/// manifests and an `index.ts` entry into `export_dir`. Returns the ids
/// exported.
fn export_components(project_dir: &Path, export_dir: &Path, ids: &[String]) -> Result<Vec<String>> {
    let io_err = |path: &Path, e: io::Error| build_error(BuildPhase::Cloning, format!("{}: {}", path.display(), e));

    let discovery = SourceDiscovery::new(project_dir)?;
    let components = discovery.select_components(ids)?;
    let ids: Vec<String> = components.iter().map(|c| c.id.clone()).collect();
    let files = discovery.get_component_files(&ids)?;

    for file in &files {
        let target = export_dir.join(&file.path);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
        }
        fs::write(&target, &file.contents).map_err(|e| io_err(&target, e))?;
    }

    for manifest in MANIFESTS {
        let source = project_dir.join(manifest);
        let target = export_dir.join(manifest);
        if source.is_file() {
            fs::copy(&source, &target).map_err(|e| io_err(&source, e))?;
        } else {
            let contents = default_manifest(manifest);
            fs::write(&target, contents).map_err(|e| io_err(&target, e))?;
        }
    }

    for name in INSTALL_FILES {
        let source = project_dir.join(name);
        if source.is_file() {
            let target = export_dir.join(name);
            fs::copy(&source, &target).map_err(|e| io_err(&source, e))?;
        }
    }

    let mut index = String::new();
    for component in &components {
        let module = component.path.with_extension("");
        index.push_str(&format!(
            "export {{ default as {} }} from './{}';\n",
            pascal_case(&component.id),
            module.to_string_lossy().replace('\\', "/")
        ));
    }
    let index_path = export_dir.join("index.ts");
    fs::write(&index_path, index).map_err(|e| io_err(&index_path, e))?;

    Ok(ids)
}

fn default_manifest(name: &str) -> String {
    let value = if name == "package.json" {
        json!({
            "name": "component-export",
            "private": true,
            "type": "module",
            "main": "index.ts"
        })
    } else {
        json!({
            "compilerOptions": {
                "target": "ES2020",
                "module": "ESNext",
                "moduleResolution": "bundler",
                "jsx": "react-jsx",
                "strict": true,
                "baseUrl": ".",
                "paths": { "@/*": ["src/*"] }
            }
        })
    };
    format!("{:#}\n", value)
}

/// `forms/contact-form` -> `FormsContactForm`.
fn pascal_case(id: &str) -> String {
    id.split(|c: char| !c.is_alphanumeric())
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_order() {
        assert!(BuildPhase::Pending < BuildPhase::Cloning);
        assert!(BuildPhase::Bundling < BuildPhase::Deploying);
        assert!(BuildPhase::Failed.is_terminal());
        assert!(!BuildPhase::Deploying.is_terminal());
        assert_eq!(serde_json::to_string(&BuildPhase::Installing).unwrap(), "\"installing\"");
    }

    #[test]
    fn test_phases_only_move_forward() {
        let mut job = BuildJob {
            job_id: Uuid::new_v4(),
            work_dir: PathBuf::from("/tmp/unused"),
            phase: BuildPhase::Pending,
            logs: BuildLog::new(),
            deployment_url: None,
            started_at: Utc::now(),
            deadline: Instant::now() + Duration::from_secs(60),
        };

        job.enter(BuildPhase::Cloning).unwrap();
        job.enter(BuildPhase::Bundling).unwrap();
        assert!(job.enter(BuildPhase::Installing).is_err());
        assert!(job.enter(BuildPhase::Bundling).is_err());
        assert_eq!(job.phase, BuildPhase::Bundling);
        assert_eq!(job.logs.lines(), &["==> cloning", "==> bundling"]);
    }

    #[test]
    fn test_enter_after_deadline_times_out() {
        let mut job = BuildJob {
            job_id: Uuid::new_v4(),
            work_dir: PathBuf::from("/tmp/unused"),
            phase: BuildPhase::Pending,
            logs: BuildLog::new(),
            deployment_url: None,
            started_at: Utc::now(),
            deadline: Instant::now(),
        };
        let err = job.enter(BuildPhase::Cloning).unwrap_err();
        assert!(matches!(err, CloudError::Timeout(_)));
        assert_eq!(job.phase, BuildPhase::Pending);
    }

    #[test]
    fn test_extract_deployment_url() {
        let lines: Vec<String> = vec![
            "Vercel CLI 33.0.0".into(),
            "Inspect: https://vercel.com/acme/site/abc [1s]".into(),
            "Production: https://site-abc.vercel.app [3s]".into(),
            "Done.".into(),
        ];
        assert_eq!(
            extract_deployment_url(&lines).as_deref(),
            Some("https://site-abc.vercel.app")
        );
        assert_eq!(
            extract_deployment_url(&["see (https://x.dev/a/).".to_string()]).as_deref(),
            Some("https://x.dev/a/")
        );
        assert_eq!(extract_deployment_url(&["no url here https://".to_string()]), None);
    }

    #[test]
    fn test_output_root_must_stay_inside() {
        assert!(validate_output_root(Path::new(".")).is_ok());
        assert!(validate_output_root(Path::new("apps/web")).is_ok());
        assert!(validate_output_root(Path::new("../elsewhere")).is_err());
        assert!(validate_output_root(Path::new("/etc")).is_err());
    }

    #[test]
    fn test_git_env_carries_token_as_header() {
        let env = git_env(Some("ghp_secret"));
        assert!(env.contains(&("GIT_TERMINAL_PROMPT".to_string(), "0".to_string())));
        assert!(env.contains(&("GIT_CONFIG_KEY_0".to_string(), "http.extraHeader".to_string())));
        let header = &env.iter().find(|(k, _)| k == "GIT_CONFIG_VALUE_0").unwrap().1;
        assert_eq!(
            header,
            &format!("Authorization: Basic {}", STANDARD.encode("x-access-token:ghp_secret"))
        );
        assert!(!header.contains("ghp_secret"));

        assert_eq!(git_env(None).len(), 1);
        assert_eq!(git_env(Some("")).len(), 1);
    }

    #[test]
    fn test_npm_ci_falls_back_without_lockfile() {
        let dir = tempfile::TempDir::new().unwrap();
        let ci = CommandSpec::new("npm", &["ci", "--prefer-offline", "--no-audit"]);

        assert_eq!(
            install_command(&ci, dir.path()).into_owned(),
            CommandSpec::new("npm", &["install", "--prefer-offline", "--no-audit"])
        );

        fs::write(dir.path().join("package-lock.json"), "{}").unwrap();
        assert_eq!(install_command(&ci, dir.path()).into_owned(), ci);

        let pnpm = CommandSpec::new("pnpm", &["install", "--frozen-lockfile"]);
        let empty = tempfile::TempDir::new().unwrap();
        assert_eq!(install_command(&pnpm, empty.path()).into_owned(), pnpm);
    }

    #[test]
    fn test_pascal_case() {
        assert_eq!(pascal_case("Hero"), "Hero");
        assert_eq!(pascal_case("forms/contact-form"), "FormsContactForm");
        assert_eq!(pascal_case("marketing/PricingTable"), "MarketingPricingTable");
    }
}
