//! Source discovery: finds exportable components in a source tree and the
//! internal files they depend on.
//!
//! A component is a file named `*.export.{tsx,ts,jsx,js}` under the
//! components directory. Its metadata comes from a leading doc block:
//!
//! ```text
//! /**
//!  * @name Pricing Table
//!  * @description Three-tier pricing grid
//!  * @group marketing
//!  */
//! ```

mod imports;
mod resolve;

pub use imports::extract_specifiers;
pub use resolve::{Resolver, SpecifierKind, EXTENSIONS};

use cloudlink::{CloudError, Result};
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const EXPORT_SUFFIXES: &[&str] = &[".export.tsx", ".export.ts", ".export.jsx", ".export.js"];
const SKIPPED_DIRS: &[&str] = &["node_modules", ".git", "dist", "build"];
const PARSED_EXTENSIONS: &[&str] = &["tsx", "ts", "jsx", "js", "mjs"];
const DEFAULT_GROUP: &str = "general";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComponentInfo {
    /// Path below the components directory without the export suffix,
    /// e.g. `marketing/PricingTable`.
    pub id: String,
    pub name: String,
    pub description: String,
    pub group: String,
    /// Relative to the source root.
    pub path: PathBuf,
    /// Direct internal dependencies, relative to the source root.
    pub dependencies: Vec<PathBuf>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SourceFile {
    /// Relative to the source root.
    pub path: PathBuf,
    /// Raw bytes; assets such as images are not text.
    pub contents: Vec<u8>,
}

pub struct SourceDiscovery {
    resolver: Resolver,
    components_dir: PathBuf,
}

fn io_error(path: &Path, e: std::io::Error) -> CloudError {
    CloudError::Build {
        phase: "discovery".to_string(),
        message: format!("{}: {}", path.display(), e),
    }
}

impl SourceDiscovery {
    /// Discovery over `root`, with components under `root/src/components`.
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref();
        let root = root.canonicalize().map_err(|e| io_error(root, e))?;
        Ok(Self {
            components_dir: root.join("src").join("components"),
            resolver: Resolver::new(root),
        })
    }

    /// Components directory relative to the root.
    pub fn with_components_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.components_dir = self.resolver.root().join(dir);
        self
    }

    pub fn with_alias(mut self, prefix: &str, target: impl AsRef<Path>) -> Self {
        self.resolver = self.resolver.with_alias(prefix, target);
        self
    }

    pub fn root(&self) -> &Path {
        self.resolver.root()
    }

    /// Every exportable component, sorted by id.
    pub fn list_components(&self) -> Result<Vec<ComponentInfo>> {
        let mut files = Vec::new();
        if self.components_dir.is_dir() {
            walk(&self.components_dir, &mut files)?;
        }

        let mut components = Vec::new();
        for path in files {
            let Some(id) = self.component_id(&path) else {
                continue;
            };
            let bytes = fs::read(&path).map_err(|e| io_error(&path, e))?;
            let source = String::from_utf8_lossy(&bytes);
            let meta = parse_doc_block(&source);
            let fallback_name = id.rsplit('/').next().unwrap_or(&id).to_string();

            components.push(ComponentInfo {
                name: meta.name.unwrap_or(fallback_name),
                description: meta.description.unwrap_or_default(),
                group: meta.group.unwrap_or_else(|| DEFAULT_GROUP.to_string()),
                dependencies: self
                    .direct_dependencies(&path, &source)
                    .iter()
                    .map(|dep| self.relative(dep))
                    .collect(),
                path: self.relative(&path),
                id,
            });
        }
        components.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(components)
    }

    /// Components whose id is in `ids`. Unknown ids are logged and skipped;
    /// `NotFound` when nothing matches.
    pub fn select_components(&self, ids: &[String]) -> Result<Vec<ComponentInfo>> {
        let components = self.list_components()?;
        let selected: Vec<ComponentInfo> = components
            .into_iter()
            .filter(|c| ids.iter().any(|id| id == &c.id))
            .collect();

        for id in ids {
            if !selected.iter().any(|c| &c.id == id) {
                warn!(component_id = %id, "Requested component not found");
            }
        }
        if selected.is_empty() {
            return Err(CloudError::NotFound(format!(
                "none of the requested components exist: {}",
                ids.join(", ")
            )));
        }
        Ok(selected)
    }

    /// Contents of the selected components plus every internal file they
    /// reach through imports, sorted by path.
    pub fn get_component_files(&self, ids: &[String]) -> Result<Vec<SourceFile>> {
        let selected = self.select_components(ids)?;

        let mut files: BTreeMap<PathBuf, Vec<u8>> = BTreeMap::new();
        let mut queue: VecDeque<PathBuf> = selected
            .iter()
            .map(|c| self.root().join(&c.path))
            .collect();

        while let Some(path) = queue.pop_front() {
            if files.contains_key(&path) {
                continue;
            }
            let contents = fs::read(&path).map_err(|e| io_error(&path, e))?;
            if is_parsed(&path) {
                let source = String::from_utf8_lossy(&contents);
                for dep in self.direct_dependencies(&path, &source) {
                    if !files.contains_key(&dep) {
                        queue.push_back(dep);
                    }
                }
            }
            files.insert(path, contents);
        }

        let files: Vec<SourceFile> = files
            .into_iter()
            .map(|(path, contents)| SourceFile {
                path: self.relative(&path),
                contents,
            })
            .collect();
        debug!(components = ids.len(), files = files.len(), "Collected component files");
        Ok(files)
    }

    /// See [`Resolver::resolve`].
    pub fn resolve_dependency_path(&self, importer: &Path, specifier: &str) -> Option<PathBuf> {
        self.resolver.resolve(importer, specifier)
    }

    fn direct_dependencies(&self, path: &Path, source: &str) -> Vec<PathBuf> {
        let mut deps = Vec::new();
        for specifier in extract_specifiers(source) {
            if self.resolver.classify(&specifier) != SpecifierKind::Internal {
                continue;
            }
            match self.resolver.resolve(path, &specifier) {
                Some(dep) if !deps.contains(&dep) => deps.push(dep),
                Some(_) => {}
                None => warn!(
                    file = %path.display(),
                    specifier = %specifier,
                    "Unresolved internal import"
                ),
            }
        }
        deps
    }

    fn component_id(&self, path: &Path) -> Option<String> {
        let relative = path.strip_prefix(&self.components_dir).ok()?;
        let relative = relative.to_string_lossy().replace('\\', "/");
        EXPORT_SUFFIXES
            .iter()
            .find_map(|suffix| relative.strip_suffix(suffix))
            .map(str::to_string)
    }

    fn relative(&self, path: &Path) -> PathBuf {
        path.strip_prefix(self.root())
            .map(Path::to_path_buf)
            .unwrap_or_else(|_| path.to_path_buf())
    }
}

fn is_parsed(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| PARSED_EXTENSIONS.contains(&e))
        .unwrap_or(false)
}

fn walk(dir: &Path, files: &mut Vec<PathBuf>) -> Result<()> {
    let mut entries: Vec<_> = fs::read_dir(dir)
        .map_err(|e| io_error(dir, e))?
        .filter_map(|entry| entry.ok())
        .collect();
    entries.sort_by_key(|entry| entry.file_name());

    for entry in entries {
        let path = entry.path();
        let name = entry.file_name();
        let name = name.to_string_lossy();
        // Not followed: a linked directory can loop back on itself.
        let file_type = entry.file_type().map_err(|e| io_error(&path, e))?;
        if file_type.is_symlink() {
            continue;
        }
        if file_type.is_dir() {
            if !name.starts_with('.') && !SKIPPED_DIRS.contains(&&*name) {
                walk(&path, files)?;
            }
        } else if EXPORT_SUFFIXES.iter().any(|s| name.ends_with(s)) {
            files.push(path);
        }
    }
    Ok(())
}

#[derive(Debug, Default, PartialEq)]
struct DocMeta {
    name: Option<String>,
    description: Option<String>,
    group: Option<String>,
}

/// Tags from the first `/** ... */` block, if it precedes any code.
fn parse_doc_block(source: &str) -> DocMeta {
    let mut meta = DocMeta::default();
    let mut rest = source.trim_start();
    // Directives such as "use client" may come first.
    while rest.starts_with("'use ") || rest.starts_with("\"use ") {
        match rest.find('\n') {
            Some(end) => rest = rest[end..].trim_start(),
            None => return meta,
        }
    }
    let Some(body) = rest.strip_prefix("/**") else {
        return meta;
    };
    let Some(end) = body.find("*/") else {
        return meta;
    };

    for line in body[..end].lines() {
        let line = line.trim().trim_start_matches('*').trim();
        let Some(tagged) = line.strip_prefix('@') else {
            continue;
        };
        let (tag, value) = tagged.split_once(char::is_whitespace).unwrap_or((tagged, ""));
        let value = value.trim();
        if value.is_empty() {
            continue;
        }
        match tag {
            "name" => meta.name = Some(value.to_string()),
            "description" => meta.description = Some(value.to_string()),
            "group" => meta.group = Some(value.to_string()),
            _ => {}
        }
    }
    meta
}
