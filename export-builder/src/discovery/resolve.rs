use std::path::{Component, Path, PathBuf};

/// Probed in this order when a specifier has no extension.
pub const EXTENSIONS: &[&str] = &[".tsx", ".ts", ".jsx", ".js", ".mjs", ".json", ".css"];

const NODE_BUILTINS: &[&str] = &[
    "assert", "buffer", "child_process", "crypto", "events", "fs", "http", "https", "net", "os",
    "path", "process", "stream", "url", "util", "zlib",
];

// Provided by the host framework or bundler at build time.
const FRAMEWORK_PREFIXES: &[&str] = &["next/", "$app/", "$env/", "virtual:", "astro:", "~icons/"];
const FRAMEWORK_MODULES: &[&str] = &["next", "react", "react-dom", "react/jsx-runtime"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpecifierKind {
    /// Runtime built-in such as `fs` or `node:path`.
    Builtin,
    /// Reserved by the framework (`next/link`, `$app/stores`, ...).
    Framework,
    /// Installed package, left to the bundler.
    Package,
    /// Relative, root-absolute or aliased path inside the source tree.
    Internal,
}

/// Maps import specifiers to files under one source root.
#[derive(Debug, Clone)]
pub struct Resolver {
    root: PathBuf,
    aliases: Vec<(String, PathBuf)>,
}

impl Resolver {
    /// `root` should already be canonical so containment checks hold.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let aliases = vec![
            ("@/".to_string(), root.join("src")),
            ("~/".to_string(), root.join("src")),
        ];
        Self { root, aliases }
    }

    /// Adds or replaces a path alias such as `@components/` -> `src/components`.
    pub fn with_alias(mut self, prefix: &str, target: impl AsRef<Path>) -> Self {
        let target = self.root.join(target);
        self.aliases.retain(|(p, _)| p != prefix);
        self.aliases.push((prefix.to_string(), target));
        // Longest prefix wins.
        self.aliases.sort_by(|a, b| b.0.len().cmp(&a.0.len()));
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn classify(&self, specifier: &str) -> SpecifierKind {
        if specifier.starts_with("./")
            || specifier.starts_with("../")
            || specifier == "."
            || specifier == ".."
            || specifier.starts_with('/')
            || self.alias_for(specifier).is_some()
        {
            return SpecifierKind::Internal;
        }
        if specifier.starts_with("node:") || NODE_BUILTINS.contains(&package_name(specifier)) {
            return SpecifierKind::Builtin;
        }
        if FRAMEWORK_MODULES.contains(&specifier)
            || FRAMEWORK_PREFIXES.iter().any(|p| specifier.starts_with(p))
        {
            return SpecifierKind::Framework;
        }
        SpecifierKind::Package
    }

    /// Absolute path of the file `specifier` refers to from `importer`.
    ///
    /// Anything but an internal specifier is `None`, as is a path that leaves
    /// the root or matches no file. Specifiers without an extension are tried
    /// against [`EXTENSIONS`], then as a directory with an `index` file.
    pub fn resolve(&self, importer: &Path, specifier: &str) -> Option<PathBuf> {
        let specifier = specifier.split(['?', '#']).next().unwrap_or(specifier);
        if self.classify(specifier) != SpecifierKind::Internal {
            return None;
        }

        let base = if let Some((prefix, target)) = self.alias_for(specifier) {
            target.join(&specifier[prefix.len()..])
        } else if let Some(rooted) = specifier.strip_prefix('/') {
            self.root.join(rooted)
        } else {
            importer.parent()?.join(specifier)
        };

        let base = normalize(&base);
        if !base.starts_with(&self.root) {
            return None;
        }
        first_existing(&base)
    }

    fn alias_for(&self, specifier: &str) -> Option<(&str, &Path)> {
        self.aliases
            .iter()
            .find(|(prefix, _)| specifier.starts_with(prefix.as_str()))
            .map(|(prefix, target)| (prefix.as_str(), target.as_path()))
    }
}

/// `@scope/pkg/sub` -> `@scope/pkg`, `pkg/sub` -> `pkg`.
fn package_name(specifier: &str) -> &str {
    let mut parts = specifier.splitn(3, '/');
    let first = parts.next().unwrap_or(specifier);
    if first.starts_with('@') {
        match parts.next() {
            Some(second) => &specifier[..first.len() + 1 + second.len()],
            None => first,
        }
    } else {
        first
    }
}

/// Resolves `.` and `..` lexically; the file may not exist yet.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

fn first_existing(base: &Path) -> Option<PathBuf> {
    if base.is_file() {
        return Some(base.to_path_buf());
    }

    let as_string = base.as_os_str().to_string_lossy();
    for ext in EXTENSIONS {
        let candidate = PathBuf::from(format!("{}{}", as_string, ext));
        if candidate.is_file() {
            return Some(candidate);
        }
    }

    if base.is_dir() {
        for ext in EXTENSIONS {
            let candidate = base.join(format!("index{}", ext));
            if candidate.is_file() {
                return Some(candidate);
            }
        }
    }
    None
}
