use std::io;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Exclusively owned scratch directory for one build job.
///
/// Removed by [`Workspace::release`] or, on any other exit path including
/// panics, when the guard is dropped.
#[derive(Debug)]
pub struct Workspace {
    dir: TempDir,
}

impl Workspace {
    /// Fresh directory under `parent`, or under the system temp dir.
    pub fn create(parent: Option<&Path>, job_id: &str) -> io::Result<Self> {
        let prefix = format!("export-{}-", job_id);
        let mut builder = tempfile::Builder::new();
        builder.prefix(&prefix);
        let dir = match parent {
            Some(parent) => {
                std::fs::create_dir_all(parent)?;
                builder.tempdir_in(parent)?
            }
            None => builder.tempdir()?,
        };
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Where the source tree is checked out.
    pub fn checkout_dir(&self) -> PathBuf {
        self.dir.path().join("source")
    }

    /// Where a filtered component export is assembled.
    pub fn export_dir(&self) -> PathBuf {
        self.dir.path().join("export")
    }

    /// Removes the directory and reports whether that worked.
    pub fn release(self) -> io::Result<()> {
        self.dir.close()
    }
}
