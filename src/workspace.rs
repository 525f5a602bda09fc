use crate::error::{DesignerError, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Scratch directory holding every intermediate file of one run.
pub struct Workspace {
    dir: TempDir,
    keep: bool,
}

impl Workspace {
    /// creates a fresh `designer-tmp-*` directory under `parent`
    pub fn create(parent: impl AsRef<Path>, keep: bool) -> Result<Self> {
        let parent = parent.as_ref();
        let dir = tempfile::Builder::new()
            .prefix("designer-tmp-")
            .tempdir_in(parent)
            .map_err(|e| DesignerError::io(parent, e))?;
        log::info!("generated scratch directory: {}", dir.path().display());
        Ok(Self { dir, keep })
    }

    pub fn dir(&self) -> &Path {
        self.dir.path()
    }

    /// absolute path of a file inside the scratch directory
    pub fn path(&self, name: impl AsRef<Path>) -> PathBuf {
        self.dir.path().join(name)
    }

    pub fn exists(&self, name: impl AsRef<Path>) -> bool {
        self.path(name).exists()
    }

    pub fn copy(&self, from: &str, to: &str) -> Result<()> {
        let src = self.path(from);
        fs::copy(&src, self.path(to)).map_err(|e| DesignerError::io(src, e))?;
        Ok(())
    }

    pub fn rename(&self, from: &str, to: &str) -> Result<()> {
        let src = self.path(from);
        fs::rename(&src, self.path(to)).map_err(|e| DesignerError::io(src, e))
    }

    pub fn remove(&self, name: &str) -> Result<()> {
        let p = self.path(name);
        fs::remove_file(&p).map_err(|e| DesignerError::io(p, e))
    }

    /// keeps the scratch directory around after `finish`
    pub fn retain(&mut self) {
        self.keep = true;
    }

    /// deletes the scratch directory unless it was asked to be kept
    pub fn finish(self) -> Result<()> {
        if self.keep {
            #[allow(deprecated)]
            let kept = self.dir.into_path();
            log::info!("scratch directory retained at {}", kept.display());
            Ok(())
        } else {
            let p = self.dir.path().to_path_buf();
            self.dir.close().map_err(|e| DesignerError::io(p, e))
        }
    }
}
