//! Scratch directories for out-of-process tools.
//!
//! A [`Scratch`] owns a temporary directory that is removed when it is
//! dropped, so an abandoned tool invocation leaves nothing behind.

use std::path::{Path, PathBuf};
use tempfile::TempDir;

pub struct Scratch {
    dir: TempDir,
}

impl Scratch {
    /// Create a fresh scratch directory under the system temp dir.
    pub fn new() -> rf_core::Result<Self> {
        let dir = tempfile::Builder::new()
            .prefix("reframe-")
            .tempdir()
            .map_err(|e| rf_core::Error::tool("scratch", format!("failed to create temp dir: {e}")))?;
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Path for a named file inside the scratch directory.
    pub fn file(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    /// Write `bytes` to a named file and return its path.
    pub async fn write(&self, name: &str, bytes: &[u8]) -> rf_core::Result<PathBuf> {
        let path = self.file(name);
        tokio::fs::write(&path, bytes).await?;
        Ok(path)
    }
}
