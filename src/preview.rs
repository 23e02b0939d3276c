use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::artifact::Artifact;

/// Writes the current artifact where a browser or editor can pick it up.
///
/// There is one file per kind (`preview.html`, `preview.md`); each update
/// overwrites it, matching the single-current-artifact model.
#[derive(Debug, Clone)]
pub struct PreviewWriter {
    dir: PathBuf,
}

impl PreviewWriter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        PreviewWriter { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, artifact: &Artifact) -> PathBuf {
        self.dir.join(format!("preview.{}", artifact.kind.file_extension()))
    }

    /// Write `artifact` and return the file it went to.
    pub fn publish(&self, artifact: &Artifact) -> io::Result<PathBuf> {
        fs::create_dir_all(&self.dir)?;
        let path = self.path_for(artifact);
        fs::write(&path, &artifact.body)?;
        debug!(path = %path.display(), bytes = artifact.body.len(), "preview written");
        Ok(path)
    }
}

/// One-line terminal summary, e.g. `html artifact (12 lines, 340 bytes)`.
pub fn describe(artifact: &Artifact) -> String {
    format!(
        "{} artifact ({} lines, {} bytes)",
        artifact.kind,
        artifact.body.lines().count(),
        artifact.body.len()
    )
}
