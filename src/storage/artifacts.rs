//! ArtifactStore trait: where trained ensembles and scalers live
//!
//! Artifacts are opaque JSON blobs addressed by `(folder, stem)`:
//! - `FileArtifactStore`: `<root>/<folder>/<stem>.json`, written atomically
//! - `InMemoryArtifactStore`: for tests and throwaway deployments

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use tracing::debug;

/// Extension of every persisted artifact.
const ARTIFACT_EXT: &str = "json";

#[derive(Debug, thiserror::Error)]
pub enum ArtifactError {
    #[error("artifact I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("storage error: {0}")]
    Storage(String),
}

/// Thread-safe blob storage for model artifacts.
pub trait ArtifactStore: Send + Sync {
    /// Durably replace `folder/stem`.
    fn write(&self, folder: &str, stem: &str, bytes: &[u8]) -> Result<(), ArtifactError>;

    /// `None` when the artifact does not exist.
    fn read(&self, folder: &str, stem: &str) -> Result<Option<Vec<u8>>, ArtifactError>;

    /// Folder names, sorted.
    fn folders(&self) -> Result<Vec<String>, ArtifactError>;

    /// Artifact stems inside `folder`, sorted.
    fn stems(&self, folder: &str) -> Result<Vec<String>, ArtifactError>;

    /// Backend name for logging
    fn backend_name(&self) -> &'static str;
}

// ============================================================================
// Filesystem
// ============================================================================

/// Artifacts as JSON files under a models directory.
#[derive(Debug, Clone)]
pub struct FileArtifactStore {
    root: PathBuf,
}

impl FileArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn artifact_path(&self, folder: &str, stem: &str) -> PathBuf {
        self.root.join(folder).join(format!("{stem}.{ARTIFACT_EXT}"))
    }

    fn io_err(path: &Path) -> impl FnOnce(io::Error) -> ArtifactError + '_ {
        move |source| ArtifactError::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    fn sorted_entries(dir: &Path, keep: impl Fn(&Path) -> Option<String>) -> Result<Vec<String>, ArtifactError> {
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(Self::io_err(dir)(e)),
        };
        let mut names: Vec<String> = entries
            .filter_map(Result::ok)
            .filter_map(|entry| keep(&entry.path()))
            .collect();
        names.sort();
        Ok(names)
    }
}

impl ArtifactStore for FileArtifactStore {
    fn write(&self, folder: &str, stem: &str, bytes: &[u8]) -> Result<(), ArtifactError> {
        let path = self.artifact_path(folder, stem);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(Self::io_err(parent))?;
        }
        // Write alongside the target, then rename over it
        let tmp_path = path.with_extension("json.tmp");
        std::fs::write(&tmp_path, bytes).map_err(Self::io_err(&tmp_path))?;
        std::fs::rename(&tmp_path, &path).map_err(Self::io_err(&path))?;
        debug!(path = %path.display(), bytes = bytes.len(), "Artifact written");
        Ok(())
    }

    fn read(&self, folder: &str, stem: &str) -> Result<Option<Vec<u8>>, ArtifactError> {
        let path = self.artifact_path(folder, stem);
        match std::fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Self::io_err(&path)(e)),
        }
    }

    fn folders(&self) -> Result<Vec<String>, ArtifactError> {
        Self::sorted_entries(&self.root, |p| {
            p.is_dir()
                .then(|| p.file_name().and_then(|n| n.to_str()).map(str::to_string))
                .flatten()
        })
    }

    fn stems(&self, folder: &str) -> Result<Vec<String>, ArtifactError> {
        Self::sorted_entries(&self.root.join(folder), |p| {
            if !p.is_file() || p.extension().and_then(|e| e.to_str()) != Some(ARTIFACT_EXT) {
                return None;
            }
            p.file_stem().and_then(|s| s.to_str()).map(str::to_string)
        })
    }

    fn backend_name(&self) -> &'static str {
        "filesystem"
    }
}

// ============================================================================
// In-memory
// ============================================================================

/// Non-durable store. Data is lost when dropped.
#[derive(Debug, Default)]
pub struct InMemoryArtifactStore {
    blobs: RwLock<BTreeMap<(String, String), Vec<u8>>>,
}

impl InMemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ArtifactStore for InMemoryArtifactStore {
    fn write(&self, folder: &str, stem: &str, bytes: &[u8]) -> Result<(), ArtifactError> {
        let mut blobs = self.blobs.write().map_err(|e| ArtifactError::Storage(e.to_string()))?;
        blobs.insert((folder.to_string(), stem.to_string()), bytes.to_vec());
        Ok(())
    }

    fn read(&self, folder: &str, stem: &str) -> Result<Option<Vec<u8>>, ArtifactError> {
        let blobs = self.blobs.read().map_err(|e| ArtifactError::Storage(e.to_string()))?;
        Ok(blobs.get(&(folder.to_string(), stem.to_string())).cloned())
    }

    fn folders(&self) -> Result<Vec<String>, ArtifactError> {
        let blobs = self.blobs.read().map_err(|e| ArtifactError::Storage(e.to_string()))?;
        let mut folders: Vec<String> = blobs.keys().map(|(f, _)| f.clone()).collect();
        folders.dedup();
        Ok(folders)
    }

    fn stems(&self, folder: &str) -> Result<Vec<String>, ArtifactError> {
        let blobs = self.blobs.read().map_err(|e| ArtifactError::Storage(e.to_string()))?;
        Ok(blobs
            .keys()
            .filter(|(f, _)| f == folder)
            .map(|(_, s)| s.clone())
            .collect())
    }

    fn backend_name(&self) -> &'static str {
        "in-memory"
    }
}
