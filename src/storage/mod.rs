//! Persistent storage
//!
//! - `artifacts`: pluggable blob store for trained ensembles and scalers
//! - `registry`: keyed, cached access to `(ensemble, scaler)` pairs
//! - `reports`: sled history of training evaluation reports
//! - `archive`: CSV copies of cycles judged NOT OK

pub mod archive;
pub mod artifacts;
pub mod registry;
pub mod reports;

pub use archive::{ArchiveError, ClosedCycle, DefectArchive};
pub use artifacts::{ArtifactError, ArtifactStore, FileArtifactStore, InMemoryArtifactStore};
pub use registry::{LoadedModel, ModelEntry, ModelFolder, ModelRegistry, RegistryError};
pub use reports::{ReportStoreError, TrainingReportStore};
