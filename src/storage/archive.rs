//! Defect archive: closed NOT OK cycles written out as CSV for review.
//!
//! Path: `<dir>/<identifier>/<timestamp>_<folder>_<identifier>_NOT OK.csv`

use std::path::{Path, PathBuf};

use tracing::info;

use crate::types::Verdict;

#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("archive I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("archive CSV error at {}: {source}", path.display())]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
}

/// A finished cycle handed to the archive.
#[derive(Debug, Clone)]
pub struct ClosedCycle<'a> {
    pub identifier: &'a str,
    pub timestamp: &'a str,
    pub model_folder: &'a str,
    pub verdict: Verdict,
    pub angle: &'a [f64],
    pub torque: &'a [f64],
}

#[derive(Debug, Clone)]
pub struct DefectArchive {
    dir: PathBuf,
}

impl DefectArchive {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Destination file of a cycle.
    pub fn path_for(&self, cycle: &ClosedCycle<'_>) -> PathBuf {
        let identifier = path_safe(cycle.identifier);
        let file_name = format!(
            "{}_{}_{}_{}.csv",
            path_safe(cycle.timestamp),
            path_safe(cycle.model_folder),
            identifier,
            cycle.verdict
        );
        self.dir.join(&identifier).join(file_name)
    }

    /// Write `angle,torque` rows for the cycle and return the file path.
    pub fn write(&self, cycle: &ClosedCycle<'_>) -> Result<PathBuf, ArchiveError> {
        let path = self.path_for(cycle);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| ArchiveError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let csv_err = |source| ArchiveError::Csv {
            path: path.clone(),
            source,
        };
        let mut writer = csv::Writer::from_path(&path).map_err(csv_err)?;
        writer.write_record(["angle", "torque"]).map_err(csv_err)?;
        for (a, t) in cycle.angle.iter().zip(cycle.torque) {
            writer.serialize((a, t)).map_err(csv_err)?;
        }
        writer.flush().map_err(|source| ArchiveError::Io {
            path: path.clone(),
            source,
        })?;

        info!(
            path = %path.display(),
            identifier = cycle.identifier,
            samples = cycle.angle.len().min(cycle.torque.len()),
            "Archived defective cycle"
        );
        Ok(path)
    }
}

/// Placeholder for a component that would otherwise name no directory
/// or the parent one.
const UNNAMED_COMPONENT: &str = "unknown";

/// Replace characters that would split or escape a path component.
fn path_safe(raw: &str) -> String {
    let safe: String = raw
        .chars()
        .map(|c| if matches!(c, ':' | '/' | '\\') { '-' } else { c })
        .collect();
    match safe.as_str() {
        "" | "." | ".." => UNNAMED_COMPONENT.to_string(),
        _ => safe,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_layout() {
        let archive = DefectArchive::new("/tmp/graficas");
        let cycle = ClosedCycle {
            identifier: "B-17",
            timestamp: "2024/05/01 10:22:05",
            model_folder: "line-a",
            verdict: Verdict::NotOk,
            angle: &[],
            torque: &[],
        };
        assert_eq!(
            archive.path_for(&cycle),
            PathBuf::from("/tmp/graficas/B-17/2024-05-01 10-22-05_line-a_B-17_NOT OK.csv")
        );
    }

    #[test]
    fn test_write_pairs_samples() {
        let dir = tempfile::tempdir().unwrap();
        let archive = DefectArchive::new(dir.path());
        let cycle = ClosedCycle {
            identifier: "id/7",
            timestamp: "t",
            model_folder: "m",
            verdict: Verdict::NotOk,
            angle: &[1.0, 2.0, 3.0],
            torque: &[10.0, 20.0],
        };
        let path = archive.write(&cycle).unwrap();
        assert!(path.starts_with(dir.path().join("id-7")));
        let text = std::fs::read_to_string(path).unwrap();
        assert_eq!(text, "angle,torque\n1.0,10.0\n2.0,20.0\n");
    }

    #[test]
    fn test_dot_identifiers_stay_inside_archive() {
        let dir = tempfile::tempdir().unwrap();
        let archive = DefectArchive::new(dir.path().join("graficas"));
        for identifier in ["..", ".", ""] {
            let cycle = ClosedCycle {
                identifier,
                timestamp: "2024-05-01 10:00:00",
                model_folder: "line-a",
                verdict: Verdict::NotOk,
                angle: &[1.0],
                torque: &[10.0],
            };
            let path = archive.write(&cycle).unwrap();
            assert!(path.starts_with(archive.dir()), "{} escaped", path.display());
            assert_eq!(path.parent().unwrap(), archive.dir().join("unknown"));
        }
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }
}
