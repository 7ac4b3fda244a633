use std::fs;
use std::path::{Path, PathBuf};

use super::AlignmentResult;
use crate::data::{save_cloud, MeshIoError};

/// Persists pre-aligned clouds before they are scored.
pub trait IntermediateWriter: Send + Sync {
    /// Writes the aligned cloud and returns where it went.
    fn write(&self, file_id: &str, result: &AlignmentResult) -> Result<PathBuf, MeshIoError>;
}

/// Directory name used next to the output when pre-aligned clouds are
/// requested without saying where.
pub const DEFAULT_INTERMEDIATE_DIR: &str = "pre_aligned";

/// Where pre-aligned clouds go: `explicit` when given, otherwise
/// `pre_aligned/` beside `anchor` when `wanted`, otherwise nowhere.
pub fn resolve_intermediate_dir(
    explicit: Option<PathBuf>,
    wanted: bool,
    anchor: &Path,
) -> Option<PathBuf> {
    explicit.or_else(|| {
        wanted.then(|| {
            anchor
                .parent()
                .unwrap_or_else(|| Path::new(""))
                .join(DEFAULT_INTERMEDIATE_DIR)
        })
    })
}

/// Writes `<dir>/<file_id>_<strategy>.ply`. File ids containing `/` keep
/// their category directories.
#[derive(Debug, Clone)]
pub struct PlyDirectoryWriter {
    dir: PathBuf,
}

impl PlyDirectoryWriter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, file_id: &str, strategy_id: &str) -> PathBuf {
        self.dir.join(format!("{}_{}.ply", file_id, strategy_id))
    }
}

impl IntermediateWriter for PlyDirectoryWriter {
    fn write(&self, file_id: &str, result: &AlignmentResult) -> Result<PathBuf, MeshIoError> {
        let path = self.path_for(file_id, result.strategy_id());
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| MeshIoError::Write {
                path: parent.display().to_string(),
                source,
            })?;
        }
        save_cloud(&path, result.transformed())?;
        Ok(path)
    }
}
