use std::cmp::Ordering;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use super::{read_obj, read_ply, write_ply, MeshIoError, PlyFormat, PointCloud};
use crate::error::AlignError;

/// Loads a point cloud, dispatching on the file extension.
pub fn load_cloud<P: AsRef<Path>>(path: P) -> Result<PointCloud, MeshIoError> {
    let path = path.as_ref();
    match extension_of(path).as_deref() {
        Some("ply") => read_ply(path),
        Some("obj") => read_obj(path),
        other => Err(MeshIoError::UnsupportedExtension(
            other.unwrap_or_default().to_string(),
        )),
    }
}

/// Saves a point cloud as binary PLY.
pub fn save_cloud<P: AsRef<Path>>(path: P, cloud: &PointCloud) -> Result<(), MeshIoError> {
    let path = path.as_ref();
    match extension_of(path).as_deref() {
        Some("ply") => write_ply(path, cloud, PlyFormat::BinaryLittleEndian),
        other => Err(MeshIoError::UnsupportedExtension(
            other.unwrap_or_default().to_string(),
        )),
    }
}

fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

/// A scan file found under a corpus root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredScan {
    /// Path relative to the root, `/`-separated, without extension.
    pub file_id: String,
    /// Name of the parent directory; `None` directly under the root.
    pub category: Option<String>,
    pub path: PathBuf,
}

/// Recursively lists scan files under `root` whose extension is in
/// `extensions`, ordered by category and then numeric-aware stem.
pub fn discover_scans<P: AsRef<Path>>(
    root: P,
    extensions: &[String],
) -> Result<Vec<DiscoveredScan>, AlignError> {
    let root = root.as_ref();
    if !root.is_dir() {
        return Err(AlignError::fatal(root, "corpus root is not a readable directory"));
    }

    let wanted: Vec<String> = extensions
        .iter()
        .map(|e| e.trim_start_matches('.').to_ascii_lowercase())
        .collect();

    let mut scans = Vec::new();
    // symlinked directories are listed but never entered
    for entry in WalkDir::new(root).min_depth(1) {
        let entry = entry.map_err(|e| {
            let at = e.path().unwrap_or(root).to_path_buf();
            AlignError::fatal(at, format!("cannot walk corpus: {}", e))
        })?;
        let is_file = entry.file_type().is_file()
            || (entry.path_is_symlink() && entry.path().is_file());
        if !is_file {
            continue;
        }
        let matches = extension_of(entry.path()).is_some_and(|ext| wanted.contains(&ext));
        if matches {
            scans.push(describe(root, entry.into_path()));
        }
    }

    scans.sort_by(|a, b| {
        a.category
            .cmp(&b.category)
            .then_with(|| natural_cmp(&a.file_id, &b.file_id))
    });
    Ok(scans)
}

fn describe(root: &Path, path: PathBuf) -> DiscoveredScan {
    let relative = path.strip_prefix(root).unwrap_or(&path).with_extension("");
    let file_id = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/");
    let category = path
        .parent()
        .filter(|parent| *parent != root)
        .and_then(|parent| parent.file_name())
        .map(|name| name.to_string_lossy().into_owned());

    DiscoveredScan {
        file_id,
        category,
        path,
    }
}

/// Compares strings treating runs of ASCII digits as numbers, so that
/// `2` sorts before `10`.
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    let mut a = a.chars().peekable();
    let mut b = b.chars().peekable();

    loop {
        match (a.peek().copied(), b.peek().copied()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(x), Some(y)) if x.is_ascii_digit() && y.is_ascii_digit() => {
                let left = take_digits(&mut a);
                let right = take_digits(&mut b);
                let left_trimmed = left.trim_start_matches('0');
                let right_trimmed = right.trim_start_matches('0');
                let ordering = left_trimmed
                    .len()
                    .cmp(&right_trimmed.len())
                    .then_with(|| left_trimmed.cmp(right_trimmed))
                    .then_with(|| left.len().cmp(&right.len()));
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
            (Some(x), Some(y)) => {
                if x != y {
                    return x.cmp(&y);
                }
                a.next();
                b.next();
            }
        }
    }
}

fn take_digits(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) -> String {
    let mut digits = String::new();
    while let Some(c) = chars.peek().copied().filter(|c| c.is_ascii_digit()) {
        digits.push(c);
        chars.next();
    }
    digits
}
