//! Minimal Wavefront OBJ reader: only `v` records are used.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use super::{MeshIoError, PointCloud};

pub fn decode_obj<R: BufRead>(reader: R) -> Result<PointCloud, MeshIoError> {
    let mut points = Vec::new();

    for (line_no, line) in reader.lines().enumerate() {
        let line = line?;
        let mut tokens = line.split_whitespace();
        if tokens.next() != Some("v") {
            continue;
        }

        let mut coords = [0.0f64; 3];
        for slot in coords.iter_mut() {
            let token = tokens.next().ok_or_else(|| MeshIoError::Malformed {
                format: "OBJ",
                message: format!("line {}: vertex needs three coordinates", line_no + 1),
            })?;
            *slot = token.parse().map_err(|_| MeshIoError::Malformed {
                format: "OBJ",
                message: format!("line {}: cannot parse '{}'", line_no + 1, token),
            })?;
        }
        // trailing w or vertex colors are ignored
        points.push(coords);
    }

    Ok(PointCloud::from_points(points)?)
}

pub fn read_obj(path: impl AsRef<Path>) -> Result<PointCloud, MeshIoError> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|source| MeshIoError::Read {
        path: path.display().to_string(),
        source,
    })?;
    decode_obj(BufReader::new(file))
}
