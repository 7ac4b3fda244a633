use approx::assert_relative_eq;
use rand::{Rng, SeedableRng};
use scan_prealign::data::{decode_ply, encode_ply, load_cloud, save_cloud, MeshIoError, PlyFormat};
use scan_prealign::PointCloud;
use std::fs;
use std::io::Cursor;
use tempfile::TempDir;

fn random_cloud(seed: u64, n: usize) -> PointCloud {
    let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
    let points = (0..n)
        .map(|_| [rng.gen_range(-500.0..500.0), rng.gen_range(-500.0..500.0), rng.gen_range(0.0..1e-3)])
        .collect();
    let normals = (0..n)
        .map(|_| {
            let v: [f64; 3] = [rng.gen_range(-1.0..1.0), rng.gen_range(-1.0..1.0), rng.gen_range(-1.0..1.0)];
            let len = (v[0] * v[0] + v[1] * v[1] + v[2] * v[2]).sqrt().max(1e-9);
            [v[0] / len, v[1] / len, v[2] / len]
        })
        .collect();
    let colors = (0..n).map(|_| [rng.gen(), rng.gen(), rng.gen()]).collect();
    PointCloud::new(points, Some(normals), Some(colors)).unwrap()
}

fn assert_close(a: &PointCloud, b: &PointCloud) {
    assert_eq!(a.len(), b.len());
    for (p, q) in a.points().iter().zip(b.points()) {
        for axis in 0..3 {
            assert_relative_eq!(p[axis], q[axis], epsilon = 1e-6);
        }
    }
    for (p, q) in a.normals().unwrap().iter().zip(b.normals().unwrap()) {
        for axis in 0..3 {
            assert_relative_eq!(p[axis], q[axis], epsilon = 1e-6);
        }
    }
    assert_eq!(a.colors(), b.colors());
}

#[test]
fn test_ascii_and_binary_preserve_the_cloud() {
    let cloud = random_cloud(7, 500);
    for format in [PlyFormat::Ascii, PlyFormat::BinaryLittleEndian] {
        let mut bytes = Vec::new();
        encode_ply(&cloud, format, &mut bytes).unwrap();
        let decoded = decode_ply(Cursor::new(bytes)).unwrap();
        assert_close(&cloud, &decoded);
    }
}

#[test]
fn test_save_and_load_through_the_loader() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("scan.PLY");
    let cloud = random_cloud(11, 64);

    save_cloud(&path, &cloud).unwrap();
    assert_close(&cloud, &load_cloud(&path).unwrap());
}

#[test]
fn test_obj_reference_mesh_vertices_only() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("reference.obj");
    fs::write(
        &path,
        "# reference head\nv 0 0 0\nv 1.5 0 0\nvn 0 0 1\nvt 0.5 0.5\nv 0 2.5 -1\nf 1 2 3\n",
    )
    .unwrap();

    let cloud = load_cloud(&path).unwrap();
    assert_eq!(cloud.points(), &[[0.0, 0.0, 0.0], [1.5, 0.0, 0.0], [0.0, 2.5, -1.0]]);
    assert!(cloud.normals().is_none());
}

#[test]
fn test_unknown_extension_is_rejected() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("scan.stl");
    fs::write(&path, b"solid").unwrap();
    assert!(matches!(load_cloud(&path), Err(MeshIoError::UnsupportedExtension(ext)) if ext == "stl"));
}

#[test]
fn test_missing_file_is_a_read_error() {
    assert!(matches!(
        load_cloud("/nonexistent/scan.ply"),
        Err(MeshIoError::Read { .. })
    ));
}
