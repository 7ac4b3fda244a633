//! Registration against a fixed reference mesh via principal axes.

use nalgebra::{Matrix3, Rotation3, SymmetricEigen, Vector3};
use std::path::Path;
use tracing::debug;

use super::{params_with_rotation, AlignmentStrategy};
use crate::data::{load_cloud, PointCloud};
use crate::error::AlignError;
use crate::pipeline::AlignmentParams;

const SKEW_EPSILON: f64 = 1e-12;

/// Principal axes of a cloud, sorted by variance (largest first).
#[derive(Debug, Clone, PartialEq)]
pub struct PrincipalAxes {
    pub centroid: Vector3<f64>,
    /// Columns are the axes; always a proper rotation.
    pub axes: Matrix3<f64>,
    pub variances: [f64; 3],
}

impl PrincipalAxes {
    /// `None` for fewer than three vertices or a cloud without spread.
    pub fn compute(cloud: &PointCloud) -> Option<Self> {
        if cloud.len() < 3 {
            return None;
        }

        let centroid = Vector3::from(cloud.centroid());
        let mut covariance = Matrix3::zeros();
        for p in cloud.points() {
            let d = Vector3::from(*p) - centroid;
            covariance += d * d.transpose();
        }
        covariance /= cloud.len() as f64;

        let eigen = SymmetricEigen::new(covariance);
        let mut order = [0usize, 1, 2];
        order.sort_by(|&a, &b| eigen.eigenvalues[b].total_cmp(&eigen.eigenvalues[a]));

        let variances = order.map(|i| eigen.eigenvalues[i]);
        if !(variances[0] > f64::EPSILON) {
            return None;
        }

        let mut primary = eigen.eigenvectors.column(order[0]).into_owned();
        let mut secondary = eigen.eigenvectors.column(order[1]).into_owned();
        orient_axis(&mut primary, cloud, &centroid);
        orient_axis(&mut secondary, cloud, &centroid);
        let tertiary = primary.cross(&secondary);

        Some(Self {
            centroid,
            axes: Matrix3::from_columns(&[primary, secondary, tertiary]),
            variances,
        })
    }
}

/// Fixes the sign of an axis from the shape itself: the third moment of the
/// projections is made positive, falling back to the largest component.
fn orient_axis(axis: &mut Vector3<f64>, cloud: &PointCloud, centroid: &Vector3<f64>) {
    let skew: f64 = cloud
        .points()
        .iter()
        .map(|p| (Vector3::from(*p) - centroid).dot(axis).powi(3))
        .sum();

    let flip = if skew.abs() > SKEW_EPSILON * cloud.len() as f64 {
        skew < 0.0
    } else {
        let largest = axis.iamax();
        axis[largest] < 0.0
    };
    if flip {
        *axis = -*axis;
    }
}

/// Reference mesh with its precomputed frame.
#[derive(Debug, Clone)]
pub struct ReferenceMesh {
    centroid: [f64; 3],
    diagonal: f64,
    axes: Option<PrincipalAxes>,
    vertex_count: usize,
}

impl ReferenceMesh {
    pub fn new(cloud: &PointCloud) -> Self {
        Self {
            centroid: cloud.centroid(),
            diagonal: cloud.diagonal(),
            axes: PrincipalAxes::compute(cloud),
            vertex_count: cloud.len(),
        }
    }

    /// Loads a reference mesh from a PLY or OBJ file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, AlignError> {
        let path = path.as_ref();
        let cloud = load_cloud(path).map_err(|source| AlignError::Input {
            file_id: path.display().to_string(),
            source,
        })?;
        Ok(Self::new(&cloud))
    }

    pub fn centroid(&self) -> [f64; 3] {
        self.centroid
    }

    pub fn diagonal(&self) -> f64 {
        self.diagonal
    }

    pub fn axes(&self) -> Option<&PrincipalAxes> {
        self.axes.as_ref()
    }

    pub fn vertex_count(&self) -> usize {
        self.vertex_count
    }
}

/// Rotates the scan's principal axes onto the reference's, rescales it to
/// the reference's bounding-box diagonal and moves it to the reference
/// centroid.
pub struct ReferenceMeshBased {
    reference: ReferenceMesh,
    preset: AlignmentParams,
    preserve_scale: bool,
}

impl ReferenceMeshBased {
    pub const ID: &'static str = "reference";

    pub fn new(reference: ReferenceMesh, preset: AlignmentParams, preserve_scale: bool) -> Self {
        Self {
            reference,
            preset,
            preserve_scale,
        }
    }

    pub fn reference(&self) -> &ReferenceMesh {
        &self.reference
    }

    /// `R = A_ref * A_input^T`, or the identity when either frame is
    /// degenerate.
    pub fn registration_rotation(&self, cloud: &PointCloud) -> Rotation3<f64> {
        match (self.reference.axes(), PrincipalAxes::compute(cloud)) {
            (Some(reference), Some(input)) => {
                Rotation3::from_matrix_unchecked(reference.axes * input.axes.transpose())
            }
            _ => Rotation3::identity(),
        }
    }
}

impl AlignmentStrategy for ReferenceMeshBased {
    fn id(&self) -> &str {
        Self::ID
    }

    fn compute_params(&self, cloud: &PointCloud) -> Result<AlignmentParams, AlignError> {
        let rotation = self.registration_rotation(cloud);

        let input_diagonal = cloud.diagonal();
        let scale = if self.preserve_scale || !(input_diagonal > f64::EPSILON) {
            1.0
        } else {
            self.reference.diagonal() / input_diagonal
        };
        let scale = if scale.is_finite() && scale > 0.0 { scale } else { 1.0 };

        debug!(
            scale,
            preserve_scale = self.preserve_scale,
            "Registered scan against reference mesh"
        );

        let base = self
            .preset
            .clone()
            .with_center_of_mass(true)
            .with_scale(scale)?
            .with_offset(self.reference.centroid())?;
        params_with_rotation(base, &rotation)
    }

    fn default_params(&self) -> AlignmentParams {
        self.preset.clone().with_center_of_mass(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{normalize, EULER_ORDER};
    use approx::assert_relative_eq;

    /// Asymmetric cloud with distinct variances along X, Y and Z.
    fn reference_cloud() -> PointCloud {
        let mut points = Vec::new();
        for i in 0..12 {
            let t = i as f64;
            points.push([t * 3.0 + (t * t) * 0.2, t.sin() * 4.0 + t * 0.5, (t * 0.7).cos() + t * 0.1]);
        }
        points.push([60.0, 2.0, 1.0]);
        points.push([5.0, 15.0, -2.0]);
        points.push([1.0, -3.0, 6.0]);
        PointCloud::from_points(points).unwrap()
    }

    fn transform(cloud: &PointCloud, rotation: &Rotation3<f64>, shift: [f64; 3]) -> PointCloud {
        let points = cloud
            .points()
            .iter()
            .map(|p| {
                let v = rotation * Vector3::from(*p) + Vector3::from(shift);
                [v.x, v.y, v.z]
            })
            .collect();
        PointCloud::from_points(points).unwrap()
    }

    #[test]
    fn test_principal_axes_form_proper_rotation() {
        let axes = PrincipalAxes::compute(&reference_cloud()).unwrap();
        assert_relative_eq!(axes.axes.determinant(), 1.0, epsilon = 1e-9);
        assert!(axes.variances[0] >= axes.variances[1]);
        assert!(axes.variances[1] >= axes.variances[2]);
    }

    #[test]
    fn test_recovers_known_rotation() {
        let reference = reference_cloud();
        let known = EULER_ORDER.rotation(25.0, -40.0, 130.0);
        let scan = transform(&reference, &known, [100.0, -50.0, 20.0]);

        let strategy = ReferenceMeshBased::new(ReferenceMesh::new(&reference), AlignmentParams::identity(), true);
        let rotation = strategy.registration_rotation(&scan);
        assert_relative_eq!(*rotation.matrix(), *known.inverse().matrix(), epsilon = 1e-6);

        let params = strategy.compute_params(&scan).unwrap();
        let aligned = normalize(&scan, &params);
        for (a, b) in aligned.points().iter().zip(reference.points()) {
            for axis in 0..3 {
                assert_relative_eq!(a[axis], b[axis], epsilon = 1e-6);
            }
        }
    }

    #[test]
    fn test_scale_matches_reference_diagonal() {
        let reference = reference_cloud();
        let scan = PointCloud::from_points(reference.points().iter().map(|p| [p[0] * 0.1, p[1] * 0.1, p[2] * 0.1]).collect())
            .unwrap();

        let scaled = ReferenceMeshBased::new(ReferenceMesh::new(&reference), AlignmentParams::identity(), false);
        assert_relative_eq!(scaled.compute_params(&scan).unwrap().scale(), 10.0, epsilon = 1e-9);

        let preserving = ReferenceMeshBased::new(ReferenceMesh::new(&reference), AlignmentParams::identity(), true);
        assert_eq!(preserving.compute_params(&scan).unwrap().scale(), 1.0);
    }

    #[test]
    fn test_degenerate_input_uses_identity_rotation() {
        let strategy = ReferenceMeshBased::new(ReferenceMesh::new(&reference_cloud()), AlignmentParams::identity(), false);
        let scan = PointCloud::from_points(vec![[1.0, 1.0, 1.0], [2.0, 2.0, 2.0]]).unwrap();
        assert_eq!(strategy.registration_rotation(&scan), Rotation3::identity());

        let params = strategy.compute_params(&scan).unwrap();
        assert_eq!(params.rotation(), [0.0, 0.0, 0.0]);
        assert_eq!(params.offset(), strategy.reference().centroid());
    }
}
