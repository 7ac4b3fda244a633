use nalgebra::{Rotation3, Vector3};
use rayon::prelude::*;

use super::PointCloud;
use crate::pipeline::AlignmentParams;

/// Order in which the three Euler angles are composed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EulerOrder {
    /// Extrinsic X, then Y, then Z: `R = Rz * Ry * Rx`.
    Xyz,
    /// Extrinsic Z, then Y, then X: `R = Rx * Ry * Rz`.
    Zyx,
}

/// Euler order used by every strategy and by the normalizer.
pub const EULER_ORDER: EulerOrder = EulerOrder::Xyz;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransformStage {
    Center,
    Rotate,
    Scale,
    Offset,
}

/// Order in which the normalizer applies its stages to every vertex.
pub const TRANSFORM_STAGES: [TransformStage; 4] = [
    TransformStage::Center,
    TransformStage::Rotate,
    TransformStage::Scale,
    TransformStage::Offset,
];

impl EulerOrder {
    /// Rotation for angles given in degrees.
    pub fn rotation(self, rot_x: f64, rot_y: f64, rot_z: f64) -> Rotation3<f64> {
        let (x, y, z) = (rot_x.to_radians(), rot_y.to_radians(), rot_z.to_radians());
        match self {
            EulerOrder::Xyz => Rotation3::from_euler_angles(x, y, z),
            EulerOrder::Zyx => {
                Rotation3::from_axis_angle(&Vector3::x_axis(), x)
                    * Rotation3::from_axis_angle(&Vector3::y_axis(), y)
                    * Rotation3::from_axis_angle(&Vector3::z_axis(), z)
            }
        }
    }

    /// Recovers `[rot_x, rot_y, rot_z]` in degrees from a rotation composed
    /// in this order. Angles are not normalized.
    pub fn angles(self, rotation: &Rotation3<f64>) -> [f64; 3] {
        let (x, y, z) = match self {
            EulerOrder::Xyz => rotation.euler_angles(),
            EulerOrder::Zyx => {
                // Rx*Ry*Rz transposed is Rz(-z)*Ry(-y)*Rx(-x)
                let (x, y, z) = rotation.inverse().euler_angles();
                (-x, -y, -z)
            }
        };
        [x.to_degrees(), y.to_degrees(), z.to_degrees()]
    }
}

/// Applies alignment parameters to point clouds. Pure and stateless apart
/// from the chosen Euler order.
#[derive(Debug, Clone, Copy)]
pub struct Normalizer {
    order: EulerOrder,
}

impl Default for Normalizer {
    fn default() -> Self {
        Self { order: EULER_ORDER }
    }
}

impl Normalizer {
    pub fn with_order(order: EulerOrder) -> Self {
        Self { order }
    }

    pub fn order(&self) -> EulerOrder {
        self.order
    }

    /// Returns a new cloud with `scale * R * (p - c) + offset` applied to
    /// every vertex. Normals are rotated only and colors copied.
    pub fn apply(&self, cloud: &PointCloud, params: &AlignmentParams) -> PointCloud {
        let [rot_x, rot_y, rot_z] = params.rotation();
        let rotation = self.order.rotation(rot_x, rot_y, rot_z);
        let matrix = *rotation.matrix();
        let center = if params.align_center_of_mass() {
            Vector3::from(cloud.centroid())
        } else {
            Vector3::zeros()
        };
        let scale = params.scale();
        let offset = Vector3::from(params.offset());

        let points: Vec<[f64; 3]> = cloud
            .points()
            .par_iter()
            .map(|p| {
                let mut v = Vector3::from(*p);
                for stage in TRANSFORM_STAGES {
                    v = match stage {
                        TransformStage::Center => v - center,
                        TransformStage::Rotate => matrix * v,
                        TransformStage::Scale => v * scale,
                        TransformStage::Offset => v + offset,
                    };
                }
                [v.x, v.y, v.z]
            })
            .collect();

        let normals = cloud.normals().map(|normals| {
            normals
                .par_iter()
                .map(|n| {
                    let v = matrix * Vector3::from(*n);
                    [v.x, v.y, v.z]
                })
                .collect()
        });

        let colors = cloud.colors().map(|c| c.to_vec());

        PointCloud::from_transformed(points, normals, colors)
    }
}

/// Normalizes `cloud` with the default Euler order.
pub fn normalize(cloud: &PointCloud, params: &AlignmentParams) -> PointCloud {
    Normalizer::default().apply(cloud, params)
}
