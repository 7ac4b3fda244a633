//! Anatomical alignment.
//!
//! Rotates a scan so that its detected anatomical frame matches the
//! canonical one: right ear along +X, top of head along +Y, nose along +Z.
//! The scan is then scaled so that its face height matches a target.

use nalgebra::{Matrix3, Rotation3, Vector3};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{params_with_rotation, AlignmentStrategy};
use crate::data::PointCloud;
use crate::error::AlignError;
use crate::pipeline::AlignmentParams;

/// Average human face height the anatomical strategy scales to.
pub const DEFAULT_FACE_HEIGHT: f64 = 190.0;

const DEGENERATE_EXTENT: f64 = 1e-9;

/// Coarse guess of how a scan is oriented, taken from its bounding box.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrientationGuess {
    /// Height along Y, width along X, depth along Z.
    Standard,
    /// Height along Z, width along Y, depth along X.
    ZUp,
    /// Height along X, width along Z, depth along Y.
    XUp,
    /// No ordering of extents matched; handled as `Standard`.
    Unknown,
}

impl OrientationGuess {
    /// Guesses from the extents along X, Y and Z.
    pub fn from_extents([w, h, d]: [f64; 3]) -> Self {
        if h > w && w > d {
            OrientationGuess::Standard
        } else if d > h && h > w {
            OrientationGuess::ZUp
        } else if w > d && d > h {
            OrientationGuess::XUp
        } else {
            OrientationGuess::Unknown
        }
    }

    /// Axis index of the head's up direction.
    pub fn up_axis(self) -> usize {
        match self {
            OrientationGuess::Standard | OrientationGuess::Unknown => 1,
            OrientationGuess::ZUp => 2,
            OrientationGuess::XUp => 0,
        }
    }

    /// Axis index the nose points along.
    pub fn nose_axis(self) -> usize {
        match self {
            OrientationGuess::Standard | OrientationGuess::Unknown => 2,
            OrientationGuess::ZUp => 0,
            OrientationGuess::XUp => 1,
        }
    }
}

/// Detected anatomical frame of a scan.
#[derive(Debug, Clone, PartialEq)]
pub struct AnatomicalFrame {
    pub orientation: OrientationGuess,
    /// Maps the scan's (right, up, nose) frame onto the canonical frame.
    pub rotation: Rotation3<f64>,
    /// Applied before `rotation`.
    pub translation: [f64; 3],
    /// Extent of the scan along its up direction.
    pub face_height: f64,
}

/// Finds the anatomical frame of a scan. Implementations may use the
/// bounding box, landmarks or anything else.
pub trait AnatomicalFrameDetector: Send + Sync {
    fn detect(&self, cloud: &PointCloud) -> Result<AnatomicalFrame, AlignError>;
}

/// Detector based on the ordering of bounding-box extents.
#[derive(Debug, Clone, Copy, Default)]
pub struct BoundsFrameDetector;

impl AnatomicalFrameDetector for BoundsFrameDetector {
    fn detect(&self, cloud: &PointCloud) -> Result<AnatomicalFrame, AlignError> {
        let extents = cloud.extents();
        let orientation = OrientationGuess::from_extents(extents);

        let mut up = Vector3::zeros();
        up[orientation.up_axis()] = 1.0;
        let mut nose = Vector3::zeros();
        nose[orientation.nose_axis()] = 1.0;

        let rotation = frame_to_canonical(&up, &nose);
        let [cx, cy, cz] = cloud.centroid();

        Ok(AnatomicalFrame {
            orientation,
            rotation,
            translation: [-cx, -cy, -cz],
            face_height: extents[orientation.up_axis()],
        })
    }
}

/// Rotation taking the frame spanned by `up` and `nose` onto
/// (+X right, +Y up, +Z nose), with right = up x nose.
fn frame_to_canonical(up: &Vector3<f64>, nose: &Vector3<f64>) -> Rotation3<f64> {
    let nose = nose.normalize();
    let right = up.cross(&nose).normalize();
    let up = nose.cross(&right);
    let from = Matrix3::from_columns(&[right, up, nose]);
    // canonical frame is the identity, so R = I * from^T
    Rotation3::from_matrix_unchecked(from.transpose())
}

/// Rotation and translation of the scan's anatomical frame as found by the
/// bounding-box detector.
pub fn detect_anatomical_frame(cloud: &PointCloud) -> Result<(Rotation3<f64>, [f64; 3]), AlignError> {
    let frame = BoundsFrameDetector.detect(cloud)?;
    Ok((frame.rotation, frame.translation))
}

pub struct Anatomical {
    detector: Box<dyn AnatomicalFrameDetector>,
    preset: AlignmentParams,
    target_face_height: f64,
}

impl Anatomical {
    pub const ID: &'static str = "anatomical";

    pub fn new(preset: AlignmentParams, target_face_height: f64) -> Self {
        Self::with_detector(Box::new(BoundsFrameDetector), preset, target_face_height)
    }

    pub fn with_detector(
        detector: Box<dyn AnatomicalFrameDetector>,
        preset: AlignmentParams,
        target_face_height: f64,
    ) -> Self {
        Self {
            detector,
            preset,
            target_face_height,
        }
    }
}

impl Default for Anatomical {
    fn default() -> Self {
        Self::new(AlignmentParams::identity(), DEFAULT_FACE_HEIGHT)
    }
}

impl AlignmentStrategy for Anatomical {
    fn id(&self) -> &str {
        Self::ID
    }

    fn compute_params(&self, cloud: &PointCloud) -> Result<AlignmentParams, AlignError> {
        let frame = self.detector.detect(cloud)?;

        let scale = if frame.face_height.is_finite() && frame.face_height > DEGENERATE_EXTENT {
            self.target_face_height / frame.face_height
        } else {
            1.0
        };

        // p' = s R (p + t) = s R p + s R t
        let shift = frame.rotation * Vector3::from(frame.translation) * scale;

        debug!(
            orientation = ?frame.orientation,
            face_height = frame.face_height,
            scale,
            "Detected anatomical frame"
        );

        let base = self
            .preset
            .clone()
            .with_center_of_mass(false)
            .with_scale(scale)?
            .with_offset([shift.x, shift.y, shift.z])?;
        params_with_rotation(base, &frame.rotation)
    }

    fn default_params(&self) -> AlignmentParams {
        self.preset.clone().with_center_of_mass(true)
    }
}
