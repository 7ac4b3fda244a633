//! Alignment strategies.
//!
//! A strategy only looks at the geometry of a scan (and whatever auxiliary
//! data it was built with) and proposes [`AlignmentParams`]. It never talks
//! to the predictor; scoring is the selector's job.

pub mod anatomical;
pub mod center;
pub mod reference;
pub mod registry;

pub use anatomical::*;
pub use center::*;
pub use reference::*;
pub use registry::*;

use nalgebra::Rotation3;

use crate::data::{normalize, PointCloud, EULER_ORDER};
use crate::error::AlignError;
use crate::pipeline::{AlignmentParams, AlignmentResult};

/// A named way of pre-aligning a scan.
pub trait AlignmentStrategy: Send + Sync {
    /// Stable identifier used in candidate lists and reports.
    fn id(&self) -> &str;

    /// Estimates parameters for this particular cloud.
    fn compute_params(&self, cloud: &PointCloud) -> Result<AlignmentParams, AlignError>;

    /// The strategy's preset without any input-dependent estimation.
    fn default_params(&self) -> AlignmentParams;

    /// Computes parameters and applies them.
    fn align(&self, cloud: &PointCloud) -> Result<AlignmentResult, AlignError> {
        let params = self.compute_params(cloud)?;
        self.apply(cloud, params)
    }

    /// Applies given parameters, tagging the result with this strategy.
    /// Parameters that push coordinates out of the finite range are a
    /// configuration error.
    fn apply(&self, cloud: &PointCloud, params: AlignmentParams) -> Result<AlignmentResult, AlignError> {
        let transformed = normalize(cloud, &params);
        if !transformed.is_finite() {
            return Err(AlignError::config(format!(
                "{}: transformed cloud has non-finite coordinates (scale {})",
                self.id(),
                params.scale()
            )));
        }
        Ok(AlignmentResult::new(self.id(), transformed, params))
    }
}

/// Converts a rotation matrix into parameter angles using the crate-wide
/// Euler order.
pub(crate) fn params_with_rotation(
    base: AlignmentParams,
    rotation: &Rotation3<f64>,
) -> Result<AlignmentParams, AlignError> {
    base.with_rotation(EULER_ORDER.angles(rotation))
}
